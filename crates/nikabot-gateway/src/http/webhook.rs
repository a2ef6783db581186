//! Webhook ingress endpoint — `POST /tg/webhook?secret=...` (§6).
//!
//! Grounded on the teacher's `http/webhooks.rs` source-authenticate-then-
//! forward shape, simplified to the single fixed secret this contract
//! specifies rather than a per-source auth-mode table.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use teloxide::types::Update;
use tracing::warn;

use crate::app::AppState;

#[derive(Debug, Deserialize)]
pub struct WebhookQuery {
    secret: String,
}

/// POST /tg/webhook?secret=S — 403 on secret mismatch, else decodes the
/// platform `Update` and dispatches it into the turn-coordination engine.
pub async fn webhook_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<WebhookQuery>,
    body: axum::body::Bytes,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    if query.secret != state.config.core.webhook_secret {
        warn!("webhook: secret mismatch");
        return Err((StatusCode::FORBIDDEN, Json(json!({"ok": false}))));
    }

    let update: Update = serde_json::from_slice(&body).map_err(|e| {
        warn!(error = %e, "webhook: invalid update payload");
        (StatusCode::BAD_REQUEST, Json(json!({"ok": false})))
    })?;

    if let Err(e) = state.bot_adapter.dispatch_update(update).await {
        warn!(error = %e, "webhook: dispatch failed");
    }

    Ok(Json(json!({"ok": true})))
}
