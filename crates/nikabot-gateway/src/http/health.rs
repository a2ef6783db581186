//! `GET /healthz` (§6) — liveness probe.

use axum::extract::State;
use std::sync::Arc;

use crate::app::AppState;

pub async fn healthz_handler(State(_state): State<Arc<AppState>>) -> &'static str {
    "ok"
}
