//! `POST /upload` (§6): multipart form field `file` → `{url, filename,
//! mime_type}`. The concrete implementation of the externally-specified
//! "media upload to a blob store" collaborator contract — see
//! `nikabot_core::storage::FileStore`.

use std::sync::Arc;

use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value};
use tracing::warn;

use crate::app::AppState;

pub async fn upload_handler(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    while let Some(field) = multipart.next_field().await.map_err(|e| {
        warn!(error = %e, "upload: malformed multipart body");
        (StatusCode::BAD_REQUEST, Json(json!({"error": "malformed multipart body"})))
    })? {
        if field.name() != Some("file") {
            continue;
        }

        let ext = field
            .file_name()
            .and_then(|name| name.rsplit('.').next())
            .filter(|ext| !ext.is_empty())
            .map(str::to_string);
        let mime_type = field
            .content_type()
            .map(str::to_string)
            .unwrap_or_else(|| "application/octet-stream".to_string());

        let bytes = field.bytes().await.map_err(|e| {
            warn!(error = %e, "upload: failed to read multipart field");
            (StatusCode::BAD_REQUEST, Json(json!({"error": "failed to read upload"})))
        })?;

        let uploaded = state
            .files
            .save(&bytes, ext.as_deref(), &mime_type)
            .await
            .map_err(|e| {
                warn!(error = %e, "upload: failed to persist file");
                (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": "failed to persist file"})))
            })?;

        return Ok(Json(json!({
            "url": uploaded.url,
            "filename": uploaded.filename,
            "mime_type": uploaded.mime_type,
        })));
    }

    Err((StatusCode::BAD_REQUEST, Json(json!({"error": "missing 'file' field"}))))
}
