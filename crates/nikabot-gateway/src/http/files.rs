//! `GET /files/{filename}` (§6): serves previously uploaded bytes, 404 if
//! missing.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};

use nikabot_core::storage::StorageError;

use crate::app::AppState;

pub async fn files_handler(State(state): State<Arc<AppState>>, Path(filename): Path<String>) -> Response {
    match state.files.read(&filename).await {
        Ok(bytes) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, mime_guess(&filename))],
            bytes,
        )
            .into_response(),
        Err(StorageError::NotFound(_)) => StatusCode::NOT_FOUND.into_response(),
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

fn mime_guess(filename: &str) -> &'static str {
    match filename.rsplit('.').next().unwrap_or("") {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "mp3" => "audio/mpeg",
        "ogg" | "oga" => "audio/ogg",
        "webp" => "image/webp",
        _ => "application/octet-stream",
    }
}
