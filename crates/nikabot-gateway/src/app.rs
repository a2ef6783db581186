//! Central shared state passed as `Arc<AppState>` to every Axum handler,
//! grounded on the teacher's `app.rs` shape (one struct, one constructor,
//! one router-assembly function).

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;

use nikabot_core::storage::FileStore;
use nikabot_core::{Metrics, NikabotConfig};
use nikabot_queue::TaskQueue;
use nikabot_store::Store;
use nikabot_telegram::BotAdapter;

pub struct AppState {
    pub config: Arc<NikabotConfig>,
    pub store: Arc<Store>,
    pub queue: Arc<TaskQueue>,
    pub metrics: Arc<Metrics>,
    pub files: Arc<FileStore>,
    pub bot_adapter: Arc<BotAdapter>,
}

impl AppState {
    pub fn new(
        config: Arc<NikabotConfig>,
        store: Arc<Store>,
        queue: Arc<TaskQueue>,
        metrics: Arc<Metrics>,
        files: Arc<FileStore>,
        bot_adapter: Arc<BotAdapter>,
    ) -> Self {
        Self {
            config,
            store,
            queue,
            metrics,
            files,
            bot_adapter,
        }
    }
}

/// Assembles the full Axum router (§6 HTTP endpoints).
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/tg/webhook", post(crate::http::webhook::webhook_handler))
        .route("/upload", post(crate::http::upload::upload_handler))
        .route("/files/{filename}", get(crate::http::files::files_handler))
        .route("/healthz", get(crate::http::health::healthz_handler))
        .route("/metrics", get(crate::http::metrics::metrics_handler))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
