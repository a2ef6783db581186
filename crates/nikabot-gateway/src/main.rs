use std::net::SocketAddr;
use std::sync::Arc;

use teloxide::Bot;
use tokio::sync::watch;
use tracing::{info, warn};

use nikabot_core::storage::FileStore;
use nikabot_core::{Metrics, NikabotConfig};
use nikabot_proactive::{OutboxPump, ProactiveScheduler};
use nikabot_queue::TaskQueue;
use nikabot_store::Store;
use nikabot_telegram::{recovery, BotAdapter, TelegramSender};
use nikabot_turn::{DebounceBuffer, QueueWorker, TurnProcessor};
use nikabot_upstream::UpstreamClient;

mod app;
mod http;

/// Telegram's Bot API download ceiling for bots (§4.10's media rehosting
/// step never sees a larger file regardless of this value).
const MAX_ATTACHMENT_BYTES: u64 = 20 * 1024 * 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::var("NIKABOT_CONFIG").ok();
    let config = NikabotConfig::load(config_path.as_deref()).expect("failed to load configuration");

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.core.log_level.clone())),
        )
        .init();

    let config = Arc::new(config);
    let metrics = Arc::new(Metrics::new().expect("static metric descriptors never collide"));
    let store = Arc::new(Store::open(&config.core.db_dsn)?);
    let queue = Arc::new(TaskQueue::open(&config.core.db_dsn)?);
    let files = Arc::new(FileStore::new(
        config.core.upload_dir.clone(),
        config.core.public_base_url.clone(),
    ));

    let upstream = Arc::new(UpstreamClient::new(
        config.core.n8n_webhook_url.clone(),
        Some(config.core.public_base_url.clone()),
        metrics.clone(),
    ));

    let bot = Bot::new(config.core.telegram_bot_token.clone());
    let sender = Arc::new(TelegramSender::new(bot.clone()));

    let processor = TurnProcessor::new(
        store.clone(),
        upstream.clone(),
        metrics.clone(),
        config.clone(),
        sender.clone(),
    );
    let buffer = DebounceBuffer::new(store.clone(), processor.clone());
    let bot_adapter = Arc::new(BotAdapter::new(
        bot,
        buffer.clone(),
        processor.clone(),
        (*files).clone(),
        sender.clone(),
        MAX_ATTACHMENT_BYTES,
    ));

    recovery::log_recovery_scope(&store);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let scheduler = ProactiveScheduler::new(
        store.clone(),
        upstream.clone(),
        metrics.clone(),
        config.clone(),
        sender.clone(),
    );
    tokio::spawn(scheduler.run(shutdown_rx.clone()));

    let outbox = OutboxPump::new(store.clone(), sender.clone(), metrics.clone());
    tokio::spawn(outbox.run(shutdown_rx.clone()));

    let worker = QueueWorker::new(
        queue.clone(),
        processor.clone(),
        metrics.clone(),
        config.queue.lease_seconds,
        config.queue.heartbeat_seconds,
    );
    tokio::spawn(worker.run(shutdown_rx.clone()));

    tokio::spawn(nikabot_turn::run_watchdog(
        queue.clone(),
        config.queue.watchdog_interval_seconds,
        shutdown_rx.clone(),
    ));

    if let Some(userbot) = &config.userbot {
        let bot_token = userbot.bot_token.clone();
        let buffer = buffer.clone();
        let processor = processor.clone();
        let files = files.clone();
        let sender = sender.clone();
        tokio::spawn(async move {
            nikabot_telegram::userbot_adapter::run(
                &bot_token,
                buffer,
                processor,
                files,
                sender,
                MAX_ATTACHMENT_BYTES,
            )
            .await;
        });
    }

    let state = Arc::new(app::AppState::new(
        config.clone(),
        store.clone(),
        queue.clone(),
        metrics.clone(),
        files.clone(),
        bot_adapter.clone(),
    ));
    let router = app::build_router(state);

    let addr: SocketAddr = format!("{}:{}", config.core.app_host, config.core.app_port).parse()?;
    info!("nikabot gateway listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            warn!(error = %e, "http server exited with error");
        }
    });

    tokio::signal::ctrl_c().await.ok();
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);
    server.abort();
    Ok(())
}
