//! virtlab HTTP server binary.
//!
//! Boots the store, event bus, and background runner from environment
//! configuration and serves the meeting API.
//!
//! # Environment Variables
//!
//! - `PORT` — HTTP port (default: 8080)
//! - `DATABASE_URL` — SQLite path or `sqlite://` DSN (default: virtlab.db)
//! - `REDIS_URL` — selects the broker-backed event bus when set
//! - `RUST_LOG` — tracing filter (default: "info,virtlab=debug")
//! - Provider keys: `OPENAI_API_KEY`, `ANTHROPIC_API_KEY`, `DEEPSEEK_API_KEY`

use std::sync::Arc;

use anyhow::Context;

use virtlab::bus::broker::{BrokerBus, LoopbackBroker};
use virtlab::bus::in_memory::InMemoryBus;
use virtlab::bus::EventBus;
use virtlab::config::Settings;
use virtlab::llm::LlmClient;
use virtlab::runner::BackgroundRunner;
use virtlab::server::{app_router, AppState};
use virtlab::store::sqlite::SqliteStore;
use virtlab::webhooks::WebhookDispatcher;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,virtlab=debug".into()),
        )
        .init();

    let settings = Settings::from_env();

    let store = Arc::new(
        SqliteStore::open(settings.sqlite_path())
            .with_context(|| format!("opening store at {}", settings.sqlite_path()))?,
    );

    // Bus backend is fixed at startup. The broker transport is pluggable;
    // without an external client wired in, the loopback transport keeps the
    // broker code path live within this process.
    let bus: Arc<dyn EventBus> = if settings.redis_url.is_some() {
        tracing::info!("event bus: broker-backed (REDIS_URL set)");
        Arc::new(BrokerBus::new(Arc::new(LoopbackBroker::new())))
    } else {
        tracing::info!("event bus: in-process");
        Arc::new(InMemoryBus::new())
    };

    let llm = Arc::new(LlmClient::new(settings.provider_keys.clone()));
    let webhooks = Arc::new(WebhookDispatcher::new(store.clone()));
    let runner = BackgroundRunner::new(store.clone(), bus.clone(), llm.clone())
        .with_webhooks(webhooks);

    // Meetings left `running` by an unclean shutdown cannot have a live
    // worker in this fresh process; fail them so clients see the truth.
    let swept = runner.cleanup_stuck_meetings().await;
    if swept > 0 {
        tracing::warn!("startup sweep failed {swept} stuck meeting(s)");
    }

    let state = AppState::new(store, bus, runner, llm, settings);
    let app = app_router(state);

    let port = std::env::var("PORT").unwrap_or_else(|_| "8080".to_string());
    let bind_addr = format!("0.0.0.0:{port}");

    tracing::info!("virtlab server starting on {bind_addr}");
    tracing::info!("Endpoints:");
    tracing::info!("  GET  /health                        — liveness probe");
    tracing::info!("  POST /meetings/{{id}}/run             — synchronous run");
    tracing::info!("  POST /meetings/{{id}}/run-background  — background run");
    tracing::info!("  GET  /meetings/{{id}}/stream          — SSE event feed");
    tracing::info!("  WS   /ws/meetings/{{id}}              — interactive run");

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding {bind_addr}"))?;

    axum::serve(listener, app).await.context("server failed")?;
    Ok(())
}
