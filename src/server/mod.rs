//! HTTP surface for the meeting engine.
//!
//! # Routes
//!
//! - `GET  /health`                           — liveness probe
//! - `POST /meetings/{id}/run`                — synchronous run-to-completion
//! - `POST /meetings/{id}/run-background`     — spawn a background worker
//! - `POST /meetings/{id}/stop`               — signal cancellation
//! - `GET  /meetings/{id}/status`             — poll run progress
//! - `GET  /meetings/{id}/stream`             — server-sent-events feed
//! - `GET  /meetings/{id}/summary`            — meeting summary
//! - `POST /meetings/{id}/propose-agenda`     — LLM-drafted agenda (ai_auto)
//! - `GET  /meetings/{id}/artifacts`          — list extracted artifacts
//! - `POST /meetings/{id}/extract-artifacts`  — run extraction on demand
//! - `WS   /ws/meetings/{id}`                 — interactive execution

pub mod routes;
pub mod ws;

use std::sync::Arc;

use axum::http::HeaderValue;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::bus::EventBus;
use crate::config::Settings;
use crate::llm::LlmCall;
use crate::runner::BackgroundRunner;
use crate::store::MeetingStore;

/// Shared application state threaded into every handler.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn MeetingStore>,
    pub bus: Arc<dyn EventBus>,
    pub runner: BackgroundRunner,
    pub llm: Arc<dyn LlmCall>,
    pub settings: Arc<Settings>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn MeetingStore>,
        bus: Arc<dyn EventBus>,
        runner: BackgroundRunner,
        llm: Arc<dyn LlmCall>,
        settings: Settings,
    ) -> Self {
        Self {
            store,
            bus,
            runner,
            llm,
            settings: Arc::new(settings),
        }
    }
}

/// Build the axum router with all routes.
pub fn app_router(state: AppState) -> Router {
    let cors = cors_layer(&state.settings);
    Router::new()
        .route("/health", get(routes::health_handler))
        .route("/meetings/{id}/run", post(routes::run_handler))
        .route("/meetings/{id}/run-background", post(routes::run_background_handler))
        .route("/meetings/{id}/stop", post(routes::stop_handler))
        .route("/meetings/{id}/status", get(routes::status_handler))
        .route("/meetings/{id}/stream", get(routes::stream_handler))
        .route("/meetings/{id}/summary", get(routes::summary_handler))
        .route(
            "/meetings/{id}/propose-agenda",
            post(routes::propose_agenda_handler),
        )
        .route("/meetings/{id}/artifacts", get(routes::list_artifacts_handler))
        .route(
            "/meetings/{id}/extract-artifacts",
            post(routes::extract_artifacts_handler),
        )
        .route("/ws/meetings/{id}", get(ws::ws_handler))
        .layer(cors)
        .with_state(state)
}

fn cors_layer(settings: &Settings) -> CorsLayer {
    if settings.cors_origins.is_empty() {
        return CorsLayer::permissive();
    }
    let origins: Vec<HeaderValue> = settings
        .cors_origins
        .iter()
        .filter_map(|o| o.parse().ok())
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(tower_http::cors::Any)
        .allow_headers(tower_http::cors::Any)
}
