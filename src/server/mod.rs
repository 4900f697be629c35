//! HTTP surface: webhook intake, the heal gateway, and shared state.

pub mod heal_routes;
pub mod rate_limit;
pub mod webhook;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::Config;
use crate::forge_api::CredentialBroker;
use crate::store::Store;
use heal_routes::ResultStore;
use rate_limit::IpRateLimiter;

const HEAL_REQUESTS_PER_MINUTE: u32 = 10;

pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn Store>,
    pub broker: Arc<CredentialBroker>,
    pub rate_limiter: Arc<IpRateLimiter>,
    pub results: ResultStore,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(config: Config, store: Arc<dyn Store>) -> SharedState {
        let broker = Arc::new(CredentialBroker::new(
            config.app_id.clone(),
            config.app_private_key.clone(),
            config.fallback_token.clone(),
        ));
        Arc::new(Self {
            config,
            store,
            broker,
            rate_limiter: Arc::new(IpRateLimiter::new(HEAL_REQUESTS_PER_MINUTE)),
            results: ResultStore::default(),
        })
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/webhook", post(webhook::handle_webhook))
        .route(
            "/heal",
            post(heal_routes::start_heal).get(heal_routes::heal_readiness),
        )
        .route(
            "/heal/results",
            post(heal_routes::store_result).get(heal_routes::get_results),
        )
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind and serve until ctrl-c.
pub async fn run(state: SharedState) -> Result<()> {
    state.rate_limiter.spawn_gc();

    let addr = SocketAddr::from(([0, 0, 0, 0], state.config.port));
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!(%addr, "codeguard listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown signal received");
    })
    .await
    .context("server error")
}
