//! HTTP server setup and configuration.

use axum::{
    routing::{get, post},
    Router,
};
use reqwest::Client;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::handlers;
use crate::config::Config;
use crate::provider::ProviderRegistry;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub providers: Arc<ProviderRegistry>,
}

impl AppState {
    /// Build providers from config around a shared HTTP client.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let http_client = build_http_client(config)?;
        let providers = ProviderRegistry::from_config(config, http_client)?;
        Ok(Self {
            providers: Arc::new(providers),
        })
    }
}

/// HTTP client shared by all providers.
///
/// Only the connect phase is bounded here: streaming bodies may legitimately
/// run for minutes, so per-request timeouts are applied by each call.
pub fn build_http_client(config: &Config) -> reqwest::Result<Client> {
    Client::builder()
        .connect_timeout(config.relay.connect_timeout())
        .build()
}

/// Create the axum router with all endpoints.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/prompt/text", post(handlers::prompt_text))
        .route("/promptStream/text", post(handlers::prompt_stream_text))
        .route("/models", get(handlers::list_models))
        .route("/health", get(handlers::health))
        .route("/providers", get(handlers::list_providers))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Run the HTTP server.
pub async fn run_server(config: Config) -> anyhow::Result<()> {
    let listen_addr = config.server.listen.clone();
    let state = AppState::from_config(&config)?;
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    tracing::info!(address = %listen_addr, "Starting easygpt relay server");

    axum::serve(listener, app).await?;

    Ok(())
}
