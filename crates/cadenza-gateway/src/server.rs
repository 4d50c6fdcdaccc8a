// SPDX-FileCopyrightText: 2026 Cadenza Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Gateway HTTP server built on axum.

use std::sync::Arc;
use std::time::Instant;

use axum::routing::{get, post};
use axum::Router;
use cadenza_core::CadenzaError;
use cadenza_ingest::WebhookIngestor;
use cadenza_runner::Orchestrator;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::handlers;

/// Shared state for axum request handlers.
#[derive(Clone)]
pub struct GatewayState {
    pub ingestor: Arc<WebhookIngestor>,
    pub orchestrator: Orchestrator,
    /// Process start time for uptime reporting.
    pub start_time: Instant,
}

/// Gateway server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Builds the gateway router.
pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route("/webhooks/inbound", post(handlers::post_inbound))
        .route("/webhooks/status", post(handlers::post_status))
        .route("/campaigns/{id}/trigger", post(handlers::post_trigger))
        .route("/health", get(handlers::get_health))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// Starts the gateway and serves until the cancellation token fires.
pub async fn start_server(
    config: &ServerConfig,
    state: GatewayState,
    cancel: CancellationToken,
) -> Result<(), CadenzaError> {
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| CadenzaError::Config(format!("failed to bind gateway to {addr}: {e}")))?;

    info!(addr = addr.as_str(), "gateway listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await
        .map_err(|e| CadenzaError::Internal(format!("gateway server error: {e}")))?;
    Ok(())
}
