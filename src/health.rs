//! Liveness endpoint

use crate::history::TransactionHistory;
use crate::orchestrator::{IngestionState, IngestionStatus};
use anyhow::{Context, Result};
use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Liveness response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub ingestion: IngestionState,
    pub cursor: u64,
    pub history_len: usize,
}

/// Shared state for the liveness handler
#[derive(Clone)]
pub struct HealthState {
    pub status: watch::Receiver<IngestionStatus>,
    pub history: Arc<TransactionHistory>,
}

pub fn router(state: HealthState) -> Router {
    Router::new()
        .route("/health", get(health))
        .with_state(state)
}

async fn health(State(state): State<HealthState>) -> Json<HealthResponse> {
    let status = *state.status.borrow();
    Json(HealthResponse {
        status: "ok",
        ingestion: status.state,
        cursor: status.cursor,
        history_len: state.history.len(),
    })
}

/// Serve the liveness endpoint on `port` until `shutdown` is cancelled.
pub async fn serve(port: u16, state: HealthState, shutdown: CancellationToken) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind liveness listener on {}", addr))?;
    info!("Server running at http://localhost:{}", port);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("Liveness listener failed")
}
