//! Ethereum fraud watcher binary
//!
//! Subscribes to new blocks (polling while the subscription is down), scores
//! the sender and receiver of every transfer, and serves a liveness endpoint.

use anyhow::{Context, Result};
use clap::Parser;
use fraudwatch::chain::ChainClient;
use fraudwatch::config::Config;
use fraudwatch::health::{self, HealthState};
use fraudwatch::rpc::RpcClient;
use fraudwatch::{BlockProcessor, IngestionOrchestrator, TransactionHistory};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::parse();
    config.validate().context("Invalid configuration")?;

    info!("Starting Ethereum fraud watcher");
    info!("RPC URL: {}", config.rpc_url);
    info!("Websocket URL: {}", config.ws_url);

    let client: Arc<dyn ChainClient> =
        Arc::new(RpcClient::new(config.rpc_url.clone(), config.ws_url.clone()));
    let history = Arc::new(TransactionHistory::new(config.history_capacity));
    let scorer = config.scorer();
    info!(
        "History capacity: {}, scorer: {}",
        history.capacity(),
        scorer.name()
    );

    let processor = BlockProcessor::new(Arc::clone(&client), Arc::clone(&history), scorer);
    let orchestrator = IngestionOrchestrator::connect(client, processor, config.orchestrator())
        .await
        .context("Failed to initialize ingestion")?;

    let shutdown = CancellationToken::new();

    let health_state = HealthState {
        status: orchestrator.status(),
        history,
    };
    // A failed listener stops ingestion too
    let server_token = shutdown.clone();
    let port = config.port;
    let server = tokio::spawn(async move {
        let result = health::serve(port, health_state, server_token.clone()).await;
        if let Err(e) = &result {
            error!("Liveness listener failed: {:#}", e);
        }
        server_token.cancel();
        result
    });

    // Handle Ctrl+C gracefully
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, shutting down gracefully...");
        }
        signal_token.cancel();
    });

    let cursor = orchestrator
        .run(shutdown.clone())
        .await
        .context("Watcher error")?;
    info!("Last processed block: {}", cursor);

    shutdown.cancel();
    server.await.context("Liveness task panicked")??;

    info!("Watcher stopped");
    Ok(())
}
