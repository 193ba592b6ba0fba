//! Block discovery and failover
//!
//! Discovers new blocks through a `newHeads` subscription and falls back to
//! polling the chain height while the subscription is unavailable. Both
//! mechanisms run inside one task, so exactly one of them dispatches blocks
//! at any time, and every block above the cursor is handed to the
//! [`BlockProcessor`] in ascending order before the cursor moves past it.

use crate::chain::{ChainClient, HeaderStream};
use crate::processor::BlockProcessor;
use anyhow::{Context, Result};
use futures_util::future::BoxFuture;
use futures_util::StreamExt;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::error::Elapsed;
use tokio::time::{interval, sleep, timeout, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Discovery state of the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestionState {
    Disconnected,
    Subscribing,
    Streaming,
    Polling,
}

impl fmt::Display for IngestionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IngestionState::Disconnected => "disconnected",
            IngestionState::Subscribing => "subscribing",
            IngestionState::Streaming => "streaming",
            IngestionState::Polling => "polling",
        };
        f.write_str(name)
    }
}

/// Published view of the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestionStatus {
    pub state: IngestionState,
    /// Highest block fully processed
    pub cursor: u64,
}

/// Timing for the discovery loop.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Interval between polling cycles
    pub poll_interval: Duration,
    /// Delay between resubscribe attempts while polling
    pub resubscribe_delay: Duration,
    /// Upper bound on a single subscribe attempt
    pub subscribe_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(15),
            resubscribe_delay: Duration::from_secs(5),
            subscribe_timeout: Duration::from_secs(10),
        }
    }
}

type SubscribeAttempt = BoxFuture<'static, Result<Result<HeaderStream>, Elapsed>>;

/// Discovery mode to switch to.
enum Next {
    Stream(HeaderStream),
    Poll,
}

/// Owns block discovery and the block cursor.
pub struct IngestionOrchestrator {
    client: Arc<dyn ChainClient>,
    processor: BlockProcessor,
    config: OrchestratorConfig,
    cursor: u64,
    status: watch::Sender<IngestionStatus>,
}

impl IngestionOrchestrator {
    /// Create an orchestrator whose cursor starts at the current chain
    /// height. Failing to reach the chain here is fatal.
    pub async fn connect(
        client: Arc<dyn ChainClient>,
        processor: BlockProcessor,
        config: OrchestratorConfig,
    ) -> Result<Self> {
        let cursor = client
            .current_height()
            .await
            .context("Failed to get chain height at startup")?;
        info!("Starting at block {}", cursor);

        let (status, _) = watch::channel(IngestionStatus {
            state: IngestionState::Subscribing,
            cursor,
        });

        Ok(Self {
            client,
            processor,
            config,
            cursor,
            status,
        })
    }

    /// Receiver for state and cursor updates.
    pub fn status(&self) -> watch::Receiver<IngestionStatus> {
        self.status.subscribe()
    }

    /// Run discovery until `shutdown` is cancelled.
    ///
    /// A block already being processed when shutdown is requested is allowed
    /// to finish; no further block is dispatched afterwards.
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<u64> {
        info!("Starting ingestion loop...");

        let mut next = match self.subscribe(&shutdown).await {
            Some(headers) => Some(Next::Stream(headers)),
            None if shutdown.is_cancelled() => None,
            None => Some(Next::Poll),
        };

        while let Some(mode) = next {
            next = match mode {
                Next::Stream(headers) => self.stream(headers, &shutdown).await,
                Next::Poll => self.poll(&shutdown).await,
            };
        }

        self.set_state(IngestionState::Disconnected);
        info!("Ingestion stopped at block {}", self.cursor);
        Ok(self.cursor)
    }

    /// Attempt one subscription. Returns `None` on failure, timeout or
    /// shutdown.
    async fn subscribe(&mut self, shutdown: &CancellationToken) -> Option<HeaderStream> {
        self.set_state(IngestionState::Subscribing);
        info!("Subscribing to new blocks...");

        let attempt = self.start_subscribe();
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => None,
            result = attempt => self.finish_subscribe(result),
        }
    }

    /// Subscribe attempt bounded by the subscribe timeout. Owns its client
    /// handle so it can stay pending while polling goes on.
    fn start_subscribe(&self) -> SubscribeAttempt {
        let client = Arc::clone(&self.client);
        let limit = self.config.subscribe_timeout;
        Box::pin(async move { timeout(limit, client.subscribe_new_heads()).await })
    }

    fn finish_subscribe(
        &self,
        result: Result<Result<HeaderStream>, Elapsed>,
    ) -> Option<HeaderStream> {
        match result {
            Ok(Ok(headers)) => {
                self.set_state(IngestionState::Streaming);
                info!("Successfully subscribed to new blocks");
                Some(headers)
            }
            Ok(Err(e)) => {
                warn!("Error subscribing to new blocks: {:#}", e);
                None
            }
            Err(_) => {
                warn!(
                    "Subscribing to new blocks timed out after {:?}",
                    self.config.subscribe_timeout
                );
                None
            }
        }
    }

    /// Dispatch blocks announced by the subscription until it fails.
    async fn stream(&mut self, mut headers: HeaderStream, shutdown: &CancellationToken) -> Option<Next> {
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => return None,
                event = headers.next() => match event {
                    Some(Ok(header)) => self.dispatch_through(header.number, shutdown).await,
                    Some(Err(e)) => {
                        warn!("Subscription error: {:#}", e);
                        return Some(Next::Poll);
                    }
                    None => {
                        warn!("Subscription ended");
                        return Some(Next::Poll);
                    }
                },
            }
        }
    }

    /// Poll the chain height until a resubscribe attempt succeeds.
    ///
    /// The first cycle runs immediately. A resubscribe attempt starts one
    /// delay after entering polling and one delay after the previous attempt
    /// finished. Polling cycles keep running while an attempt is pending.
    async fn poll(&mut self, shutdown: &CancellationToken) -> Option<Next> {
        self.set_state(IngestionState::Polling);
        info!("Falling back to polling for new blocks...");

        let mut poll_timer = interval(self.config.poll_interval);
        poll_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let delay = self.config.resubscribe_delay;
        let resubscribe = sleep(delay);
        tokio::pin!(resubscribe);
        let mut attempt: Option<SubscribeAttempt> = None;

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => return None,
                Some(result) = async {
                    match attempt.as_mut() {
                        Some(pending) => Some(pending.await),
                        None => None,
                    }
                }, if attempt.is_some() => {
                    attempt = None;
                    if let Some(headers) = self.finish_subscribe(result) {
                        info!("Resubscribed, polling stopped");
                        return Some(Next::Stream(headers));
                    }
                    self.set_state(IngestionState::Polling);
                    resubscribe.as_mut().reset(Instant::now() + delay);
                }
                () = &mut resubscribe, if attempt.is_none() => {
                    self.set_state(IngestionState::Subscribing);
                    info!("Resubscribing to new blocks...");
                    attempt = Some(self.start_subscribe());
                }
                _ = poll_timer.tick() => self.poll_cycle(shutdown).await,
            }
        }
    }

    async fn poll_cycle(&mut self, shutdown: &CancellationToken) {
        match self.client.current_height().await {
            Ok(height) if height > self.cursor => {
                info!("New blocks available: local={}, latest={}", self.cursor, height);
                self.dispatch_through(height, shutdown).await;
            }
            Ok(height) => debug!("Up to date. Local: {}, Latest: {}", self.cursor, height),
            Err(e) => error!("Error in polling: {:#}", e),
        }
    }

    /// Process every block from the cursor up to `target`, in order.
    ///
    /// Stops at the first failed block, leaving the cursor just below it so
    /// the next discovery event retries it.
    async fn dispatch_through(&mut self, target: u64, shutdown: &CancellationToken) {
        if target <= self.cursor {
            debug!("Block {} already covered (cursor {})", target, self.cursor);
            return;
        }

        for number in self.cursor + 1..=target {
            if shutdown.is_cancelled() {
                return;
            }
            match self.processor.process_block(number).await {
                Ok(_) => self.advance(number),
                Err(e) => {
                    error!("Error processing block {}: {:#}", number, e);
                    return;
                }
            }
        }
    }

    fn advance(&mut self, number: u64) {
        self.cursor = number;
        self.status.send_modify(|status| status.cursor = number);
    }

    fn set_state(&self, state: IngestionState) {
        let previous = self.status.borrow().state;
        if previous != state {
            info!("Ingestion state {} -> {}", previous, state);
            self.status.send_modify(|status| status.state = state);
        }
    }
}
