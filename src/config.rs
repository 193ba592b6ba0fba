//! Process configuration
//!
//! Command-line flags, each with an environment variable fallback.

use crate::history::DEFAULT_HISTORY_CAPACITY;
use crate::orchestrator::OrchestratorConfig;
use crate::scorer::{FixedScorer, FraudScorer, RandomScorer, DEFAULT_FLAG_RATE};
use anyhow::Result;
use clap::{Parser, ValueEnum};
use std::sync::Arc;
use std::time::Duration;

/// Scoring strategy selectable from the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ScorerKind {
    /// Flag a random share of addresses (placeholder)
    Random,
    /// Never flag anything
    Never,
}

/// Watch new blocks and score the addresses involved
#[derive(Debug, Clone, Parser)]
#[command(name = "fraudwatch")]
#[command(about = "Monitor Ethereum blocks and score sender/receiver behavior")]
pub struct Config {
    /// HTTP JSON-RPC endpoint URL
    #[arg(long, env = "RPC_URL", default_value = "http://127.0.0.1:8545")]
    pub rpc_url: String,

    /// Websocket endpoint URL for the newHeads subscription
    #[arg(long, env = "WS_URL", default_value = "ws://127.0.0.1:8546")]
    pub ws_url: String,

    /// Port for the liveness listener
    #[arg(long, env = "PORT", default_value_t = 3000)]
    pub port: u16,

    /// Number of recent transactions kept for feature aggregation
    #[arg(long, env = "HISTORY_CAPACITY", default_value_t = DEFAULT_HISTORY_CAPACITY)]
    pub history_capacity: usize,

    /// Seconds between polling cycles while the subscription is down
    #[arg(long, env = "POLL_INTERVAL_SECS", default_value_t = 15)]
    pub poll_interval_secs: u64,

    /// Seconds between resubscribe attempts while polling
    #[arg(long, env = "RESUBSCRIBE_DELAY_SECS", default_value_t = 5)]
    pub resubscribe_delay_secs: u64,

    /// Upper bound in seconds on a single subscribe attempt
    #[arg(long, env = "SUBSCRIBE_TIMEOUT_SECS", default_value_t = 10)]
    pub subscribe_timeout_secs: u64,

    /// Scoring strategy
    #[arg(long, env = "SCORER", value_enum, default_value_t = ScorerKind::Random)]
    pub scorer: ScorerKind,

    /// Share of addresses flagged by the random scorer
    #[arg(long, env = "FLAG_RATE", default_value_t = DEFAULT_FLAG_RATE)]
    pub flag_rate: f64,
}

impl Config {
    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if !(self.rpc_url.starts_with("http://") || self.rpc_url.starts_with("https://")) {
            anyhow::bail!("RPC URL must be http(s), got {}", self.rpc_url);
        }
        if !(self.ws_url.starts_with("ws://") || self.ws_url.starts_with("wss://")) {
            anyhow::bail!("Websocket URL must be ws(s), got {}", self.ws_url);
        }
        if self.history_capacity == 0 {
            anyhow::bail!("History capacity must be at least 1");
        }
        if self.poll_interval_secs == 0
            || self.resubscribe_delay_secs == 0
            || self.subscribe_timeout_secs == 0
        {
            anyhow::bail!("Polling, resubscribe and subscribe timings must be non-zero");
        }
        if !(0.0..=1.0).contains(&self.flag_rate) {
            anyhow::bail!("Flag rate must be within [0, 1], got {}", self.flag_rate);
        }
        Ok(())
    }

    pub fn orchestrator(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            resubscribe_delay: Duration::from_secs(self.resubscribe_delay_secs),
            subscribe_timeout: Duration::from_secs(self.subscribe_timeout_secs),
        }
    }

    pub fn scorer(&self) -> Arc<dyn FraudScorer> {
        match self.scorer {
            ScorerKind::Random => Arc::new(RandomScorer::new(self.flag_rate)),
            ScorerKind::Never => Arc::new(FixedScorer(false)),
        }
    }
}
