//! fraudwatch - Ethereum block watcher with per-address behavioral features
//!
//! Discovers new blocks through a `newHeads` subscription with a polling
//! fallback, keeps a bounded window of recent transfers, and scores the
//! sender and receiver of every transfer from features computed over that
//! window and live account state.

pub mod chain;
pub mod config;
pub mod features;
pub mod health;
pub mod history;
pub mod orchestrator;
pub mod processor;
pub mod rpc;
pub mod scorer;
pub mod types;

#[cfg(test)]
mod mock;

// Re-export the main types for convenience
pub use chain::ChainClient;
pub use features::{FeatureCalculator, FeatureVector};
pub use history::{HistorySnapshot, Transaction, TransactionHistory};
pub use orchestrator::{IngestionOrchestrator, IngestionState, IngestionStatus, OrchestratorConfig};
pub use processor::{BlockOutcome, BlockProcessor, TransactionReport};
pub use scorer::{FixedScorer, FraudScorer, RandomScorer};
