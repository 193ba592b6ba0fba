//! Ledger client abstraction
//!
//! Everything the ingestion pipeline needs from a node, behind one trait so
//! the orchestrator and processor can run against the JSON-RPC client in
//! production and a scripted chain in tests.

use crate::types::{Block, BlockHeader};
use alloy_primitives::{Address, U256};
use anyhow::Result;
use async_trait::async_trait;
use futures_util::stream::BoxStream;

/// Stream of new block headers.
///
/// `Some(Ok(_))` is a new head, `Some(Err(_))` is a subscription error and
/// `None` is end-of-stream. Both of the latter end the subscription.
pub type HeaderStream = BoxStream<'static, Result<BlockHeader>>;

/// Source of blocks, account state and new-head notifications.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Current chain height.
    async fn current_height(&self) -> Result<u64>;

    /// Full block with transactions, or `None` if the node does not have it
    /// (yet).
    async fn block_by_number(&self, number: u64) -> Result<Option<Block>>;

    /// Transaction count (nonce) of an address at the latest block.
    async fn transaction_count(&self, address: Address) -> Result<u64>;

    /// Balance of an address in wei at the latest block.
    async fn balance(&self, address: Address) -> Result<U256>;

    /// Subscribe to new block headers. Resolves once the node has
    /// acknowledged the subscription.
    async fn subscribe_new_heads(&self) -> Result<HeaderStream>;
}
