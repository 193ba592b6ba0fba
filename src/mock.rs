//! Scripted in-memory chain for tests.

use crate::chain::{ChainClient, HeaderStream};
use crate::types::{Block, BlockHeader, BlockTransaction};
use alloy_primitives::{Address, B256, U256};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures_util::{future, stream, StreamExt};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use tokio::sync::mpsc;

pub type HeaderSender = mpsc::UnboundedSender<Result<BlockHeader>>;

type ScriptedSubscription = Option<mpsc::UnboundedReceiver<Result<BlockHeader>>>;

/// Chain whose height, blocks, accounts and subscriptions are set by the
/// test. Subscribe attempts consume scripted outcomes in order and fail (or
/// hang) once the script is exhausted.
#[derive(Default)]
pub struct MockChain {
    height: AtomicU64,
    height_unavailable: AtomicBool,
    blocks: Mutex<HashMap<u64, Block>>,
    block_failures: Mutex<HashMap<u64, u32>>,
    accounts: Mutex<HashMap<Address, (u64, U256)>>,
    failing_lookups: Mutex<HashSet<Address>>,
    subscriptions: Mutex<VecDeque<ScriptedSubscription>>,
    subscribe_attempts: AtomicUsize,
    hang_subscribes: AtomicBool,
    fetched: Mutex<Vec<u64>>,
}

impl MockChain {
    pub fn new(height: u64) -> Self {
        let chain = Self::default();
        chain.set_height(height);
        chain
    }

    pub fn set_height(&self, height: u64) {
        self.height.store(height, Ordering::SeqCst);
    }

    pub fn set_height_unavailable(&self, unavailable: bool) {
        self.height_unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn insert_block(&self, number: u64, transactions: Vec<BlockTransaction>) {
        let block = Block {
            number,
            hash: block_hash(number),
            transactions,
        };
        self.blocks.lock().insert(number, block);
    }

    /// Insert blocks `from..=to`, each holding a single transfer whose hash
    /// is derived from the block number.
    pub fn insert_transfer_blocks(&self, from: u64, to: u64, sender: Address, receiver: Address) {
        for number in from..=to {
            self.insert_block(
                number,
                vec![transfer(tx_hash(number), sender, Some(receiver), U256::from(number))],
            );
        }
    }

    /// Make the next `times` fetches of block `number` fail.
    pub fn fail_block(&self, number: u64, times: u32) {
        self.block_failures.lock().insert(number, times);
    }

    pub fn set_account(&self, address: Address, nonce: u64, balance: U256) {
        self.accounts.lock().insert(address, (nonce, balance));
    }

    pub fn fail_lookups_for(&self, address: Address) {
        self.failing_lookups.lock().insert(address);
    }

    /// Script a successful subscription; headers are fed through the
    /// returned sender. Dropping the sender ends the stream.
    pub fn script_subscription(&self) -> HeaderSender {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscriptions.lock().push_back(Some(rx));
        tx
    }

    pub fn script_subscribe_failure(&self) {
        self.subscriptions.lock().push_back(None);
    }

    /// Make every subscribe attempt that has no scripted outcome hang, as
    /// with a websocket endpoint that never answers.
    pub fn hang_subscribes(&self, hang: bool) {
        self.hang_subscribes.store(hang, Ordering::SeqCst);
    }

    pub fn subscribe_attempts(&self) -> usize {
        self.subscribe_attempts.load(Ordering::SeqCst)
    }

    /// Block numbers requested so far, in request order.
    pub fn fetched(&self) -> Vec<u64> {
        self.fetched.lock().clone()
    }

    fn check_lookup(&self, address: Address) -> Result<()> {
        if self.failing_lookups.lock().contains(&address) {
            return Err(anyhow!("lookup unavailable for {:?}", address));
        }
        Ok(())
    }
}

#[async_trait]
impl ChainClient for MockChain {
    async fn current_height(&self) -> Result<u64> {
        if self.height_unavailable.load(Ordering::SeqCst) {
            return Err(anyhow!("node unreachable"));
        }
        Ok(self.height.load(Ordering::SeqCst))
    }

    async fn block_by_number(&self, number: u64) -> Result<Option<Block>> {
        self.fetched.lock().push(number);
        {
            let mut failures = self.block_failures.lock();
            if let Some(remaining) = failures.get_mut(&number) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(anyhow!("block {} fetch timed out", number));
                }
            }
        }
        Ok(self.blocks.lock().get(&number).cloned())
    }

    async fn transaction_count(&self, address: Address) -> Result<u64> {
        self.check_lookup(address)?;
        Ok(self.accounts.lock().get(&address).map_or(0, |(nonce, _)| *nonce))
    }

    async fn balance(&self, address: Address) -> Result<U256> {
        self.check_lookup(address)?;
        Ok(self
            .accounts
            .lock()
            .get(&address)
            .map_or(U256::ZERO, |(_, balance)| *balance))
    }

    async fn subscribe_new_heads(&self) -> Result<HeaderStream> {
        self.subscribe_attempts.fetch_add(1, Ordering::SeqCst);
        let scripted = self.subscriptions.lock().pop_front();
        match scripted {
            Some(Some(rx)) => Ok(stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|item| (item, rx))
            })
            .boxed()),
            None if self.hang_subscribes.load(Ordering::SeqCst) => future::pending().await,
            _ => Err(anyhow!("subscriptions not supported")),
        }
    }
}

pub fn transfer(hash: B256, from: Address, to: Option<Address>, value: U256) -> BlockTransaction {
    BlockTransaction {
        hash,
        from,
        to,
        value,
    }
}

pub fn tx_hash(seed: u64) -> B256 {
    let mut bytes = [0u8; 32];
    bytes[24..].copy_from_slice(&seed.to_be_bytes());
    B256::from(bytes)
}

fn block_hash(number: u64) -> B256 {
    let mut bytes = [0xffu8; 32];
    bytes[24..].copy_from_slice(&number.to_be_bytes());
    B256::from(bytes)
}
