//! Bounded recent-transaction history
//!
//! A FIFO window over the most recently observed transfers. Writers append
//! through a single lock; readers take a [`HistorySnapshot`], a shared
//! copy-on-write view that later appends never mutate.
//!
//! Entries are de-duplicated by transaction hash within the window, so a
//! block handed to the processor twice does not count its transfers twice.

use crate::types::{wei_to_ether, BlockTransaction};
use alloy_primitives::{Address, B256};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

/// Default number of transactions kept in the window.
pub const DEFAULT_HISTORY_CAPACITY: usize = 100;

/// A transfer observed in a block.
#[derive(Debug, Clone, PartialEq)]
pub struct Transaction {
    pub hash: B256,
    pub from: Address,
    /// None for contract creation
    pub to: Option<Address>,
    /// Value in ether
    pub value: f64,
    /// Local observation time (not the block timestamp)
    pub observed_at: DateTime<Utc>,
}

impl Transaction {
    /// Record a block transaction as observed at `observed_at`.
    pub fn observed(tx: &BlockTransaction, observed_at: DateTime<Utc>) -> Self {
        Self {
            hash: tx.hash,
            from: tx.from,
            to: tx.to,
            value: wei_to_ether(tx.value),
            observed_at,
        }
    }
}

/// Immutable view of the history at one point in time.
#[derive(Debug, Clone, Default)]
pub struct HistorySnapshot {
    entries: Arc<VecDeque<Transaction>>,
}

impl HistorySnapshot {
    /// Entries in observation order, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &Transaction> {
        self.entries.iter()
    }

    /// Oldest entry still in the window.
    pub fn first(&self) -> Option<&Transaction> {
        self.entries.front()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

struct Inner {
    entries: Arc<VecDeque<Transaction>>,
    hashes: HashSet<B256>,
}

/// Bounded, order-preserving buffer of recent transactions.
pub struct TransactionHistory {
    capacity: usize,
    inner: RwLock<Inner>,
}

impl TransactionHistory {
    /// Create an empty history holding at most `capacity` entries.
    ///
    /// A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            inner: RwLock::new(Inner {
                entries: Arc::new(VecDeque::with_capacity(capacity)),
                hashes: HashSet::with_capacity(capacity),
            }),
        }
    }

    /// Append a transaction, evicting the oldest entry if the window is full.
    ///
    /// Returns `false` without modifying the window if a transaction with the
    /// same hash is already held.
    pub fn append(&self, tx: Transaction) -> bool {
        let mut inner = self.inner.write();
        if !inner.hashes.insert(tx.hash) {
            return false;
        }

        // Clones the buffer only while a snapshot of the current one is alive
        let entries = Arc::make_mut(&mut inner.entries);
        entries.push_back(tx);
        let evicted = if entries.len() > self.capacity {
            entries.pop_front()
        } else {
            None
        };

        if let Some(evicted) = evicted {
            inner.hashes.remove(&evicted.hash);
        }
        true
    }

    /// Consistent view of the window as of now.
    pub fn snapshot(&self) -> HistorySnapshot {
        HistorySnapshot {
            entries: Arc::clone(&self.inner.read().entries),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for TransactionHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}
