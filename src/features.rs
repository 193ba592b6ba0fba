//! Per-address behavioral features
//!
//! Combines live account state from the node with aggregates over a history
//! snapshot into the nine-field [`FeatureVector`] consumed by a
//! [`FraudScorer`](crate::scorer::FraudScorer).

use crate::chain::ChainClient;
use crate::history::HistorySnapshot;
use crate::types::wei_to_ether;
use alloy_primitives::Address;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::warn;

/// Behavioral metrics for one address at one point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureVector {
    pub transaction_count: u64,
    /// Balance in ether
    pub current_balance: f64,
    pub avg_minutes_between_sent: f64,
    pub avg_minutes_between_received: f64,
    /// Minutes since the oldest entry in the history window
    pub time_diff_first_to_last: f64,
    pub total_sent_count: u64,
    pub total_received_count: u64,
    /// Ether sent within the history window
    pub total_sent: f64,
    /// Ether received within the history window
    pub total_received: f64,
}

impl FeatureVector {
    /// Features in the column order the offline model was trained on:
    /// avg min between sent, avg min between received, time diff first/last,
    /// sent count, received count, total sent, total received.
    pub fn model_input(&self) -> [f64; 7] {
        [
            self.avg_minutes_between_sent,
            self.avg_minutes_between_received,
            self.time_diff_first_to_last,
            self.total_sent_count as f64,
            self.total_received_count as f64,
            self.total_sent,
            self.total_received,
        ]
    }
}

impl fmt::Display for FeatureVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "transactionCount={} currentBalance={} avgMinutesBetweenSent={:.2} \
             avgMinutesBetweenReceived={:.2} timeDiffFirstToLast={:.2} totalSentCount={} \
             totalReceivedCount={} totalSent={} totalReceived={}",
            self.transaction_count,
            self.current_balance,
            self.avg_minutes_between_sent,
            self.avg_minutes_between_received,
            self.time_diff_first_to_last,
            self.total_sent_count,
            self.total_received_count,
            self.total_sent,
            self.total_received,
        )
    }
}

/// Sent/received aggregates over a history snapshot.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
struct WindowAggregates {
    sent_count: u64,
    received_count: u64,
    total_sent: f64,
    total_received: f64,
    sent_minutes: f64,
    received_minutes: f64,
}

impl WindowAggregates {
    /// Single pass over the snapshot. A self-transfer counts on both sides.
    fn scan(address: Address, snapshot: &HistorySnapshot, now: DateTime<Utc>) -> Self {
        let mut acc = Self::default();
        for tx in snapshot.iter() {
            let elapsed = minutes_between(tx.observed_at, now);

            if tx.from == address {
                acc.total_sent += tx.value;
                acc.sent_minutes += elapsed;
                acc.sent_count += 1;
            }
            if tx.to == Some(address) {
                acc.total_received += tx.value;
                acc.received_minutes += elapsed;
                acc.received_count += 1;
            }
        }
        acc
    }
}

fn minutes_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> f64 {
    (later - earlier).num_milliseconds() as f64 / 60_000.0
}

fn average(total: f64, count: u64) -> f64 {
    if count == 0 {
        0.0
    } else {
        total / count as f64
    }
}

/// Computes feature vectors from live lookups and history.
#[derive(Clone)]
pub struct FeatureCalculator {
    client: Arc<dyn ChainClient>,
}

impl FeatureCalculator {
    pub fn new(client: Arc<dyn ChainClient>) -> Self {
        Self { client }
    }

    /// Compute features for `address`.
    ///
    /// A failed lookup is logged and yields the all-zero vector so one
    /// address cannot abort the processing of its block.
    pub async fn calculate(
        &self,
        address: Address,
        snapshot: &HistorySnapshot,
        now: DateTime<Utc>,
    ) -> FeatureVector {
        match self.try_calculate(address, snapshot, now).await {
            Ok(features) => features,
            Err(e) => {
                warn!("Error calculating features for {:?}: {:#}", address, e);
                FeatureVector::default()
            }
        }
    }

    /// Compute features for `address`, propagating lookup failures.
    pub async fn try_calculate(
        &self,
        address: Address,
        snapshot: &HistorySnapshot,
        now: DateTime<Utc>,
    ) -> Result<FeatureVector> {
        let (transaction_count, balance) = tokio::try_join!(
            async {
                self.client
                    .transaction_count(address)
                    .await
                    .with_context(|| format!("Failed to get transaction count for {:?}", address))
            },
            async {
                self.client
                    .balance(address)
                    .await
                    .with_context(|| format!("Failed to get balance for {:?}", address))
            }
        )?;

        let window = WindowAggregates::scan(address, snapshot, now);
        let time_diff_first_to_last = snapshot
            .first()
            .map_or(0.0, |first| minutes_between(first.observed_at, now));

        Ok(FeatureVector {
            transaction_count,
            current_balance: wei_to_ether(balance),
            avg_minutes_between_sent: average(window.sent_minutes, window.sent_count),
            avg_minutes_between_received: average(window.received_minutes, window.received_count),
            time_diff_first_to_last,
            total_sent_count: window.sent_count,
            total_received_count: window.received_count,
            total_sent: window.total_sent,
            total_received: window.total_received,
        })
    }
}
