//! Per-block processing
//!
//! Fetches a block, records its transfers in the history window, computes
//! features for both parties of each transfer and scores them.

use crate::chain::ChainClient;
use crate::features::{FeatureCalculator, FeatureVector};
use crate::history::{Transaction, TransactionHistory};
use crate::scorer::FraudScorer;
use alloy_primitives::{Address, B256};
use anyhow::{Context, Result};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info};

/// Scoring result for one transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionReport {
    pub hash: B256,
    pub from: Address,
    pub to: Option<Address>,
    pub sender_flagged: bool,
    /// None for contract creation
    pub receiver_flagged: Option<bool>,
    pub sender_features: FeatureVector,
    pub receiver_features: Option<FeatureVector>,
}

/// What happened to a dispatched block.
#[derive(Debug, Clone, PartialEq)]
pub enum BlockOutcome {
    Processed {
        number: u64,
        /// Transactions in the block, including ones already in history
        transactions: usize,
        reports: Vec<TransactionReport>,
    },
    /// The node did not have the block; treated as done.
    NotFound { number: u64 },
}

/// Processes a single block end to end.
pub struct BlockProcessor {
    client: Arc<dyn ChainClient>,
    history: Arc<TransactionHistory>,
    features: FeatureCalculator,
    scorer: Arc<dyn FraudScorer>,
}

impl BlockProcessor {
    pub fn new(
        client: Arc<dyn ChainClient>,
        history: Arc<TransactionHistory>,
        scorer: Arc<dyn FraudScorer>,
    ) -> Self {
        Self {
            features: FeatureCalculator::new(Arc::clone(&client)),
            client,
            history,
            scorer,
        }
    }

    pub fn history(&self) -> &Arc<TransactionHistory> {
        &self.history
    }

    /// Process block `number`.
    ///
    /// Only a failed block fetch is an error. Feature lookups that fail
    /// degrade to zero vectors inside the calculator, and transactions
    /// already in the history window are skipped so reprocessing a block
    /// is harmless.
    pub async fn process_block(&self, number: u64) -> Result<BlockOutcome> {
        info!("Processing block {}", number);

        let block = match self
            .client
            .block_by_number(number)
            .await
            .with_context(|| format!("Failed to fetch block {}", number))?
        {
            Some(block) => block,
            None => {
                info!("Block {} not found, skipping", number);
                return Ok(BlockOutcome::NotFound { number });
            }
        };

        let mut reports = Vec::with_capacity(block.transactions.len());
        for tx in &block.transactions {
            let record = Transaction::observed(tx, Utc::now());
            if !self.history.append(record) {
                debug!("TX {:?} already in history, skipping", tx.hash);
                continue;
            }

            if tx.is_contract_creation() {
                debug!("TX {:?} creates a contract, scoring sender only", tx.hash);
            }

            let snapshot = self.history.snapshot();
            let now = Utc::now();
            let (sender_features, receiver_features) = tokio::join!(
                self.features.calculate(tx.from, &snapshot, now),
                async {
                    match tx.to {
                        Some(to) => Some(self.features.calculate(to, &snapshot, now).await),
                        None => None,
                    }
                }
            );

            let report = TransactionReport {
                hash: tx.hash,
                from: tx.from,
                to: tx.to,
                sender_flagged: self.scorer.score(&sender_features),
                receiver_flagged: receiver_features.as_ref().map(|f| self.scorer.score(f)),
                sender_features,
                receiver_features,
            };
            log_report(&report);
            reports.push(report);
        }

        info!(
            "Completed block {} ({:?}): {} transactions, {} new",
            block.number,
            block.hash,
            block.transactions.len(),
            reports.len()
        );

        Ok(BlockOutcome::Processed {
            number,
            transactions: block.transactions.len(),
            reports,
        })
    }
}

fn log_report(report: &TransactionReport) {
    let receiver_features = report
        .receiver_features
        .map_or_else(|| "-".to_string(), |f| f.to_string());
    info!(
        "Transaction {:?}: sender {:?} fraudulent={}, receiver {:?} fraudulent={:?}; \
         sender features [{}]; receiver features [{}]",
        report.hash,
        report.from,
        report.sender_flagged,
        report.to,
        report.receiver_flagged,
        report.sender_features,
        receiver_features
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{transfer, tx_hash, MockChain};
    use crate::scorer::FixedScorer;
    use crate::types::parse_address;
    use alloy_primitives::U256;

    const TWO_AND_A_HALF_ETHER: u128 = 2_500_000_000_000_000_000;

    fn processor(chain: &Arc<MockChain>, capacity: usize) -> BlockProcessor {
        BlockProcessor::new(
            Arc::clone(chain) as Arc<dyn ChainClient>,
            Arc::new(TransactionHistory::new(capacity)),
            Arc::new(FixedScorer(false)),
        )
    }

    #[tokio::test]
    async fn test_single_transfer_end_to_end() {
        let chain = Arc::new(MockChain::new(100));
        let sender = parse_address("0x00000000000000000000000000000000000000AA").unwrap();
        let receiver = parse_address("0x00000000000000000000000000000000000000BB").unwrap();
        chain.insert_block(
            100,
            vec![transfer(
                B256::repeat_byte(0xab),
                sender,
                Some(receiver),
                U256::from(TWO_AND_A_HALF_ETHER),
            )],
        );
        let processor = processor(&chain, 100);

        let outcome = processor.process_block(100).await.unwrap();
        let reports = match outcome {
            BlockOutcome::Processed { number, transactions, reports } => {
                assert_eq!(number, 100);
                assert_eq!(transactions, 1);
                reports
            }
            other => panic!("unexpected outcome {:?}", other),
        };
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].sender_features.total_sent_count, 1);
        assert_eq!(reports[0].sender_features.total_sent, 2.5);
        assert_eq!(reports[0].receiver_features.unwrap().total_received, 2.5);
        assert_eq!(reports[0].receiver_flagged, Some(false));

        let snapshot = processor.history().snapshot();
        assert_eq!(snapshot.len(), 1);
        let entry = snapshot.first().unwrap();
        assert_eq!(entry.hash, B256::repeat_byte(0xab));
        assert_eq!(entry.value, 2.5);

        // Lookups with differently cased addresses see the same entry
        let calculator = FeatureCalculator::new(chain.clone());
        let now = Utc::now();
        let aa = calculator
            .calculate(parse_address("0x00000000000000000000000000000000000000aa").unwrap(), &snapshot, now)
            .await;
        assert_eq!(aa.total_sent_count, 1);
        assert_eq!(aa.total_sent, 2.5);
        assert_eq!(aa.total_received_count, 0);

        let bb = calculator
            .calculate(parse_address("0x00000000000000000000000000000000000000bb").unwrap(), &snapshot, now)
            .await;
        assert_eq!(bb.total_received_count, 1);
        assert_eq!(bb.total_received, 2.5);
        assert_eq!(bb.total_sent_count, 0);
    }

    #[tokio::test]
    async fn test_missing_block_is_skipped() {
        let chain = Arc::new(MockChain::new(10));
        let processor = processor(&chain, 100);

        let outcome = processor.process_block(7).await.unwrap();
        assert_eq!(outcome, BlockOutcome::NotFound { number: 7 });
        assert!(processor.history().is_empty());
    }

    #[tokio::test]
    async fn test_fetch_failure_is_an_error() {
        let chain = Arc::new(MockChain::new(10));
        chain.fail_block(5, 1);
        let processor = processor(&chain, 100);

        assert!(processor.process_block(5).await.is_err());
    }

    #[tokio::test]
    async fn test_reprocessing_does_not_double_count() {
        let chain = Arc::new(MockChain::new(3));
        let sender = Address::repeat_byte(0x11);
        let receiver = Address::repeat_byte(0x22);
        chain.insert_transfer_blocks(3, 3, sender, receiver);
        let processor = processor(&chain, 100);

        processor.process_block(3).await.unwrap();
        let again = processor.process_block(3).await.unwrap();
        match again {
            BlockOutcome::Processed { transactions, reports, .. } => {
                assert_eq!(transactions, 1);
                assert!(reports.is_empty());
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(processor.history().len(), 1);
    }

    #[tokio::test]
    async fn test_contract_creation_has_no_receiver_features() {
        let chain = Arc::new(MockChain::new(1));
        let sender = Address::repeat_byte(0x11);
        chain.insert_block(1, vec![transfer(tx_hash(1), sender, None, U256::ZERO)]);
        let processor = processor(&chain, 100);

        match processor.process_block(1).await.unwrap() {
            BlockOutcome::Processed { reports, .. } => {
                assert_eq!(reports.len(), 1);
                assert!(reports[0].receiver_features.is_none());
                assert!(reports[0].receiver_flagged.is_none());
                assert_eq!(reports[0].sender_features.total_sent_count, 1);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_receiver_lookup_failure_does_not_affect_sender() {
        let chain = Arc::new(MockChain::new(1));
        let sender = Address::repeat_byte(0x11);
        let receiver = Address::repeat_byte(0x22);
        chain.set_account(sender, 4, U256::ZERO);
        chain.fail_lookups_for(receiver);
        chain.insert_transfer_blocks(1, 1, sender, receiver);
        let processor = processor(&chain, 100);

        match processor.process_block(1).await.unwrap() {
            BlockOutcome::Processed { reports, .. } => {
                assert_eq!(reports[0].sender_features.transaction_count, 4);
                assert_eq!(reports[0].sender_features.total_sent_count, 1);
                assert_eq!(reports[0].receiver_features, Some(FeatureVector::default()));
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_window_evicts_first_block_after_101_blocks() {
        let chain = Arc::new(MockChain::new(101));
        let sender = Address::repeat_byte(0x11);
        let receiver = Address::repeat_byte(0x22);
        chain.insert_transfer_blocks(1, 101, sender, receiver);
        let processor = processor(&chain, 100);

        for number in 1..=101 {
            processor.process_block(number).await.unwrap();
        }

        let snapshot = processor.history().snapshot();
        assert_eq!(snapshot.len(), 100);
        assert!(snapshot.iter().all(|tx| tx.hash != tx_hash(1)));
        let hashes: Vec<B256> = snapshot.iter().map(|tx| tx.hash).collect();
        let expected: Vec<B256> = (2..=101).map(tx_hash).collect();
        assert_eq!(hashes, expected);
    }
}
