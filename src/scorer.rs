//! Fraud scoring strategies
//!
//! A scorer turns a [`FeatureVector`] into a risk flag. Scorers are injected
//! into the [`BlockProcessor`](crate::processor::BlockProcessor) so a real
//! model can replace the placeholder without touching block processing.

use crate::features::FeatureVector;
use rand::Rng;

/// Default share of addresses flagged by [`RandomScorer`].
pub const DEFAULT_FLAG_RATE: f64 = 0.2;

/// Risk-scoring strategy.
pub trait FraudScorer: Send + Sync {
    /// Human-readable name for logging.
    fn name(&self) -> &'static str;

    /// Return `true` if the address behind `features` looks risky.
    fn score(&self, features: &FeatureVector) -> bool;
}

/// Placeholder scorer that flags a random share of addresses.
///
/// Ignores its input entirely. It keeps the pipeline exercised until a
/// trained model is plugged in and says nothing about actual fraud.
#[derive(Debug, Clone, Copy)]
pub struct RandomScorer {
    flag_rate: f64,
}

impl RandomScorer {
    /// `flag_rate` is clamped to `[0, 1]`; NaN never flags.
    pub fn new(flag_rate: f64) -> Self {
        let flag_rate = if flag_rate.is_nan() {
            0.0
        } else {
            flag_rate.clamp(0.0, 1.0)
        };
        Self { flag_rate }
    }
}

impl Default for RandomScorer {
    fn default() -> Self {
        Self::new(DEFAULT_FLAG_RATE)
    }
}

impl FraudScorer for RandomScorer {
    fn name(&self) -> &'static str {
        "RandomScorer"
    }

    fn score(&self, _features: &FeatureVector) -> bool {
        rand::thread_rng().gen_bool(self.flag_rate)
    }
}

/// Scorer that always returns the same verdict.
#[derive(Debug, Clone, Copy)]
pub struct FixedScorer(pub bool);

impl FraudScorer for FixedScorer {
    fn name(&self) -> &'static str {
        "FixedScorer"
    }

    fn score(&self, _features: &FeatureVector) -> bool {
        self.0
    }
}
