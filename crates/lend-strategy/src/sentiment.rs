//! Borrowing sentiment from funding utilization.
//!
//! Sentiment compares the latest hourly utilization sample with the mean of
//! the `window` samples before it. A value of 1.0 means demand is flat;
//! 2.0 means twice as much is borrowed as usual. Above the accelerator
//! threshold the value is amplified so the ladder reacts faster to spikes.
//!
//! Missing or degenerate history never fails: it yields a neutral 1.0.

use lend_core::RateHistory;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::SentimentConfig;

/// Market-pressure signal for one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentimentMetric {
    /// Accelerated sentiment, always ≥ 0.
    pub value: Decimal,
    /// Sentiment before acceleration.
    pub raw: Decimal,
    /// Sustained extreme demand.
    pub panic: bool,
}

impl SentimentMetric {
    /// Flat demand, no panic.
    pub const NEUTRAL: Self = Self {
        value: Decimal::ONE,
        raw: Decimal::ONE,
        panic: false,
    };
}

impl Default for SentimentMetric {
    fn default() -> Self {
        Self::NEUTRAL
    }
}

/// Derives [`SentimentMetric`] from utilization history.
#[derive(Debug, Clone)]
pub struct SentimentAnalyzer {
    config: SentimentConfig,
}

impl SentimentAnalyzer {
    pub fn new(config: SentimentConfig) -> Self {
        Self { config }
    }

    /// Analyze the latest utilization history.
    pub fn analyze(&self, history: &RateHistory) -> SentimentMetric {
        let samples: Vec<Decimal> = history.utilization_values().collect();

        let Some(raw) = self.raw_at(&samples, 0) else {
            debug!(
                samples = samples.len(),
                required = self.config.window + 1,
                "Insufficient utilization history, sentiment neutral"
            );
            return SentimentMetric::NEUTRAL;
        };

        let value = self.accelerate(raw);
        let panic = self.detect_panic(&samples);

        debug!(raw = %raw, value = %value, panic, "Sentiment computed");

        SentimentMetric { value, raw, panic }
    }

    /// Premium multiplier applied to the predicted rate.
    ///
    /// `max(1, value / highest_sentiment)`, capped at `max_premium`.
    pub fn premium(&self, metric: &SentimentMetric) -> Decimal {
        let ratio = metric.value / self.config.highest_sentiment;
        ratio.max(Decimal::ONE).min(self.config.max_premium)
    }

    /// Raw sentiment of the sample at `offset` (0 = newest).
    fn raw_at(&self, samples: &[Decimal], offset: usize) -> Option<Decimal> {
        let window = self.config.window;
        let current = *samples.get(offset)?;
        let trailing = samples.get(offset + 1..offset + 1 + window)?;
        let sum: Decimal = trailing.iter().sum();
        let mean = sum / Decimal::from(window);
        if mean <= Decimal::ZERO {
            return None;
        }
        Some((current / mean).max(Decimal::ZERO))
    }

    fn accelerate(&self, raw: Decimal) -> Decimal {
        let threshold = self.config.accelerator_threshold;
        if raw > threshold {
            raw * (Decimal::ONE + (raw - threshold) * self.config.accelerator_slope)
        } else {
            raw
        }
    }

    /// Panic when each of the newest `panic_consecutive_samples` samples is
    /// itself above the panic threshold relative to its own trailing window.
    fn detect_panic(&self, samples: &[Decimal]) -> bool {
        (0..self.config.panic_consecutive_samples).all(|offset| {
            self.raw_at(samples, offset)
                .is_some_and(|raw| raw > self.config.panic_threshold)
        })
    }
}

impl Default for SentimentAnalyzer {
    fn default() -> Self {
        Self::new(SentimentConfig::default())
    }
}
