//! Historical funding data used by the strategy.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::Rate;

/// Hourly candle of the funding rate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateCandle {
    pub open_time: DateTime<Utc>,
    pub open: Rate,
    pub close: Rate,
    pub high: Rate,
    pub low: Rate,
    pub volume: Decimal,
}

/// Hourly sample of funds lent out on the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UtilizationSample {
    pub time: DateTime<Utc>,
    /// Total funding amount in use (borrowed) at `time`.
    pub amount_used: Decimal,
}

/// Rate and utilization history over a trailing window.
///
/// Both series are stored newest first, matching how the exchange returns
/// them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateHistory {
    pub candles: Vec<RateCandle>,
    pub utilization: Vec<UtilizationSample>,
}

impl RateHistory {
    /// Build from unordered series, sorting newest first.
    #[must_use]
    pub fn new(mut candles: Vec<RateCandle>, mut utilization: Vec<UtilizationSample>) -> Self {
        candles.sort_by(|a, b| b.open_time.cmp(&a.open_time));
        utilization.sort_by(|a, b| b.time.cmp(&a.time));
        Self {
            candles,
            utilization,
        }
    }

    /// Candles opened within `window` of `now`, newest first.
    pub fn candles_within(
        &self,
        now: DateTime<Utc>,
        window: Duration,
    ) -> impl Iterator<Item = &RateCandle> {
        let cutoff = now - window;
        self.candles.iter().filter(move |c| c.open_time >= cutoff)
    }

    /// Lowest candle low within the window.
    #[must_use]
    pub fn min_low_within(&self, now: DateTime<Utc>, window: Duration) -> Option<Rate> {
        self.candles_within(now, window).map(|c| c.low).min()
    }

    /// Mean of candle highs within the window.
    #[must_use]
    pub fn mean_high_within(&self, now: DateTime<Utc>, window: Duration) -> Option<Rate> {
        let highs: Vec<Decimal> = self
            .candles_within(now, window)
            .map(|c| c.high.inner())
            .collect();
        if highs.is_empty() {
            return None;
        }
        let sum: Decimal = highs.iter().sum();
        Some(Rate::new(sum / Decimal::from(highs.len())))
    }

    /// High of the most recent candle.
    #[must_use]
    pub fn last_high(&self) -> Option<Rate> {
        self.candles.first().map(|c| c.high)
    }

    /// Highs of the most recent `n` candles, newest first.
    #[must_use]
    pub fn recent_highs(&self, n: usize) -> Vec<Rate> {
        self.candles.iter().take(n).map(|c| c.high).collect()
    }

    /// Utilization values, newest first.
    pub fn utilization_values(&self) -> impl Iterator<Item = Decimal> + '_ {
        self.utilization.iter().map(|s| s.amount_used)
    }
}
