//! Rate optimizer: turns sentiment and recent rate history into the
//! per-cycle [`StrategyParameters`].
//!
//! Pure and deterministic: the same inputs always produce the same output,
//! and nothing here is persisted between cycles. The two mappings that are
//! a matter of taste (safety factor and tier count) sit behind
//! [`StrategyPolicy`] so they can be swapped without touching the ladder.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use lend_core::{Rate, RateHistory};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{SafetyConfig, StrategyConfig};
use crate::sentiment::SentimentMetric;

/// Window for the dynamic floor's trailing low.
const FLOOR_LOOKBACK_HOURS: i64 = 24;

/// Parameters derived for one slow-loop cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyParameters {
    /// Discount applied to the last-hour high, in `[min, max]` safety bounds.
    pub safety_factor: Decimal,
    /// Lowest rate any tier may be quoted at this cycle.
    pub dynamic_rate_floor: Rate,
    /// Number of ladder tiers.
    pub tier_count: usize,
    /// Coefficient of variation of recent hourly highs.
    pub volatility: Decimal,
}

/// Pluggable mappings from market state to ladder shape.
pub trait StrategyPolicy: Send + Sync {
    /// Safety factor; must be non-increasing in both arguments.
    fn safety_factor(&self, sentiment: Decimal, volatility: Decimal) -> Decimal;

    /// Tier count; must be non-decreasing in sentiment.
    fn tier_count(&self, sentiment: Decimal) -> usize;
}

/// Step-function safety factor and linear tier count.
#[derive(Debug, Clone)]
pub struct DefaultPolicy {
    safety: SafetyConfig,
    min_steps: usize,
    max_steps: usize,
}

impl DefaultPolicy {
    pub fn new(safety: SafetyConfig, min_steps: usize, max_steps: usize) -> Self {
        Self {
            safety,
            min_steps,
            max_steps: max_steps.max(min_steps),
        }
    }

    pub fn from_config(config: &StrategyConfig) -> Self {
        Self::new(config.safety.clone(), config.min_steps, config.max_steps)
    }
}

impl StrategyPolicy for DefaultPolicy {
    fn safety_factor(&self, sentiment: Decimal, volatility: Decimal) -> Decimal {
        let sentiment_adj = if sentiment > dec!(3.0) {
            dec!(-0.02)
        } else if sentiment > dec!(2.0) {
            dec!(-0.015)
        } else if sentiment > dec!(1.5) {
            dec!(-0.01)
        } else if sentiment < dec!(0.8) {
            dec!(0.015)
        } else {
            Decimal::ZERO
        };

        let volatility_adj = if volatility > dec!(0.1) {
            dec!(-0.01)
        } else if volatility > dec!(0.05) {
            dec!(-0.005)
        } else {
            Decimal::ZERO
        };

        (self.safety.base + sentiment_adj + volatility_adj)
            .max(self.safety.min)
            .min(self.safety.max)
    }

    fn tier_count(&self, sentiment: Decimal) -> usize {
        let span = self.max_steps - self.min_steps;
        if span == 0 || sentiment <= Decimal::ONE {
            return self.min_steps;
        }
        let full = self.safety.sentiment_for_max_steps;
        if sentiment >= full {
            return self.max_steps;
        }
        let progress = (sentiment - Decimal::ONE) / (full - Decimal::ONE);
        let extra = (progress * Decimal::from(span))
            .floor()
            .to_usize()
            .unwrap_or(0);
        (self.min_steps + extra).min(self.max_steps)
    }
}

/// Coefficient of variation (sample stdev / mean) of `rates`.
///
/// Zero for fewer than two samples or a non-positive mean.
pub fn rate_volatility(rates: &[Rate]) -> Decimal {
    if rates.len() < 2 {
        return Decimal::ZERO;
    }
    let values: Vec<f64> = rates.iter().filter_map(|r| r.inner().to_f64()).collect();
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    if mean <= 0.0 {
        return Decimal::ZERO;
    }
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    Decimal::from_f64_retain(variance.sqrt() / mean)
        .map(|d| d.round_dp(6))
        .unwrap_or(Decimal::ZERO)
}

/// Computes [`StrategyParameters`] each cycle.
#[derive(Clone)]
pub struct RateOptimizer {
    policy: Arc<dyn StrategyPolicy>,
    minimum_rate: Rate,
    floor_low_multiplier: Decimal,
    min_steps: usize,
    max_steps: usize,
    safety_min: Decimal,
    safety_max: Decimal,
    volatility_samples: usize,
}

impl RateOptimizer {
    pub fn new(config: &StrategyConfig, policy: Arc<dyn StrategyPolicy>) -> Self {
        Self {
            policy,
            minimum_rate: config.minimum_rate,
            floor_low_multiplier: config.floor_low_multiplier,
            min_steps: config.min_steps,
            max_steps: config.max_steps,
            safety_min: config.safety.min,
            safety_max: config.safety.max,
            volatility_samples: config.safety.volatility_samples,
        }
    }

    /// Optimizer using [`DefaultPolicy`].
    pub fn with_default_policy(config: &StrategyConfig) -> Self {
        Self::new(config, Arc::new(DefaultPolicy::from_config(config)))
    }

    /// `max(configured floor, trailing 24h low × k)`.
    pub fn dynamic_rate_floor(&self, history: &RateHistory, now: DateTime<Utc>) -> Rate {
        history
            .min_low_within(now, Duration::hours(FLOOR_LOOKBACK_HOURS))
            .map(|low| (low * self.floor_low_multiplier).max(self.minimum_rate))
            .unwrap_or(self.minimum_rate)
    }

    /// Derive this cycle's parameters.
    pub fn optimize(
        &self,
        sentiment: &SentimentMetric,
        history: &RateHistory,
        now: DateTime<Utc>,
    ) -> StrategyParameters {
        let volatility = rate_volatility(&history.recent_highs(self.volatility_samples));
        let safety_factor = self
            .policy
            .safety_factor(sentiment.value, volatility)
            .max(self.safety_min)
            .min(self.safety_max);
        let tier_count = self
            .policy
            .tier_count(sentiment.value)
            .clamp(self.min_steps, self.max_steps);
        let dynamic_rate_floor = self.dynamic_rate_floor(history, now);

        debug!(
            sentiment = %sentiment.value,
            volatility = %volatility,
            safety_factor = %safety_factor,
            tier_count,
            floor = %dynamic_rate_floor,
            "Strategy parameters derived"
        );

        StrategyParameters {
            safety_factor,
            dynamic_rate_floor,
            tier_count,
            volatility,
        }
    }
}

impl std::fmt::Debug for RateOptimizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateOptimizer")
            .field("minimum_rate", &self.minimum_rate)
            .field("floor_low_multiplier", &self.floor_low_multiplier)
            .field("min_steps", &self.min_steps)
            .field("max_steps", &self.max_steps)
            .finish_non_exhaustive()
    }
}
