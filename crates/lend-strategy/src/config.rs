//! Strategy configuration.

use lend_core::{Amount, Rate, ScheduleEntry, TenorSchedule};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::error::{StrategyError, StrategyResult};

/// Upper bound for `max_steps`. Fibonacci weights stay exact well past it.
pub const MAX_LADDER_STEPS: usize = 20;

/// Upper bound for any configured window, in seconds (one year).
pub const MAX_WINDOW_SECS: u64 = 365 * 24 * 60 * 60;

/// Order in which Fibonacci weights are assigned to ladder tiers.
///
/// Tier 0 is the lowest-rate tier.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FibonacciOrder {
    /// `[1, 1, 2, 3, ...]`: highest-rate tier gets the most capital.
    #[default]
    Ascending,
    /// `[..., 3, 2, 1, 1]`: lowest-rate tier gets the most capital.
    Descending,
}

/// Sentiment analysis parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentimentConfig {
    /// Number of trailing hourly samples averaged for the baseline.
    #[serde(default = "default_sentiment_window")]
    pub window: usize,

    /// Sentiment above which the accelerator kicks in.
    #[serde(default = "default_accelerator_threshold")]
    pub accelerator_threshold: Decimal,

    /// Extra weight per unit of sentiment above the threshold.
    #[serde(default = "default_accelerator_slope")]
    pub accelerator_slope: Decimal,

    /// Sentiment that maps to the maximum rate premium of 1.0x extra.
    #[serde(default = "default_highest_sentiment")]
    pub highest_sentiment: Decimal,

    /// Cap on the sentiment premium multiplier.
    #[serde(default = "default_max_premium")]
    pub max_premium: Decimal,

    /// Raw sentiment above which a sample counts toward panic.
    #[serde(default = "default_panic_threshold")]
    pub panic_threshold: Decimal,

    /// Consecutive panic samples needed to raise the flag.
    #[serde(default = "default_panic_consecutive_samples")]
    pub panic_consecutive_samples: usize,
}

fn default_sentiment_window() -> usize {
    12
}

fn default_accelerator_threshold() -> Decimal {
    dec!(3.0)
}

fn default_accelerator_slope() -> Decimal {
    dec!(0.15)
}

fn default_highest_sentiment() -> Decimal {
    dec!(8.0)
}

fn default_max_premium() -> Decimal {
    dec!(2.0)
}

fn default_panic_threshold() -> Decimal {
    dec!(5.0)
}

fn default_panic_consecutive_samples() -> usize {
    2
}

impl Default for SentimentConfig {
    fn default() -> Self {
        Self {
            window: default_sentiment_window(),
            accelerator_threshold: default_accelerator_threshold(),
            accelerator_slope: default_accelerator_slope(),
            highest_sentiment: default_highest_sentiment(),
            max_premium: default_max_premium(),
            panic_threshold: default_panic_threshold(),
            panic_consecutive_samples: default_panic_consecutive_samples(),
        }
    }
}

/// Safety factor policy bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyConfig {
    /// Factor applied at neutral sentiment and calm rates.
    #[serde(default = "default_base_safety_factor")]
    pub base: Decimal,

    #[serde(default = "default_min_safety_factor")]
    pub min: Decimal,

    #[serde(default = "default_max_safety_factor")]
    pub max: Decimal,

    /// Number of recent hourly highs used for rate volatility.
    #[serde(default = "default_volatility_samples")]
    pub volatility_samples: usize,

    /// Sentiment at (and above) which the ladder uses `max_steps` tiers.
    #[serde(default = "default_sentiment_for_max_steps")]
    pub sentiment_for_max_steps: Decimal,
}

fn default_base_safety_factor() -> Decimal {
    dec!(0.97)
}

fn default_min_safety_factor() -> Decimal {
    dec!(0.95)
}

fn default_max_safety_factor() -> Decimal {
    dec!(0.99)
}

fn default_volatility_samples() -> usize {
    5
}

fn default_sentiment_for_max_steps() -> Decimal {
    dec!(3.0)
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            base: default_base_safety_factor(),
            min: default_min_safety_factor(),
            max: default_max_safety_factor(),
            volatility_samples: default_volatility_samples(),
            sentiment_for_max_steps: default_sentiment_for_max_steps(),
        }
    }
}

/// Opportunistic (fast loop) parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpportunisticConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Quote rate = demand rate × discount, to make sure we match.
    #[serde(default = "default_rate_discount")]
    pub rate_discount: Decimal,

    /// Demand must beat the best open offer rate by this factor.
    #[serde(default = "default_threshold_margin")]
    pub threshold_margin: Decimal,

    /// Fraction of idle funds a single opportunistic offer may use.
    #[serde(default = "default_max_single_order_ratio")]
    pub max_single_order_ratio: Decimal,

    /// Fraction of the visible demand we try to fill.
    #[serde(default = "default_market_amount_ratio")]
    pub market_amount_ratio: Decimal,

    /// Minimum priority score for a demand entry to be acted on.
    #[serde(default = "default_min_priority_score")]
    pub min_priority_score: Decimal,

    #[serde(default = "default_profit_weight")]
    pub profit_weight: Decimal,

    #[serde(default = "default_amount_weight")]
    pub amount_weight: Decimal,

    #[serde(default = "default_liquidity_weight")]
    pub liquidity_weight: Decimal,

    /// Scales the rate margin over the floor into score units.
    #[serde(default = "default_priority_multiplier")]
    pub priority_multiplier: Decimal,

    #[serde(default = "default_amount_factor_divisor")]
    pub amount_factor_divisor: Decimal,

    #[serde(default = "default_amount_factor_max")]
    pub amount_factor_max: Decimal,

    #[serde(default = "default_liquidity_factor_divisor")]
    pub liquidity_factor_divisor: Decimal,

    #[serde(default = "default_liquidity_factor_max")]
    pub liquidity_factor_max: Decimal,

    /// How long a demand entry we acted on is remembered (seconds).
    #[serde(default = "default_demand_memory_secs")]
    pub demand_memory_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_rate_discount() -> Decimal {
    dec!(0.999)
}

fn default_threshold_margin() -> Decimal {
    dec!(1.00005)
}

fn default_max_single_order_ratio() -> Decimal {
    dec!(0.3)
}

fn default_market_amount_ratio() -> Decimal {
    dec!(0.8)
}

fn default_min_priority_score() -> Decimal {
    dec!(0.1)
}

fn default_profit_weight() -> Decimal {
    dec!(0.8)
}

fn default_amount_weight() -> Decimal {
    dec!(0.15)
}

fn default_liquidity_weight() -> Decimal {
    dec!(0.05)
}

fn default_priority_multiplier() -> Decimal {
    dec!(1000)
}

fn default_amount_factor_divisor() -> Decimal {
    dec!(10000)
}

fn default_amount_factor_max() -> Decimal {
    dec!(5)
}

fn default_liquidity_factor_divisor() -> Decimal {
    dec!(10)
}

fn default_liquidity_factor_max() -> Decimal {
    dec!(2)
}

fn default_demand_memory_secs() -> u64 {
    3600
}

impl Default for OpportunisticConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            rate_discount: default_rate_discount(),
            threshold_margin: default_threshold_margin(),
            max_single_order_ratio: default_max_single_order_ratio(),
            market_amount_ratio: default_market_amount_ratio(),
            min_priority_score: default_min_priority_score(),
            profit_weight: default_profit_weight(),
            amount_weight: default_amount_weight(),
            liquidity_weight: default_liquidity_weight(),
            priority_multiplier: default_priority_multiplier(),
            amount_factor_divisor: default_amount_factor_divisor(),
            amount_factor_max: default_amount_factor_max(),
            liquidity_factor_divisor: default_liquidity_factor_divisor(),
            liquidity_factor_max: default_liquidity_factor_max(),
            demand_memory_secs: default_demand_memory_secs(),
        }
    }
}

/// Lending strategy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    /// Fewest ladder tiers.
    #[serde(default = "default_min_steps")]
    pub min_steps: usize,

    /// Most ladder tiers.
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,

    /// Rate multiplier between consecutive tiers (must be > 1).
    #[serde(default = "default_rate_adjustment_ratio")]
    pub rate_adjustment_ratio: Decimal,

    /// Absolute lowest rate we ever offer at.
    #[serde(default = "default_minimum_rate")]
    pub minimum_rate: Rate,

    /// Dynamic floor = max(minimum_rate, 24h low × this). Must be < 1.
    #[serde(default = "default_floor_low_multiplier")]
    pub floor_low_multiplier: Decimal,

    /// Smallest offer the exchange accepts.
    #[serde(default = "default_min_offer_amount")]
    pub min_offer_amount: Amount,

    /// Decimal places kept on offer amounts (truncated).
    #[serde(default)]
    pub amount_decimals: u32,

    #[serde(default)]
    pub fibonacci_order: FibonacciOrder,

    /// Rate → maximum tenor schedule.
    #[serde(default = "default_schedule")]
    pub schedule: TenorSchedule,

    #[serde(default)]
    pub sentiment: SentimentConfig,

    #[serde(default)]
    pub safety: SafetyConfig,

    #[serde(default)]
    pub opportunistic: OpportunisticConfig,
}

fn default_min_steps() -> usize {
    3
}

fn default_max_steps() -> usize {
    7
}

fn default_rate_adjustment_ratio() -> Decimal {
    dec!(1.07)
}

fn default_minimum_rate() -> Rate {
    Rate::new(dec!(0.0002))
}

fn default_floor_low_multiplier() -> Decimal {
    dec!(0.8)
}

fn default_min_offer_amount() -> Amount {
    Amount::new(dec!(150))
}

/// Default schedule: longer tenors only once rates are attractive.
pub fn default_schedule() -> TenorSchedule {
    let entries = [
        (dec!(0.0004), 10),
        (dec!(0.0005), 30),
        (dec!(0.0006), 60),
        (dec!(0.0008), 90),
        (dec!(0.001), 120),
    ]
    .into_iter()
    .map(|(rate, days)| ScheduleEntry {
        rate: Rate::new(rate),
        days,
    })
    .collect();
    TenorSchedule::new(entries).unwrap_or_else(|_| TenorSchedule::minimum_only())
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            min_steps: default_min_steps(),
            max_steps: default_max_steps(),
            rate_adjustment_ratio: default_rate_adjustment_ratio(),
            minimum_rate: default_minimum_rate(),
            floor_low_multiplier: default_floor_low_multiplier(),
            min_offer_amount: default_min_offer_amount(),
            amount_decimals: 0,
            fibonacci_order: FibonacciOrder::default(),
            schedule: default_schedule(),
            sentiment: SentimentConfig::default(),
            safety: SafetyConfig::default(),
            opportunistic: OpportunisticConfig::default(),
        }
    }
}

impl StrategyConfig {
    /// Check cross-field constraints that serde cannot express.
    pub fn validate(&self) -> StrategyResult<()> {
        let invalid = |msg: String| Err(StrategyError::InvalidConfig(msg));

        if self.min_steps == 0 || self.min_steps > self.max_steps {
            return invalid(format!(
                "steps must satisfy 0 < min_steps <= max_steps (got {} / {})",
                self.min_steps, self.max_steps
            ));
        }
        if self.max_steps > MAX_LADDER_STEPS {
            return invalid(format!(
                "max_steps must be at most {MAX_LADDER_STEPS} (got {})",
                self.max_steps
            ));
        }
        if self.rate_adjustment_ratio <= Decimal::ONE {
            return invalid(format!(
                "rate_adjustment_ratio must be > 1 (got {})",
                self.rate_adjustment_ratio
            ));
        }
        if !self.minimum_rate.is_positive() {
            return invalid(format!(
                "minimum_rate must be positive (got {})",
                self.minimum_rate
            ));
        }
        if self.floor_low_multiplier <= Decimal::ZERO || self.floor_low_multiplier >= Decimal::ONE
        {
            return invalid(format!(
                "floor_low_multiplier must be in (0, 1) (got {})",
                self.floor_low_multiplier
            ));
        }
        if !self.min_offer_amount.is_positive() {
            return invalid("min_offer_amount must be positive".to_string());
        }

        let safety = &self.safety;
        if !(safety.min <= safety.base && safety.base <= safety.max) {
            return invalid(format!(
                "safety factor bounds must satisfy min <= base <= max (got {} / {} / {})",
                safety.min, safety.base, safety.max
            ));
        }
        if safety.max > Decimal::ONE || safety.min <= Decimal::ZERO {
            return invalid("safety factor bounds must lie in (0, 1]".to_string());
        }
        if safety.sentiment_for_max_steps <= Decimal::ONE {
            return invalid("sentiment_for_max_steps must be > 1".to_string());
        }

        let sentiment = &self.sentiment;
        if sentiment.window == 0 || sentiment.panic_consecutive_samples == 0 {
            return invalid("sentiment window and panic samples must be positive".to_string());
        }
        if sentiment.highest_sentiment <= Decimal::ZERO || sentiment.max_premium < Decimal::ONE {
            return invalid("highest_sentiment must be > 0 and max_premium >= 1".to_string());
        }

        let opp = &self.opportunistic;
        if opp.rate_discount <= Decimal::ZERO || opp.rate_discount > Decimal::ONE {
            return invalid(format!(
                "opportunistic rate_discount must be in (0, 1] (got {})",
                opp.rate_discount
            ));
        }
        if opp.amount_factor_divisor <= Decimal::ZERO || opp.liquidity_factor_divisor <= Decimal::ZERO
        {
            return invalid("opportunistic factor divisors must be positive".to_string());
        }
        if opp.demand_memory_secs > MAX_WINDOW_SECS {
            return invalid(format!(
                "demand_memory_secs must be at most {MAX_WINDOW_SECS} (got {})",
                opp.demand_memory_secs
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = StrategyConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.min_steps, 3);
        assert_eq!(config.max_steps, 7);
        assert_eq!(config.rate_adjustment_ratio, dec!(1.07));
        assert_eq!(config.schedule.entries().len(), 5);
        assert_eq!(config.fibonacci_order, FibonacciOrder::Ascending);
    }

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config: StrategyConfig = toml::from_str("").unwrap();
        assert_eq!(config.minimum_rate.inner(), dec!(0.0002));
        assert_eq!(config.min_offer_amount.inner(), dec!(150));
        assert_eq!(config.opportunistic.demand_memory_secs, 3600);
        assert_eq!(config.sentiment.window, 12);
    }

    #[test]
    fn test_toml_overrides() {
        let config: StrategyConfig = toml::from_str(
            r#"
            min_steps = 4
            max_steps = 6
            rate_adjustment_ratio = "1.05"
            fibonacci_order = "descending"

            [[schedule]]
            rate = "0.0005"
            days = 30

            [opportunistic]
            enabled = false
            "#,
        )
        .unwrap();

        assert_eq!(config.min_steps, 4);
        assert_eq!(config.rate_adjustment_ratio, dec!(1.05));
        assert_eq!(config.fibonacci_order, FibonacciOrder::Descending);
        assert_eq!(config.schedule.entries().len(), 1);
        assert!(!config.opportunistic.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_steps() {
        let config = StrategyConfig {
            min_steps: 8,
            max_steps: 7,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(StrategyError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_validate_caps_max_steps() {
        let at_cap = StrategyConfig {
            max_steps: MAX_LADDER_STEPS,
            ..Default::default()
        };
        assert!(at_cap.validate().is_ok());

        let config = StrategyConfig {
            max_steps: 100,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(StrategyError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_validate_bounds_demand_memory() {
        let mut config = StrategyConfig::default();
        config.opportunistic.demand_memory_secs = u64::MAX;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_ratio_not_above_one() {
        let config = StrategyConfig {
            rate_adjustment_ratio: dec!(1.0),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_floor_multiplier() {
        let config = StrategyConfig {
            floor_low_multiplier: dec!(1.0),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
