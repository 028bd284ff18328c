//! Engine timing and funds configuration.

use std::time::Duration;

use lend_core::{Amount, TenorRange, MAX_TENOR_DAYS, MIN_TENOR_DAYS};
use lend_strategy::MAX_WINDOW_SECS;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Funding currency symbol, e.g. `USD`. One engine lends one currency;
    /// run a process per currency to lend several.
    #[serde(default = "default_currency")]
    pub currency: String,

    /// Below this much lendable capital the ladder is not built.
    #[serde(default = "default_min_funds")]
    pub min_funds: Decimal,

    /// Capital never offered.
    #[serde(default)]
    pub retained_funds: Decimal,

    /// Full rebalance period.
    #[serde(default = "default_slow_interval_secs")]
    pub slow_interval_secs: u64,

    /// Opportunistic scan period.
    #[serde(default = "default_fast_interval_secs")]
    pub fast_interval_secs: u64,

    /// Open offer re-sync period.
    #[serde(default = "default_resync_interval_secs")]
    pub resync_interval_secs: u64,

    #[serde(default = "default_summary_interval_secs")]
    pub summary_interval_secs: u64,

    /// Forced full reset period.
    #[serde(default = "default_reset_interval_secs")]
    pub reset_interval_secs: u64,

    /// How long opportunistic offers are shielded from rebalancing.
    #[serde(default = "default_protection_window_secs")]
    pub protection_window_secs: u64,

    /// How long fast-loop commands may wait for the engine before being
    /// skipped.
    #[serde(default = "default_fast_wait_ms")]
    pub fast_wait_ms: u64,

    /// Trailing window of rate history fetched per slow cycle.
    #[serde(default = "default_history_window_hours")]
    pub history_window_hours: u64,

    /// Book tenor range the strategy works on.
    #[serde(default = "default_min_tenor_days")]
    pub min_tenor_days: u32,

    #[serde(default = "default_max_tenor_days")]
    pub max_tenor_days: u32,

    /// Cancel whatever is resting on the book at startup.
    #[serde(default = "default_true")]
    pub cancel_on_startup: bool,

    /// Skip reconciliation when the plan matches the current ladder.
    #[serde(default = "default_true")]
    pub rebalance_hysteresis: bool,

    #[serde(default = "default_event_queue_capacity")]
    pub event_queue_capacity: usize,
}

fn default_currency() -> String {
    "USD".to_string()
}

fn default_min_funds() -> Decimal {
    Decimal::from(150)
}

fn default_slow_interval_secs() -> u64 {
    300
}

fn default_fast_interval_secs() -> u64 {
    10
}

fn default_resync_interval_secs() -> u64 {
    30
}

fn default_summary_interval_secs() -> u64 {
    3600
}

fn default_reset_interval_secs() -> u64 {
    6 * 3600
}

fn default_protection_window_secs() -> u64 {
    300
}

fn default_fast_wait_ms() -> u64 {
    2_000
}

fn default_history_window_hours() -> u64 {
    48
}

fn default_min_tenor_days() -> u32 {
    MIN_TENOR_DAYS
}

fn default_max_tenor_days() -> u32 {
    MAX_TENOR_DAYS
}

fn default_true() -> bool {
    true
}

fn default_event_queue_capacity() -> usize {
    256
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            currency: default_currency(),
            min_funds: default_min_funds(),
            retained_funds: Decimal::ZERO,
            slow_interval_secs: default_slow_interval_secs(),
            fast_interval_secs: default_fast_interval_secs(),
            resync_interval_secs: default_resync_interval_secs(),
            summary_interval_secs: default_summary_interval_secs(),
            reset_interval_secs: default_reset_interval_secs(),
            protection_window_secs: default_protection_window_secs(),
            fast_wait_ms: default_fast_wait_ms(),
            history_window_hours: default_history_window_hours(),
            min_tenor_days: default_min_tenor_days(),
            max_tenor_days: default_max_tenor_days(),
            cancel_on_startup: true,
            rebalance_hysteresis: true,
            event_queue_capacity: default_event_queue_capacity(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> EngineResult<()> {
        let invalid = |msg: String| Err(EngineError::InvalidConfig(msg));

        if self.currency.trim().is_empty() {
            return invalid("currency must not be empty".to_string());
        }
        if self.min_funds.is_sign_negative() || self.retained_funds.is_sign_negative() {
            return invalid("min_funds and retained_funds must be non-negative".to_string());
        }
        for (name, value) in [
            ("slow_interval_secs", self.slow_interval_secs),
            ("fast_interval_secs", self.fast_interval_secs),
            ("resync_interval_secs", self.resync_interval_secs),
            ("summary_interval_secs", self.summary_interval_secs),
            ("reset_interval_secs", self.reset_interval_secs),
            ("history_window_hours", self.history_window_hours),
        ] {
            if value == 0 {
                return invalid(format!("{name} must be positive"));
            }
        }
        for (name, secs) in [
            ("reset_interval_secs", self.reset_interval_secs),
            ("protection_window_secs", self.protection_window_secs),
            ("history_window_hours", self.history_window_hours.saturating_mul(3600)),
        ] {
            if secs > MAX_WINDOW_SECS {
                return invalid(format!("{name} must span at most {MAX_WINDOW_SECS} seconds"));
            }
        }
        if self.fast_interval_secs >= self.slow_interval_secs {
            return invalid(format!(
                "fast_interval_secs ({}) must be shorter than slow_interval_secs ({})",
                self.fast_interval_secs, self.slow_interval_secs
            ));
        }
        if self.min_tenor_days < MIN_TENOR_DAYS
            || self.max_tenor_days > MAX_TENOR_DAYS
            || self.min_tenor_days > self.max_tenor_days
        {
            return invalid(format!(
                "tenor range {}..={} outside {MIN_TENOR_DAYS}..={MAX_TENOR_DAYS}",
                self.min_tenor_days, self.max_tenor_days
            ));
        }
        if self.event_queue_capacity == 0 {
            return invalid("event_queue_capacity must be positive".to_string());
        }
        Ok(())
    }

    pub fn retained(&self) -> Amount {
        Amount::new(self.retained_funds)
    }

    pub fn min_funds(&self) -> Amount {
        Amount::new(self.min_funds)
    }

    pub fn tenor_range(&self) -> TenorRange {
        TenorRange::new(self.min_tenor_days, self.max_tenor_days)
    }

    pub fn slow_interval(&self) -> Duration {
        Duration::from_secs(self.slow_interval_secs)
    }

    pub fn fast_interval(&self) -> Duration {
        Duration::from_secs(self.fast_interval_secs)
    }

    pub fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.resync_interval_secs)
    }

    pub fn summary_interval(&self) -> Duration {
        Duration::from_secs(self.summary_interval_secs)
    }

    pub fn fast_wait(&self) -> Duration {
        Duration::from_millis(self.fast_wait_ms)
    }

    pub fn history_window(&self) -> Duration {
        Duration::from_secs(self.history_window_hours.saturating_mul(3600))
    }

    pub fn reset_interval(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.reset_interval_secs.min(MAX_WINDOW_SECS) as i64)
    }

    pub fn protection_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.protection_window_secs.min(MAX_WINDOW_SECS) as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = EngineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.reset_interval(), chrono::Duration::hours(6));
        assert_eq!(config.protection_window(), chrono::Duration::minutes(5));
    }

    #[test]
    fn test_fast_must_be_shorter_than_slow() {
        let config = EngineConfig {
            fast_interval_secs: 300,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(EngineError::InvalidConfig(msg)) if msg.contains("fast_interval_secs")
        ));
    }

    #[test]
    fn test_windows_are_bounded() {
        for config in [
            EngineConfig {
                reset_interval_secs: u64::MAX,
                ..Default::default()
            },
            EngineConfig {
                protection_window_secs: u64::MAX,
                ..Default::default()
            },
            EngineConfig {
                history_window_hours: u64::MAX,
                ..Default::default()
            },
        ] {
            assert!(matches!(
                config.validate(),
                Err(EngineError::InvalidConfig(_))
            ));
            // Conversions saturate instead of panicking.
            let _ = config.reset_interval();
            let _ = config.protection_window();
            let _ = config.history_window();
        }
    }

    #[test]
    fn test_tenor_range_bounds() {
        let config = EngineConfig {
            max_tenor_days: 180,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
