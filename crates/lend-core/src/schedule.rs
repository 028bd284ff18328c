//! Rate → maximum tenor schedule.
//!
//! Higher rates justify locking funds up for longer. The schedule is a list
//! of `(threshold, max_days)` pairs; a rate maps to the `max_days` of the
//! highest threshold it reaches. Rates below the first threshold get the
//! exchange minimum tenor.
//!
//! Validation happens on construction (including deserialization), so an
//! unordered or out-of-range schedule never reaches the strategy.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::Rate;

/// Shortest tenor the exchange accepts.
pub const MIN_TENOR_DAYS: u32 = 2;
/// Longest tenor the exchange accepts.
pub const MAX_TENOR_DAYS: u32 = 120;

/// One schedule threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    /// Minimum rate for this tenor.
    pub rate: Rate,
    /// Longest tenor allowed at or above `rate`.
    pub days: u32,
}

/// Validated, ascending rate → max-tenor schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<ScheduleEntry>", into = "Vec<ScheduleEntry>")]
pub struct TenorSchedule {
    entries: Vec<ScheduleEntry>,
}

impl TenorSchedule {
    /// Build a schedule, rejecting unordered thresholds or unsupported tenors.
    pub fn new(entries: Vec<ScheduleEntry>) -> CoreResult<Self> {
        for entry in &entries {
            if !entry.rate.is_positive() {
                return Err(CoreError::InvalidSchedule(format!(
                    "threshold rate must be positive, got {}",
                    entry.rate
                )));
            }
            if !(MIN_TENOR_DAYS..=MAX_TENOR_DAYS).contains(&entry.days) {
                return Err(CoreError::InvalidSchedule(format!(
                    "tenor {} days outside [{MIN_TENOR_DAYS}, {MAX_TENOR_DAYS}]",
                    entry.days
                )));
            }
        }
        if let Some(pair) = entries.windows(2).find(|w| w[0].rate >= w[1].rate) {
            return Err(CoreError::InvalidSchedule(format!(
                "thresholds must be strictly ascending: {} then {}",
                pair[0].rate, pair[1].rate
            )));
        }
        Ok(Self { entries })
    }

    /// Schedule with no thresholds: every rate maps to the minimum tenor.
    #[must_use]
    pub fn minimum_only() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn entries(&self) -> &[ScheduleEntry] {
        &self.entries
    }

    /// Longest admissible tenor for an offer at `rate`.
    #[must_use]
    pub fn max_tenor_for(&self, rate: Rate) -> u32 {
        self.entries
            .iter()
            .take_while(|e| rate >= e.rate)
            .last()
            .map_or(MIN_TENOR_DAYS, |e| e.days)
    }

    /// Whether an offer at `rate` may be placed for `tenor_days`.
    #[must_use]
    pub fn admits(&self, rate: Rate, tenor_days: u32) -> bool {
        tenor_days >= MIN_TENOR_DAYS && tenor_days <= self.max_tenor_for(rate)
    }
}

impl TryFrom<Vec<ScheduleEntry>> for TenorSchedule {
    type Error = CoreError;

    fn try_from(entries: Vec<ScheduleEntry>) -> Result<Self, Self::Error> {
        Self::new(entries)
    }
}

impl From<TenorSchedule> for Vec<ScheduleEntry> {
    fn from(schedule: TenorSchedule) -> Self {
        schedule.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn entry(rate: Decimal, days: u32) -> ScheduleEntry {
        ScheduleEntry {
            rate: Rate::new(rate),
            days,
        }
    }

    fn schedule() -> TenorSchedule {
        TenorSchedule::new(vec![
            entry(dec!(0.0004), 10),
            entry(dec!(0.0005), 30),
            entry(dec!(0.0006), 60),
            entry(dec!(0.0008), 90),
        ])
        .unwrap()
    }

    #[test]
    fn test_exact_threshold_uses_its_tenor() {
        assert_eq!(schedule().max_tenor_for(Rate::new(dec!(0.0006))), 60);
    }

    #[test]
    fn test_between_thresholds_uses_lower() {
        assert_eq!(schedule().max_tenor_for(Rate::new(dec!(0.00055))), 30);
    }

    #[test]
    fn test_below_first_threshold_is_minimum() {
        assert_eq!(
            schedule().max_tenor_for(Rate::new(dec!(0.0001))),
            MIN_TENOR_DAYS
        );
        assert_eq!(
            TenorSchedule::minimum_only().max_tenor_for(Rate::new(dec!(0.01))),
            MIN_TENOR_DAYS
        );
    }

    #[test]
    fn test_above_last_threshold() {
        assert_eq!(schedule().max_tenor_for(Rate::new(dec!(0.005))), 90);
    }

    #[test]
    fn test_admits() {
        let s = schedule();
        assert!(s.admits(Rate::new(dec!(0.0006)), 60));
        assert!(s.admits(Rate::new(dec!(0.0006)), 2));
        assert!(!s.admits(Rate::new(dec!(0.0006)), 61));
        assert!(!s.admits(Rate::new(dec!(0.0003)), 10));
        assert!(!s.admits(Rate::new(dec!(0.0006)), 1));
    }

    #[test]
    fn test_rejects_unordered() {
        let err = TenorSchedule::new(vec![entry(dec!(0.0005), 30), entry(dec!(0.0004), 10)]);
        assert!(matches!(err, Err(CoreError::InvalidSchedule(_))));

        let dup = TenorSchedule::new(vec![entry(dec!(0.0005), 30), entry(dec!(0.0005), 60)]);
        assert!(dup.is_err());
    }

    #[test]
    fn test_rejects_out_of_range_tenor() {
        assert!(TenorSchedule::new(vec![entry(dec!(0.0005), 1)]).is_err());
        assert!(TenorSchedule::new(vec![entry(dec!(0.0005), 121)]).is_err());
        assert!(TenorSchedule::new(vec![entry(dec!(0), 30)]).is_err());
    }

    #[derive(Deserialize)]
    struct Wrapper {
        schedule: TenorSchedule,
    }

    #[test]
    fn test_deserialize_validates() {
        let ok: Wrapper = toml::from_str(
            r#"
            schedule = [
                { rate = "0.0004", days = 10 },
                { rate = "0.0005", days = 30 },
            ]
            "#,
        )
        .unwrap();
        assert_eq!(ok.schedule.entries().len(), 2);

        let bad: Result<Wrapper, _> = toml::from_str(
            r#"
            schedule = [
                { rate = "0.0005", days = 30 },
                { rate = "0.0004", days = 10 },
            ]
            "#,
        );
        assert!(bad.is_err());
    }
}
