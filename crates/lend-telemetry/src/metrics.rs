//! Prometheus metrics for the lending bot.
//!
//! Covers offer flow by origin, loop cycle outcomes, fund allocation and
//! the strategy signals behind the last ladder.
//!
//! # Panics
//!
//! Metric registration uses `unwrap()` intentionally. If registration fails,
//! it indicates a fatal configuration error (e.g., duplicate metric names)
//! that should cause an immediate crash at startup rather than silent failure.
//! These panics only occur during static initialization, never at runtime.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_histogram_vec,
    register_int_gauge, Counter, CounterVec, Gauge, HistogramVec, IntGauge,
};

/// Offers acknowledged by the exchange.
/// Labels: origin (ladder/opportunistic)
pub static OFFERS_PLACED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "lend_offers_placed_total",
        "Total offers acknowledged by the exchange",
        &["origin"]
    )
    .unwrap()
});

/// Offers cancelled by the engine.
/// Labels: origin, reason (rebalance/reset/startup)
pub static OFFERS_CANCELLED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "lend_offers_cancelled_total",
        "Total offers cancelled by the engine",
        &["origin", "reason"]
    )
    .unwrap()
});

/// Failed offer placements.
/// Labels: origin, kind (error variant)
pub static OFFERS_FAILED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "lend_offers_failed_total",
        "Total offer placements that failed",
        &["origin", "kind"]
    )
    .unwrap()
});

/// Offers observed fully taken by borrowers.
pub static OFFERS_FILLED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "lend_offers_filled_total",
        "Total offers fully filled",
        &["origin"]
    )
    .unwrap()
});

/// Loop cycles by outcome.
/// Labels: loop (slow/fast/resync), outcome (run/skipped/aborted)
pub static CYCLES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "lend_cycles_total",
        "Engine loop cycles by outcome",
        &["loop", "outcome"]
    )
    .unwrap()
});

/// Wall time of completed cycles in milliseconds.
pub static CYCLE_DURATION_MS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "lend_cycle_duration_ms",
        "Duration of completed engine cycles in milliseconds",
        &["loop"],
        vec![10.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0, 30000.0]
    )
    .unwrap()
});

pub static FULL_RESETS_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!("lend_full_resets_total", "Total forced full resets").unwrap()
});

/// Ladder tiers dropped as unfundable.
pub static TIERS_DROPPED_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "lend_tiers_dropped_total",
        "Ladder tiers dropped below the minimum offer size"
    )
    .unwrap()
});

/// Notifications dropped because the event queue was full.
pub static EVENTS_DROPPED_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "lend_events_dropped_total",
        "Notification events dropped on a full queue"
    )
    .unwrap()
});

pub static COMMITTED_FUNDS: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!(
        "lend_committed_funds",
        "Funds resting in active offers"
    )
    .unwrap()
});

pub static IDLE_FUNDS: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!(
        "lend_idle_funds",
        "Available funds not committed to offers, after retention"
    )
    .unwrap()
});

pub static OPEN_OFFERS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("lend_open_offers", "Active offers tracked by the engine").unwrap()
});

pub static PROTECTED_OFFERS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "lend_protected_offers",
        "Active offers inside their protection window"
    )
    .unwrap()
});

pub static SENTIMENT: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!("lend_sentiment", "Last computed market sentiment").unwrap()
});

/// 1 while the last sentiment sample carried the panic flag.
pub static SENTIMENT_PANIC: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("lend_sentiment_panic", "Panic flag of the last sentiment").unwrap()
});

pub static SAFETY_FACTOR: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!("lend_safety_factor", "Last safety factor").unwrap()
});

pub static DYNAMIC_RATE_FLOOR: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!("lend_dynamic_rate_floor", "Last dynamic rate floor (daily)").unwrap()
});

pub static LADDER_TIERS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("lend_ladder_tiers", "Tier count of the last ladder plan").unwrap()
});

/// Metrics facade.
pub struct Metrics;

impl Metrics {
    pub fn offer_placed(origin: &str) {
        OFFERS_PLACED_TOTAL.with_label_values(&[origin]).inc();
    }

    pub fn offer_cancelled(origin: &str, reason: &str) {
        OFFERS_CANCELLED_TOTAL
            .with_label_values(&[origin, reason])
            .inc();
    }

    pub fn offer_failed(origin: &str, kind: &str) {
        OFFERS_FAILED_TOTAL.with_label_values(&[origin, kind]).inc();
    }

    pub fn offer_filled(origin: &str) {
        OFFERS_FILLED_TOTAL.with_label_values(&[origin]).inc();
    }

    /// Record a completed cycle and its duration.
    pub fn cycle_run(loop_name: &str, duration_ms: f64) {
        CYCLES_TOTAL.with_label_values(&[loop_name, "run"]).inc();
        CYCLE_DURATION_MS
            .with_label_values(&[loop_name])
            .observe(duration_ms);
    }

    /// Cycle not started, e.g. the engine was busy or nothing changed.
    pub fn cycle_skipped(loop_name: &str) {
        CYCLES_TOTAL
            .with_label_values(&[loop_name, "skipped"])
            .inc();
    }

    /// Cycle abandoned on an error.
    pub fn cycle_aborted(loop_name: &str) {
        CYCLES_TOTAL
            .with_label_values(&[loop_name, "aborted"])
            .inc();
    }

    pub fn full_reset() {
        FULL_RESETS_TOTAL.inc();
    }

    pub fn tiers_dropped(count: usize) {
        TIERS_DROPPED_TOTAL.inc_by(count as f64);
    }

    pub fn event_dropped() {
        EVENTS_DROPPED_TOTAL.inc();
    }

    pub fn committed_funds(committed: f64) {
        COMMITTED_FUNDS.set(committed);
    }

    /// Idle funds as last read from the wallet.
    pub fn idle_funds(idle: f64) {
        IDLE_FUNDS.set(idle);
    }

    pub fn offers(open: usize, protected: usize) {
        OPEN_OFFERS.set(open as i64);
        PROTECTED_OFFERS.set(protected as i64);
    }

    /// Record the signals behind a ladder plan.
    pub fn strategy(sentiment: f64, panic: bool, safety_factor: f64, floor: f64, tiers: usize) {
        SENTIMENT.set(sentiment);
        SENTIMENT_PANIC.set(i64::from(panic));
        SAFETY_FACTOR.set(safety_factor);
        DYNAMIC_RATE_FLOOR.set(floor);
        LADDER_TIERS.set(tiers as i64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let before = OFFERS_PLACED_TOTAL.with_label_values(&["test_origin"]).get();
        Metrics::offer_placed("test_origin");
        Metrics::offer_placed("test_origin");
        let after = OFFERS_PLACED_TOTAL.with_label_values(&["test_origin"]).get();
        assert_eq!(after - before, 2.0);
    }

    #[test]
    fn test_cycle_outcomes_are_separate_series() {
        Metrics::cycle_skipped("test_loop");
        Metrics::cycle_run("test_loop", 12.0);
        assert!(CYCLES_TOTAL.with_label_values(&["test_loop", "skipped"]).get() >= 1.0);
        assert!(CYCLES_TOTAL.with_label_values(&["test_loop", "run"]).get() >= 1.0);
        assert_eq!(
            CYCLES_TOTAL.with_label_values(&["test_loop", "aborted"]).get(),
            0.0
        );
    }
}
