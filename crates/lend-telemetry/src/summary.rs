//! Periodic statistics summary.
//!
//! Reads the process metrics back and logs one compact report:
//! offer flow per origin, cycle outcomes and latency per loop, and the
//! current allocation and strategy gauges.

use crate::metrics::{
    COMMITTED_FUNDS, CYCLES_TOTAL, CYCLE_DURATION_MS, FULL_RESETS_TOTAL, IDLE_FUNDS,
    LADDER_TIERS, OFFERS_CANCELLED_TOTAL, OFFERS_FAILED_TOTAL, OFFERS_FILLED_TOTAL,
    OFFERS_PLACED_TOTAL, OPEN_OFFERS, SAFETY_FACTOR, SENTIMENT,
};
use chrono::{DateTime, Utc};
use prometheus::core::Collector;
use serde::Serialize;
use tracing::info;

const ORIGINS: [&str; 2] = ["ladder", "opportunistic"];
const LOOPS: [&str; 3] = ["slow", "fast", "resync"];

/// Offer flow for one origin.
#[derive(Debug, Clone, Default, Serialize)]
pub struct OriginStats {
    pub origin: String,
    pub placed: u64,
    pub cancelled: u64,
    pub failed: u64,
    pub filled: u64,
}

/// Cycle outcomes for one loop.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LoopStats {
    pub loop_name: String,
    pub run: u64,
    pub skipped: u64,
    pub aborted: u64,
    pub duration_p50_ms: f64,
    pub duration_p95_ms: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub since: DateTime<Utc>,
    pub origins: Vec<OriginStats>,
    pub loops: Vec<LoopStats>,
    pub full_resets: u64,
    pub open_offers: i64,
    pub committed_funds: f64,
    pub idle_funds: f64,
    pub sentiment: f64,
    pub safety_factor: f64,
    pub ladder_tiers: i64,
}

/// Builds [`StatsSnapshot`]s from the registered metrics.
pub struct StatsReporter {
    start_time: DateTime<Utc>,
}

impl StatsReporter {
    pub fn new() -> Self {
        Self {
            start_time: Utc::now(),
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            since: self.start_time,
            origins: ORIGINS.iter().map(|o| origin_stats(o)).collect(),
            loops: LOOPS.iter().map(|l| loop_stats(l)).collect(),
            full_resets: FULL_RESETS_TOTAL.get() as u64,
            open_offers: OPEN_OFFERS.get(),
            committed_funds: COMMITTED_FUNDS.get(),
            idle_funds: IDLE_FUNDS.get(),
            sentiment: SENTIMENT.get(),
            safety_factor: SAFETY_FACTOR.get(),
            ladder_tiers: LADDER_TIERS.get(),
        }
    }

    /// Log the current snapshot.
    pub fn log_summary(&self) {
        let s = self.snapshot();
        let uptime = Utc::now() - s.since;

        info!(
            uptime_hours = uptime.num_hours(),
            uptime_minutes = uptime.num_minutes() % 60,
            open_offers = s.open_offers,
            committed = s.committed_funds,
            idle = s.idle_funds,
            sentiment = s.sentiment,
            safety_factor = s.safety_factor,
            ladder_tiers = s.ladder_tiers,
            full_resets = s.full_resets,
            "Stats summary"
        );
        for o in &s.origins {
            info!(
                origin = %o.origin,
                placed = o.placed,
                cancelled = o.cancelled,
                failed = o.failed,
                filled = o.filled,
                "Offer flow"
            );
        }
        for l in &s.loops {
            info!(
                loop_name = %l.loop_name,
                run = l.run,
                skipped = l.skipped,
                aborted = l.aborted,
                p50_ms = format!("{:.1}", l.duration_p50_ms),
                p95_ms = format!("{:.1}", l.duration_p95_ms),
                "Loop cycles"
            );
        }
    }
}

impl Default for StatsReporter {
    fn default() -> Self {
        Self::new()
    }
}

fn origin_stats(origin: &str) -> OriginStats {
    OriginStats {
        origin: origin.to_string(),
        placed: OFFERS_PLACED_TOTAL.with_label_values(&[origin]).get() as u64,
        cancelled: sum_matching(&OFFERS_CANCELLED_TOTAL, "origin", origin),
        failed: sum_matching(&OFFERS_FAILED_TOTAL, "origin", origin),
        filled: OFFERS_FILLED_TOTAL.with_label_values(&[origin]).get() as u64,
    }
}

fn loop_stats(loop_name: &str) -> LoopStats {
    let (p50, p95) = histogram_percentiles(&CYCLE_DURATION_MS, loop_name);
    LoopStats {
        loop_name: loop_name.to_string(),
        run: CYCLES_TOTAL.with_label_values(&[loop_name, "run"]).get() as u64,
        skipped: CYCLES_TOTAL.with_label_values(&[loop_name, "skipped"]).get() as u64,
        aborted: CYCLES_TOTAL.with_label_values(&[loop_name, "aborted"]).get() as u64,
        duration_p50_ms: p50,
        duration_p95_ms: p95,
    }
}

/// Sum a counter over every series whose `label` equals `value`.
fn sum_matching(counter: &prometheus::CounterVec, label: &str, value: &str) -> u64 {
    let mut total = 0.0;
    for mf in counter.collect() {
        for m in mf.get_metric() {
            let hit = m
                .get_label()
                .iter()
                .any(|pair| pair.get_name() == label && pair.get_value() == value);
            if hit {
                total += m.get_counter().get_value();
            }
        }
    }
    total as u64
}

/// (p50, p95) of the single-label histogram series `value`.
fn histogram_percentiles(histogram: &prometheus::HistogramVec, value: &str) -> (f64, f64) {
    for mf in histogram.collect() {
        for m in mf.get_metric() {
            let matches = m.get_label().first().is_some_and(|p| p.get_value() == value);
            if !matches {
                continue;
            }
            let h = m.get_histogram();
            let count = h.get_sample_count();
            if count == 0 {
                return (0.0, 0.0);
            }
            let buckets = h.get_bucket();
            return (
                percentile_from_buckets(buckets, count, 0.50),
                percentile_from_buckets(buckets, count, 0.95),
            );
        }
    }
    (0.0, 0.0)
}

/// Linear interpolation inside the bucket holding the target rank.
fn percentile_from_buckets(
    buckets: &[prometheus::proto::Bucket],
    total_count: u64,
    percentile: f64,
) -> f64 {
    let target = ((total_count as f64 * percentile).ceil() as u64).max(1);
    let mut prev_bound = 0.0;
    let mut prev_count = 0u64;

    for bucket in buckets {
        let upper_bound = bucket.get_upper_bound();
        let cumulative = bucket.get_cumulative_count();
        if cumulative >= target {
            let in_bucket = cumulative - prev_count;
            if in_bucket == 0 {
                return upper_bound;
            }
            let position = (target - prev_count) as f64 / in_bucket as f64;
            return prev_bound + position * (upper_bound - prev_bound);
        }
        prev_bound = upper_bound;
        prev_count = cumulative;
    }

    buckets.last().map(|b| b.get_upper_bound()).unwrap_or(0.0)
}
