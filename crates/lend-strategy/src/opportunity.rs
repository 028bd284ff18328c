//! Opportunistic order monitor.
//!
//! Scans the visible borrower demand on every fast-loop tick and proposes at
//! most one offer to meet the best entry. The monitor only ever proposes:
//! placement goes through the lifecycle manager, which tags the offer with a
//! protection window, and nothing here cancels.
//!
//! Entries already acted on are remembered for `demand_memory_secs` and
//! ignored unless their rate improves.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use lend_core::{Amount, BookEntry, FundingBookSnapshot, Rate, TenorSchedule};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::{OpportunisticConfig, StrategyConfig, MAX_WINDOW_SECS};
use crate::ladder::RATE_DECIMALS;

/// Identity of a demand level across scans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct DemandKey {
    period_days: u32,
    count: u32,
}

impl From<&BookEntry> for DemandKey {
    fn from(entry: &BookEntry) -> Self {
        Self {
            period_days: entry.period_days,
            count: entry.count,
        }
    }
}

#[derive(Debug, Clone)]
struct TrackedDemand {
    rate: Rate,
    last_seen: DateTime<Utc>,
}

/// Proposed opportunistic placement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Opportunity {
    /// Demand level being met.
    pub demand: BookEntry,
    /// Quote rate (slightly under the demand rate).
    pub rate: Rate,
    pub tenor_days: u32,
    pub amount: Amount,
    pub score: Decimal,
}

/// Market context for a scan.
#[derive(Debug, Clone, Copy)]
pub struct ScanContext {
    pub dynamic_rate_floor: Rate,
    /// Highest rate among our open ladder offers, if any.
    pub best_open_rate: Option<Rate>,
    pub idle_funds: Amount,
    pub now: DateTime<Utc>,
}

/// Scans demand for immediate high-value placements.
#[derive(Debug)]
pub struct OpportunisticOrderMonitor {
    config: OpportunisticConfig,
    schedule: TenorSchedule,
    minimum_rate: Rate,
    min_offer_amount: Amount,
    amount_decimals: u32,
    tracked: HashMap<DemandKey, TrackedDemand>,
}

impl OpportunisticOrderMonitor {
    pub fn new(config: &StrategyConfig) -> Self {
        Self {
            config: config.opportunistic.clone(),
            schedule: config.schedule.clone(),
            minimum_rate: config.minimum_rate,
            min_offer_amount: config.min_offer_amount,
            amount_decimals: config.amount_decimals,
            tracked: HashMap::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Number of demand levels currently remembered.
    pub fn tracked_count(&self) -> usize {
        self.tracked.len()
    }

    /// Rate a demand entry must beat this tick.
    pub fn rate_threshold(&self, ctx: &ScanContext) -> Rate {
        let reference = ctx
            .best_open_rate
            .map(|r| r * self.config.threshold_margin)
            .unwrap_or(self.minimum_rate);
        reference.max(ctx.dynamic_rate_floor)
    }

    /// Priority score of a demand entry relative to the floor.
    pub fn priority_score(&self, entry: &BookEntry, floor: Rate) -> Decimal {
        let c = &self.config;
        let profit = (entry.rate.inner() - floor.inner()) * c.priority_multiplier;
        let amount_factor = (entry.amount.inner() / c.amount_factor_divisor).min(c.amount_factor_max);
        let liquidity_factor =
            (Decimal::from(entry.count) / c.liquidity_factor_divisor).min(c.liquidity_factor_max);

        c.profit_weight * profit + c.amount_weight * amount_factor + c.liquidity_weight * liquidity_factor
    }

    /// Find the best opportunity in `book`, if any qualifies.
    pub fn scan(&mut self, book: &FundingBookSnapshot, ctx: &ScanContext) -> Option<Opportunity> {
        if !self.config.enabled {
            return None;
        }
        self.expire(ctx.now);

        if ctx.idle_funds < self.min_offer_amount {
            debug!(idle = %ctx.idle_funds, "Idle funds below minimum, skipping scan");
            return None;
        }

        let threshold = self.rate_threshold(ctx);
        let best = book
            .demand
            .iter()
            .filter(|entry| entry.rate > threshold && entry.period_days > 0)
            .filter(|entry| !self.already_acted(entry))
            .filter_map(|entry| self.evaluate(entry, ctx))
            .max_by(|a, b| a.score.cmp(&b.score));

        match &best {
            Some(opp) => info!(
                demand_rate = %opp.demand.rate,
                quote_rate = %opp.rate,
                tenor_days = opp.tenor_days,
                amount = %opp.amount,
                score = %opp.score,
                "Opportunity found"
            ),
            None => debug!(
                threshold = %threshold,
                demand_levels = book.demand.len(),
                "No qualifying demand"
            ),
        }
        best
    }

    /// Remember that `opportunity` was acted on.
    pub fn mark_acted(&mut self, opportunity: &Opportunity, now: DateTime<Utc>) {
        self.tracked.insert(
            DemandKey::from(&opportunity.demand),
            TrackedDemand {
                rate: opportunity.demand.rate,
                last_seen: now,
            },
        );
    }

    fn already_acted(&self, entry: &BookEntry) -> bool {
        self.tracked
            .get(&DemandKey::from(entry))
            .is_some_and(|t| entry.rate <= t.rate)
    }

    fn expire(&mut self, now: DateTime<Utc>) {
        let secs = self.config.demand_memory_secs.min(MAX_WINDOW_SECS);
        let memory = Duration::seconds(secs as i64);
        self.tracked.retain(|_, t| now - t.last_seen <= memory);
    }

    fn evaluate(&self, entry: &BookEntry, ctx: &ScanContext) -> Option<Opportunity> {
        let floor = ctx.dynamic_rate_floor;
        let rate = (entry.rate * self.config.rate_discount)
            .max(floor)
            .round_dp(RATE_DECIMALS);
        if !self.schedule.admits(rate, entry.period_days) {
            return None;
        }

        let score = self.priority_score(entry, floor);
        if score < self.config.min_priority_score {
            return None;
        }

        let amount = self.size(entry.amount, ctx.idle_funds)?;
        Some(Opportunity {
            demand: entry.clone(),
            rate,
            tenor_days: entry.period_days,
            amount,
            score,
        })
    }

    /// `min(idle × single-order ratio, demand × market ratio)`, raised to the
    /// exchange minimum and never above idle funds.
    fn size(&self, demand: Amount, idle: Amount) -> Option<Amount> {
        let by_idle = idle * self.config.max_single_order_ratio;
        let by_demand = demand * self.config.market_amount_ratio;
        let amount = by_idle
            .min(by_demand)
            .max(self.min_offer_amount)
            .min(idle)
            .floor_dp(self.amount_decimals);
        (amount >= self.min_offer_amount).then_some(amount)
    }
}
