//! Ladder quote construction.
//!
//! Splits the lending budget across `tier_count` rate tiers:
//! - tier `i` rate = `base × ratio^i`, never below the dynamic floor
//! - tier `i` tenor = longest tenor the schedule admits at that rate
//! - tier `i` amount = Fibonacci weight share of the budget, truncated
//!
//! Tiers that end up below the exchange minimum are dropped and reported,
//! never rounded up, so `Σ amount ≤ budget` always holds.

use chrono::{DateTime, Duration, Utc};
use lend_core::{
    Amount, FundingBookSnapshot, OfferRequest, Rate, RateHistory, TenorRange, TenorSchedule,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::{FibonacciOrder, StrategyConfig, MAX_LADDER_STEPS};
use crate::optimizer::StrategyParameters;

/// Decimal places kept on quoted rates.
pub const RATE_DECIMALS: u32 = 8;

/// Bucket whose weighted rate anchors the prediction.
const ANCHOR_BUCKET: TenorRange = TenorRange::new(2, 2);

/// Window for the trailing high average.
const HIGH_AVG_LOOKBACK_HOURS: i64 = 12;

/// One priced tier of the ladder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LadderTier {
    /// 0 = lowest rate.
    pub index: usize,
    pub rate: Rate,
    pub tenor_days: u32,
    pub amount: Amount,
    /// Normalized Fibonacci weight.
    pub weight: Decimal,
}

impl LadderTier {
    pub fn request(&self) -> OfferRequest {
        OfferRequest::new(self.rate, self.tenor_days, self.amount)
    }
}

/// Why a tier was left out of the plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// Share of the budget was zero or negative.
    NonPositive,
    /// Share was below the exchange minimum.
    BelowMinimum,
}

/// Tier removed from the plan (soft condition, reported not raised).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DroppedTier {
    pub index: usize,
    pub rate: Rate,
    pub amount: Amount,
    pub reason: DropReason,
}

/// Planned ladder for one slow-loop cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LadderPlan {
    pub base_rate: Rate,
    pub budget: Amount,
    /// Funded tiers, lowest rate first.
    pub tiers: Vec<LadderTier>,
    pub dropped: Vec<DroppedTier>,
}

impl LadderPlan {
    /// Sum of tier amounts.
    pub fn total(&self) -> Amount {
        self.tiers.iter().map(|t| t.amount).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }

    /// Shrink the plan so its total fits `cap`.
    ///
    /// The shortfall is taken from the lowest-rate tiers first. Tiers pushed
    /// below `min_amount` are moved to `dropped`.
    #[must_use]
    pub fn fit_to(&self, cap: Amount, min_amount: Amount, amount_decimals: u32) -> LadderPlan {
        let mut excess = self.total().saturating_sub(cap);
        let mut plan = self.clone();
        if excess.is_zero() {
            return plan;
        }

        let mut kept = Vec::with_capacity(plan.tiers.len());
        for mut tier in plan.tiers.drain(..) {
            if excess.is_positive() {
                let cut = excess.min(tier.amount);
                tier.amount = (tier.amount - cut).floor_dp(amount_decimals);
                excess -= cut;
            }
            if !tier.amount.is_positive() {
                plan.dropped.push(DroppedTier {
                    index: tier.index,
                    rate: tier.rate,
                    amount: tier.amount,
                    reason: DropReason::NonPositive,
                });
            } else if tier.amount < min_amount {
                plan.dropped.push(DroppedTier {
                    index: tier.index,
                    rate: tier.rate,
                    amount: tier.amount,
                    reason: DropReason::BelowMinimum,
                });
            } else {
                kept.push(tier);
            }
        }
        plan.tiers = kept;
        plan.budget = plan.budget.min(cap);
        plan
    }
}

/// Leading `n` Fibonacci terms (`1, 1, 2, 3, 5, ...`) normalized to sum to 1.
pub fn fibonacci_weights(n: usize, order: FibonacciOrder) -> Vec<Decimal> {
    let terms = fibonacci_terms(n, order);
    let total = Decimal::from(terms.iter().sum::<u64>().max(1));
    terms.iter().map(|t| Decimal::from(*t) / total).collect()
}

fn fibonacci_terms(n: usize, order: FibonacciOrder) -> Vec<u64> {
    let n = n.min(MAX_LADDER_STEPS);
    let mut terms: Vec<u64> = Vec::with_capacity(n);
    for i in 0..n {
        let next = if i < 2 {
            1
        } else {
            terms[i - 1] + terms[i - 2]
        };
        terms.push(next);
    }
    if order == FibonacciOrder::Descending {
        terms.reverse();
    }
    terms
}

/// Inputs to [`LadderQuoteBuilder::build`].
#[derive(Debug, Clone, Copy)]
pub struct LadderInputs<'a> {
    pub book: &'a FundingBookSnapshot,
    pub history: &'a RateHistory,
    pub params: &'a StrategyParameters,
    /// Sentiment premium multiplier (≥ 1).
    pub premium: Decimal,
    /// `available_funds − retained_funds`.
    pub budget: Amount,
    pub now: DateTime<Utc>,
}

/// Builds [`LadderPlan`]s.
#[derive(Debug, Clone)]
pub struct LadderQuoteBuilder {
    rate_adjustment_ratio: Decimal,
    min_offer_amount: Amount,
    amount_decimals: u32,
    fibonacci_order: FibonacciOrder,
    schedule: TenorSchedule,
}

impl LadderQuoteBuilder {
    pub fn new(config: &StrategyConfig) -> Self {
        Self {
            rate_adjustment_ratio: config.rate_adjustment_ratio,
            min_offer_amount: config.min_offer_amount,
            amount_decimals: config.amount_decimals,
            fibonacci_order: config.fibonacci_order,
            schedule: config.schedule.clone(),
        }
    }

    pub fn schedule(&self) -> &TenorSchedule {
        &self.schedule
    }

    pub fn min_offer_amount(&self) -> Amount {
        self.min_offer_amount
    }

    pub fn amount_decimals(&self) -> u32 {
        self.amount_decimals
    }

    /// Predicted base rate for the lowest tier.
    ///
    /// Highest of the 2-day book average, the last-hour high discounted by
    /// the safety factor and the trailing 12h high average, scaled by the
    /// sentiment premium and floored at the dynamic floor.
    pub fn predict_base_rate(&self, inputs: &LadderInputs<'_>) -> Rate {
        let floor = inputs.params.dynamic_rate_floor;
        let book_avg = inputs
            .book
            .bucket(ANCHOR_BUCKET)
            .weighted_rate
            .or_else(|| inputs.book.weighted_offer_rate());
        let hour_high = inputs
            .history
            .last_high()
            .map(|h| h * inputs.params.safety_factor);
        let half_day = inputs
            .history
            .mean_high_within(inputs.now, Duration::hours(HIGH_AVG_LOOKBACK_HOURS));

        let predicted = [book_avg, hour_high, half_day]
            .into_iter()
            .flatten()
            .max()
            .unwrap_or(floor);

        let premium = inputs.premium.max(Decimal::ONE);
        (predicted * premium).max(floor).round_dp(RATE_DECIMALS)
    }

    /// Build the ladder plan for this cycle.
    pub fn build(&self, inputs: &LadderInputs<'_>) -> LadderPlan {
        let base_rate = self.predict_base_rate(inputs);
        let plan = self.compute_tiers(
            base_rate,
            inputs.params.dynamic_rate_floor,
            inputs.params.tier_count,
            inputs.budget,
        );

        for dropped in &plan.dropped {
            warn!(
                tier = dropped.index,
                rate = %dropped.rate,
                amount = %dropped.amount,
                reason = ?dropped.reason,
                "Ladder tier dropped"
            );
        }
        debug!(
            base_rate = %base_rate,
            tiers = plan.tiers.len(),
            total = %plan.total(),
            budget = %inputs.budget,
            "Ladder plan built"
        );

        plan
    }

    /// Price and size tiers from an already-predicted base rate.
    pub fn compute_tiers(
        &self,
        base_rate: Rate,
        floor: Rate,
        tier_count: usize,
        budget: Amount,
    ) -> LadderPlan {
        let terms = fibonacci_terms(tier_count, self.fibonacci_order);
        let term_sum = Decimal::from(terms.iter().sum::<u64>().max(1));

        let mut tiers = Vec::with_capacity(tier_count);
        let mut dropped = Vec::new();
        let mut multiplier = Decimal::ONE;

        for (index, term) in terms.into_iter().enumerate() {
            let weight = Decimal::from(term) / term_sum;
            let rate = (base_rate * multiplier).max(floor).round_dp(RATE_DECIMALS);
            multiplier *= self.rate_adjustment_ratio;

            // Multiply before dividing so each share is ≤ its exact value.
            let amount = (budget * Decimal::from(term) / term_sum).floor_dp(self.amount_decimals);

            if !amount.is_positive() {
                dropped.push(DroppedTier {
                    index,
                    rate,
                    amount,
                    reason: DropReason::NonPositive,
                });
                continue;
            }
            if amount < self.min_offer_amount {
                dropped.push(DroppedTier {
                    index,
                    rate,
                    amount,
                    reason: DropReason::BelowMinimum,
                });
                continue;
            }

            tiers.push(LadderTier {
                index,
                rate,
                tenor_days: self.schedule.max_tenor_for(rate),
                amount,
                weight,
            });
        }

        LadderPlan {
            base_rate,
            budget,
            tiers,
            dropped,
        }
    }
}
