//! Order lifecycle manager.
//!
//! Single writer of offer state. Every mutating exchange call goes through
//! here, and the engine actor makes sure only one runs at a time.
//!
//! # Protection
//!
//! Opportunistic offers carry `protected_until = placed_at + window`.
//! `reconcile_with_plan` never touches an offer while `now < protected_until`;
//! only `force_full_reset` does.
//!
//! # Resync
//!
//! Anything that leaves the local view in doubt (a cancel for an offer the
//! exchange no longer has, a timed-out submit or cancel, a partial fill
//! race) sets `needs_resync`. The next mutating operation re-reads open
//! offers first.

use std::collections::HashMap;
use std::sync::Arc;

use lend_core::{
    Amount, ExchangeOffer, Offer, OfferId, OfferOrigin, OfferRequest, OfferStatus, TenorSchedule,
};
use lend_exchange::{ExchangeError, FundingAccount};
use lend_strategy::{DroppedTier, LadderPlan, LadderTier, StrategyConfig};
use lend_telemetry::Metrics;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::events::{CancelReason, EngineEvent, EventQueue};
use crate::state::{EngineSnapshot, EngineState};

/// Settings the lifecycle manager needs from engine and strategy config.
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    pub currency: String,
    pub retained: Amount,
    pub min_offer_amount: Amount,
    pub amount_decimals: u32,
    pub protection_window: chrono::Duration,
    pub reset_interval: chrono::Duration,
}

impl LifecycleConfig {
    pub fn new(engine: &EngineConfig, strategy: &StrategyConfig) -> Self {
        Self {
            currency: engine.currency.clone(),
            retained: engine.retained(),
            min_offer_amount: strategy.min_offer_amount,
            amount_decimals: strategy.amount_decimals,
            protection_window: engine.protection_window(),
            reset_interval: engine.reset_interval(),
        }
    }
}

/// A ladder tier that could not be placed.
#[derive(Debug, Clone)]
pub struct TierFailure {
    pub tier_index: usize,
    pub request: OfferRequest,
    pub error: EngineError,
}

/// Outcome of one reconciliation.
#[derive(Debug, Clone, Default)]
pub struct ReconcileReport {
    /// Eligible offers already matching a tier, left in place.
    pub kept: Vec<OfferId>,
    /// Protected offers skipped.
    pub protected: Vec<OfferId>,
    pub cancelled: Vec<OfferId>,
    pub cancel_failures: Vec<(OfferId, EngineError)>,
    pub placed: Vec<Offer>,
    pub failures: Vec<TierFailure>,
    /// Tiers left out by the plan or while fitting it to idle funds.
    pub dropped: Vec<DroppedTier>,
    /// Idle funds after cancellations, before placing.
    pub idle_before_placing: Amount,
}

impl ReconcileReport {
    pub fn placed_total(&self) -> Amount {
        self.placed.iter().map(|o| o.amount).sum()
    }

    /// No cancel or placement failed.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && self.cancel_failures.is_empty()
    }
}

/// Outcome of a resync against the exchange.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResyncReport {
    pub filled: Vec<OfferId>,
    pub partially_filled: Vec<OfferId>,
    pub cancelled: Vec<OfferId>,
    /// Offers found on the exchange that were not tracked.
    pub adopted: Vec<OfferId>,
}

impl ResyncReport {
    pub fn has_changes(&self) -> bool {
        !(self.filled.is_empty()
            && self.partially_filled.is_empty()
            && self.cancelled.is_empty()
            && self.adopted.is_empty())
    }
}

/// Result of startup initialization.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StartupReport {
    pub adopted: usize,
    pub cancelled: usize,
}

pub struct OrderLifecycleManager {
    account: Arc<dyn FundingAccount>,
    clock: Arc<dyn Clock>,
    events: EventQueue,
    schedule: TenorSchedule,
    config: LifecycleConfig,
    state: EngineState,
}

impl OrderLifecycleManager {
    pub fn new(
        account: Arc<dyn FundingAccount>,
        clock: Arc<dyn Clock>,
        events: EventQueue,
        schedule: TenorSchedule,
        config: LifecycleConfig,
    ) -> Self {
        let state = EngineState::new(clock.now());
        Self {
            account,
            clock,
            events,
            schedule,
            config,
            state,
        }
    }

    pub fn state(&self) -> &EngineState {
        &self.state
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        self.state.snapshot(self.clock.now())
    }

    /// Rebuild state from the exchange, optionally cancelling what is there.
    ///
    /// The reset timer starts now.
    pub async fn initialize(&mut self, cancel_existing: bool) -> EngineResult<StartupReport> {
        let live = self.account.get_open_offers().await?;
        self.state = EngineState::new(self.clock.now());
        for offer in &live {
            self.state.track(Offer::from_exchange(offer));
        }

        let mut report = StartupReport {
            adopted: live.len(),
            cancelled: 0,
        };
        if cancel_existing {
            for id in self.state.ids() {
                match self.cancel(id, CancelReason::Startup).await {
                    Ok(()) => report.cancelled += 1,
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => warn!(offer_id = %id, error = %e, "Startup cancel failed"),
                }
            }
            self.ensure_synced().await?;
        }

        info!(
            currency = %self.config.currency,
            adopted = report.adopted,
            cancelled = report.cancelled,
            "Engine state initialized"
        );
        self.events.push(EngineEvent::Startup {
            currency: self.config.currency.clone(),
            adopted: report.adopted,
            cancelled: report.cancelled,
        });
        Ok(report)
    }

    /// Bring the resting ladder in line with `plan`.
    ///
    /// Protected offers are left alone. Eligible offers that exactly match a
    /// tier (rate, tenor and remaining amount) are kept; all other eligible
    /// offers are cancelled. The remaining tiers are fitted to the idle funds
    /// left after cancelling and placed one by one. A failing tier is recorded
    /// and the rest still go out.
    pub async fn reconcile_with_plan(&mut self, plan: &LadderPlan) -> EngineResult<ReconcileReport> {
        self.ensure_synced().await?;

        let now = self.clock.now();
        let (protected, eligible) = self.state.partition(now);
        let mut report = ReconcileReport {
            protected,
            dropped: plan.dropped.clone(),
            ..Default::default()
        };

        let mut unmatched: Vec<&LadderTier> = plan.tiers.iter().collect();
        let mut to_cancel = Vec::new();
        for id in eligible {
            let matched = self.state.get(id).and_then(|offer| {
                unmatched
                    .iter()
                    .position(|tier| offer_matches_tier(offer, tier))
            });
            match matched {
                Some(pos) => {
                    unmatched.remove(pos);
                    report.kept.push(id);
                }
                None => to_cancel.push(id),
            }
        }

        for id in to_cancel {
            match self.cancel(id, CancelReason::Rebalance).await {
                Ok(()) => report.cancelled.push(id),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(offer_id = %id, error = %e, "Cancel failed during reconcile");
                    report.cancel_failures.push((id, e));
                }
            }
        }
        self.ensure_synced().await?;

        let idle = self.idle_funds().await?;
        report.idle_before_placing = idle;

        let remaining = LadderPlan {
            tiers: unmatched.into_iter().cloned().collect(),
            dropped: Vec::new(),
            ..plan.clone()
        }
        .fit_to(idle, self.config.min_offer_amount, self.config.amount_decimals);
        if !remaining.dropped.is_empty() {
            debug!(
                dropped = remaining.dropped.len(),
                idle = %idle,
                "Tiers shrunk to fit idle funds"
            );
        }
        report.dropped.extend(remaining.dropped);

        for tier in &remaining.tiers {
            let request = tier.request();
            match self.submit(request, OfferOrigin::Ladder, None).await {
                Ok(offer) => report.placed.push(offer),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    let stop = self.state.needs_resync();
                    report.failures.push(TierFailure {
                        tier_index: tier.index,
                        request,
                        error: e,
                    });
                    if stop {
                        warn!(tier = tier.index, "Offer state uncertain, stopping ladder placement");
                        break;
                    }
                }
            }
        }

        info!(
            kept = report.kept.len(),
            protected = report.protected.len(),
            cancelled = report.cancelled.len(),
            placed = report.placed.len(),
            placed_total = %report.placed_total(),
            failed = report.failures.len(),
            dropped = report.dropped.len(),
            "Ladder reconciled"
        );
        self.update_gauges();
        Ok(report)
    }

    /// Place one protected offer. Fails fast when idle funds are short.
    pub async fn place_opportunistic(&mut self, request: OfferRequest) -> EngineResult<Offer> {
        self.ensure_synced().await?;

        let idle = self.idle_funds().await?;
        if request.amount > idle {
            return Err(EngineError::InsufficientFunds {
                requested: request.amount,
                idle,
            });
        }

        let offer = self
            .submit(
                request,
                OfferOrigin::Opportunistic,
                Some(self.config.protection_window),
            )
            .await?;
        self.update_gauges();
        Ok(offer)
    }

    /// Cancel every offer, protected ones included, and restart the reset
    /// timer. Returns how many offers were cancelled.
    pub async fn force_full_reset(&mut self) -> EngineResult<usize> {
        let now = self.clock.now();
        let mut cancelled = 0;

        for id in self.state.ids() {
            match self.cancel(id, CancelReason::Reset).await {
                Ok(()) => cancelled += 1,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => warn!(offer_id = %id, error = %e, "Cancel failed during reset"),
            }
        }
        self.ensure_synced().await?;

        self.state.mark_full_reset(now);
        Metrics::full_reset();
        info!(cancelled, remaining = self.state.len(), "Full reset complete");
        self.events.push(EngineEvent::FullReset { cancelled });
        self.update_gauges();
        Ok(cancelled)
    }

    /// Whether the reset interval has elapsed since the last full reset.
    pub fn reset_due(&self) -> bool {
        self.clock.now() - self.state.last_full_reset_at() >= self.config.reset_interval
    }

    /// Whether the eligible offers already are exactly `plan`.
    pub fn matches_plan(&self, plan: &LadderPlan) -> bool {
        let (_, eligible) = self.state.partition(self.clock.now());
        if eligible.len() != plan.tiers.len() {
            return false;
        }
        let mut unmatched: Vec<&LadderTier> = plan.tiers.iter().collect();
        for id in eligible {
            let pos = self.state.get(id).and_then(|offer| {
                unmatched
                    .iter()
                    .position(|tier| offer_matches_tier(offer, tier))
            });
            match pos {
                Some(pos) => {
                    unmatched.remove(pos);
                }
                None => return false,
            }
        }
        true
    }

    /// Diff tracked offers against the exchange.
    ///
    /// Vanished offers are filled, or cancelled if a cancel was pending.
    /// Shrunk offers are partially filled. Untracked offers are adopted.
    pub async fn resync(&mut self) -> EngineResult<ResyncReport> {
        let live = self.account.get_open_offers().await?;
        let live: HashMap<OfferId, &ExchangeOffer> = live.iter().map(|o| (o.id, o)).collect();
        let mut report = ResyncReport::default();

        for id in self.state.ids() {
            match live.get(&id) {
                None => {
                    let cancel_pending = self.state.cancel_requested(id);
                    let Some(mut offer) = self.state.remove(id) else {
                        continue;
                    };
                    if cancel_pending {
                        transition(&mut offer, OfferStatus::Cancelled);
                        Metrics::offer_cancelled(offer.origin.as_str(), "rebalance");
                        self.events.push(EngineEvent::OfferCancelled {
                            id,
                            origin: offer.origin,
                            reason: CancelReason::Rebalance,
                        });
                        report.cancelled.push(id);
                    } else {
                        let taken = offer.remaining();
                        offer.filled_amount = offer.amount;
                        transition(&mut offer, OfferStatus::Filled);
                        Metrics::offer_filled(offer.origin.as_str());
                        info!(offer_id = %id, amount = %taken, rate = %offer.rate, "Offer filled");
                        self.events.push(EngineEvent::OfferFilled {
                            id,
                            origin: offer.origin,
                            rate: offer.rate,
                            tenor_days: offer.tenor_days,
                            amount: taken,
                        });
                        report.filled.push(id);
                    }
                }
                Some(remote) => {
                    let Some(offer) = self.state.get_mut(id) else {
                        continue;
                    };
                    if remote.amount < offer.remaining() {
                        offer.filled_amount = offer.amount.saturating_sub(remote.amount);
                        transition(offer, OfferStatus::PartiallyFilled);
                        let event = EngineEvent::OfferPartiallyFilled {
                            id,
                            origin: offer.origin,
                            filled: offer.filled_amount,
                            remaining: offer.remaining(),
                        };
                        debug!(offer_id = %id, remaining = %offer.remaining(), "Offer partially filled");
                        self.events.push(event);
                        report.partially_filled.push(id);
                    }
                }
            }
        }

        for (id, remote) in &live {
            if self.state.get(*id).is_none() {
                warn!(offer_id = %id, rate = %remote.rate, "Adopting untracked offer");
                self.state.track(Offer::from_exchange(remote));
                report.adopted.push(*id);
            }
        }

        self.state.set_needs_resync(false);
        self.update_gauges();
        Ok(report)
    }

    async fn ensure_synced(&mut self) -> EngineResult<()> {
        if self.state.needs_resync() {
            debug!("Resync required before mutating");
            self.resync().await?;
        }
        Ok(())
    }

    /// Wallet funds free to place, net of retention.
    async fn idle_funds(&self) -> EngineResult<Amount> {
        let wallet = self
            .account
            .get_wallet_balance(&self.config.currency)
            .await?;
        let idle = wallet.available.saturating_sub(self.config.retained);
        Metrics::idle_funds(crate::as_f64(idle.inner()));
        Ok(idle)
    }

    async fn submit(
        &mut self,
        request: OfferRequest,
        origin: OfferOrigin,
        protection: Option<chrono::Duration>,
    ) -> EngineResult<Offer> {
        if !request.amount.is_positive() {
            return Err(EngineError::InsufficientFunds {
                requested: request.amount,
                idle: Amount::ZERO,
            });
        }
        if !self.schedule.admits(request.rate, request.tenor_days) {
            return Err(EngineError::InadmissibleTenor {
                rate: request.rate.to_string(),
                tenor_days: request.tenor_days,
            });
        }

        match self.account.submit_offer(request).await {
            Ok(id) => {
                let offer = Offer::placed(id, &request, origin, self.clock.now(), protection);
                if !self.state.track(offer.clone()) {
                    warn!(offer_id = %id, "Exchange returned an id already tracked");
                    self.state.set_needs_resync(true);
                }
                Metrics::offer_placed(origin.as_str());
                self.events.push(EngineEvent::OfferPlaced {
                    offer: offer.clone(),
                });
                Ok(offer)
            }
            Err(e) => {
                Metrics::offer_failed(origin.as_str(), e.kind());
                if e.requires_resync() || matches!(e, ExchangeError::Timeout(_)) {
                    self.state.set_needs_resync(true);
                }
                self.events.push(EngineEvent::PlacementFailed {
                    origin,
                    rate: request.rate,
                    tenor_days: request.tenor_days,
                    amount: request.amount,
                    error: e.to_string(),
                });
                Err(e.into())
            }
        }
    }

    async fn cancel(&mut self, id: OfferId, reason: CancelReason) -> EngineResult<()> {
        let Some(origin) = self.state.get(id).map(|o| o.origin) else {
            return Err(ExchangeError::OfferNotFound(id).into());
        };

        match self.account.cancel_offer(id).await {
            Ok(()) => {
                if let Some(mut offer) = self.state.remove(id) {
                    transition(&mut offer, OfferStatus::Cancelled);
                }
                Metrics::offer_cancelled(origin.as_str(), reason.as_str());
                self.events.push(EngineEvent::OfferCancelled { id, origin, reason });
                Ok(())
            }
            Err(e) => {
                match &e {
                    // Gone already: taken by a borrower or cancelled elsewhere.
                    ExchangeError::OfferNotFound(_) => self.state.set_needs_resync(true),
                    ExchangeError::Timeout(_) => {
                        self.state.note_cancel_requested(id);
                        self.state.set_needs_resync(true);
                    }
                    other if other.requires_resync() => self.state.set_needs_resync(true),
                    _ => {}
                }
                Err(e.into())
            }
        }
    }

    fn update_gauges(&self) {
        let now = self.clock.now();
        Metrics::offers(self.state.len(), self.state.protected_count(now));
        Metrics::committed_funds(crate::as_f64(self.state.committed_funds().inner()));
    }
}

fn offer_matches_tier(offer: &Offer, tier: &LadderTier) -> bool {
    offer.status == OfferStatus::Open
        && offer.rate == tier.rate
        && offer.tenor_days == tier.tenor_days
        && offer.remaining() == tier.amount
}

fn transition(offer: &mut Offer, next: OfferStatus) {
    if !offer.status.can_transition_to(next) {
        warn!(
            offer_id = %offer.id,
            from = %offer.status,
            to = %next,
            "Unexpected offer status transition"
        );
    }
    offer.status = next;
}
