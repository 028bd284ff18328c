//! Timing loops.
//!
//! - slow: sentiment → parameters → ladder plan → `Rebalance`
//! - fast: funding book → opportunity scan → `PlaceOpportunistic`
//! - resync: open offers → fills and partial fills
//! - summary: periodic status event and stats log
//!
//! Loops only read from the exchange directly; every mutation is a command
//! to the engine actor. A fatal error anywhere cancels the shared shutdown
//! token, which stops every loop and the actor.

use std::sync::Arc;
use std::time::Instant as StdInstant;

use chrono::{DateTime, Utc};
use lend_core::OfferRequest;
use lend_exchange::{FundingAccount, MarketData};
use lend_strategy::{
    LadderInputs, LadderQuoteBuilder, OpportunisticOrderMonitor, RateOptimizer, ScanContext,
    SentimentAnalyzer, SentimentMetric, StrategyConfig, StrategyParameters,
};
use lend_telemetry::{Metrics, StatsReporter};
use parking_lot::Mutex;
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::as_f64;
use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::engine::{EngineHandle, RebalanceOutcome};
use crate::error::{EngineError, EngineResult};
use crate::events::{EngineEvent, EngineSummary, EventQueue};

/// Strategy output of the last slow cycle, read by the fast loop.
#[derive(Debug, Clone)]
pub struct StrategySignal {
    pub at: DateTime<Utc>,
    pub sentiment: SentimentMetric,
    pub params: StrategyParameters,
}

/// What a slow cycle did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlowCycle {
    Rebalanced { panic: bool },
    Unchanged,
    BelowMinimumFunds,
}

pub struct Orchestrator {
    config: EngineConfig,
    strategy: StrategyConfig,
    market: Arc<dyn MarketData>,
    account: Arc<dyn FundingAccount>,
    clock: Arc<dyn Clock>,
    handle: EngineHandle,
    events: EventQueue,
    analyzer: SentimentAnalyzer,
    optimizer: RateOptimizer,
    builder: LadderQuoteBuilder,
    signal: Mutex<Option<StrategySignal>>,
    halt_reason: Mutex<Option<String>>,
    shutdown: CancellationToken,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: EngineConfig,
        strategy: StrategyConfig,
        optimizer: RateOptimizer,
        market: Arc<dyn MarketData>,
        account: Arc<dyn FundingAccount>,
        clock: Arc<dyn Clock>,
        handle: EngineHandle,
        events: EventQueue,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            analyzer: SentimentAnalyzer::new(strategy.sentiment.clone()),
            builder: LadderQuoteBuilder::new(&strategy),
            optimizer,
            config,
            strategy,
            market,
            account,
            clock,
            handle,
            events,
            signal: Mutex::new(None),
            halt_reason: Mutex::new(None),
            shutdown,
        }
    }

    pub fn signal(&self) -> Option<StrategySignal> {
        self.signal.lock().clone()
    }

    /// Run every loop until shutdown. Returns `Halted` if a loop hit a fatal
    /// error.
    pub async fn run(&self) -> EngineResult<()> {
        info!(
            currency = %self.config.currency,
            slow_secs = self.config.slow_interval_secs,
            fast_secs = self.config.fast_interval_secs,
            "Orchestrator started"
        );
        tokio::join!(
            self.slow_loop(),
            self.fast_loop(),
            self.resync_loop(),
            self.summary_loop()
        );
        info!("Orchestrator stopped");

        match self.halt_reason.lock().clone() {
            Some(reason) => Err(EngineError::Halted(reason)),
            None => Ok(()),
        }
    }

    // ------------------------------------------------------------------
    // Slow loop
    // ------------------------------------------------------------------

    async fn slow_loop(&self) {
        let mut ticker = interval(self.config.slow_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut was_panic = false;

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let cycle_id = Uuid::new_v4();
            let result = self
                .slow_cycle()
                .instrument(info_span!("slow_cycle", %cycle_id))
                .await;
            match result {
                Ok(SlowCycle::Rebalanced { panic }) => {
                    if panic && !was_panic {
                        warn!("Panic sentiment, scheduling an extra rebalance");
                        ticker.reset_immediately();
                    }
                    was_panic = panic;
                }
                Ok(_) => {}
                Err(e) => self.cycle_failed("slow", e),
            }
        }
    }

    /// One full rebalance pass.
    pub async fn slow_cycle(&self) -> EngineResult<SlowCycle> {
        let started = StdInstant::now();
        let (history, book) = tokio::try_join!(
            self.market.get_rate_history(self.config.history_window()),
            self.market.get_funding_book(self.config.tenor_range()),
        )?;
        let now = self.clock.now();

        let sentiment = self.analyzer.analyze(&history);
        let params = self.optimizer.optimize(&sentiment, &history, now);
        let premium = self.analyzer.premium(&sentiment);
        Metrics::strategy(
            as_f64(sentiment.value),
            sentiment.panic,
            as_f64(params.safety_factor),
            as_f64(params.dynamic_rate_floor.inner()),
            params.tier_count,
        );
        *self.signal.lock() = Some(StrategySignal {
            at: now,
            sentiment,
            params: params.clone(),
        });

        let wallet = self
            .account
            .get_wallet_balance(&self.config.currency)
            .await?;
        let snapshot = self.handle.snapshot();
        let lendable = wallet.available + snapshot.committed;
        Metrics::idle_funds(as_f64(wallet.available.saturating_sub(self.config.retained()).inner()));

        if lendable < self.config.min_funds() {
            info!(
                lendable = %lendable,
                min_funds = %self.config.min_funds,
                "Not enough funds to build a ladder"
            );
            // The reset timer runs whether or not a ladder is built.
            if let Some(cancelled) = self.handle.reset_if_due().await? {
                info!(cancelled, "Full reset with no ladder to rebuild");
            }
            Metrics::cycle_skipped("slow");
            return Ok(SlowCycle::BelowMinimumFunds);
        }

        // Protected offers keep their funds through reconcile, so the ladder
        // is sized on what is left.
        let protected = snapshot.protected_committed(now);
        let budget = lendable
            .saturating_sub(protected)
            .saturating_sub(self.config.retained());
        let plan = self.builder.build(&LadderInputs {
            book: &book,
            history: &history,
            params: &params,
            premium,
            budget,
            now,
        });

        match self.handle.rebalance(plan, sentiment.panic).await? {
            RebalanceOutcome::Unchanged => {
                Metrics::cycle_skipped("slow");
                Ok(SlowCycle::Unchanged)
            }
            RebalanceOutcome::Reconciled { report, reset } => {
                if !report.dropped.is_empty() {
                    Metrics::tiers_dropped(report.dropped.len());
                    self.events.push(EngineEvent::TiersDropped {
                        dropped: report.dropped.clone(),
                    });
                }
                for failure in &report.failures {
                    warn!(
                        tier = failure.tier_index,
                        rate = %failure.request.rate,
                        amount = %failure.request.amount,
                        error = %failure.error,
                        "Tier placement failed"
                    );
                }
                info!(
                    sentiment = %sentiment.value,
                    panic = sentiment.panic,
                    safety_factor = %params.safety_factor,
                    budget = %budget,
                    placed = report.placed.len(),
                    reset_cancelled = ?reset,
                    "Slow cycle complete"
                );
                Metrics::cycle_run("slow", started.elapsed().as_secs_f64() * 1000.0);
                Ok(SlowCycle::Rebalanced {
                    panic: sentiment.panic,
                })
            }
        }
    }

    // ------------------------------------------------------------------
    // Fast loop
    // ------------------------------------------------------------------

    async fn fast_loop(&self) {
        let mut monitor = OpportunisticOrderMonitor::new(&self.strategy);
        if !monitor.is_enabled() {
            info!("Opportunistic monitor disabled");
            return;
        }

        let mut ticker = interval(self.config.fast_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if let Err(e) = self.fast_cycle(&mut monitor).await {
                self.cycle_failed("fast", e);
            }
        }
    }

    /// One opportunistic scan. Skips until the slow loop has produced a floor.
    pub async fn fast_cycle(&self, monitor: &mut OpportunisticOrderMonitor) -> EngineResult<()> {
        let started = StdInstant::now();
        let Some(signal) = self.signal() else {
            debug!("No strategy signal yet, skipping scan");
            Metrics::cycle_skipped("fast");
            return Ok(());
        };

        let book = self
            .market
            .get_funding_book(self.config.tenor_range())
            .await?;
        let wallet = self
            .account
            .get_wallet_balance(&self.config.currency)
            .await?;
        let now = self.clock.now();
        let ctx = ScanContext {
            dynamic_rate_floor: signal.params.dynamic_rate_floor,
            best_open_rate: self.handle.snapshot().best_ladder_rate,
            idle_funds: wallet.available.saturating_sub(self.config.retained()),
            now,
        };

        if let Some(opportunity) = monitor.scan(&book, &ctx) {
            let request =
                OfferRequest::new(opportunity.rate, opportunity.tenor_days, opportunity.amount);
            match self
                .handle
                .place_opportunistic(request, self.config.fast_wait())
                .await
            {
                Ok(offer) => {
                    info!(offer_id = %offer.id, score = %opportunity.score, "Opportunistic offer placed");
                    monitor.mark_acted(&opportunity, now);
                }
                Err(EngineError::Busy) => {
                    debug!("Engine busy, skipping opportunity");
                    Metrics::cycle_skipped("fast");
                    return Ok(());
                }
                Err(EngineError::InsufficientFunds { requested, idle }) => {
                    debug!(requested = %requested, idle = %idle, "Opportunity no longer fundable");
                }
                Err(e) => return Err(e),
            }
        }

        Metrics::cycle_run("fast", started.elapsed().as_secs_f64() * 1000.0);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Resync and summary loops
    // ------------------------------------------------------------------

    async fn resync_loop(&self) {
        let period = self.config.resync_interval();
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let started = StdInstant::now();
            match self.handle.resync(self.config.fast_wait()).await {
                Ok(report) => {
                    if report.has_changes() {
                        info!(
                            filled = report.filled.len(),
                            partially_filled = report.partially_filled.len(),
                            cancelled = report.cancelled.len(),
                            adopted = report.adopted.len(),
                            "Offer status changed"
                        );
                    }
                    Metrics::cycle_run("resync", started.elapsed().as_secs_f64() * 1000.0);
                }
                Err(EngineError::Busy) => Metrics::cycle_skipped("resync"),
                Err(e) => self.cycle_failed("resync", e),
            }
        }
    }

    async fn summary_loop(&self) {
        let period = self.config.summary_interval();
        let mut ticker = interval_at(Instant::now() + period, period);
        let reporter = StatsReporter::new();

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let summary = self.summary().await;
            self.events.push(EngineEvent::Summary(summary));
            reporter.log_summary();
        }
    }

    /// Current status report. A failed wallet read leaves `idle` empty.
    pub async fn summary(&self) -> EngineSummary {
        let snapshot = self.handle.snapshot();
        let idle = match self
            .account
            .get_wallet_balance(&self.config.currency)
            .await
        {
            Ok(wallet) => Some(wallet.available.saturating_sub(self.config.retained())),
            Err(e) => {
                debug!(error = %e, "Wallet read failed for summary");
                None
            }
        };
        let signal = self.signal();

        EngineSummary {
            at: self.clock.now(),
            currency: self.config.currency.clone(),
            open_offers: snapshot.open_offers.len(),
            protected_offers: snapshot.protected_count,
            committed: snapshot.committed,
            idle,
            best_ladder_rate: snapshot.best_ladder_rate,
            sentiment: signal.as_ref().map(|s| s.sentiment.value),
            safety_factor: signal.as_ref().map(|s| s.params.safety_factor),
            last_full_reset_at: snapshot.last_full_reset_at,
        }
    }

    fn cycle_failed(&self, loop_name: &'static str, e: EngineError) {
        if e.is_fatal() {
            self.halt(e.to_string());
            return;
        }
        match &e {
            EngineError::Stopped => debug!(loop_name, "Engine stopped, cycle dropped"),
            _ => warn!(loop_name, error = %e, "Cycle aborted"),
        }
        Metrics::cycle_aborted(loop_name);
    }

    fn halt(&self, reason: String) {
        let mut slot = self.halt_reason.lock();
        if slot.is_none() {
            error!(%reason, "Fatal error, shutting down");
            self.events.push(EngineEvent::Halted {
                reason: reason.clone(),
            });
            *slot = Some(reason);
        }
        self.shutdown.cancel();
    }
}
