//! Main application wiring.
//!
//! Builds the exchange stack, initializes the engine actor from the live
//! account, then runs the orchestrator loops until Ctrl-C or a fatal error.
//! With the paper account a fill simulator matches resting offers against
//! the public funding book and repays loans when their tenor ends.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use lend_core::{Amount, TenorRange};
use lend_engine::{
    engine_channel, spawn_notifier, Clock, EventQueue, LifecycleConfig, LogSink,
    NotificationSink, OrderLifecycleManager, Orchestrator, SystemClock,
};
use lend_exchange::{
    FundingAccount, FundingExchange, GuardedExchange, MarketData, PaperExchange,
    PublicRestClient, RetryPolicy, SplitExchange,
};
use lend_strategy::RateOptimizer;
use lend_telemetry::StatsReporter;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::AppConfig;
use crate::error::{AppError, AppResult};

/// Time allowed for the notifier to drain after shutdown.
const NOTIFIER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Main application.
pub struct Application {
    config: AppConfig,
}

impl Application {
    /// Validates the configuration; nothing connects until [`Self::run`].
    pub fn new(config: AppConfig) -> AppResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub async fn run(self) -> AppResult<()> {
        let config = self.config;
        let currency = config.engine.currency.clone();

        // Exchange stack: public market data + paper account, behind retry
        // and per-call timeouts.
        let market: Arc<dyn MarketData> =
            Arc::new(PublicRestClient::new(&config.exchange, &currency)?);
        let paper = Arc::new(PaperExchange::new(&currency, &config.paper));
        let account: Arc<dyn FundingAccount> = paper.clone();
        let split: Arc<dyn FundingExchange> = Arc::new(SplitExchange::new(market, account));
        let exchange = Arc::new(GuardedExchange::new(
            split,
            RetryPolicy::new(config.retry.clone()),
        ));
        info!(
            %currency,
            balance = %config.paper.initial_balance,
            "Using paper funding account"
        );

        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let shutdown = CancellationToken::new();

        let (events, event_rx) = EventQueue::channel(config.engine.event_queue_capacity);
        let sinks: Vec<Arc<dyn NotificationSink>> = vec![Arc::new(LogSink)];
        let notifier = spawn_notifier(event_rx, sinks);

        let manager = OrderLifecycleManager::new(
            exchange.clone(),
            clock.clone(),
            events.clone(),
            config.strategy.schedule.clone(),
            LifecycleConfig::new(&config.engine, &config.strategy),
        );
        let (mut actor, handle) = engine_channel(
            manager,
            events.clone(),
            config.engine.rebalance_hysteresis,
            shutdown.clone(),
        );
        let startup = actor.initialize(config.engine.cancel_on_startup).await?;
        info!(
            adopted = startup.adopted,
            cancelled = startup.cancelled,
            "Engine initialized"
        );
        let actor_task = tokio::spawn(actor.run());

        let simulator = tokio::spawn(simulate_fills(
            paper,
            exchange.clone(),
            clock.clone(),
            config.engine.tenor_range(),
            config.engine.fast_interval(),
            shutdown.clone(),
        ));

        let ctrl_c = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = shutdown.cancelled() => {}
                    result = tokio::signal::ctrl_c() => {
                        match result {
                            Ok(()) => info!("Shutdown signal received"),
                            Err(e) => error!(error = %e, "Failed to listen for Ctrl-C"),
                        }
                        shutdown.cancel();
                    }
                }
            })
        };

        let orchestrator = Orchestrator::new(
            config.engine.clone(),
            config.strategy.clone(),
            RateOptimizer::with_default_policy(&config.strategy),
            exchange.clone(),
            exchange,
            clock,
            handle,
            events,
            shutdown.clone(),
        );

        info!("Entering main loops");
        let loops = orchestrator.run().await;
        shutdown.cancel();

        let engine = join("engine actor", actor_task).await;
        join("fill simulator", simulator).await?;
        join("signal listener", ctrl_c).await?;

        // Notifier ends once every event producer is gone.
        drop(orchestrator);
        if tokio::time::timeout(NOTIFIER_DRAIN_TIMEOUT, notifier)
            .await
            .is_err()
        {
            warn!("Notifier did not drain in time");
        }

        info!("Final statistics summary:");
        StatsReporter::new().log_summary();

        loops?;
        engine??;
        info!("Shutdown complete");
        Ok(())
    }
}

async fn join<T>(name: &str, task: JoinHandle<T>) -> AppResult<T> {
    task.await
        .map_err(|e| AppError::Task(format!("{name}: {e}")))
}

/// A paper loan waiting to be repaid.
#[derive(Debug, Clone, Copy)]
struct PaperLoan {
    due: DateTime<Utc>,
    amount: Amount,
}

/// Match paper offers against live demand and repay loans when due.
async fn simulate_fills(
    paper: Arc<PaperExchange>,
    market: Arc<dyn MarketData>,
    clock: Arc<dyn Clock>,
    range: TenorRange,
    period: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut loans: Vec<PaperLoan> = Vec::new();

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let now = clock.now();

        let (due, pending): (Vec<PaperLoan>, Vec<PaperLoan>) =
            loans.into_iter().partition(|loan| loan.due <= now);
        loans = pending;
        let repaid: Amount = due.iter().map(|loan| loan.amount).sum();
        if repaid.is_positive() {
            paper.repay(repaid);
            info!(repaid = %repaid, loans = due.len(), "Paper loans repaid");
        }

        let book = match market.get_funding_book(range).await {
            Ok(book) => book,
            Err(e) => {
                debug!(error = %e, "Funding book unavailable for fill simulation");
                continue;
            }
        };
        let tenors: Vec<_> = paper
            .open_offers()
            .into_iter()
            .map(|o| (o.id, o.tenor_days))
            .collect();
        for (id, taken) in paper.match_demand(&book) {
            let days = tenors
                .iter()
                .find(|(offer_id, _)| *offer_id == id)
                .map_or(range.min_days, |(_, days)| *days);
            loans.push(PaperLoan {
                due: now + chrono::Duration::days(i64::from(days)),
                amount: taken,
            });
        }
    }
    debug!(open_loans = loans.len(), "Fill simulator stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_validates_config() {
        assert!(Application::new(AppConfig::default()).is_ok());

        let mut config = AppConfig::default();
        config.engine.currency = String::new();
        assert!(matches!(
            Application::new(config),
            Err(AppError::Config(_))
        ));
    }
}
