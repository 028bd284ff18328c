//! Engine actor and orchestrator cycles end to end.

mod common;

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Duration;
use common::{plan, t0, Harness};
use lend_core::{Amount, FundingBookSnapshot, OfferRequest, Rate, RateHistory};
use lend_engine::{
    engine_channel, EngineActor, EngineConfig, EngineError, EngineEvent, EngineHandle,
    Orchestrator, RebalanceOutcome, SlowCycle,
};
use lend_exchange::{ExchangeError, FundingAccount, PaperExchange, StaticMarketData};
use lend_strategy::{RateOptimizer, StrategyConfig};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio_util::sync::CancellationToken;

struct Running {
    handle: EngineHandle,
    shutdown: CancellationToken,
    actor: tokio::task::JoinHandle<Result<(), EngineError>>,
}

fn start(actor: EngineActor, handle: EngineHandle, shutdown: CancellationToken) -> Running {
    Running {
        handle,
        shutdown,
        actor: tokio::spawn(actor.run()),
    }
}

fn spawn_engine(h: Harness) -> (Running, Harness2) {
    let Harness {
        paper,
        clock,
        manager,
        queue,
        events,
    } = h;
    let shutdown = CancellationToken::new();
    let (actor, handle) = engine_channel(manager, queue.clone(), true, shutdown.clone());
    (
        start(actor, handle, shutdown),
        Harness2 {
            paper,
            clock,
            queue,
            events,
        },
    )
}

/// Harness pieces left once the manager moved into the actor.
struct Harness2 {
    paper: Arc<PaperExchange>,
    clock: Arc<lend_engine::ManualClock>,
    queue: lend_engine::EventQueue,
    events: tokio::sync::mpsc::Receiver<EngineEvent>,
}

// ============================================================================
// Actor
// ============================================================================

#[tokio::test]
async fn test_unchanged_plan_is_skipped_unless_forced() {
    let (engine, rest) = spawn_engine(Harness::with_balance(dec!(1000)));
    let ladder = plan(&[(dec!(0.0003), 2, dec!(300)), (dec!(0.00032), 2, dec!(300))]);

    let first = engine.handle.rebalance(ladder.clone(), false).await.unwrap();
    assert!(matches!(first, RebalanceOutcome::Reconciled { reset: None, .. }));
    assert_eq!(engine.handle.snapshot().open_offers.len(), 2);

    let second = engine.handle.rebalance(ladder.clone(), false).await.unwrap();
    assert!(matches!(second, RebalanceOutcome::Unchanged));

    match engine.handle.rebalance(ladder, true).await.unwrap() {
        RebalanceOutcome::Reconciled { report, .. } => {
            assert_eq!(report.kept.len(), 2);
            assert!(report.placed.is_empty());
            assert!(report.cancelled.is_empty());
        }
        other => panic!("expected reconcile, got {other:?}"),
    }
    assert_eq!(rest.paper.submitted().len(), 2);

    engine.shutdown.cancel();
    assert!(engine.actor.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_rebalance_runs_due_reset_first() {
    let (engine, rest) = spawn_engine(Harness::with_balance(dec!(1000)));
    let ladder = plan(&[(dec!(0.0003), 2, dec!(300))]);
    engine.handle.rebalance(ladder.clone(), false).await.unwrap();
    engine
        .handle
        .place_opportunistic(
            OfferRequest::new(Rate::new(dec!(0.0009)), 2, Amount::new(dec!(200))),
            StdDuration::from_secs(1),
        )
        .await
        .unwrap();

    rest.clock.advance(Duration::hours(6));
    let outcome = engine.handle.rebalance(ladder, false).await.unwrap();

    match outcome {
        RebalanceOutcome::Reconciled { report, reset } => {
            assert_eq!(reset, Some(2));
            assert!(report.kept.is_empty());
            assert_eq!(report.placed.len(), 1);
        }
        other => panic!("expected reconcile, got {other:?}"),
    }
    let snapshot = engine.handle.snapshot();
    assert_eq!(snapshot.last_full_reset_at, t0() + Duration::hours(6));
    assert_eq!(snapshot.open_offers.len(), 1);
    assert_eq!(rest.paper.open_offers().len(), 1);
}

#[tokio::test]
async fn test_fatal_error_halts_actor() {
    let (engine, mut rest) = spawn_engine(Harness::with_balance(dec!(1000)));
    rest.paper
        .fail_next_read(ExchangeError::Authentication("key revoked".to_string()));

    let err = engine
        .handle
        .rebalance(plan(&[(dec!(0.0003), 2, dec!(300))]), false)
        .await
        .unwrap_err();
    assert!(err.is_fatal());

    let result = engine.actor.await.unwrap();
    assert!(matches!(result, Err(EngineError::Halted(_))));
    assert!(engine.shutdown.is_cancelled());

    let mut halted = false;
    while let Ok(event) = rest.events.try_recv() {
        halted |= matches!(event, EngineEvent::Halted { .. });
    }
    assert!(halted);

    let after = engine.handle.force_reset().await.unwrap_err();
    assert!(matches!(after, EngineError::Stopped));
}

#[tokio::test]
async fn test_expired_opportunistic_command_is_dropped() {
    let h = Harness::with_balance(dec!(1000));
    let paper = h.paper.clone();
    let shutdown = CancellationToken::new();
    let (actor, handle) = engine_channel(h.manager, h.queue, true, shutdown.clone());

    let caller = handle.clone();
    let pending = tokio::spawn(async move {
        caller
            .place_opportunistic(
                OfferRequest::new(Rate::new(dec!(0.0009)), 2, Amount::new(dec!(200))),
                StdDuration::from_millis(1),
            )
            .await
    });
    // Command is queued but the actor only starts after its deadline.
    tokio::time::sleep(StdDuration::from_millis(50)).await;
    let engine = start(actor, handle, shutdown);

    let result = pending.await.unwrap();
    assert!(matches!(result, Err(EngineError::Busy)));
    assert!(paper.submitted().is_empty());

    engine.shutdown.cancel();
    engine.actor.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_initialize_publishes_snapshot() {
    let h = Harness::with_balance(dec!(1000));
    h.paper
        .submit_offer(OfferRequest::new(
            Rate::new(dec!(0.0003)),
            2,
            Amount::new(dec!(200)),
        ))
        .await
        .unwrap();

    let shutdown = CancellationToken::new();
    let (mut actor, handle) = engine_channel(h.manager, h.queue, true, shutdown);
    assert!(handle.snapshot().open_offers.is_empty());

    let report = actor.initialize(false).await.unwrap();
    assert_eq!(report.adopted, 1);
    assert_eq!(handle.snapshot().open_offers.len(), 1);
    assert_eq!(handle.snapshot().committed, Amount::new(dec!(200)));
}

// ============================================================================
// Orchestrator
// ============================================================================

fn orchestrator(rest: &Harness2, handle: EngineHandle, shutdown: CancellationToken) -> Orchestrator {
    orchestrator_with(rest, handle, shutdown, EngineConfig::default())
}

fn orchestrator_with(
    rest: &Harness2,
    handle: EngineHandle,
    shutdown: CancellationToken,
    config: EngineConfig,
) -> Orchestrator {
    let strategy = StrategyConfig::default();
    let market = Arc::new(StaticMarketData::new(
        FundingBookSnapshot::empty(t0()),
        RateHistory::default(),
    ));
    Orchestrator::new(
        config,
        strategy.clone(),
        RateOptimizer::with_default_policy(&strategy),
        market,
        rest.paper.clone(),
        rest.clock.clone(),
        handle,
        rest.queue.clone(),
        shutdown,
    )
}

#[tokio::test]
async fn test_slow_cycle_places_ladder_then_holds() {
    let (engine, rest) = spawn_engine(Harness::with_balance(dec!(1000)));
    let orchestrator = orchestrator(&rest, engine.handle.clone(), engine.shutdown.clone());

    let cycle = orchestrator.slow_cycle().await.unwrap();
    assert_eq!(cycle, SlowCycle::Rebalanced { panic: false });
    assert!(orchestrator.signal().is_some());

    let offers = rest.paper.open_offers();
    assert!(!offers.is_empty());
    let total: Amount = offers.iter().map(|o| o.amount).sum();
    assert!(total <= Amount::new(dec!(1000)));
    assert!(offers.iter().all(|o| o.tenor_days == 2));

    // Same market, same funds: nothing to do.
    let cycle = orchestrator.slow_cycle().await.unwrap();
    assert_eq!(cycle, SlowCycle::Unchanged);

    let summary = orchestrator.summary().await;
    assert_eq!(summary.open_offers, offers.len());
    assert_eq!(summary.committed, total);
    assert_eq!(summary.sentiment, Some(Decimal::ONE));

    engine.shutdown.cancel();
    engine.actor.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_slow_cycle_skips_below_minimum_funds() {
    let (engine, rest) = spawn_engine(Harness::with_balance(dec!(100)));
    let orchestrator = orchestrator(&rest, engine.handle.clone(), engine.shutdown.clone());

    let cycle = orchestrator.slow_cycle().await.unwrap();

    assert_eq!(cycle, SlowCycle::BelowMinimumFunds);
    assert!(rest.paper.submitted().is_empty());
}

#[tokio::test]
async fn test_slow_cycle_resets_at_interval_boundary() {
    let (engine, rest) = spawn_engine(Harness::with_balance(dec!(1000)));
    let orchestrator = orchestrator(&rest, engine.handle.clone(), engine.shutdown.clone());
    orchestrator.slow_cycle().await.unwrap();
    let placed = rest.paper.submitted().len();

    rest.clock.advance(Duration::hours(6) - Duration::seconds(1));
    assert_eq!(orchestrator.slow_cycle().await.unwrap(), SlowCycle::Unchanged);
    assert_eq!(engine.handle.snapshot().last_full_reset_at, t0());

    rest.clock.advance(Duration::seconds(1));
    assert_eq!(
        orchestrator.slow_cycle().await.unwrap(),
        SlowCycle::Rebalanced { panic: false }
    );
    assert_eq!(
        engine.handle.snapshot().last_full_reset_at,
        t0() + Duration::hours(6)
    );
    // Everything was cancelled and the ladder placed again.
    assert_eq!(rest.paper.submitted().len(), placed * 2);
    assert_eq!(rest.paper.open_offers().len(), placed);

    engine.shutdown.cancel();
    engine.actor.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_slow_cycle_resets_when_funds_are_lent_out() {
    let (engine, rest) = spawn_engine(Harness::with_balance(dec!(1000)));
    let config = EngineConfig {
        min_funds: dec!(500),
        ..Default::default()
    };
    let orchestrator =
        orchestrator_with(&rest, engine.handle.clone(), engine.shutdown.clone(), config);

    engine
        .handle
        .rebalance(
            plan(&[(dec!(0.0003), 2, dec!(150)), (dec!(0.00032), 2, dec!(800))]),
            false,
        )
        .await
        .unwrap();
    let big = rest
        .paper
        .open_offers()
        .into_iter()
        .find(|o| o.amount == Amount::new(dec!(800)))
        .unwrap();
    rest.paper.fill_offer(big.id, big.amount).unwrap();
    let report = engine.handle.resync(StdDuration::from_secs(1)).await.unwrap();
    assert_eq!(report.filled, vec![big.id]);

    rest.clock.advance(Duration::hours(6) - Duration::seconds(1));
    assert_eq!(
        orchestrator.slow_cycle().await.unwrap(),
        SlowCycle::BelowMinimumFunds
    );
    assert_eq!(engine.handle.snapshot().last_full_reset_at, t0());
    assert_eq!(rest.paper.open_offers().len(), 1);

    rest.clock.advance(Duration::seconds(1));
    assert_eq!(
        orchestrator.slow_cycle().await.unwrap(),
        SlowCycle::BelowMinimumFunds
    );
    let snapshot = engine.handle.snapshot();
    assert_eq!(snapshot.last_full_reset_at, t0() + Duration::hours(6));
    assert!(snapshot.open_offers.is_empty());
    assert!(rest.paper.open_offers().is_empty());

    engine.shutdown.cancel();
    engine.actor.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_protected_offer_does_not_churn_ladder() {
    let (engine, rest) = spawn_engine(Harness::with_balance(dec!(1000)));
    let orchestrator = orchestrator(&rest, engine.handle.clone(), engine.shutdown.clone());
    engine
        .handle
        .place_opportunistic(
            OfferRequest::new(Rate::new(dec!(0.0009)), 2, Amount::new(dec!(200))),
            StdDuration::from_secs(1),
        )
        .await
        .unwrap();

    assert_eq!(
        orchestrator.slow_cycle().await.unwrap(),
        SlowCycle::Rebalanced { panic: false }
    );
    let ladder: Amount = rest
        .paper
        .open_offers()
        .iter()
        .filter(|o| o.rate != Rate::new(dec!(0.0009)))
        .map(|o| o.amount)
        .sum();
    assert!(ladder <= Amount::new(dec!(800)));
    let submitted = rest.paper.submitted().len();

    rest.clock.advance(Duration::minutes(1));
    assert_eq!(orchestrator.slow_cycle().await.unwrap(), SlowCycle::Unchanged);
    assert_eq!(rest.paper.submitted().len(), submitted);

    engine.shutdown.cancel();
    engine.actor.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_reset_if_due_without_ladder() {
    let (engine, rest) = spawn_engine(Harness::with_balance(dec!(1000)));
    engine
        .handle
        .rebalance(plan(&[(dec!(0.0003), 2, dec!(300))]), false)
        .await
        .unwrap();

    assert_eq!(engine.handle.reset_if_due().await.unwrap(), None);
    assert_eq!(rest.paper.open_offers().len(), 1);

    rest.clock.advance(Duration::hours(6));
    assert_eq!(engine.handle.reset_if_due().await.unwrap(), Some(1));
    assert!(rest.paper.open_offers().is_empty());
    assert_eq!(
        engine.handle.snapshot().last_full_reset_at,
        t0() + Duration::hours(6)
    );

    engine.shutdown.cancel();
    engine.actor.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_run_stops_on_shutdown() {
    let (engine, rest) = spawn_engine(Harness::with_balance(dec!(1000)));
    let orchestrator = orchestrator(&rest, engine.handle.clone(), engine.shutdown.clone());

    let stopper = engine.shutdown.clone();
    tokio::spawn(async move {
        tokio::time::sleep(StdDuration::from_millis(100)).await;
        stopper.cancel();
    });

    assert!(orchestrator.run().await.is_ok());
    assert!(engine.actor.await.unwrap().is_ok());
    // First slow tick fires immediately.
    assert!(!rest.paper.submitted().is_empty());
}

#[tokio::test]
async fn test_run_halts_on_fatal_market_error() {
    let (engine, rest) = spawn_engine(Harness::with_balance(dec!(1000)));
    rest.paper
        .fail_next_read(ExchangeError::Authentication("key revoked".to_string()));
    let orchestrator = orchestrator(&rest, engine.handle.clone(), engine.shutdown.clone());

    let result = orchestrator.run().await;

    assert!(matches!(result, Err(EngineError::Halted(_))));
    assert!(engine.shutdown.is_cancelled());
}
