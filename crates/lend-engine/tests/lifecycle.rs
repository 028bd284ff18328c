//! Lifecycle manager against the paper account.

mod common;

use std::time::Duration as StdDuration;

use chrono::Duration;
use common::{plan, Harness};
use lend_core::{Amount, OfferOrigin, OfferRequest, OfferStatus, Rate};
use lend_engine::{Clock, EngineError, EngineEvent};
use lend_exchange::{ExchangeError, FundingAccount};
use rust_decimal_macros::dec;

fn opportunistic(amount: rust_decimal::Decimal) -> OfferRequest {
    OfferRequest::new(Rate::new(dec!(0.0009)), 2, Amount::new(amount))
}

// ============================================================================
// Protection window
// ============================================================================

#[tokio::test]
async fn test_protected_offer_survives_reconcile_until_window_ends() {
    let mut h = Harness::with_balance(dec!(1000));
    let offer = h
        .manager
        .place_opportunistic(opportunistic(dec!(200)))
        .await
        .unwrap();
    assert_eq!(offer.origin, OfferOrigin::Opportunistic);

    let ladder = plan(&[(dec!(0.0003), 2, dec!(300))]);

    h.clock.advance(Duration::minutes(4) + Duration::seconds(59));
    let report = h.manager.reconcile_with_plan(&ladder).await.unwrap();
    assert_eq!(report.protected, vec![offer.id]);
    assert!(report.cancelled.is_empty());
    assert_eq!(report.placed.len(), 1);
    assert!(h.paper.open_offers().iter().any(|o| o.id == offer.id));

    h.clock.advance(Duration::seconds(2));
    let report = h.manager.reconcile_with_plan(&ladder).await.unwrap();
    assert!(report.protected.is_empty());
    assert_eq!(report.cancelled, vec![offer.id]);
    assert_eq!(report.kept.len(), 1);
    assert!(!h.paper.open_offers().iter().any(|o| o.id == offer.id));
}

#[tokio::test]
async fn test_full_reset_cancels_protected_offers() {
    let mut h = Harness::with_balance(dec!(1000));
    h.manager
        .place_opportunistic(opportunistic(dec!(200)))
        .await
        .unwrap();
    h.manager
        .reconcile_with_plan(&plan(&[(dec!(0.0003), 2, dec!(300))]))
        .await
        .unwrap();

    h.clock.advance(Duration::minutes(1));
    let cancelled = h.manager.force_full_reset().await.unwrap();

    assert_eq!(cancelled, 2);
    assert!(h.manager.state().is_empty());
    assert!(h.paper.open_offers().is_empty());
    assert_eq!(h.manager.state().last_full_reset_at(), h.clock.now());
    assert!(h
        .drain_events()
        .iter()
        .any(|e| *e == EngineEvent::FullReset { cancelled: 2 }));
}

#[tokio::test]
async fn test_reset_due_after_interval() {
    let h = Harness::with_balance(dec!(1000));

    h.clock
        .advance(Duration::hours(5) + Duration::minutes(59));
    assert!(!h.manager.reset_due());

    h.clock.advance(Duration::minutes(1));
    assert!(h.manager.reset_due());
}

// ============================================================================
// Funds
// ============================================================================

#[tokio::test]
async fn test_ladder_shrinks_to_idle_funds_around_protected_offer() {
    let mut h = Harness::with_balance(dec!(1000));
    h.manager
        .place_opportunistic(opportunistic(dec!(300)))
        .await
        .unwrap();

    let ladder = plan(&[
        (dec!(0.0003), 2, dec!(300)),
        (dec!(0.00032), 2, dec!(300)),
        (dec!(0.00034), 2, dec!(300)),
    ]);
    let report = h.manager.reconcile_with_plan(&ladder).await.unwrap();

    assert_eq!(report.idle_before_placing, Amount::new(dec!(700)));
    assert!(report.placed_total() <= report.idle_before_placing);
    assert_eq!(report.placed.len(), 2);
    // Shortfall comes out of the lowest tier, leaving it under the minimum.
    assert_eq!(report.dropped.len(), 1);
    assert_eq!(report.dropped[0].index, 0);
    assert!(h.manager.state().committed_funds() <= Amount::new(dec!(1000)));
}

#[tokio::test]
async fn test_retained_funds_are_never_offered() {
    let mut config = common::lifecycle_config();
    config.retained = Amount::new(dec!(400));
    let mut h = Harness::with_config(dec!(1000), config);

    let ladder = plan(&[(dec!(0.0003), 2, dec!(500)), (dec!(0.00032), 2, dec!(500))]);
    let report = h.manager.reconcile_with_plan(&ladder).await.unwrap();

    assert_eq!(report.idle_before_placing, Amount::new(dec!(600)));
    assert_eq!(report.placed_total(), Amount::new(dec!(500)));
    assert!(h.paper.available() >= Amount::new(dec!(400)));
}

#[tokio::test]
async fn test_opportunistic_rejected_without_idle_funds() {
    let mut h = Harness::with_balance(dec!(500));
    h.manager
        .reconcile_with_plan(&plan(&[(dec!(0.0003), 2, dec!(400))]))
        .await
        .unwrap();
    let submitted = h.paper.submitted().len();

    let err = h
        .manager
        .place_opportunistic(opportunistic(dec!(200)))
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::InsufficientFunds { .. }));
    assert_eq!(h.paper.submitted().len(), submitted);
}

#[tokio::test]
async fn test_inadmissible_tenor_never_reaches_exchange() {
    let mut h = Harness::with_balance(dec!(1000));
    let request = OfferRequest::new(Rate::new(dec!(0.0003)), 30, Amount::new(dec!(200)));

    let err = h.manager.place_opportunistic(request).await.unwrap_err();

    assert!(matches!(err, EngineError::InadmissibleTenor { tenor_days: 30, .. }));
    assert!(h.paper.submitted().is_empty());
}

// ============================================================================
// Reconcile
// ============================================================================

#[tokio::test]
async fn test_reconcile_is_idempotent() {
    let mut h = Harness::with_balance(dec!(1000));
    let ladder = plan(&[(dec!(0.0003), 2, dec!(300)), (dec!(0.00032), 2, dec!(400))]);

    let first = h.manager.reconcile_with_plan(&ladder).await.unwrap();
    assert_eq!(first.placed.len(), 2);
    assert!(h.manager.matches_plan(&ladder));

    let second = h.manager.reconcile_with_plan(&ladder).await.unwrap();
    assert_eq!(second.kept.len(), 2);
    assert!(second.cancelled.is_empty());
    assert!(second.placed.is_empty());
    assert_eq!(h.paper.submitted().len(), 2);
}

#[tokio::test]
async fn test_changed_plan_replaces_only_mismatched_tiers() {
    let mut h = Harness::with_balance(dec!(1000));
    h.manager
        .reconcile_with_plan(&plan(&[(dec!(0.0003), 2, dec!(300)), (dec!(0.00032), 2, dec!(400))]))
        .await
        .unwrap();

    let report = h
        .manager
        .reconcile_with_plan(&plan(&[(dec!(0.0003), 2, dec!(300)), (dec!(0.00035), 2, dec!(400))]))
        .await
        .unwrap();

    assert_eq!(report.kept.len(), 1);
    assert_eq!(report.cancelled.len(), 1);
    assert_eq!(report.placed.len(), 1);
    assert_eq!(report.placed[0].rate, Rate::new(dec!(0.00035)));
}

#[tokio::test]
async fn test_failed_tier_does_not_block_the_rest() {
    let mut h = Harness::with_balance(dec!(1000));
    h.paper
        .fail_next_submit(ExchangeError::Rejected("price out of band".to_string()));

    let ladder = plan(&[
        (dec!(0.0003), 2, dec!(200)),
        (dec!(0.00032), 2, dec!(200)),
        (dec!(0.00034), 2, dec!(200)),
    ]);
    let report = h.manager.reconcile_with_plan(&ladder).await.unwrap();

    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].tier_index, 0);
    assert_eq!(report.placed.len(), 2);
    assert!(!report.is_clean());
    assert!(h
        .drain_events()
        .iter()
        .any(|e| e.kind() == "placement_failed"));
}

#[tokio::test]
async fn test_fatal_error_aborts_reconcile() {
    let mut h = Harness::with_balance(dec!(1000));
    h.paper
        .fail_next_submit(ExchangeError::Authentication("key revoked".to_string()));

    let err = h
        .manager
        .reconcile_with_plan(&plan(&[(dec!(0.0003), 2, dec!(200)), (dec!(0.00032), 2, dec!(200))]))
        .await
        .unwrap_err();

    assert!(err.is_fatal());
    assert!(h.paper.submitted().is_empty());
}

// ============================================================================
// Resync
// ============================================================================

#[tokio::test]
async fn test_resync_detects_fills_and_adopts_untracked() {
    let mut h = Harness::with_balance(dec!(2000));
    let report = h
        .manager
        .reconcile_with_plan(&plan(&[(dec!(0.0003), 2, dec!(300)), (dec!(0.00032), 2, dec!(400))]))
        .await
        .unwrap();
    let full = report.placed[0].id;
    let partial = report.placed[1].id;

    h.paper.fill_offer(full, Amount::new(dec!(300))).unwrap();
    h.paper.fill_offer(partial, Amount::new(dec!(100))).unwrap();
    let stray = h
        .paper
        .submit_offer(OfferRequest::new(
            Rate::new(dec!(0.0005)),
            30,
            Amount::new(dec!(250)),
        ))
        .await
        .unwrap();
    h.drain_events();

    let resync = h.manager.resync().await.unwrap();

    assert_eq!(resync.filled, vec![full]);
    assert_eq!(resync.partially_filled, vec![partial]);
    assert_eq!(resync.adopted, vec![stray]);
    assert!(resync.has_changes());

    let tracked = h.manager.state().get(partial).unwrap();
    assert_eq!(tracked.status, OfferStatus::PartiallyFilled);
    assert_eq!(tracked.remaining(), Amount::new(dec!(300)));
    assert_eq!(
        h.manager.state().get(stray).unwrap().origin,
        OfferOrigin::External
    );

    let events = h.drain_events();
    assert!(events.iter().all(|e| e.is_position_change()));
    assert!(events.iter().any(|e| matches!(
        e,
        EngineEvent::OfferFilled { id, amount, .. } if *id == full && *amount == Amount::new(dec!(300))
    )));

    assert!(!h.manager.resync().await.unwrap().has_changes());
}

#[tokio::test]
async fn test_cancel_of_taken_offer_resolves_as_fill() {
    let mut h = Harness::with_balance(dec!(1000));
    let report = h
        .manager
        .reconcile_with_plan(&plan(&[(dec!(0.0003), 2, dec!(300))]))
        .await
        .unwrap();
    let taken = report.placed[0].id;
    h.paper.fill_offer(taken, Amount::new(dec!(300))).unwrap();
    h.drain_events();

    let report = h
        .manager
        .reconcile_with_plan(&plan(&[(dec!(0.00035), 2, dec!(300))]))
        .await
        .unwrap();

    assert_eq!(report.cancel_failures.len(), 1);
    assert!(matches!(
        report.cancel_failures[0].1,
        EngineError::Exchange(ExchangeError::OfferNotFound(_))
    ));
    assert!(h.manager.state().get(taken).is_none());
    assert!(!h.manager.state().needs_resync());
    assert!(h
        .drain_events()
        .iter()
        .any(|e| matches!(e, EngineEvent::OfferFilled { id, .. } if *id == taken)));
}

#[tokio::test]
async fn test_cancel_timeout_forces_resync_before_placing() {
    let mut h = Harness::with_balance(dec!(1000));
    let report = h
        .manager
        .reconcile_with_plan(&plan(&[(dec!(0.0003), 2, dec!(300))]))
        .await
        .unwrap();
    let stale = report.placed[0].id;
    h.paper
        .fail_next_cancel(ExchangeError::Timeout(StdDuration::from_secs(10)));

    let report = h
        .manager
        .reconcile_with_plan(&plan(&[(dec!(0.00035), 2, dec!(300))]))
        .await
        .unwrap();

    assert_eq!(report.cancel_failures.len(), 1);
    // Still live on the exchange, so resync keeps it tracked.
    assert!(h.manager.state().get(stale).is_some());
    assert!(!h.manager.state().needs_resync());
    assert_eq!(report.placed.len(), 1);

    let report = h
        .manager
        .reconcile_with_plan(&plan(&[(dec!(0.00035), 2, dec!(300))]))
        .await
        .unwrap();
    assert_eq!(report.cancelled, vec![stale]);
    assert_eq!(report.kept.len(), 1);
}

// ============================================================================
// Startup
// ============================================================================

#[tokio::test]
async fn test_initialize_cancels_existing_offers() {
    let mut h = Harness::with_balance(dec!(1000));
    for rate in [dec!(0.0003), dec!(0.0004)] {
        h.paper
            .submit_offer(OfferRequest::new(Rate::new(rate), 2, Amount::new(dec!(200))))
            .await
            .unwrap();
    }

    let report = h.manager.initialize(true).await.unwrap();

    assert_eq!(report.adopted, 2);
    assert_eq!(report.cancelled, 2);
    assert!(h.paper.open_offers().is_empty());
    assert!(h.manager.state().is_empty());
    assert!(h.drain_events().contains(&EngineEvent::Startup {
        currency: common::CURRENCY.to_string(),
        adopted: 2,
        cancelled: 2,
    }));
}

#[tokio::test]
async fn test_initialize_can_adopt_existing_offers() {
    let mut h = Harness::with_balance(dec!(1000));
    let id = h
        .paper
        .submit_offer(OfferRequest::new(
            Rate::new(dec!(0.0003)),
            2,
            Amount::new(dec!(200)),
        ))
        .await
        .unwrap();

    let report = h.manager.initialize(false).await.unwrap();

    assert_eq!(report.adopted, 1);
    assert_eq!(report.cancelled, 0);
    assert_eq!(
        h.manager.state().get(id).unwrap().origin,
        OfferOrigin::External
    );
    assert_eq!(h.manager.snapshot().committed, Amount::new(dec!(200)));
}
