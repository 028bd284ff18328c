//! Engine state owned by the lifecycle manager.
//!
//! Holds only active offers; terminal ones are dropped once their event has
//! been emitted. Rebuilt from the exchange on every start.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use lend_core::{Amount, Offer, OfferId, OfferOrigin, Rate};
use serde::Serialize;

#[derive(Debug, Clone)]
pub struct EngineState {
    last_full_reset_at: DateTime<Utc>,
    offers: BTreeMap<OfferId, Offer>,
    /// Cancels sent whose outcome is unknown (e.g. timed out).
    cancel_requested: HashSet<OfferId>,
    needs_resync: bool,
}

impl EngineState {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            last_full_reset_at: now,
            offers: BTreeMap::new(),
            cancel_requested: HashSet::new(),
            needs_resync: false,
        }
    }

    /// Start tracking `offer`. Returns false if the id is already tracked.
    pub fn track(&mut self, offer: Offer) -> bool {
        if self.offers.contains_key(&offer.id) {
            return false;
        }
        self.offers.insert(offer.id, offer);
        true
    }

    pub fn get(&self, id: OfferId) -> Option<&Offer> {
        self.offers.get(&id)
    }

    pub fn get_mut(&mut self, id: OfferId) -> Option<&mut Offer> {
        self.offers.get_mut(&id)
    }

    pub fn remove(&mut self, id: OfferId) -> Option<Offer> {
        self.cancel_requested.remove(&id);
        self.offers.remove(&id)
    }

    pub fn offers(&self) -> impl Iterator<Item = &Offer> {
        self.offers.values()
    }

    pub fn ids(&self) -> Vec<OfferId> {
        self.offers.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.offers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offers.is_empty()
    }

    /// Σ remaining over active offers.
    pub fn committed_funds(&self) -> Amount {
        self.offers.values().map(Offer::committed).sum()
    }

    /// Split tracked ids into (protected, eligible) at `now`.
    pub fn partition(&self, now: DateTime<Utc>) -> (Vec<OfferId>, Vec<OfferId>) {
        let mut protected = Vec::new();
        let mut eligible = Vec::new();
        for offer in self.offers.values() {
            if offer.is_protected(now) {
                protected.push(offer.id);
            } else {
                eligible.push(offer.id);
            }
        }
        (protected, eligible)
    }

    pub fn protected_count(&self, now: DateTime<Utc>) -> usize {
        self.offers.values().filter(|o| o.is_protected(now)).count()
    }

    /// Highest rate among active offers of `origin`.
    pub fn best_rate(&self, origin: OfferOrigin) -> Option<Rate> {
        self.offers
            .values()
            .filter(|o| o.origin == origin)
            .map(|o| o.rate)
            .max()
    }

    pub fn last_full_reset_at(&self) -> DateTime<Utc> {
        self.last_full_reset_at
    }

    pub fn mark_full_reset(&mut self, now: DateTime<Utc>) {
        self.last_full_reset_at = now;
    }

    pub fn needs_resync(&self) -> bool {
        self.needs_resync
    }

    pub fn set_needs_resync(&mut self, value: bool) {
        self.needs_resync = value;
    }

    pub fn note_cancel_requested(&mut self, id: OfferId) {
        self.cancel_requested.insert(id);
    }

    pub fn cancel_requested(&self, id: OfferId) -> bool {
        self.cancel_requested.contains(&id)
    }

    pub fn snapshot(&self, now: DateTime<Utc>) -> EngineSnapshot {
        EngineSnapshot {
            taken_at: now,
            open_offers: self.offers.values().cloned().collect(),
            committed: self.committed_funds(),
            protected_count: self.protected_count(now),
            best_ladder_rate: self.best_rate(OfferOrigin::Ladder),
            last_full_reset_at: self.last_full_reset_at,
            needs_resync: self.needs_resync,
        }
    }
}

/// Read-only view published after every engine command.
#[derive(Debug, Clone, Serialize)]
pub struct EngineSnapshot {
    pub taken_at: DateTime<Utc>,
    pub open_offers: Vec<Offer>,
    pub committed: Amount,
    pub protected_count: usize,
    pub best_ladder_rate: Option<Rate>,
    pub last_full_reset_at: DateTime<Utc>,
    pub needs_resync: bool,
}

impl EngineSnapshot {
    pub fn empty(now: DateTime<Utc>) -> Self {
        EngineState::new(now).snapshot(now)
    }

    /// Funds held by offers still protected at `now`.
    pub fn protected_committed(&self, now: DateTime<Utc>) -> Amount {
        self.open_offers
            .iter()
            .filter(|o| o.is_protected(now))
            .map(Offer::committed)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use lend_core::OfferRequest;
    use rust_decimal_macros::dec;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn offer(id: u64, rate: rust_decimal::Decimal, origin: OfferOrigin) -> Offer {
        let req = OfferRequest::new(Rate::new(rate), 2, Amount::new(dec!(200)));
        let protection = (origin == OfferOrigin::Opportunistic).then(|| Duration::minutes(5));
        Offer::placed(OfferId(id), &req, origin, t0(), protection)
    }

    #[test]
    fn test_track_rejects_duplicate_ids() {
        let mut state = EngineState::new(t0());
        assert!(state.track(offer(1, dec!(0.0003), OfferOrigin::Ladder)));
        assert!(!state.track(offer(1, dec!(0.0004), OfferOrigin::Ladder)));
        assert_eq!(state.len(), 1);
        assert_eq!(state.committed_funds(), Amount::new(dec!(200)));
    }

    #[test]
    fn test_partition_by_protection() {
        let mut state = EngineState::new(t0());
        state.track(offer(1, dec!(0.0003), OfferOrigin::Ladder));
        state.track(offer(2, dec!(0.0005), OfferOrigin::Opportunistic));

        let (protected, eligible) = state.partition(t0() + Duration::seconds(299));
        assert_eq!(protected, vec![OfferId(2)]);
        assert_eq!(eligible, vec![OfferId(1)]);

        let (protected, eligible) = state.partition(t0() + Duration::seconds(301));
        assert!(protected.is_empty());
        assert_eq!(eligible.len(), 2);
    }

    #[test]
    fn test_best_rate_by_origin() {
        let mut state = EngineState::new(t0());
        state.track(offer(1, dec!(0.0003), OfferOrigin::Ladder));
        state.track(offer(2, dec!(0.0004), OfferOrigin::Ladder));
        state.track(offer(3, dec!(0.0009), OfferOrigin::Opportunistic));
        assert_eq!(
            state.best_rate(OfferOrigin::Ladder),
            Some(Rate::new(dec!(0.0004)))
        );
    }

    #[test]
    fn test_snapshot_protected_committed() {
        let mut state = EngineState::new(t0());
        state.track(offer(1, dec!(0.0003), OfferOrigin::Ladder));
        state.track(offer(2, dec!(0.0005), OfferOrigin::Opportunistic));
        let snapshot = state.snapshot(t0());

        assert_eq!(snapshot.committed, Amount::new(dec!(400)));
        assert_eq!(
            snapshot.protected_committed(t0() + Duration::seconds(299)),
            Amount::new(dec!(200))
        );
        assert_eq!(
            snapshot.protected_committed(t0() + Duration::seconds(301)),
            Amount::ZERO
        );
    }
}
