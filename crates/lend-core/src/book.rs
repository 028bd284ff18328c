//! Funding order book snapshots.
//!
//! A snapshot is immutable: one is produced per poll and handed by value to
//! the strategy. Offers (lenders) and demand (borrowers) are stored
//! separately with positive amounts.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{Amount, Rate};

/// Single aggregated price level of the funding book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookEntry {
    pub rate: Rate,
    pub period_days: u32,
    /// Number of individual orders aggregated at this level.
    pub count: u32,
    /// Always positive; side is implied by which list the entry sits in.
    pub amount: Amount,
}

/// Inclusive tenor range used to bucket the book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TenorRange {
    pub min_days: u32,
    pub max_days: u32,
}

impl TenorRange {
    pub const fn new(min_days: u32, max_days: u32) -> Self {
        Self { min_days, max_days }
    }

    #[inline]
    pub fn contains(&self, days: u32) -> bool {
        days >= self.min_days && days <= self.max_days
    }
}

/// Buckets reported for every snapshot.
pub const DEFAULT_TENOR_BUCKETS: [TenorRange; 4] = [
    TenorRange::new(2, 2),
    TenorRange::new(3, 30),
    TenorRange::new(31, 60),
    TenorRange::new(61, 120),
];

/// Offered-side statistics for one tenor bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenorBucket {
    pub range: TenorRange,
    /// Lowest offered rate (the rate a borrower would take first).
    pub best_rate: Option<Rate>,
    /// Depth-weighted average offered rate.
    pub weighted_rate: Option<Rate>,
    pub depth: Amount,
}

/// Point-in-time view of the funding book for one currency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundingBookSnapshot {
    pub taken_at: DateTime<Utc>,
    /// Lender side, sorted by rate ascending.
    pub offers: Vec<BookEntry>,
    /// Borrower side, sorted by rate descending.
    pub demand: Vec<BookEntry>,
}

impl FundingBookSnapshot {
    /// Build a snapshot, normalizing sort order and dropping empty levels.
    #[must_use]
    pub fn new(taken_at: DateTime<Utc>, offers: Vec<BookEntry>, demand: Vec<BookEntry>) -> Self {
        let mut offers: Vec<_> = offers.into_iter().filter(|e| e.amount.is_positive()).collect();
        let mut demand: Vec<_> = demand.into_iter().filter(|e| e.amount.is_positive()).collect();
        offers.sort_by(|a, b| a.rate.cmp(&b.rate));
        demand.sort_by(|a, b| b.rate.cmp(&a.rate));
        Self {
            taken_at,
            offers,
            demand,
        }
    }

    /// Empty book (used when no market data is available).
    #[must_use]
    pub fn empty(taken_at: DateTime<Utc>) -> Self {
        Self {
            taken_at,
            offers: Vec::new(),
            demand: Vec::new(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.offers.is_empty() && self.demand.is_empty()
    }

    /// Total offered depth.
    #[must_use]
    pub fn offer_depth(&self) -> Amount {
        self.offers.iter().map(|e| e.amount).sum()
    }

    /// Depth-weighted average offered rate across all tenors.
    #[must_use]
    pub fn weighted_offer_rate(&self) -> Option<Rate> {
        weighted_rate(self.offers.iter())
    }

    /// Statistics for a single tenor range.
    #[must_use]
    pub fn bucket(&self, range: TenorRange) -> TenorBucket {
        let in_range = || self.offers.iter().filter(move |e| range.contains(e.period_days));
        TenorBucket {
            range,
            best_rate: in_range().map(|e| e.rate).min(),
            weighted_rate: weighted_rate(in_range()),
            depth: in_range().map(|e| e.amount).sum(),
        }
    }

    /// Statistics for every default bucket.
    #[must_use]
    pub fn buckets(&self) -> Vec<TenorBucket> {
        DEFAULT_TENOR_BUCKETS.iter().map(|r| self.bucket(*r)).collect()
    }

    /// Highest visible demand rate.
    #[must_use]
    pub fn best_demand_rate(&self) -> Option<Rate> {
        self.demand.first().map(|e| e.rate)
    }
}

fn weighted_rate<'a>(entries: impl Iterator<Item = &'a BookEntry>) -> Option<Rate> {
    let (notional, depth) = entries.fold((Decimal::ZERO, Decimal::ZERO), |(n, d), e| {
        (n + e.rate.inner() * e.amount.inner(), d + e.amount.inner())
    });
    if depth.is_zero() {
        None
    } else {
        Some(Rate::new(notional / depth))
    }
}
