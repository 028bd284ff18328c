//! Lending offer types and lifecycle state.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{Amount, Rate};

/// Exchange-assigned offer identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OfferId(pub u64);

impl fmt::Display for OfferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// State of an offer in its lifecycle.
///
/// `Pending → {Open, Rejected}`, then `Open → {PartiallyFilled, Filled, Cancelled}`.
///
/// Submission is acknowledged synchronously: the exchange hands back an id
/// only for an accepted offer. `Pending` covers the submit call itself and
/// `Rejected` a refused submit, which surfaces as an error and is never
/// tracked. Tracked offers therefore start at `Open`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OfferStatus {
    /// Submitted, not yet acknowledged.
    #[default]
    Pending,
    /// Resting on the book.
    Open,
    /// Some of the amount was taken by a borrower.
    PartiallyFilled,
    /// Fully taken.
    Filled,
    Cancelled,
    Rejected,
}

impl OfferStatus {
    /// Returns true if the offer is in a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Filled | Self::Cancelled | Self::Rejected)
    }

    /// Returns true if the offer still holds committed funds.
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::Open | Self::PartiallyFilled)
    }

    /// Whether `next` is a legal successor of `self`.
    #[must_use]
    pub fn can_transition_to(&self, next: OfferStatus) -> bool {
        use OfferStatus::*;
        match (self, next) {
            (Pending, Open | Filled | PartiallyFilled | Cancelled | Rejected) => true,
            (Open, PartiallyFilled | Filled | Cancelled) => true,
            (PartiallyFilled, PartiallyFilled | Filled | Cancelled) => true,
            _ => false,
        }
    }
}

impl fmt::Display for OfferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Open => "open",
            Self::PartiallyFilled => "partially_filled",
            Self::Filled => "filled",
            Self::Cancelled => "cancelled",
            Self::Rejected => "rejected",
        };
        write!(f, "{s}")
    }
}

/// Which loop produced an offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OfferOrigin {
    /// Tier of the periodic ladder.
    Ladder,
    /// Fast-loop placement against visible demand.
    Opportunistic,
    /// Found resting on the exchange at startup or during a resync.
    External,
}

impl OfferOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ladder => "ladder",
            Self::Opportunistic => "opportunistic",
            Self::External => "external",
        }
    }
}

impl fmt::Display for OfferOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request to place a new offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferRequest {
    pub rate: Rate,
    pub tenor_days: u32,
    pub amount: Amount,
}

impl OfferRequest {
    #[must_use]
    pub fn new(rate: Rate, tenor_days: u32, amount: Amount) -> Self {
        Self {
            rate,
            tenor_days,
            amount,
        }
    }
}

/// Offer as reported by the exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeOffer {
    pub id: OfferId,
    pub rate: Rate,
    pub tenor_days: u32,
    /// Amount still resting (unfilled).
    pub amount: Amount,
    /// Amount at placement.
    pub original_amount: Amount,
    pub created_at: DateTime<Utc>,
}

/// Offer tracked by the lifecycle manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Offer {
    pub id: OfferId,
    pub rate: Rate,
    pub tenor_days: u32,
    /// Amount at placement.
    pub amount: Amount,
    /// Amount taken by borrowers so far.
    pub filled_amount: Amount,
    pub status: OfferStatus,
    pub origin: OfferOrigin,
    pub placed_at: DateTime<Utc>,
    /// Set only for opportunistic offers.
    pub protected_until: Option<DateTime<Utc>>,
}

impl Offer {
    /// Track a freshly acknowledged placement. Starts at `Open`.
    #[must_use]
    pub fn placed(
        id: OfferId,
        request: &OfferRequest,
        origin: OfferOrigin,
        placed_at: DateTime<Utc>,
        protection: Option<Duration>,
    ) -> Self {
        Self {
            id,
            rate: request.rate,
            tenor_days: request.tenor_days,
            amount: request.amount,
            filled_amount: Amount::ZERO,
            status: OfferStatus::Open,
            origin,
            placed_at,
            protected_until: protection.map(|window| placed_at + window),
        }
    }

    /// Track an offer discovered on the exchange that this process did not place.
    #[must_use]
    pub fn from_exchange(offer: &ExchangeOffer) -> Self {
        let filled = offer.original_amount.saturating_sub(offer.amount);
        let status = if filled.is_positive() {
            OfferStatus::PartiallyFilled
        } else {
            OfferStatus::Open
        };
        Self {
            id: offer.id,
            rate: offer.rate,
            tenor_days: offer.tenor_days,
            amount: offer.original_amount.max(offer.amount),
            filled_amount: filled,
            status,
            origin: OfferOrigin::External,
            placed_at: offer.created_at,
            protected_until: None,
        }
    }

    /// Unfilled amount still resting on the book.
    #[must_use]
    pub fn remaining(&self) -> Amount {
        self.amount.saturating_sub(self.filled_amount)
    }

    /// Funds this offer currently holds. Zero once terminal.
    #[must_use]
    pub fn committed(&self) -> Amount {
        if self.status.is_active() {
            self.remaining()
        } else {
            Amount::ZERO
        }
    }

    /// Whether the protection window is still running at `now`.
    #[must_use]
    pub fn is_protected(&self, now: DateTime<Utc>) -> bool {
        self.protected_until.is_some_and(|until| now < until)
    }
}
