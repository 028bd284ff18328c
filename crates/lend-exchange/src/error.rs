//! Exchange error taxonomy.
//!
//! Every failure an exchange call can produce maps to one of these, and the
//! engine decides what to do from the variant alone:
//! retry in-cycle, shrink/skip, resync or halt.

use std::time::Duration;

use lend_core::{Amount, OfferId};
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum ExchangeError {
    #[error("Transient network error: {0}")]
    TransientNetwork(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Insufficient funds: requested {requested}, available {available}")]
    InsufficientFunds { requested: Amount, available: Amount },

    #[error("Rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Offer {0} changed while being modified, resync required")]
    PartialFillReconciliation(OfferId),

    #[error("Offer rejected: {0}")]
    Rejected(String),

    #[error("Offer not found: {0}")]
    OfferNotFound(OfferId),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl ExchangeError {
    /// Worth retrying within the same cycle.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::TransientNetwork(_) | Self::RateLimited { .. } | Self::Timeout(_)
        )
    }

    /// The process cannot continue.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Authentication(_))
    }

    /// Local view of offers can no longer be trusted.
    #[must_use]
    pub fn requires_resync(&self) -> bool {
        matches!(self, Self::PartialFillReconciliation(_))
    }

    /// Metric label.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TransientNetwork(_) => "transient_network",
            Self::Authentication(_) => "authentication",
            Self::InsufficientFunds { .. } => "insufficient_funds",
            Self::RateLimited { .. } => "rate_limited",
            Self::PartialFillReconciliation(_) => "partial_fill",
            Self::Rejected(_) => "rejected",
            Self::OfferNotFound(_) => "offer_not_found",
            Self::Timeout(_) => "timeout",
            Self::InvalidResponse(_) => "invalid_response",
        }
    }
}

impl From<serde_json::Error> for ExchangeError {
    fn from(e: serde_json::Error) -> Self {
        Self::InvalidResponse(e.to_string())
    }
}

pub type ExchangeResult<T> = Result<T, ExchangeError>;
