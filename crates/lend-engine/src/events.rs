//! Outbound notification events.
//!
//! The engine only appends to a bounded queue and never waits on delivery.
//! A separate task drains the queue into one or more [`NotificationSink`]s.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use lend_core::{Amount, Offer, OfferId, OfferOrigin, Rate};
use lend_strategy::DroppedTier;
use lend_telemetry::Metrics;
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Why the engine cancelled an offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    Rebalance,
    Reset,
    Startup,
}

impl CancelReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rebalance => "rebalance",
            Self::Reset => "reset",
            Self::Startup => "startup",
        }
    }
}

/// Periodic status report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineSummary {
    pub at: DateTime<Utc>,
    pub currency: String,
    pub open_offers: usize,
    pub protected_offers: usize,
    pub committed: Amount,
    pub idle: Option<Amount>,
    pub best_ladder_rate: Option<Rate>,
    pub sentiment: Option<Decimal>,
    pub safety_factor: Option<Decimal>,
    pub last_full_reset_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    Startup {
        currency: String,
        adopted: usize,
        cancelled: usize,
    },
    OfferPlaced {
        offer: Offer,
    },
    OfferCancelled {
        id: OfferId,
        origin: OfferOrigin,
        reason: CancelReason,
    },
    OfferFilled {
        id: OfferId,
        origin: OfferOrigin,
        rate: Rate,
        tenor_days: u32,
        amount: Amount,
    },
    OfferPartiallyFilled {
        id: OfferId,
        origin: OfferOrigin,
        filled: Amount,
        remaining: Amount,
    },
    PlacementFailed {
        origin: OfferOrigin,
        rate: Rate,
        tenor_days: u32,
        amount: Amount,
        error: String,
    },
    TiersDropped {
        dropped: Vec<DroppedTier>,
    },
    FullReset {
        cancelled: usize,
    },
    Summary(EngineSummary),
    Halted {
        reason: String,
    },
}

impl EngineEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Startup { .. } => "startup",
            Self::OfferPlaced { .. } => "offer_placed",
            Self::OfferCancelled { .. } => "offer_cancelled",
            Self::OfferFilled { .. } => "offer_filled",
            Self::OfferPartiallyFilled { .. } => "offer_partially_filled",
            Self::PlacementFailed { .. } => "placement_failed",
            Self::TiersDropped { .. } => "tiers_dropped",
            Self::FullReset { .. } => "full_reset",
            Self::Summary(_) => "summary",
            Self::Halted { .. } => "halted",
        }
    }

    /// Position changes as opposed to reports.
    pub fn is_position_change(&self) -> bool {
        matches!(
            self,
            Self::OfferPlaced { .. }
                | Self::OfferCancelled { .. }
                | Self::OfferFilled { .. }
                | Self::OfferPartiallyFilled { .. }
        )
    }
}

/// Producer side of the event queue. Cheap to clone.
#[derive(Debug, Clone)]
pub struct EventQueue {
    tx: mpsc::Sender<EngineEvent>,
}

impl EventQueue {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<EngineEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Append `event`; drops it when the queue is full.
    pub fn push(&self, event: EngineEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                Metrics::event_dropped();
                warn!(kind = event.kind(), "Event queue full, dropping event");
            }
            Err(mpsc::error::TrySendError::Closed(event)) => {
                debug!(kind = event.kind(), "Event queue closed");
            }
        }
    }
}

/// Delivery target for engine events.
#[cfg_attr(test, mockall::automock)]
pub trait NotificationSink: Send + Sync {
    fn notify(&self, event: &EngineEvent);
}

/// Writes events to the log.
#[derive(Debug, Default)]
pub struct LogSink;

impl NotificationSink for LogSink {
    fn notify(&self, event: &EngineEvent) {
        match event {
            EngineEvent::Startup {
                currency,
                adopted,
                cancelled,
            } => info!(%currency, adopted, cancelled, "Lending engine started"),
            EngineEvent::OfferPlaced { offer } => info!(
                offer_id = %offer.id,
                origin = %offer.origin,
                rate = %offer.rate,
                annual_pct = %offer.rate.annual_pct().round_dp(2),
                tenor_days = offer.tenor_days,
                amount = %offer.amount,
                "Offer placed"
            ),
            EngineEvent::OfferCancelled { id, origin, reason } => info!(
                offer_id = %id,
                %origin,
                reason = reason.as_str(),
                "Offer cancelled"
            ),
            EngineEvent::OfferFilled {
                id,
                origin,
                rate,
                tenor_days,
                amount,
            } => info!(
                offer_id = %id,
                %origin,
                rate = %rate,
                tenor_days,
                amount = %amount,
                "Offer filled"
            ),
            EngineEvent::OfferPartiallyFilled {
                id,
                origin,
                filled,
                remaining,
            } => info!(
                offer_id = %id,
                %origin,
                filled = %filled,
                remaining = %remaining,
                "Offer partially filled"
            ),
            EngineEvent::PlacementFailed {
                origin,
                rate,
                tenor_days,
                amount,
                error,
            } => warn!(
                %origin,
                rate = %rate,
                tenor_days,
                amount = %amount,
                %error,
                "Offer placement failed"
            ),
            EngineEvent::TiersDropped { dropped } => {
                info!(count = dropped.len(), "Ladder tiers dropped")
            }
            EngineEvent::FullReset { cancelled } => info!(cancelled, "Full reset"),
            EngineEvent::Summary(s) => info!(
                currency = %s.currency,
                open_offers = s.open_offers,
                protected = s.protected_offers,
                committed = %s.committed,
                idle = ?s.idle.map(|a| a.to_string()),
                best_ladder_rate = ?s.best_ladder_rate.map(|r| r.to_string()),
                sentiment = ?s.sentiment.map(|d| d.to_string()),
                safety_factor = ?s.safety_factor.map(|d| d.to_string()),
                "Status summary"
            ),
            EngineEvent::Halted { reason } => warn!(%reason, "Engine halted"),
        }
    }
}

/// Drain `rx` into every sink until all producers are gone.
pub fn spawn_notifier(
    mut rx: mpsc::Receiver<EngineEvent>,
    sinks: Vec<Arc<dyn NotificationSink>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            for sink in &sinks {
                sink.notify(&event);
            }
        }
        debug!("Notifier stopped");
    })
}
