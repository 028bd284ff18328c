//! Order lifecycle engine for the funding bot.
//!
//! - `OrderLifecycleManager`: single writer of offer state (protection,
//!   reconciliation, full reset, resync)
//! - `EngineActor` / `EngineHandle`: serializes all mutations through one task
//! - `Orchestrator`: slow, fast, resync and summary loops
//! - `EventQueue`: fire-and-forget notifications drained by a notifier task

pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod lifecycle;
pub mod orchestrator;
pub mod state;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::EngineConfig;
pub use engine::{engine_channel, EngineActor, EngineCommand, EngineHandle, RebalanceOutcome};
pub use error::{EngineError, EngineResult};
pub use events::{
    spawn_notifier, CancelReason, EngineEvent, EngineSummary, EventQueue, LogSink,
    NotificationSink,
};
pub use lifecycle::{
    LifecycleConfig, OrderLifecycleManager, ReconcileReport, ResyncReport, StartupReport,
    TierFailure,
};
pub use orchestrator::{Orchestrator, SlowCycle, StrategySignal};
pub use state::{EngineSnapshot, EngineState};

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

/// Lossy conversion for gauges.
pub(crate) fn as_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or(0.0)
}
