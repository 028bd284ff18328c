//! Prometheus metrics and structured logging for the lending bot.
//!
//! - Structured logging with tracing (JSON in production)
//! - Prometheus metrics for offer flow, loop cycles and fund allocation
//! - Periodic stats summary read back from the metrics

pub mod error;
pub mod logging;
pub mod metrics;
pub mod summary;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::init_logging;
pub use metrics::Metrics;
pub use summary::{LoopStats, OriginStats, StatsReporter, StatsSnapshot};
