//! Engine error types.

use lend_core::Amount;
use lend_exchange::ExchangeError;
use lend_strategy::StrategyError;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error(transparent)]
    Exchange(#[from] ExchangeError),

    #[error("Strategy error: {0}")]
    Strategy(String),

    /// Checked locally before any exchange call.
    #[error("Insufficient idle funds: requested {requested}, idle {idle}")]
    InsufficientFunds { requested: Amount, idle: Amount },

    #[error("Tenor of {tenor_days} days not admissible at rate {rate}")]
    InadmissibleTenor { rate: String, tenor_days: u32 },

    /// The engine did not pick the command up in time.
    #[error("Engine busy, command skipped")]
    Busy,

    #[error("Engine stopped")]
    Stopped,

    #[error("Engine halted: {0}")]
    Halted(String),

    #[error("Invalid engine config: {0}")]
    InvalidConfig(String),
}

impl EngineError {
    /// The process cannot continue.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Exchange(e) => e.is_fatal(),
            Self::Halted(_) => true,
            _ => false,
        }
    }
}

impl From<StrategyError> for EngineError {
    fn from(e: StrategyError) -> Self {
        Self::Strategy(e.to_string())
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
