//! Application error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Engine error: {0}")]
    Engine(#[from] lend_engine::EngineError),

    #[error("Exchange error: {0}")]
    Exchange(#[from] lend_exchange::ExchangeError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] lend_telemetry::TelemetryError),

    #[error("Task failed: {0}")]
    Task(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type AppResult<T> = Result<T, AppError>;
