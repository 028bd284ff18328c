//! Margin funding lending bot.
//!
//! Wires the public market-data client, the funding account, the engine
//! actor and the orchestrator loops together, and runs them until Ctrl-C or
//! a fatal error.

pub mod app;
pub mod config;
pub mod error;

pub use app::Application;
pub use config::AppConfig;
pub use error::{AppError, AppResult};
