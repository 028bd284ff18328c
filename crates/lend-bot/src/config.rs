//! Application configuration.

use crate::error::{AppError, AppResult};
use lend_core::Amount;
use lend_engine::EngineConfig;
use lend_exchange::{PaperConfig, RestConfig, RetryConfig};
use lend_strategy::StrategyConfig;
use serde::{Deserialize, Serialize};

/// Top-level configuration, one TOML table per section.
///
/// Every section and field has a default, so an empty file is a valid
/// paper-trading setup for USD.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub strategy: StrategyConfig,
    /// Public market-data endpoint.
    #[serde(default)]
    pub exchange: RestConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub paper: PaperConfig,
}

impl AppConfig {
    /// Load from a specific file.
    pub fn from_file(path: &str) -> AppResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("Failed to read config: {e}")))?;

        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> AppResult<Self> {
        toml::from_str(content)
            .map_err(|e| AppError::Config(format!("Failed to parse config: {e}")))
    }

    /// Check the whole configuration before anything connects.
    pub fn validate(&self) -> AppResult<()> {
        self.engine
            .validate()
            .map_err(|e| AppError::Config(e.to_string()))?;
        self.strategy
            .validate()
            .map_err(|e| AppError::Config(e.to_string()))?;

        if !self.paper.enabled {
            return Err(AppError::Config(
                "only the paper funding account is available; set paper.enabled = true"
                    .to_string(),
            ));
        }
        let exchange_min = Amount::new(self.paper.min_offer_amount);
        if self.strategy.min_offer_amount < exchange_min {
            return Err(AppError::Config(format!(
                "strategy.min_offer_amount ({}) is below the account minimum ({exchange_min})",
                self.strategy.min_offer_amount
            )));
        }
        if self.retry.max_attempts == 0 {
            return Err(AppError::Config(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
