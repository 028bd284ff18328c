//! Per-call timeouts and bounded in-cycle retry.
//!
//! Reads are retried with exponential backoff (`base × 2^(attempt-1)`, capped)
//! and honor a server `retry_after` hint. Mutating calls get the timeout
//! only: a timed-out submit may still have landed, and the next resync is
//! the place to find out.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use lend_core::{ExchangeOffer, FundingBookSnapshot, OfferId, OfferRequest, RateHistory, TenorRange};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ExchangeError, ExchangeResult};
use crate::exchange::{BoxFuture, FundingAccount, FundingExchange, MarketData, WalletBalance};

/// Retry and timeout settings for exchange calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Attempts per read call, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Upper bound on a single exchange call.
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    5_000
}

fn default_call_timeout_ms() -> u64 {
    10_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            call_timeout_ms: default_call_timeout_ms(),
        }
    }
}

/// Applies [`RetryConfig`] to futures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.config.call_timeout_ms)
    }

    /// Backoff before retry number `attempt` (1-based).
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(10);
        let delay = self
            .config
            .base_delay_ms
            .saturating_mul(1u64 << exponent)
            .min(self.config.max_delay_ms);
        Duration::from_millis(delay)
    }

    /// Run `fut` under the call timeout.
    pub async fn with_timeout<T, F>(&self, fut: F) -> ExchangeResult<T>
    where
        F: Future<Output = ExchangeResult<T>>,
    {
        let timeout = self.call_timeout();
        match tokio::time::timeout(timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(ExchangeError::Timeout(timeout)),
        }
    }

    /// Run `op` with timeout and bounded retry on retryable errors.
    pub async fn run<T, F, Fut>(&self, op: &'static str, mut f: F) -> ExchangeResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ExchangeResult<T>>,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.with_timeout(f()).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let backoff = self.backoff_delay(attempt);
                    let delay = match &e {
                        ExchangeError::RateLimited {
                            retry_after: Some(hint),
                        } => (*hint).max(backoff),
                        _ => backoff,
                    };
                    warn!(
                        op,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Exchange call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

/// Wraps an exchange with [`RetryPolicy`].
pub struct GuardedExchange {
    inner: Arc<dyn FundingExchange>,
    policy: RetryPolicy,
}

impl GuardedExchange {
    pub fn new(inner: Arc<dyn FundingExchange>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

impl MarketData for GuardedExchange {
    fn get_funding_book(
        &self,
        tenor_range: TenorRange,
    ) -> BoxFuture<'_, ExchangeResult<FundingBookSnapshot>> {
        Box::pin(
            self.policy
                .run("get_funding_book", move || self.inner.get_funding_book(tenor_range)),
        )
    }

    fn get_rate_history(&self, window: Duration) -> BoxFuture<'_, ExchangeResult<RateHistory>> {
        Box::pin(
            self.policy
                .run("get_rate_history", move || self.inner.get_rate_history(window)),
        )
    }
}

impl FundingAccount for GuardedExchange {
    fn get_open_offers(&self) -> BoxFuture<'_, ExchangeResult<Vec<ExchangeOffer>>> {
        Box::pin(
            self.policy
                .run("get_open_offers", move || self.inner.get_open_offers()),
        )
    }

    fn get_wallet_balance<'a>(
        &'a self,
        currency: &'a str,
    ) -> BoxFuture<'a, ExchangeResult<WalletBalance>> {
        Box::pin(
            self.policy
                .run("get_wallet_balance", move || self.inner.get_wallet_balance(currency)),
        )
    }

    fn submit_offer(&self, request: OfferRequest) -> BoxFuture<'_, ExchangeResult<OfferId>> {
        Box::pin(self.policy.with_timeout(self.inner.submit_offer(request)))
    }

    fn cancel_offer(&self, id: OfferId) -> BoxFuture<'_, ExchangeResult<()>> {
        Box::pin(self.policy.with_timeout(self.inner.cancel_offer(id)))
    }
}
