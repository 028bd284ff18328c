//! Exchange interfaces consumed by the engine.
//!
//! Split in two so market data can come from the public API while the
//! account side is either the real authenticated client or the in-memory
//! paper account.

use std::pin::Pin;
use std::time::Duration;

use lend_core::{
    Amount, ExchangeOffer, FundingBookSnapshot, OfferId, OfferRequest, RateHistory, TenorRange,
};
use serde::{Deserialize, Serialize};

use crate::error::ExchangeResult;

/// Boxed future for dyn-compatible async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

/// Funding wallet balance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletBalance {
    pub currency: String,
    /// Everything in the wallet, including funds lent out.
    pub total: Amount,
    /// Funds neither lent out nor resting in offers.
    pub available: Amount,
}

/// Public market data.
pub trait MarketData: Send + Sync {
    /// Funding book restricted to `tenor_range`.
    fn get_funding_book(
        &self,
        tenor_range: TenorRange,
    ) -> BoxFuture<'_, ExchangeResult<FundingBookSnapshot>>;

    /// Hourly candles and utilization over the trailing `window`.
    fn get_rate_history(&self, window: Duration) -> BoxFuture<'_, ExchangeResult<RateHistory>>;
}

/// Authenticated funding account.
pub trait FundingAccount: Send + Sync {
    /// Offers currently resting on the book.
    fn get_open_offers(&self) -> BoxFuture<'_, ExchangeResult<Vec<ExchangeOffer>>>;

    fn get_wallet_balance<'a>(
        &'a self,
        currency: &'a str,
    ) -> BoxFuture<'a, ExchangeResult<WalletBalance>>;

    /// Place an offer; resolves to the exchange-assigned id once acknowledged.
    fn submit_offer(&self, request: OfferRequest) -> BoxFuture<'_, ExchangeResult<OfferId>>;

    fn cancel_offer(&self, id: OfferId) -> BoxFuture<'_, ExchangeResult<()>>;
}

/// Everything the engine needs from an exchange.
pub trait FundingExchange: MarketData + FundingAccount {}

impl<T: MarketData + FundingAccount> FundingExchange for T {}
