//! In-memory funding account and canned market data.
//!
//! `PaperExchange` behaves like the exchange's funding wallet: offers lock
//! funds until cancelled or taken, fills move funds to "lent". Used for dry
//! runs against live public data and as the test double for the engine.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use lend_core::{
    Amount, ExchangeOffer, FundingBookSnapshot, OfferId, OfferRequest, RateHistory, TenorRange,
    MAX_TENOR_DAYS, MIN_TENOR_DAYS,
};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{ExchangeError, ExchangeResult};
use crate::exchange::{BoxFuture, FundingAccount, MarketData, WalletBalance};

/// Paper account settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperConfig {
    /// Use the paper account instead of a live one.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default = "default_initial_balance")]
    pub initial_balance: Decimal,

    /// Exchange-side minimum offer size.
    #[serde(default = "default_min_offer_amount")]
    pub min_offer_amount: Decimal,
}

fn default_enabled() -> bool {
    true
}

fn default_initial_balance() -> Decimal {
    Decimal::from(10_000)
}

fn default_min_offer_amount() -> Decimal {
    Decimal::from(150)
}

impl Default for PaperConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            initial_balance: default_initial_balance(),
            min_offer_amount: default_min_offer_amount(),
        }
    }
}

#[derive(Debug)]
struct PaperState {
    total: Amount,
    lent: Amount,
    offers: BTreeMap<OfferId, ExchangeOffer>,
    next_id: u64,
    submit_failures: VecDeque<ExchangeError>,
    cancel_failures: VecDeque<ExchangeError>,
    read_failures: VecDeque<ExchangeError>,
    submitted: Vec<OfferRequest>,
    cancelled: Vec<OfferId>,
}

impl PaperState {
    fn resting(&self) -> Amount {
        self.offers.values().map(|o| o.amount).sum()
    }

    fn available(&self) -> Amount {
        self.total
            .saturating_sub(self.lent)
            .saturating_sub(self.resting())
    }
}

/// Simulated funding account.
pub struct PaperExchange {
    currency: String,
    min_offer_amount: Amount,
    state: Mutex<PaperState>,
}

impl PaperExchange {
    pub fn new(currency: impl Into<String>, config: &PaperConfig) -> Self {
        Self {
            currency: currency.into(),
            min_offer_amount: Amount::new(config.min_offer_amount),
            state: Mutex::new(PaperState {
                total: Amount::new(config.initial_balance),
                lent: Amount::ZERO,
                offers: BTreeMap::new(),
                next_id: 1,
                submit_failures: VecDeque::new(),
                cancel_failures: VecDeque::new(),
                read_failures: VecDeque::new(),
                submitted: Vec::new(),
                cancelled: Vec::new(),
            }),
        }
    }

    /// Account with `balance` and the default minimum offer size.
    pub fn with_balance(currency: impl Into<String>, balance: Decimal) -> Self {
        Self::new(
            currency,
            &PaperConfig {
                initial_balance: balance,
                ..Default::default()
            },
        )
    }

    /// Let a borrower take `amount` from offer `id`.
    ///
    /// Returns the amount actually taken.
    pub fn fill_offer(&self, id: OfferId, amount: Amount) -> ExchangeResult<Amount> {
        let mut state = self.state.lock();
        let offer = state
            .offers
            .get_mut(&id)
            .ok_or(ExchangeError::OfferNotFound(id))?;

        let taken = amount.min(offer.amount);
        offer.amount -= taken;
        if offer.amount.is_zero() {
            state.offers.remove(&id);
        }
        state.lent += taken;
        debug!(offer_id = %id, taken = %taken, "Paper fill");
        Ok(taken)
    }

    /// Fill every resting offer priced at or below the best demand rate,
    /// walking demand best-first until it is exhausted.
    pub fn match_demand(&self, book: &FundingBookSnapshot) -> Vec<(OfferId, Amount)> {
        let mut fills = Vec::new();
        let mut state = self.state.lock();

        let mut candidates: Vec<ExchangeOffer> = state.offers.values().cloned().collect();
        candidates.sort_by(|a, b| a.rate.cmp(&b.rate));

        for bid in &book.demand {
            let mut wanted = bid.amount;
            for offer in candidates.iter_mut() {
                if wanted.is_zero() {
                    break;
                }
                if offer.amount.is_zero()
                    || offer.rate > bid.rate
                    || offer.tenor_days > bid.period_days
                {
                    continue;
                }
                let taken = wanted.min(offer.amount);
                offer.amount -= taken;
                wanted -= taken;
                fills.push((offer.id, taken));
            }
        }

        for (id, taken) in &fills {
            if let Some(offer) = state.offers.get_mut(id) {
                offer.amount -= *taken;
                if offer.amount.is_zero() {
                    state.offers.remove(id);
                }
            }
            state.lent += *taken;
        }

        if !fills.is_empty() {
            info!(fills = fills.len(), "Paper offers matched against demand");
        }
        fills
    }

    /// Borrowers repay: lent funds return to the wallet.
    pub fn repay(&self, amount: Amount) {
        let mut state = self.state.lock();
        state.lent = state.lent.saturating_sub(amount);
    }

    /// Change the wallet total, e.g. a deposit.
    pub fn set_total(&self, total: Amount) {
        self.state.lock().total = total;
    }

    /// Fail the next `submit_offer` with `error`.
    pub fn fail_next_submit(&self, error: ExchangeError) {
        self.state.lock().submit_failures.push_back(error);
    }

    /// Fail the next `cancel_offer` with `error`.
    pub fn fail_next_cancel(&self, error: ExchangeError) {
        self.state.lock().cancel_failures.push_back(error);
    }

    /// Fail the next account read with `error`.
    pub fn fail_next_read(&self, error: ExchangeError) {
        self.state.lock().read_failures.push_back(error);
    }

    pub fn open_offers(&self) -> Vec<ExchangeOffer> {
        self.state.lock().offers.values().cloned().collect()
    }

    /// Every request accepted by `submit_offer`, in order.
    pub fn submitted(&self) -> Vec<OfferRequest> {
        self.state.lock().submitted.clone()
    }

    /// Every id successfully cancelled, in order.
    pub fn cancelled(&self) -> Vec<OfferId> {
        self.state.lock().cancelled.clone()
    }

    pub fn lent(&self) -> Amount {
        self.state.lock().lent
    }

    pub fn available(&self) -> Amount {
        self.state.lock().available()
    }

    fn validate(&self, request: &OfferRequest) -> ExchangeResult<()> {
        if !request.rate.is_positive() {
            return Err(ExchangeError::Rejected(format!(
                "rate must be positive, got {}",
                request.rate
            )));
        }
        if !(MIN_TENOR_DAYS..=MAX_TENOR_DAYS).contains(&request.tenor_days) {
            return Err(ExchangeError::Rejected(format!(
                "period must be within {MIN_TENOR_DAYS}..={MAX_TENOR_DAYS} days, got {}",
                request.tenor_days
            )));
        }
        if request.amount < self.min_offer_amount {
            return Err(ExchangeError::Rejected(format!(
                "amount {} below minimum {}",
                request.amount, self.min_offer_amount
            )));
        }
        Ok(())
    }

    fn submit(&self, request: OfferRequest) -> ExchangeResult<OfferId> {
        let mut state = self.state.lock();
        if let Some(err) = state.submit_failures.pop_front() {
            return Err(err);
        }
        self.validate(&request)?;

        let available = state.available();
        if request.amount > available {
            return Err(ExchangeError::InsufficientFunds {
                requested: request.amount,
                available,
            });
        }

        let id = OfferId(state.next_id);
        state.next_id += 1;
        state.offers.insert(
            id,
            ExchangeOffer {
                id,
                rate: request.rate,
                tenor_days: request.tenor_days,
                amount: request.amount,
                original_amount: request.amount,
                created_at: Utc::now(),
            },
        );
        state.submitted.push(request);
        debug!(offer_id = %id, rate = %request.rate, amount = %request.amount, "Paper offer placed");
        Ok(id)
    }

    fn cancel(&self, id: OfferId) -> ExchangeResult<()> {
        let mut state = self.state.lock();
        if let Some(err) = state.cancel_failures.pop_front() {
            return Err(err);
        }
        state
            .offers
            .remove(&id)
            .ok_or(ExchangeError::OfferNotFound(id))?;
        state.cancelled.push(id);
        Ok(())
    }

    fn take_read_failure(&self) -> ExchangeResult<()> {
        match self.state.lock().read_failures.pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl FundingAccount for PaperExchange {
    fn get_open_offers(&self) -> BoxFuture<'_, ExchangeResult<Vec<ExchangeOffer>>> {
        Box::pin(async move {
            self.take_read_failure()?;
            Ok(self.open_offers())
        })
    }

    fn get_wallet_balance<'a>(
        &'a self,
        currency: &'a str,
    ) -> BoxFuture<'a, ExchangeResult<WalletBalance>> {
        Box::pin(async move {
            self.take_read_failure()?;
            if !currency.eq_ignore_ascii_case(&self.currency) {
                return Err(ExchangeError::Rejected(format!(
                    "no {currency} wallet in paper account ({})",
                    self.currency
                )));
            }
            let state = self.state.lock();
            Ok(WalletBalance {
                currency: self.currency.clone(),
                total: state.total,
                available: state.available(),
            })
        })
    }

    fn submit_offer(&self, request: OfferRequest) -> BoxFuture<'_, ExchangeResult<OfferId>> {
        Box::pin(async move { self.submit(request) })
    }

    fn cancel_offer(&self, id: OfferId) -> BoxFuture<'_, ExchangeResult<()>> {
        Box::pin(async move { self.cancel(id) })
    }
}

/// Market data served from memory. Replace the book or history at any time.
pub struct StaticMarketData {
    book: Mutex<FundingBookSnapshot>,
    history: Mutex<RateHistory>,
    failures: Mutex<VecDeque<ExchangeError>>,
}

impl StaticMarketData {
    pub fn new(book: FundingBookSnapshot, history: RateHistory) -> Self {
        Self {
            book: Mutex::new(book),
            history: Mutex::new(history),
            failures: Mutex::new(VecDeque::new()),
        }
    }

    pub fn set_book(&self, book: FundingBookSnapshot) {
        *self.book.lock() = book;
    }

    pub fn set_history(&self, history: RateHistory) {
        *self.history.lock() = history;
    }

    /// Fail the next market data call with `error`.
    pub fn fail_next(&self, error: ExchangeError) {
        self.failures.lock().push_back(error);
    }

    fn take_failure(&self) -> ExchangeResult<()> {
        match self.failures.lock().pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl MarketData for StaticMarketData {
    fn get_funding_book(
        &self,
        tenor_range: TenorRange,
    ) -> BoxFuture<'_, ExchangeResult<FundingBookSnapshot>> {
        Box::pin(async move {
            self.take_failure()?;
            let book = self.book.lock().clone();
            let keep = |e: &lend_core::BookEntry| tenor_range.contains(e.period_days);
            Ok(FundingBookSnapshot::new(
                book.taken_at,
                book.offers.into_iter().filter(keep).collect(),
                book.demand.into_iter().filter(keep).collect(),
            ))
        })
    }

    fn get_rate_history(&self, _window: Duration) -> BoxFuture<'_, ExchangeResult<RateHistory>> {
        Box::pin(async move {
            self.take_failure()?;
            Ok(self.history.lock().clone())
        })
    }
}

/// Joins a market data source and an account into one exchange.
pub struct SplitExchange {
    market: Arc<dyn MarketData>,
    account: Arc<dyn FundingAccount>,
}

impl SplitExchange {
    pub fn new(market: Arc<dyn MarketData>, account: Arc<dyn FundingAccount>) -> Self {
        Self { market, account }
    }
}

impl MarketData for SplitExchange {
    fn get_funding_book(
        &self,
        tenor_range: TenorRange,
    ) -> BoxFuture<'_, ExchangeResult<FundingBookSnapshot>> {
        self.market.get_funding_book(tenor_range)
    }

    fn get_rate_history(&self, window: Duration) -> BoxFuture<'_, ExchangeResult<RateHistory>> {
        self.market.get_rate_history(window)
    }
}

impl FundingAccount for SplitExchange {
    fn get_open_offers(&self) -> BoxFuture<'_, ExchangeResult<Vec<ExchangeOffer>>> {
        self.account.get_open_offers()
    }

    fn get_wallet_balance<'a>(
        &'a self,
        currency: &'a str,
    ) -> BoxFuture<'a, ExchangeResult<WalletBalance>> {
        self.account.get_wallet_balance(currency)
    }

    fn submit_offer(&self, request: OfferRequest) -> BoxFuture<'_, ExchangeResult<OfferId>> {
        self.account.submit_offer(request)
    }

    fn cancel_offer(&self, id: OfferId) -> BoxFuture<'_, ExchangeResult<()>> {
        self.account.cancel_offer(id)
    }
}
