//! Exchange access for the funding bot.
//!
//! - `MarketData` / `FundingAccount`: the two halves the engine talks to
//! - `PublicRestClient`: Bitfinex public funding book, candles and stats
//! - `PaperExchange`: in-memory funding wallet for dry runs and tests
//! - `GuardedExchange`: per-call timeouts and bounded retry of reads

pub mod error;
pub mod exchange;
pub mod paper;
pub mod rest;
pub mod retry;

pub use error::{ExchangeError, ExchangeResult};
pub use exchange::{BoxFuture, FundingAccount, FundingExchange, MarketData, WalletBalance};
pub use paper::{PaperConfig, PaperExchange, SplitExchange, StaticMarketData};
pub use rest::{PublicRestClient, RestConfig};
pub use retry::{GuardedExchange, RetryConfig, RetryPolicy};
