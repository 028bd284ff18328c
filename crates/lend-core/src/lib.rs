//! Core domain types for the funding lending bot.
//!
//! This crate provides the types shared by strategy, exchange and engine:
//! - `Rate`, `Amount`: precision-safe numeric types
//! - `Offer`, `OfferStatus`: lending offers and their lifecycle
//! - `FundingBookSnapshot`: point-in-time funding book
//! - `TenorSchedule`: validated rate → max-tenor schedule
//! - `RateHistory`: candles and utilization samples

pub mod book;
pub mod decimal;
pub mod error;
pub mod history;
pub mod offer;
pub mod schedule;

pub use book::{BookEntry, FundingBookSnapshot, TenorBucket, TenorRange, DEFAULT_TENOR_BUCKETS};
pub use decimal::{Amount, Rate};
pub use error::{CoreError, CoreResult};
pub use history::{RateCandle, RateHistory, UtilizationSample};
pub use offer::{ExchangeOffer, Offer, OfferId, OfferOrigin, OfferRequest, OfferStatus};
pub use schedule::{ScheduleEntry, TenorSchedule, MAX_TENOR_DAYS, MIN_TENOR_DAYS};
