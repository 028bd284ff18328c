//! Bitfinex public REST market data.
//!
//! Endpoints (no authentication):
//! - `GET /v2/book/f{CUR}/P0?len=100` → `[[RATE, PERIOD, COUNT, AMOUNT], ...]`
//!   where positive AMOUNT is a lender offer and negative AMOUNT is demand
//! - `GET /v2/candles/trade:1h:f{CUR}:a30:p2:p30/hist?limit=N`
//!   → `[[MTS, OPEN, CLOSE, HIGH, LOW, VOLUME], ...]`
//! - `GET /v2/funding/stats/f{CUR}/hist?limit=N` → rows with MTS at index 0
//!   and FUNDING_AMOUNT_USED at index 8

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use lend_core::{
    Amount, BookEntry, FundingBookSnapshot, Rate, RateCandle, RateHistory, TenorRange,
    UtilizationSample,
};
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{ExchangeError, ExchangeResult};
use crate::exchange::{BoxFuture, MarketData};

const BOOK_DEPTH: u32 = 100;
const MAX_HISTORY_ROWS: u64 = 10_000;
const FUNDING_AMOUNT_USED_IDX: usize = 8;

/// Public REST endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_base_url() -> String {
    "https://api-pub.bitfinex.com".to_string()
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

impl Default for RestConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

/// Market data client for one funding currency.
pub struct PublicRestClient {
    client: Client,
    base_url: String,
    currency: String,
}

impl PublicRestClient {
    /// `currency` is the bare symbol, e.g. `USD` (queried as `fUSD`).
    pub fn new(config: &RestConfig, currency: impl Into<String>) -> ExchangeResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| {
                ExchangeError::TransientNetwork(format!("Failed to create HTTP client: {e}"))
            })?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            currency: currency.into().to_uppercase(),
        })
    }

    fn symbol(&self) -> String {
        format!("f{}", self.currency)
    }

    async fn get_json(&self, url: &str) -> ExchangeResult<Value> {
        debug!(url, "GET");
        let response = self.client.get(url).send().await.map_err(map_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);
            let body = response.text().await.unwrap_or_default();
            return Err(map_status(status, retry_after, body));
        }

        response
            .json()
            .await
            .map_err(|e| ExchangeError::InvalidResponse(format!("Failed to parse response: {e}")))
    }

    async fn fetch_book(&self, tenor_range: TenorRange) -> ExchangeResult<FundingBookSnapshot> {
        let url = format!(
            "{}/v2/book/{}/P0?len={BOOK_DEPTH}",
            self.base_url,
            self.symbol()
        );
        let body = self.get_json(&url).await?;
        parse_book(&body, Utc::now(), tenor_range)
    }

    async fn fetch_history(&self, window: Duration) -> ExchangeResult<RateHistory> {
        let limit = (window.as_secs() / 3600).clamp(1, MAX_HISTORY_ROWS);

        let candles_url = format!(
            "{}/v2/candles/trade:1h:{}:a30:p2:p30/hist?limit={limit}",
            self.base_url,
            self.symbol()
        );
        let stats_url = format!(
            "{}/v2/funding/stats/{}/hist?limit={limit}",
            self.base_url,
            self.symbol()
        );

        let (candles, stats) =
            tokio::try_join!(self.get_json(&candles_url), self.get_json(&stats_url))?;

        Ok(RateHistory::new(
            parse_candles(&candles)?,
            parse_utilization(&stats)?,
        ))
    }
}

impl MarketData for PublicRestClient {
    fn get_funding_book(
        &self,
        tenor_range: TenorRange,
    ) -> BoxFuture<'_, ExchangeResult<FundingBookSnapshot>> {
        Box::pin(self.fetch_book(tenor_range))
    }

    fn get_rate_history(&self, window: Duration) -> BoxFuture<'_, ExchangeResult<RateHistory>> {
        Box::pin(self.fetch_history(window))
    }
}

fn map_reqwest_error(e: reqwest::Error) -> ExchangeError {
    if e.is_timeout() {
        ExchangeError::Timeout(Duration::ZERO)
    } else {
        ExchangeError::TransientNetwork(format!("HTTP request failed: {e}"))
    }
}

fn map_status(status: StatusCode, retry_after: Option<Duration>, body: String) -> ExchangeError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => ExchangeError::RateLimited { retry_after },
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            ExchangeError::Authentication(format!("HTTP {status}: {body}"))
        }
        s if s.is_server_error() => ExchangeError::TransientNetwork(format!("HTTP {s}: {body}")),
        s => ExchangeError::InvalidResponse(format!("HTTP {s}: {body}")),
    }
}

fn as_rows(body: &Value) -> ExchangeResult<&Vec<Value>> {
    body.as_array()
        .ok_or_else(|| ExchangeError::InvalidResponse("expected a JSON array".to_string()))
}

fn field(row: &Value, idx: usize) -> ExchangeResult<&Value> {
    row.get(idx)
        .ok_or_else(|| ExchangeError::InvalidResponse(format!("missing field {idx} in {row}")))
}

fn decimal_at(row: &Value, idx: usize) -> ExchangeResult<Decimal> {
    let value = field(row, idx)?;
    let text = match value {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        other => {
            return Err(ExchangeError::InvalidResponse(format!(
                "field {idx} is not numeric: {other}"
            )))
        }
    };
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .map_err(|e| ExchangeError::InvalidResponse(format!("bad decimal {text}: {e}")))
}

fn u64_at(row: &Value, idx: usize) -> ExchangeResult<u64> {
    field(row, idx)?
        .as_u64()
        .ok_or_else(|| ExchangeError::InvalidResponse(format!("field {idx} is not an integer")))
}

fn time_at(row: &Value, idx: usize) -> ExchangeResult<DateTime<Utc>> {
    let millis = field(row, idx)?
        .as_i64()
        .ok_or_else(|| ExchangeError::InvalidResponse(format!("field {idx} is not a timestamp")))?;
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| ExchangeError::InvalidResponse(format!("timestamp out of range: {millis}")))
}

/// Split a P0 funding book into offers and demand within `tenor_range`.
pub fn parse_book(
    body: &Value,
    taken_at: DateTime<Utc>,
    tenor_range: TenorRange,
) -> ExchangeResult<FundingBookSnapshot> {
    let mut offers = Vec::new();
    let mut demand = Vec::new();

    for row in as_rows(body)? {
        let rate = Rate::new(decimal_at(row, 0)?);
        let period_days = u64_at(row, 1)? as u32;
        let count = u64_at(row, 2)? as u32;
        let amount = decimal_at(row, 3)?;

        if !tenor_range.contains(period_days) {
            continue;
        }

        let entry = BookEntry {
            rate,
            period_days,
            count,
            amount: Amount::new(amount.abs()),
        };
        if amount.is_sign_positive() {
            offers.push(entry);
        } else {
            demand.push(entry);
        }
    }

    Ok(FundingBookSnapshot::new(taken_at, offers, demand))
}

/// Parse hourly candles. Malformed rows are skipped.
pub fn parse_candles(body: &Value) -> ExchangeResult<Vec<RateCandle>> {
    let rows = as_rows(body)?;
    let mut candles = Vec::with_capacity(rows.len());
    for row in rows {
        match parse_candle(row) {
            Ok(candle) => candles.push(candle),
            Err(e) => warn!(error = %e, "Skipping malformed candle"),
        }
    }
    Ok(candles)
}

fn parse_candle(row: &Value) -> ExchangeResult<RateCandle> {
    Ok(RateCandle {
        open_time: time_at(row, 0)?,
        open: Rate::new(decimal_at(row, 1)?),
        close: Rate::new(decimal_at(row, 2)?),
        high: Rate::new(decimal_at(row, 3)?),
        low: Rate::new(decimal_at(row, 4)?),
        volume: decimal_at(row, 5)?,
    })
}

/// Parse funding stats into utilization samples. Rows without a used amount
/// (the API sends `null` for gaps) are skipped.
pub fn parse_utilization(body: &Value) -> ExchangeResult<Vec<UtilizationSample>> {
    let mut samples = Vec::new();
    for row in as_rows(body)? {
        if row.get(FUNDING_AMOUNT_USED_IDX).map_or(true, Value::is_null) {
            continue;
        }
        samples.push(UtilizationSample {
            time: time_at(row, 0)?,
            amount_used: decimal_at(row, FUNDING_AMOUNT_USED_IDX)?,
        });
    }
    Ok(samples)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    const ALL_TENORS: TenorRange = TenorRange::new(2, 120);

    #[test]
    fn test_parse_book_splits_sides() {
        let body = json!([
            [0.0002, 2, 5, 1500.5],
            [0.00025, 30, 2, 800],
            [0.0003, 2, 1, -2000],
            [0.00028, 7, 3, -500]
        ]);

        let book = parse_book(&body, Utc::now(), ALL_TENORS).unwrap();
        assert_eq!(book.offers.len(), 2);
        assert_eq!(book.demand.len(), 2);
        assert_eq!(book.offers[0].amount, Amount::new(dec!(1500.5)));
        // demand amounts come back positive, best first
        assert_eq!(book.demand[0].rate, Rate::new(dec!(0.0003)));
        assert_eq!(book.demand[0].amount, Amount::new(dec!(2000)));
    }

    #[test]
    fn test_parse_book_filters_tenor() {
        let body = json!([[0.0002, 2, 5, 100], [0.0004, 90, 1, 100]]);
        let book = parse_book(&body, Utc::now(), TenorRange::new(2, 30)).unwrap();
        assert_eq!(book.offers.len(), 1);
        assert_eq!(book.offers[0].period_days, 2);
    }

    #[test]
    fn test_parse_book_scientific_notation() {
        let body = json!([[1.5e-4, 2, 1, 100]]);
        let book = parse_book(&body, Utc::now(), ALL_TENORS).unwrap();
        assert_eq!(book.offers[0].rate, Rate::new(dec!(0.00015)));
    }

    #[test]
    fn test_parse_book_rejects_non_array() {
        let body = json!({"error": "nope"});
        assert!(matches!(
            parse_book(&body, Utc::now(), ALL_TENORS),
            Err(ExchangeError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_parse_candles() {
        let body = json!([
            [1_700_003_600_000_i64, 0.0002, 0.00021, 0.00025, 0.00019, 12345.6],
            [1_700_000_000_000_i64, 0.0002, 0.0002, 0.00022, 0.00018, 100],
            ["garbage"]
        ]);
        let candles = parse_candles(&body).unwrap();
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].high, Rate::new(dec!(0.00025)));
        assert_eq!(candles[0].low, Rate::new(dec!(0.00019)));
    }

    #[test]
    fn test_parse_utilization_skips_nulls() {
        let body = json!([
            [1_700_003_600_000_i64, null, null, 0.0001, 10, null, null, 5e8, 4.2e8, null],
            [1_700_000_000_000_i64, null, null, 0.0001, 10, null, null, 5e8, null, null]
        ]);
        let samples = parse_utilization(&body).unwrap();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].amount_used, dec!(420000000));
    }

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            map_status(
                StatusCode::TOO_MANY_REQUESTS,
                Some(Duration::from_secs(3)),
                String::new()
            ),
            ExchangeError::RateLimited {
                retry_after: Some(d)
            } if d == Duration::from_secs(3)
        ));
        assert!(map_status(StatusCode::UNAUTHORIZED, None, String::new()).is_fatal());
        assert!(map_status(StatusCode::BAD_GATEWAY, None, String::new()).is_retryable());
        assert!(matches!(
            map_status(StatusCode::BAD_REQUEST, None, String::new()),
            ExchangeError::InvalidResponse(_)
        ));
    }

    #[test]
    fn test_client_normalizes_inputs() {
        let config = RestConfig {
            base_url: "https://example.test/".to_string(),
            ..Default::default()
        };
        let client = PublicRestClient::new(&config, "usd").unwrap();
        assert_eq!(client.symbol(), "fUSD");
        assert_eq!(client.base_url, "https://example.test");
    }
}
