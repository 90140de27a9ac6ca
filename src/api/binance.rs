use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use governor::{Quota, RateLimiter};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use crate::error::EngineError;
use crate::gateway::MarketDataProvider;
use crate::models::{Candle, Timeframe};
use crate::settings::MarketKind;
use crate::Result;

const REQUESTS_PER_MINUTE: u32 = 600; // well under Binance's 1200 weight/min
const DEFAULT_MAX_RETRIES: u32 = 3;
const MAX_KLINE_LIMIT: usize = 1000;

type BinanceRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Response from the ticker price endpoint
#[derive(Debug, Deserialize)]
struct TickerPrice {
    #[allow(dead_code)]
    symbol: String,
    price: String,
}

/// Public Binance REST market data (no signing)
///
/// Cloneable; clones share the HTTP client and rate limiter.
#[derive(Clone)]
pub struct BinanceMarketData {
    client: Client,
    base_url: String,
    market: MarketKind,
    rate_limiter: Arc<BinanceRateLimiter>,
    max_retries: u32,
    backoff_base: Duration,
}

impl BinanceMarketData {
    pub fn new(base_url: &str, market: MarketKind) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| EngineError::Gateway(format!("failed to build HTTP client: {}", e)))?;

        let quota = Quota::per_minute(NonZeroU32::new(REQUESTS_PER_MINUTE).unwrap_or(NonZeroU32::MIN));

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            market,
            rate_limiter: Arc::new(RateLimiter::direct(quota)),
            max_retries: DEFAULT_MAX_RETRIES,
            backoff_base: Duration::from_secs(1),
        })
    }

    /// Base delay for retry backoff, doubled on each attempt
    pub fn with_backoff(mut self, backoff_base: Duration) -> Self {
        self.backoff_base = backoff_base;
        self
    }

    /// Total attempts per request, including the first
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }

    fn klines_path(&self) -> &'static str {
        match self.market {
            MarketKind::Spot => "/api/v3/klines",
            MarketKind::Futures => "/fapi/v1/klines",
        }
    }

    fn ticker_path(&self) -> &'static str {
        match self.market {
            MarketKind::Spot => "/api/v3/ticker/price",
            MarketKind::Futures => "/fapi/v1/ticker/price",
        }
    }

    /// Rate-limited GET with retry on 429, 5xx and network errors
    async fn get_json(
        &self,
        path: &str,
        query: &[(&str, String)],
        timeframe: Option<Timeframe>,
    ) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);
        let unavailable = |reason: String| EngineError::data_unavailable(timeframe, reason);
        let max_retries = self.max_retries;

        for attempt in 1..=max_retries {
            self.rate_limiter.until_ready().await;
            let backoff = self.backoff_base * 2u32.pow(attempt - 1);

            match self.client.get(&url).query(query).send().await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        return response
                            .json::<Value>()
                            .await
                            .map_err(|e| unavailable(format!("invalid JSON from {}: {}", path, e)));
                    }

                    if (status.as_u16() == 429 || status.is_server_error()) && attempt < max_retries {
                        tracing::warn!(
                            "Binance returned {} for {}, retrying in {:?} (attempt {}/{})",
                            status,
                            path,
                            backoff,
                            attempt,
                            max_retries
                        );
                        tokio::time::sleep(backoff).await;
                        continue;
                    }

                    let body = response
                        .text()
                        .await
                        .unwrap_or_else(|_| "Unknown error".to_string());
                    return Err(unavailable(format!("Binance API error ({}): {}", status, body)));
                }
                Err(e) if attempt < max_retries => {
                    tracing::warn!(
                        "Network error: {}, retrying in {:?} (attempt {}/{})",
                        e,
                        backoff,
                        attempt,
                        max_retries
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => {
                    return Err(unavailable(format!(
                        "network error after {} attempts: {}",
                        max_retries, e
                    )))
                }
            }
        }

        Err(unavailable(format!("failed after {} attempts", max_retries)))
    }
}

fn millis_to_utc(ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single()
}

/// Kline numbers arrive as strings, timestamps as integers
fn field_f64(row: &[Value], idx: usize) -> Option<f64> {
    match row.get(idx)? {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

/// Parse a kline payload, keeping only candles closed by `now`
fn parse_klines(payload: &Value, now: DateTime<Utc>) -> std::result::Result<Vec<Candle>, String> {
    let rows = payload
        .as_array()
        .ok_or_else(|| "kline payload is not an array".to_string())?;

    let mut candles = Vec::with_capacity(rows.len());
    for (i, row) in rows.iter().enumerate() {
        let row = row
            .as_array()
            .ok_or_else(|| format!("kline {} is not an array", i))?;

        let open_time = row
            .first()
            .and_then(Value::as_i64)
            .and_then(millis_to_utc)
            .ok_or_else(|| format!("kline {} has a bad open time", i))?;
        let close_time = row
            .get(6)
            .and_then(Value::as_i64)
            .and_then(millis_to_utc)
            .ok_or_else(|| format!("kline {} has a bad close time", i))?;

        if close_time > now {
            // Still forming
            continue;
        }

        let (Some(open), Some(high), Some(low), Some(close), Some(volume)) = (
            field_f64(row, 1),
            field_f64(row, 2),
            field_f64(row, 3),
            field_f64(row, 4),
            field_f64(row, 5),
        ) else {
            return Err(format!("kline {} has malformed prices", i));
        };

        candles.push(Candle {
            open,
            high,
            low,
            close,
            volume,
            open_time,
        });
    }

    Ok(candles)
}

#[async_trait]
impl MarketDataProvider for BinanceMarketData {
    async fn candles(&self, symbol: &str, timeframe: Timeframe, limit: usize) -> Result<Vec<Candle>> {
        // One extra so dropping the forming candle still leaves `limit`
        let request_limit = (limit + 1).min(MAX_KLINE_LIMIT);
        let query = [
            ("symbol", symbol.to_string()),
            ("interval", timeframe.as_str().to_string()),
            ("limit", request_limit.to_string()),
        ];

        let payload = self.get_json(self.klines_path(), &query, Some(timeframe)).await?;
        let mut candles = parse_klines(&payload, Utc::now())
            .map_err(|reason| EngineError::data_unavailable(Some(timeframe), reason))?;

        if candles.len() > limit {
            candles.drain(..candles.len() - limit);
        }

        tracing::debug!(
            symbol,
            timeframe = %timeframe,
            count = candles.len(),
            "Fetched closed candles"
        );

        Ok(candles)
    }

    async fn mark_price(&self, symbol: &str) -> Result<f64> {
        let query = [("symbol", symbol.to_string())];
        let payload = self.get_json(self.ticker_path(), &query, None).await?;

        let ticker: TickerPrice = serde_json::from_value(payload)
            .map_err(|e| EngineError::data_unavailable(None, format!("bad ticker payload: {}", e)))?;

        ticker
            .price
            .parse::<f64>()
            .ok()
            .filter(|p| p.is_finite() && *p > 0.0)
            .ok_or_else(|| EngineError::data_unavailable(None, format!("bad ticker price {}", ticker.price)))
    }
}
