//! Market data service: OHLCV bar retrieval with retry and caching.
//!
//! Fetches bar series from a chart-API endpoint (Yahoo-chart JSON shape) and
//! normalises them into typed [`Bar`]s. Total failure after bounded retries
//! surfaces as an error the caller treats as "skip this symbol this cycle" —
//! it must never abort the polling loop.
//!
//! Caching: in-memory map keyed by (symbol, interval) with a per-interval
//! TTL, so the trend classifier can be queried every cycle for every symbol
//! without hammering the provider.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::MarketDataConfig;
use crate::errors::BotError;
use crate::types::{Bar, Interval};

// ═══════════════════════════════════════════════════════════════════════════
// Cache
// ═══════════════════════════════════════════════════════════════════════════

/// A single cache entry with expiration.
#[derive(Clone)]
struct CacheEntry {
    bars: Vec<Bar>,
    expires_at: Instant,
}

impl CacheEntry {
    fn new(bars: Vec<Bar>, ttl: Duration) -> Self {
        Self {
            bars,
            expires_at: Instant::now() + ttl,
        }
    }

    fn is_valid(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// DataService
// ═══════════════════════════════════════════════════════════════════════════

/// Chart-API bar fetcher with per-interval TTL caching.
pub struct DataService {
    client: reqwest::Client,
    config: MarketDataConfig,
    cache: Mutex<HashMap<(String, Interval), CacheEntry>>,
}

impl DataService {
    pub fn new(config: MarketDataConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()
            .context("failed to build market data HTTP client")?;
        Ok(Self {
            client,
            config,
            cache: Mutex::new(HashMap::new()),
        })
    }

    /// Translate a broker-style symbol into the chart API's ticker.
    pub fn chart_symbol(&self, symbol: &str) -> String {
        if let Some(stem) = symbol.strip_suffix(&self.config.symbol_suffix_from) {
            format!("{stem}{}", self.config.symbol_suffix_to)
        } else {
            symbol.to_string()
        }
    }

    /// Fetch a bar series for the symbol at the given granularity.
    ///
    /// Serves from cache when fresh; otherwise performs up to
    /// `max_attempts` requests with linear backoff (`backoff_base × attempt`).
    /// An `Err` or an empty series both mean "skip this symbol this cycle".
    pub async fn fetch_bars(&self, symbol: &str, interval: Interval) -> Result<Vec<Bar>, BotError> {
        let key = (symbol.to_string(), interval);
        if let Some(entry) = self.cache.lock().expect("cache mutex").get(&key) {
            if entry.is_valid() {
                debug!(symbol, %interval, bars = entry.bars.len(), "bar cache hit");
                return Ok(entry.bars.clone());
            }
        }

        let range = self
            .config
            .ranges
            .get(interval.as_key())
            .cloned()
            .unwrap_or_else(|| "5d".to_string());

        let mut last_err: Option<String> = None;
        for attempt in 1..=self.config.max_attempts {
            match self.fetch_once(symbol, interval, &range).await {
                Ok(bars) if !bars.is_empty() => {
                    let ttl = Duration::from_secs(
                        self.config
                            .cache_ttl_seconds
                            .get(interval.as_key())
                            .copied()
                            .unwrap_or(60),
                    );
                    self.cache
                        .lock()
                        .expect("cache mutex")
                        .insert(key, CacheEntry::new(bars.clone(), ttl));
                    return Ok(bars);
                }
                Ok(_) => {
                    last_err = Some("empty series".to_string());
                }
                Err(e) => {
                    last_err = Some(e.to_string());
                }
            }
            if attempt < self.config.max_attempts {
                let backoff =
                    Duration::from_secs(self.config.backoff_base_seconds * attempt as u64);
                warn!(
                    symbol,
                    %interval,
                    attempt,
                    error = last_err.as_deref().unwrap_or("unknown"),
                    "bar fetch failed, backing off"
                );
                tokio::time::sleep(backoff).await;
            }
        }

        warn!(
            symbol,
            %interval,
            error = last_err.as_deref().unwrap_or("unknown"),
            "bar fetch exhausted retries"
        );
        Err(BotError::DataUnavailable {
            symbol: symbol.to_string(),
            interval: interval.to_string(),
        })
    }

    async fn fetch_once(
        &self,
        symbol: &str,
        interval: Interval,
        range: &str,
    ) -> Result<Vec<Bar>, BotError> {
        let ticker = self.chart_symbol(symbol);
        let url = format!("{}/{ticker}", self.config.base_url);

        let response = self
            .client
            .get(&url)
            .query(&[("range", range), ("interval", interval.as_api_str())])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(BotError::DataUnavailable {
                symbol: symbol.to_string(),
                interval: interval.to_string(),
            });
        }

        let body: Value = response.json().await?;
        Ok(parse_chart_response(&body))
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Response parsing
// ═══════════════════════════════════════════════════════════════════════════

/// Parse a chart-API JSON document into bars.
///
/// Shape: `chart.result[0].timestamp[]` plus
/// `chart.result[0].indicators.quote[0].{open,high,low,close,volume}[]`.
/// Rows with any null component are skipped — the provider emits them for
/// halted or partially-formed bars.
pub fn parse_chart_response(body: &Value) -> Vec<Bar> {
    let result = match body
        .get("chart")
        .and_then(|c| c.get("result"))
        .and_then(|r| r.get(0))
    {
        Some(r) => r,
        None => return Vec::new(),
    };

    let timestamps: Vec<i64> = match result.get("timestamp").and_then(Value::as_array) {
        Some(ts) => ts.iter().filter_map(Value::as_i64).collect(),
        None => return Vec::new(),
    };

    let quote = match result
        .get("indicators")
        .and_then(|i| i.get("quote"))
        .and_then(|q| q.get(0))
    {
        Some(q) => q,
        None => return Vec::new(),
    };

    let field = |name: &str| -> Vec<Option<f64>> {
        quote
            .get(name)
            .and_then(Value::as_array)
            .map(|arr| arr.iter().map(Value::as_f64).collect())
            .unwrap_or_default()
    };

    let opens = field("open");
    let highs = field("high");
    let lows = field("low");
    let closes = field("close");
    let volumes = field("volume");

    let mut bars = Vec::with_capacity(timestamps.len());
    for (i, &ts) in timestamps.iter().enumerate() {
        let row = (
            opens.get(i).copied().flatten(),
            highs.get(i).copied().flatten(),
            lows.get(i).copied().flatten(),
            closes.get(i).copied().flatten(),
            volumes.get(i).copied().flatten(),
        );
        if let (Some(o), Some(h), Some(l), Some(c), Some(v)) = row {
            let to_dec = |x: f64| Decimal::from_f64(x);
            if let (Some(open), Some(high), Some(low), Some(close), Some(volume)) =
                (to_dec(o), to_dec(h), to_dec(l), to_dec(c), to_dec(v))
            {
                bars.push(Bar {
                    timestamp: ts,
                    open,
                    high,
                    low,
                    close,
                    volume,
                });
            }
        }
    }

    bars
}
