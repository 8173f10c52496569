use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A single OHLCV bar. Immutable once produced by the data source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: i64,
    #[serde(with = "rust_decimal::serde::str")]
    pub open: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub high: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub low: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub close: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub volume: Decimal,
}

/// Bar granularity requested from the market data source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interval {
    /// 5-minute bars — entry signals.
    M5,
    /// Hourly bars — trend confirmation.
    H1,
    /// Daily bars — overall trend and support/resistance.
    D1,
}

impl Interval {
    /// Interval token used by the chart API.
    pub fn as_api_str(&self) -> &'static str {
        match self {
            Self::M5 => "5m",
            Self::H1 => "1h",
            Self::D1 => "1d",
        }
    }

    /// Config key for range/TTL lookup tables.
    pub fn as_key(&self) -> &'static str {
        match self {
            Self::M5 => "m5",
            Self::H1 => "h1",
            Self::D1 => "d1",
        }
    }
}

impl std::fmt::Display for Interval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_api_str())
    }
}
