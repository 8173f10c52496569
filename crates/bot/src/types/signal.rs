use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Tactical signal emitted by the signal state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Signal {
    StrongBuy,
    Buy,
    Sell,
    Hold,
    Wait,
}

impl Signal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StrongBuy => "STRONG_BUY",
            Self::Buy => "BUY",
            Self::Sell => "SELL",
            Self::Hold => "HOLD",
            Self::Wait => "WAIT",
        }
    }

    /// Entry-capable signals.
    pub fn is_buy(&self) -> bool {
        matches!(self, Self::StrongBuy | Self::Buy)
    }
}

impl std::fmt::Display for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Combined multi-timeframe trend label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrendLabel {
    StrongBullish,
    Bullish,
    Neutral,
    Bearish,
}

impl TrendLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StrongBullish => "STRONG_BULLISH",
            Self::Bullish => "BULLISH",
            Self::Neutral => "NEUTRAL",
            Self::Bearish => "BEARISH",
        }
    }

    /// Trend labels compatible with opening a long position.
    pub fn is_bullish(&self) -> bool {
        matches!(self, Self::StrongBullish | Self::Bullish)
    }
}

impl std::fmt::Display for TrendLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trend label for a single timeframe, before combination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimeframeTrend {
    Bullish,
    Bearish,
    Neutral,
}

/// Snapshot of all computed indicators for one bar.
///
/// Only constructed once every rolling window is warmed up, so every field
/// is a definite value — callers never see a placeholder mid-warm-up.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndicatorSnapshot {
    #[serde(with = "rust_decimal::serde::str")]
    pub close: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub sma_5: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub sma_20: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub ema_9: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub ema_21: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub rsi: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub macd: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub macd_signal: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub macd_histogram: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub bb_upper: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub bb_middle: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub bb_lower: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub atr: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub volume: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub volume_avg: Decimal,
}

/// Output of one signal-engine evaluation.
#[derive(Debug, Clone)]
pub struct SignalDecision {
    pub signal: Signal,
    /// Snapshot at the evaluated bar; absent only for `Wait`.
    pub snapshot: Option<IndicatorSnapshot>,
    /// Human-readable justification — never empty.
    pub reasons: Vec<String>,
}

impl SignalDecision {
    pub fn wait(reason: &str) -> Self {
        Self {
            signal: Signal::Wait,
            snapshot: None,
            reasons: vec![reason.to_string()],
        }
    }
}
