use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::signal::{IndicatorSnapshot, Signal};

/// Side of an executed trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradeAction {
    Buy,
    Sell,
}

impl TradeAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Buy => "BUY",
            Self::Sell => "SELL",
        }
    }
}

impl std::fmt::Display for TradeAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a position (or part of one) was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExitReason {
    StopLoss,
    TrailingStop,
    TargetHit,
    PartialTarget,
    TrendReversal,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StopLoss => "STOP_LOSS",
            Self::TrailingStop => "TRAILING_STOP",
            Self::TargetHit => "TARGET_HIT",
            Self::PartialTarget => "PARTIAL_TARGET",
            Self::TrendReversal => "TREND_REVERSAL",
        }
    }

    /// Human wording for alerts.
    pub fn describe(&self) -> &'static str {
        match self {
            Self::StopLoss => "stop loss",
            Self::TrailingStop => "trailing stop",
            Self::TargetHit => "target hit",
            Self::PartialTarget => "partial target",
            Self::TrendReversal => "trend reversal",
        }
    }

    pub const ALL: [ExitReason; 5] = [
        Self::StopLoss,
        Self::TrailingStop,
        Self::TargetHit,
        Self::PartialTarget,
        Self::TrendReversal,
    ];
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Paper vs live execution tag on persisted trades.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradeMode {
    Paper,
    Live,
}

/// One immutable row of the append-only trade log.
///
/// SELL rows carry the entry signal type (taken from the position) so that
/// per-signal performance can be aggregated from closed trades alone, plus
/// the realized PnL for that exit. The embedded indicator subset is the
/// snapshot at execution time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    /// RFC 3339 execution timestamp.
    pub timestamp: String,
    pub symbol: String,
    pub action: TradeAction,
    pub quantity: u32,
    #[serde(with = "rust_decimal::serde::str")]
    pub price: Decimal,
    pub signal_type: Signal,
    /// Exit reason — empty for BUY rows.
    pub reason: Option<ExitReason>,
    /// Realized PnL — zero for BUY rows.
    #[serde(with = "rust_decimal::serde::str")]
    pub pnl: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub rsi: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub macd: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub macd_signal: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub sma_5: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub sma_20: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub volume: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub volume_avg: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub atr: Decimal,
    pub mode: TradeMode,
}

impl TradeRecord {
    /// Build a record from an execution and its indicator snapshot.
    #[allow(clippy::too_many_arguments)]
    pub fn from_execution(
        timestamp: String,
        symbol: &str,
        action: TradeAction,
        quantity: u32,
        price: Decimal,
        signal_type: Signal,
        reason: Option<ExitReason>,
        pnl: Decimal,
        snapshot: &IndicatorSnapshot,
        mode: TradeMode,
    ) -> Self {
        Self {
            timestamp,
            symbol: symbol.to_string(),
            action,
            quantity,
            price,
            signal_type,
            reason,
            pnl,
            rsi: snapshot.rsi,
            macd: snapshot.macd,
            macd_signal: snapshot.macd_signal,
            sma_5: snapshot.sma_5,
            sma_20: snapshot.sma_20,
            volume: snapshot.volume,
            volume_avg: snapshot.volume_avg,
            atr: snapshot.atr,
            mode,
        }
    }

    pub fn is_closed_trade(&self) -> bool {
        self.action == TradeAction::Sell
    }
}

/// Aggregated stats for one calendar day of trading.
#[derive(Debug, Clone, Default)]
pub struct DailyStats {
    pub trades: usize,
    pub pnl: Decimal,
    pub wins: usize,
    pub losses: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_reason_serde() {
        let json = serde_json::to_string(&ExitReason::TrailingStop).unwrap();
        assert_eq!(json, "\"TRAILING_STOP\"");
    }

    #[test]
    fn test_exit_reason_all_covers_every_variant() {
        assert_eq!(ExitReason::ALL.len(), 5);
    }
}
