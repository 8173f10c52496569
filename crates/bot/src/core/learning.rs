//! Adaptive learning over the closed-trade history.
//!
//! Replays the full trade log and derives [`LearningInsights`]: per-signal
//! and per-exit-reason performance, the RSI band occupied by winning trades,
//! hour-of-day profitability, per-symbol PnL, and suggested parameter
//! adjustments. The recompute is full, not incremental — the same record set
//! always yields the same insights.
//!
//! [`LearningEngine::should_take_trade`] turns the insights into a
//! multiplicative confidence score gating entries: base 1.0, scaled down for
//! signal types with poor win rates, RSI readings outside the learned band,
//! and historically weak hours; scaled up for their inverses.

use chrono::{DateTime, FixedOffset, Timelike};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::info;

use crate::config::LearningConfig;
use crate::types::{ExitReason, Signal, TradeRecord};

// ═══════════════════════════════════════════════════════════════════════════
// Insights model
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SignalPerformance {
    pub wins: usize,
    pub losses: usize,
    #[serde(with = "rust_decimal::serde::str")]
    pub total_pnl: Decimal,
}

impl SignalPerformance {
    pub fn closed(&self) -> usize {
        self.wins + self.losses
    }

    pub fn win_rate(&self) -> Option<Decimal> {
        let total = self.closed();
        if total == 0 {
            return None;
        }
        Some(Decimal::from(self.wins as u64) / Decimal::from(total as u64))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExitPerformance {
    pub count: usize,
    #[serde(with = "rust_decimal::serde::str")]
    pub avg_pnl: Decimal,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HourPerformance {
    pub wins: usize,
    pub losses: usize,
    #[serde(with = "rust_decimal::serde::str")]
    pub total_pnl: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RsiAnalysis {
    #[serde(with = "rust_decimal::serde::str")]
    pub winning_rsi_avg: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub losing_rsi_avg: Decimal,
    /// Inclusive band of RSI readings favoured by winning trades,
    /// padded ±5 and clamped to [20, 50].
    #[serde(with = "rust_decimal::serde::str")]
    pub band_low: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub band_high: Decimal,
}

impl Default for RsiAnalysis {
    fn default() -> Self {
        Self {
            winning_rsi_avg: Decimal::ZERO,
            losing_rsi_avg: Decimal::ZERO,
            band_low: dec!(30),
            band_high: dec!(40),
        }
    }
}

/// Suggested parameter adjustments derived from the aggregates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Adjustments {
    #[serde(with = "rust_decimal::serde::str")]
    pub rsi_oversold: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub stop_loss_pct: Decimal,
}

/// Fully-derived aggregate over the closed-trade history.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LearningInsights {
    pub last_updated: Option<String>,
    pub total_trades_analyzed: usize,
    pub signal_performance: HashMap<Signal, SignalPerformance>,
    pub exit_performance: HashMap<ExitReason, ExitPerformance>,
    pub rsi_analysis: RsiAnalysis,
    /// Top-3 hours by total PnL, descending.
    pub best_hours: Vec<u32>,
    /// Bottom-2 hours by total PnL.
    pub worst_hours: Vec<u32>,
    pub hour_performance: HashMap<u32, HourPerformance>,
    pub symbol_performance: HashMap<String, SignalPerformance>,
    pub adjustments: Option<Adjustments>,
}

/// Outcome of the learning-estimator gate for one candidate entry.
#[derive(Debug, Clone)]
pub struct GateDecision {
    pub approved: bool,
    pub confidence: Decimal,
    pub reasons: Vec<String>,
}

// ═══════════════════════════════════════════════════════════════════════════
// Engine
// ═══════════════════════════════════════════════════════════════════════════

pub struct LearningEngine {
    config: LearningConfig,
    /// Baseline parameters the adjustments move away from.
    base_rsi_oversold: Decimal,
    base_stop_loss_pct: Decimal,
}

impl LearningEngine {
    pub fn new(
        config: LearningConfig,
        base_rsi_oversold: Decimal,
        base_stop_loss_pct: Decimal,
    ) -> Self {
        Self {
            config,
            base_rsi_oversold,
            base_stop_loss_pct,
        }
    }

    /// Recompute insights from scratch over the full record set.
    ///
    /// `now` stamps `last_updated`; analysis itself depends only on the
    /// records, so identical inputs produce identical aggregates.
    pub fn analyze(&self, records: &[TradeRecord], now: &str) -> LearningInsights {
        let mut insights = LearningInsights {
            last_updated: Some(now.to_string()),
            ..Default::default()
        };

        let mut winning_rsi: Vec<Decimal> = Vec::new();
        let mut losing_rsi: Vec<Decimal> = Vec::new();

        for record in records.iter().filter(|r| r.is_closed_trade()) {
            let pnl = record.pnl;
            insights.total_trades_analyzed += 1;

            // Per-signal performance (entry signal carried on the SELL row).
            let sig = insights
                .signal_performance
                .entry(record.signal_type)
                .or_default();
            sig.total_pnl += pnl;
            if pnl > Decimal::ZERO {
                sig.wins += 1;
            } else {
                sig.losses += 1;
            }

            // Per-exit-reason performance (running average).
            if let Some(reason) = record.reason {
                let exit = insights.exit_performance.entry(reason).or_default();
                let prev_total = exit.avg_pnl * Decimal::from(exit.count as u64);
                exit.count += 1;
                exit.avg_pnl = (prev_total + pnl) / Decimal::from(exit.count as u64);
            }

            // RSI split by outcome.
            if record.rsi > Decimal::ZERO {
                if pnl > Decimal::ZERO {
                    winning_rsi.push(record.rsi);
                } else {
                    losing_rsi.push(record.rsi);
                }
            }

            // Hour-of-day aggregation from the execution timestamp.
            if let Some(hour) = parse_hour(&record.timestamp) {
                let hp = insights.hour_performance.entry(hour).or_default();
                hp.total_pnl += pnl;
                if pnl > Decimal::ZERO {
                    hp.wins += 1;
                } else {
                    hp.losses += 1;
                }
            }

            // Per-symbol aggregation.
            let sym = insights
                .symbol_performance
                .entry(record.symbol.clone())
                .or_default();
            sym.total_pnl += pnl;
            if pnl > Decimal::ZERO {
                sym.wins += 1;
            } else {
                sym.losses += 1;
            }
        }

        insights.rsi_analysis = rsi_analysis(&winning_rsi, &losing_rsi);

        // Rank hours by total PnL.
        let mut ranked: Vec<(u32, Decimal)> = insights
            .hour_performance
            .iter()
            .map(|(&h, p)| (h, p.total_pnl))
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        insights.best_hours = ranked.iter().take(3).map(|&(h, _)| h).collect();
        insights.worst_hours = ranked.iter().rev().take(2).map(|&(h, _)| h).collect();

        insights.adjustments = self.derive_adjustments(&insights);

        info!(
            trades = insights.total_trades_analyzed,
            "trade history analyzed"
        );
        insights
    }

    /// Parameter adjustments from the aggregates.
    ///
    /// The oversold threshold follows the learned band floor; the stop-loss
    /// widens by 0.5% (capped at 8%) when more than half of decisive exits
    /// hit the stop, and tightens by 0.5% (floored at 2%) when fewer than a
    /// fifth do.
    fn derive_adjustments(&self, insights: &LearningInsights) -> Option<Adjustments> {
        if insights.total_trades_analyzed == 0 {
            return None;
        }

        let mut adjustments = Adjustments {
            rsi_oversold: self.base_rsi_oversold,
            stop_loss_pct: self.base_stop_loss_pct,
        };

        if insights.rsi_analysis.band_low != self.base_rsi_oversold {
            adjustments.rsi_oversold = insights.rsi_analysis.band_low;
        }

        let target_count = insights
            .exit_performance
            .get(&ExitReason::TargetHit)
            .map_or(0, |e| e.count);
        let stop_count = insights
            .exit_performance
            .get(&ExitReason::StopLoss)
            .map_or(0, |e| e.count);

        if target_count > 0 && stop_count > 0 {
            let total = target_count + stop_count;
            let stop_ratio =
                Decimal::from(stop_count as u64) / Decimal::from(total as u64);
            if stop_ratio > dec!(0.5) {
                adjustments.stop_loss_pct =
                    (self.base_stop_loss_pct + dec!(0.005)).min(dec!(0.08));
            } else if stop_ratio < dec!(0.2) {
                adjustments.stop_loss_pct =
                    (self.base_stop_loss_pct - dec!(0.005)).max(dec!(0.02));
            }
        }

        Some(adjustments)
    }

    /// Gate a candidate entry against the learned insights.
    ///
    /// Confidence starts at 1.0 and is multiplied by: 0.7 / 1.2 for signal
    /// types with win rate < 40% / > 60% (only once enough closed trades of
    /// that type exist), 0.8 / 1.1 for an RSI reading outside / inside the
    /// learned band, and 0.7 / 1.2 for historically worst / best hours.
    /// The trade is approved iff the product clears the configured threshold.
    pub fn should_take_trade(
        &self,
        insights: &LearningInsights,
        signal: Signal,
        rsi: Decimal,
        hour: u32,
    ) -> GateDecision {
        let mut confidence = Decimal::ONE;
        let mut reasons = Vec::new();

        if let Some(perf) = insights.signal_performance.get(&signal) {
            if perf.closed() > self.config.min_trades_per_signal {
                if let Some(win_rate) = perf.win_rate() {
                    if win_rate < dec!(0.4) {
                        confidence *= dec!(0.7);
                        reasons.push(format!(
                            "{signal} has low win rate ({:.0}%)",
                            win_rate * dec!(100)
                        ));
                    } else if win_rate > dec!(0.6) {
                        confidence *= dec!(1.2);
                        reasons.push(format!(
                            "{signal} has high win rate ({:.0}%)",
                            win_rate * dec!(100)
                        ));
                    }
                }
            }
        }

        let band = &insights.rsi_analysis;
        if rsi < band.band_low || rsi > band.band_high {
            confidence *= dec!(0.8);
            reasons.push(format!(
                "RSI {rsi:.1} outside optimal band [{:.0}, {:.0}]",
                band.band_low, band.band_high
            ));
        } else {
            confidence *= dec!(1.1);
            reasons.push(format!("RSI {rsi:.1} inside optimal band"));
        }

        if insights.worst_hours.contains(&hour) {
            confidence *= dec!(0.7);
            reasons.push(format!("hour {hour} historically poor"));
        } else if insights.best_hours.contains(&hour) {
            confidence *= dec!(1.2);
            reasons.push(format!("hour {hour} historically good"));
        }

        GateDecision {
            approved: confidence >= self.config.confidence_threshold,
            confidence,
            reasons,
        }
    }

    /// One-paragraph log summary of the current insights.
    pub fn summarize(&self, insights: &LearningInsights) -> String {
        let mut lines = vec![format!(
            "learning insights: {} closed trades analyzed",
            insights.total_trades_analyzed
        )];
        for (signal, perf) in &insights.signal_performance {
            if let Some(win_rate) = perf.win_rate() {
                lines.push(format!(
                    "  {signal}: {:.0}% win rate, {} pnl over {} trades",
                    win_rate * dec!(100),
                    perf.total_pnl,
                    perf.closed()
                ));
            }
        }
        lines.push(format!(
            "  optimal RSI band: [{:.0}, {:.0}]",
            insights.rsi_analysis.band_low, insights.rsi_analysis.band_high
        ));
        if !insights.best_hours.is_empty() {
            let hours: Vec<String> =
                insights.best_hours.iter().map(|h| format!("{h}:00")).collect();
            lines.push(format!("  best hours: {}", hours.join(", ")));
        }
        lines.join("\n")
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// RSI averages and the winning band, padded ±5 and clamped to [20, 50].
fn rsi_analysis(winning: &[Decimal], losing: &[Decimal]) -> RsiAnalysis {
    let mut analysis = RsiAnalysis::default();

    let avg = |values: &[Decimal]| -> Decimal {
        values.iter().copied().sum::<Decimal>() / Decimal::from(values.len() as u64)
    };

    if !winning.is_empty() {
        analysis.winning_rsi_avg = avg(winning);
        let min = winning.iter().copied().fold(winning[0], Decimal::min);
        let max = winning.iter().copied().fold(winning[0], Decimal::max);
        analysis.band_low = (min - dec!(5)).max(dec!(20));
        analysis.band_high = (max + dec!(5)).min(dec!(50));
    }
    if !losing.is_empty() {
        analysis.losing_rsi_avg = avg(losing);
    }

    analysis
}

/// Hour-of-day from an RFC 3339 timestamp.
fn parse_hour(timestamp: &str) -> Option<u32> {
    DateTime::<FixedOffset>::parse_from_rfc3339(timestamp)
        .ok()
        .map(|dt| dt.hour())
}

// ═══════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MlConfig;
    use crate::types::{IndicatorSnapshot, TradeAction, TradeMode};

    fn learning_config() -> LearningConfig {
        LearningConfig {
            enabled: true,
            confidence_threshold: dec!(0.8),
            min_trades_per_signal: 5,
            ml: MlConfig {
                enabled: true,
                min_samples: 20,
                probability_threshold: dec!(0.55),
                learning_rate: 0.1,
                max_iterations: 100,
            },
        }
    }

    fn engine() -> LearningEngine {
        LearningEngine::new(learning_config(), dec!(35), dec!(0.05))
    }

    fn snapshot_with_rsi(rsi: Decimal) -> IndicatorSnapshot {
        IndicatorSnapshot {
            close: dec!(100),
            sma_5: dec!(100),
            sma_20: dec!(99),
            ema_9: dec!(100),
            ema_21: dec!(99),
            rsi,
            macd: dec!(0.2),
            macd_signal: dec!(0.1),
            macd_histogram: dec!(0.1),
            bb_upper: dec!(104),
            bb_middle: dec!(100),
            bb_lower: dec!(96),
            atr: dec!(1),
            volume: dec!(1000),
            volume_avg: dec!(900),
        }
    }

    fn sell_at_hour(
        signal: Signal,
        reason: ExitReason,
        pnl: Decimal,
        rsi: Decimal,
        hour: u32,
    ) -> TradeRecord {
        TradeRecord::from_execution(
            format!("2026-08-06T{hour:02}:15:00+05:30"),
            "NIFTYBEES-EQ",
            TradeAction::Sell,
            5,
            dec!(100),
            signal,
            Some(reason),
            pnl,
            &snapshot_with_rsi(rsi),
            TradeMode::Paper,
        )
    }

    // -- Analysis ------------------------------------------------------------

    #[test]
    fn test_analyze_is_idempotent() {
        let e = engine();
        let records = vec![
            sell_at_hour(Signal::Buy, ExitReason::TargetHit, dec!(50), dec!(32), 10),
            sell_at_hour(Signal::Buy, ExitReason::StopLoss, dec!(-20), dec!(45), 11),
        ];
        let a = e.analyze(&records, "t0");
        let b = e.analyze(&records, "t0");
        assert_eq!(a.total_trades_analyzed, b.total_trades_analyzed);
        assert_eq!(a.best_hours, b.best_hours);
        assert_eq!(
            a.rsi_analysis.band_low.to_string(),
            b.rsi_analysis.band_low.to_string()
        );
    }

    #[test]
    fn test_signal_performance_aggregation() {
        let e = engine();
        let mut records = Vec::new();
        for _ in 0..3 {
            records.push(sell_at_hour(Signal::Buy, ExitReason::TargetHit, dec!(10), dec!(35), 10));
        }
        for _ in 0..2 {
            records.push(sell_at_hour(Signal::Buy, ExitReason::StopLoss, dec!(-5), dec!(40), 10));
        }
        let insights = e.analyze(&records, "t0");
        let perf = &insights.signal_performance[&Signal::Buy];
        assert_eq!(perf.wins, 3);
        assert_eq!(perf.losses, 2);
        assert_eq!(perf.total_pnl, dec!(20));
    }

    #[test]
    fn test_exit_performance_running_average() {
        let e = engine();
        let records = vec![
            sell_at_hour(Signal::Buy, ExitReason::TargetHit, dec!(30), dec!(35), 10),
            sell_at_hour(Signal::Buy, ExitReason::TargetHit, dec!(10), dec!(35), 10),
        ];
        let insights = e.analyze(&records, "t0");
        let exit = &insights.exit_performance[&ExitReason::TargetHit];
        assert_eq!(exit.count, 2);
        assert_eq!(exit.avg_pnl, dec!(20));
    }

    #[test]
    fn test_rsi_band_from_winning_trades() {
        let e = engine();
        let records = vec![
            sell_at_hour(Signal::Buy, ExitReason::TargetHit, dec!(10), dec!(30), 10),
            sell_at_hour(Signal::Buy, ExitReason::TargetHit, dec!(10), dec!(38), 11),
            sell_at_hour(Signal::Buy, ExitReason::StopLoss, dec!(-5), dec!(60), 12),
        ];
        let insights = e.analyze(&records, "t0");
        // Band: [max(20, 30-5), min(50, 38+5)] = [25, 43].
        assert_eq!(insights.rsi_analysis.band_low, dec!(25));
        assert_eq!(insights.rsi_analysis.band_high, dec!(43));
        assert_eq!(insights.rsi_analysis.losing_rsi_avg, dec!(60));
    }

    #[test]
    fn test_best_and_worst_hours() {
        let e = engine();
        let records = vec![
            sell_at_hour(Signal::Buy, ExitReason::TargetHit, dec!(100), dec!(35), 10),
            sell_at_hour(Signal::Buy, ExitReason::TargetHit, dec!(50), dec!(35), 11),
            sell_at_hour(Signal::Buy, ExitReason::StopLoss, dec!(-80), dec!(35), 14),
        ];
        let insights = e.analyze(&records, "t0");
        assert_eq!(insights.best_hours[0], 10);
        assert!(insights.worst_hours.contains(&14));
    }

    #[test]
    fn test_stop_loss_widening_adjustment() {
        let e = engine();
        let mut records = Vec::new();
        for _ in 0..6 {
            records.push(sell_at_hour(Signal::Buy, ExitReason::StopLoss, dec!(-10), dec!(35), 10));
        }
        for _ in 0..2 {
            records.push(sell_at_hour(Signal::Buy, ExitReason::TargetHit, dec!(30), dec!(35), 10));
        }
        let insights = e.analyze(&records, "t0");
        let adj = insights.adjustments.unwrap();
        // 6/8 stops > 50% → widen 5% → 5.5%.
        assert_eq!(adj.stop_loss_pct, dec!(0.055));
    }

    #[test]
    fn test_stop_loss_tightening_adjustment() {
        let e = engine();
        let mut records = Vec::new();
        records.push(sell_at_hour(Signal::Buy, ExitReason::StopLoss, dec!(-10), dec!(35), 10));
        for _ in 0..9 {
            records.push(sell_at_hour(Signal::Buy, ExitReason::TargetHit, dec!(30), dec!(35), 10));
        }
        let insights = e.analyze(&records, "t0");
        let adj = insights.adjustments.unwrap();
        // 1/10 stops < 20% → tighten to 4.5%.
        assert_eq!(adj.stop_loss_pct, dec!(0.045));
    }

    // -- Gate ----------------------------------------------------------------

    #[test]
    fn test_gate_scenario_low_win_rate_outside_band_vetoes() {
        // 3 wins / 7 losses (30% win rate over > 5 trades) → ×0.7; RSI
        // outside the band → ×0.8; product 0.56 < 0.8 → vetoed.
        let e = engine();
        let mut records = Vec::new();
        for _ in 0..3 {
            records.push(sell_at_hour(Signal::Buy, ExitReason::TargetHit, dec!(10), dec!(32), 10));
        }
        for _ in 0..7 {
            records.push(sell_at_hour(Signal::Buy, ExitReason::StopLoss, dec!(-10), dec!(33), 10));
        }
        let insights = e.analyze(&records, "t0");

        let decision = e.should_take_trade(&insights, Signal::Buy, dec!(65), 12);
        assert!(!decision.approved);
        assert!(decision.confidence < dec!(0.8));
        assert!(decision.reasons.iter().any(|r| r.contains("low win rate")));
    }

    #[test]
    fn test_gate_high_win_rate_inside_band_approves() {
        let e = engine();
        let mut records = Vec::new();
        for _ in 0..7 {
            records.push(sell_at_hour(Signal::Buy, ExitReason::TargetHit, dec!(10), dec!(32), 10));
        }
        // Losses across two other hours, so hour 10 ranks best without also
        // landing in the bottom-2 list.
        records.push(sell_at_hour(Signal::Buy, ExitReason::StopLoss, dec!(-10), dec!(33), 13));
        for _ in 0..2 {
            records.push(sell_at_hour(Signal::Buy, ExitReason::StopLoss, dec!(-10), dec!(33), 14));
        }
        let insights = e.analyze(&records, "t0");

        // RSI 32 sits inside the learned band.
        let decision = e.should_take_trade(&insights, Signal::Buy, dec!(32), 10);
        assert!(decision.approved);
        assert!(decision.confidence > Decimal::ONE);
    }

    #[test]
    fn test_gate_untracked_signal_skips_win_rate_factor() {
        let e = engine();
        let insights = LearningInsights::default();
        let decision = e.should_take_trade(&insights, Signal::StrongBuy, dec!(35), 10);
        // Default band is [30, 40]: only the ×1.1 factor applies.
        assert_eq!(decision.confidence, dec!(1.1));
        assert!(decision.approved);
    }

    #[test]
    fn test_insights_serde_round_trip() {
        let e = engine();
        let records = vec![
            sell_at_hour(Signal::Buy, ExitReason::TargetHit, dec!(50), dec!(32), 10),
        ];
        let insights = e.analyze(&records, "t0");
        let json = serde_json::to_string(&insights).unwrap();
        let back: LearningInsights = serde_json::from_str(&json).unwrap();
        assert_eq!(back.total_trades_analyzed, 1);
        assert_eq!(back.best_hours, insights.best_hours);
    }
}
