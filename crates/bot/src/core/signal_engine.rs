//! Signal state machine: indicator snapshots + trend label → tactical signal.
//!
//! A pure function with no internal state. Identical inputs always yield the
//! identical `(signal, reasons)` output, which keeps the component testable
//! and makes the learning feedback loop meaningful.
//!
//! Two rule tables share one predicate set, selected by [`SignalPolicy`]:
//!   V1 — conservative: fresh SMA crossovers gated on a bullish combined
//!        trend, plus a lower-band bounce entry.
//!   V2 — permissive: widened RSI ceilings under strong trends, entries on a
//!        NEUTRAL trend when deeply oversold, and reversal / momentum
//!        pullback patterns that fire without a fresh crossover while price
//!        holds above the slow SMA.
//!
//! SELL evaluation is independent of trend bullishness. A SELL emitted while
//! no position is open is converted to an informational HOLD by the caller
//! (the lifecycle layer), not here — the engine reports the raw tactical
//! signal.

use rust_decimal_macros::dec;

use crate::config::{SignalConfig, SignalPolicy};
use crate::core::indicators::IndicatorSeries;
use crate::types::{IndicatorSnapshot, Signal, SignalDecision, TrendLabel};

/// Boolean predicates shared by both rule tables.
#[derive(Debug, Clone, Copy)]
struct Predicates {
    crossover_buy: bool,
    crossover_sell: bool,
    rsi_oversold: bool,
    rsi_below_overbought: bool,
    rsi_deep_oversold: bool,
    macd_bullish: bool,
    macd_bearish: bool,
    volume_ok: bool,
    near_bb_lower: bool,
    already_uptrend: bool,
    price_above_sma20: bool,
}

impl Predicates {
    fn derive(now: &IndicatorSnapshot, prev: &IndicatorSnapshot, cfg: &SignalConfig) -> Self {
        Self {
            crossover_buy: prev.sma_5 < prev.sma_20 && now.sma_5 > now.sma_20,
            crossover_sell: prev.sma_5 > prev.sma_20 && now.sma_5 < now.sma_20,
            rsi_oversold: now.rsi < cfg.rsi_oversold,
            rsi_below_overbought: now.rsi < cfg.rsi_overbought,
            rsi_deep_oversold: now.rsi < cfg.rsi_deep_oversold,
            macd_bullish: now.macd > now.macd_signal,
            macd_bearish: now.macd < now.macd_signal,
            volume_ok: now.volume > now.volume_avg * cfg.volume_multiplier,
            near_bb_lower: now.close <= now.bb_lower * cfg.bb_proximity,
            already_uptrend: now.sma_5 > now.sma_20,
            price_above_sma20: now.close > now.sma_20,
        }
    }
}

/// Evaluate the latest two bars of a computed series.
///
/// Short-circuits to `Wait` before any snapshot access when fewer than
/// `min_bars` bars exist or the rolling battery has not warmed up.
pub fn evaluate_series(
    series: &IndicatorSeries,
    trend: TrendLabel,
    cfg: &SignalConfig,
    min_bars: usize,
) -> SignalDecision {
    if series.len() < min_bars {
        return SignalDecision::wait("not enough data");
    }
    let (now, prev) = match (series.latest(), series.previous()) {
        (Some(now), Some(prev)) => (now, prev),
        _ => return SignalDecision::wait("indicators still warming up"),
    };
    evaluate(&now, &prev, trend, cfg)
}

/// Core pure evaluation over two consecutive snapshots.
pub fn evaluate(
    now: &IndicatorSnapshot,
    prev: &IndicatorSnapshot,
    trend: TrendLabel,
    cfg: &SignalConfig,
) -> SignalDecision {
    let p = Predicates::derive(now, prev, cfg);

    let buy = match cfg.policy {
        SignalPolicy::V1 => evaluate_v1_entries(&p, now, trend, cfg),
        SignalPolicy::V2 => evaluate_v2_entries(&p, now, trend, cfg),
    };
    if let Some((signal, reasons)) = buy {
        return SignalDecision {
            signal,
            snapshot: Some(now.clone()),
            reasons,
        };
    }

    // SELL rules apply regardless of trend bullishness.
    if p.crossover_sell && p.macd_bearish {
        return SignalDecision {
            signal: Signal::Sell,
            snapshot: Some(now.clone()),
            reasons: vec!["SMA crossover down".into(), "MACD bearish".into()],
        };
    }
    if trend == TrendLabel::Bearish && p.macd_bearish {
        return SignalDecision {
            signal: Signal::Sell,
            snapshot: Some(now.clone()),
            reasons: vec!["trend BEARISH".into(), "MACD bearish".into()],
        };
    }

    let reasons = hold_reasons(&p, now, trend, cfg);
    SignalDecision {
        signal: Signal::Hold,
        snapshot: Some(now.clone()),
        reasons,
    }
}

// ---------------------------------------------------------------------------
// V1 rule table
// ---------------------------------------------------------------------------

fn evaluate_v1_entries(
    p: &Predicates,
    now: &IndicatorSnapshot,
    trend: TrendLabel,
    _cfg: &SignalConfig,
) -> Option<(Signal, Vec<String>)> {
    if !trend.is_bullish() {
        return None;
    }

    // Strong buy: crossover + oversold + MACD + volume confirmation.
    if p.crossover_buy && p.rsi_oversold && p.macd_bullish && p.volume_ok {
        return Some((
            Signal::StrongBuy,
            vec![
                "SMA crossover up".into(),
                format!("RSI oversold ({:.1})", now.rsi),
                "MACD bullish".into(),
                "volume confirmed".into(),
                format!("trend {trend}"),
            ],
        ));
    }

    // Normal buy: crossover + RSI below ceiling + MACD.
    if p.crossover_buy && p.rsi_below_overbought && p.macd_bullish {
        return Some((
            Signal::Buy,
            vec![
                "SMA crossover up".into(),
                format!("RSI ok ({:.1})", now.rsi),
                "MACD bullish".into(),
                format!("trend {trend}"),
            ],
        ));
    }

    // Bounce buy: lower-band proximity + oversold + MACD.
    if p.near_bb_lower && p.rsi_oversold && p.macd_bullish {
        return Some((
            Signal::Buy,
            vec![
                "near lower band".into(),
                format!("RSI oversold ({:.1})", now.rsi),
                "MACD bullish".into(),
                format!("trend {trend}"),
            ],
        ));
    }

    None
}

// ---------------------------------------------------------------------------
// V2 rule table
// ---------------------------------------------------------------------------

fn evaluate_v2_entries(
    p: &Predicates,
    now: &IndicatorSnapshot,
    trend: TrendLabel,
    cfg: &SignalConfig,
) -> Option<(Signal, Vec<String>)> {
    let rsi_pullback = now.rsi < dec!(50);
    let rsi_pullback_strong = now.rsi < dec!(40);

    if trend == TrendLabel::StrongBullish {
        // Reversal entry: deeply oversold while still below the fast/slow
        // cross, but holding above the slow SMA.
        if !p.already_uptrend
            && p.rsi_deep_oversold
            && p.price_above_sma20
            && (p.macd_bullish || p.volume_ok)
        {
            return Some((
                Signal::StrongBuy,
                vec![
                    "reversal entry".into(),
                    format!("trend {trend}"),
                    format!("RSI deeply oversold ({:.1})", now.rsi),
                    "price above slow SMA".into(),
                ],
            ));
        }

        if p.crossover_buy && p.rsi_oversold && p.macd_bullish && p.volume_ok {
            return Some((
                Signal::StrongBuy,
                vec![
                    "SMA crossover up".into(),
                    format!("RSI oversold ({:.1})", now.rsi),
                    "MACD bullish".into(),
                    "volume confirmed".into(),
                    format!("trend {trend}"),
                ],
            ));
        }

        if p.crossover_buy && now.rsi < cfg.rsi_ceiling_strong_bullish && p.macd_bullish {
            return Some((
                Signal::Buy,
                vec![
                    "SMA crossover up".into(),
                    format!("RSI below widened ceiling ({:.1} < {})", now.rsi, cfg.rsi_ceiling_strong_bullish),
                    "MACD bullish".into(),
                    format!("trend {trend}"),
                ],
            ));
        }

        if p.near_bb_lower && p.rsi_oversold && p.macd_bullish {
            return Some((
                Signal::Buy,
                vec![
                    "near lower band".into(),
                    format!("RSI oversold ({:.1})", now.rsi),
                    "MACD bullish".into(),
                    format!("trend {trend}"),
                ],
            ));
        }

        // Deeply oversold with volume: MACD may lag at bottoms.
        if p.rsi_deep_oversold && p.price_above_sma20 && p.volume_ok {
            if p.macd_bullish {
                return Some((
                    Signal::StrongBuy,
                    vec![
                        "oversold entry".into(),
                        format!("RSI deeply oversold ({:.1})", now.rsi),
                        "MACD bullish".into(),
                        "volume confirmed".into(),
                        format!("trend {trend}"),
                    ],
                ));
            }
            if !p.macd_bearish || (now.macd - now.macd_signal).abs() < dec!(0.1) {
                return Some((
                    Signal::Buy,
                    vec![
                        "oversold entry".into(),
                        format!("RSI deeply oversold ({:.1})", now.rsi),
                        "MACD neutral".into(),
                        "volume confirmed".into(),
                        format!("trend {trend}"),
                    ],
                ));
            }
        }

        // Momentum pullback inside an established uptrend.
        if p.already_uptrend && p.price_above_sma20 && rsi_pullback_strong {
            if p.macd_bullish {
                return Some((
                    Signal::StrongBuy,
                    vec![
                        "momentum pullback".into(),
                        format!("RSI pulled back ({:.1})", now.rsi),
                        "MACD bullish".into(),
                        format!("trend {trend}"),
                    ],
                ));
            }
            if now.rsi < cfg.rsi_oversold {
                return Some((
                    Signal::Buy,
                    vec![
                        "momentum pullback".into(),
                        format!("RSI oversold in uptrend ({:.1})", now.rsi),
                        format!("trend {trend}"),
                    ],
                ));
            }
        }

        if p.already_uptrend && p.price_above_sma20 && rsi_pullback && p.macd_bullish {
            return Some((
                Signal::Buy,
                vec![
                    "momentum pullback".into(),
                    format!("RSI pulled back ({:.1})", now.rsi),
                    "MACD bullish".into(),
                    format!("trend {trend}"),
                ],
            ));
        }
    }

    if trend.is_bullish() {
        // Reversal entry under a (merely) bullish trend needs volume too.
        if !p.already_uptrend && p.rsi_deep_oversold && p.price_above_sma20 && p.volume_ok {
            let signal = if p.macd_bullish {
                Signal::StrongBuy
            } else {
                Signal::Buy
            };
            return Some((
                signal,
                vec![
                    "reversal entry".into(),
                    format!("trend {trend}"),
                    format!("RSI deeply oversold ({:.1})", now.rsi),
                    "price above slow SMA".into(),
                    "volume confirmed".into(),
                ],
            ));
        }

        if p.crossover_buy && p.rsi_oversold && p.macd_bullish && p.volume_ok {
            return Some((
                Signal::StrongBuy,
                vec![
                    "SMA crossover up".into(),
                    format!("RSI oversold ({:.1})", now.rsi),
                    "MACD bullish".into(),
                    "volume confirmed".into(),
                    format!("trend {trend}"),
                ],
            ));
        }

        if p.crossover_buy && now.rsi < cfg.rsi_ceiling_bullish && p.macd_bullish {
            return Some((
                Signal::Buy,
                vec![
                    "SMA crossover up".into(),
                    format!("RSI below widened ceiling ({:.1} < {})", now.rsi, cfg.rsi_ceiling_bullish),
                    "MACD bullish".into(),
                    format!("trend {trend}"),
                ],
            ));
        }

        if p.rsi_deep_oversold && p.price_above_sma20 && p.volume_ok {
            return Some((
                Signal::Buy,
                vec![
                    "oversold entry".into(),
                    format!("RSI deeply oversold ({:.1})", now.rsi),
                    "volume confirmed".into(),
                    format!("trend {trend}"),
                ],
            ));
        }

        if p.already_uptrend && p.price_above_sma20 && rsi_pullback_strong && p.macd_bullish {
            return Some((
                Signal::StrongBuy,
                vec![
                    "momentum pullback".into(),
                    format!("RSI pulled back ({:.1})", now.rsi),
                    "MACD bullish".into(),
                    format!("trend {trend}"),
                ],
            ));
        }

        if p.already_uptrend && p.price_above_sma20 && rsi_pullback && p.macd_bullish {
            return Some((
                Signal::Buy,
                vec![
                    "momentum pullback".into(),
                    format!("RSI pulled back ({:.1})", now.rsi),
                    "MACD bullish".into(),
                    format!("trend {trend}"),
                ],
            ));
        }
    }

    if trend == TrendLabel::Neutral {
        // Oversold entries are permitted on a NEUTRAL trend under V2.
        if p.crossover_buy && p.rsi_oversold && p.macd_bullish && p.volume_ok {
            return Some((
                Signal::Buy,
                vec![
                    "SMA crossover up".into(),
                    format!("RSI oversold ({:.1})", now.rsi),
                    "MACD bullish".into(),
                    "volume confirmed".into(),
                    "trend NEUTRAL (oversold entry)".into(),
                ],
            ));
        }

        if p.near_bb_lower && p.rsi_oversold && p.macd_bullish {
            return Some((
                Signal::Buy,
                vec![
                    "near lower band".into(),
                    format!("RSI oversold ({:.1})", now.rsi),
                    "MACD bullish".into(),
                    "trend NEUTRAL (oversold entry)".into(),
                ],
            ));
        }

        if p.already_uptrend && p.price_above_sma20 && p.rsi_oversold && p.macd_bullish {
            return Some((
                Signal::Buy,
                vec![
                    "momentum pullback".into(),
                    format!("RSI oversold ({:.1})", now.rsi),
                    "MACD bullish".into(),
                    "trend NEUTRAL (oversold entry)".into(),
                ],
            ));
        }
    }

    None
}

// ---------------------------------------------------------------------------
// HOLD justification
// ---------------------------------------------------------------------------

/// Explain which gating predicate failed. Never returns an empty list.
fn hold_reasons(
    p: &Predicates,
    now: &IndicatorSnapshot,
    trend: TrendLabel,
    cfg: &SignalConfig,
) -> Vec<String> {
    let mut reasons = Vec::new();

    match cfg.policy {
        SignalPolicy::V1 => {
            if !trend.is_bullish() {
                reasons.push(format!("trend {trend} (waiting for bullish)"));
            }
            if !p.crossover_buy {
                if p.already_uptrend {
                    reasons.push("uptrend (waiting for entry)".into());
                } else {
                    reasons.push("downtrend (no buy)".into());
                }
            }
            if now.rsi > cfg.rsi_overbought {
                reasons.push(format!("RSI overbought ({:.1})", now.rsi));
            }
            if !p.macd_bullish {
                reasons.push("MACD bearish".into());
            }
        }
        SignalPolicy::V2 => {
            if trend == TrendLabel::Bearish {
                reasons.push("trend BEARISH (blocks entries)".into());
            } else if trend == TrendLabel::Neutral && !p.rsi_oversold {
                reasons.push(format!(
                    "trend NEUTRAL (waiting for RSI < {})",
                    cfg.rsi_oversold
                ));
            } else if trend == TrendLabel::StrongBullish
                && now.rsi > cfg.rsi_ceiling_strong_bullish
            {
                reasons.push(format!("RSI overbought ({:.1})", now.rsi));
            } else if trend == TrendLabel::Bullish && now.rsi > cfg.rsi_ceiling_bullish {
                reasons.push(format!("RSI overbought ({:.1})", now.rsi));
            }
            if !p.crossover_buy {
                if p.already_uptrend {
                    reasons.push("uptrend (waiting for entry)".into());
                } else {
                    reasons.push("downtrend (no buy)".into());
                }
            }
            if !p.macd_bullish {
                reasons.push("MACD bearish".into());
            }
        }
    }

    if reasons.is_empty() {
        reasons.push("no signal".into());
    }
    reasons
}

// ═══════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IndicatorConfig;
    use crate::types::Bar;

    fn signal_config(policy: SignalPolicy) -> SignalConfig {
        SignalConfig {
            policy,
            rsi_oversold: dec!(35),
            rsi_overbought: dec!(70),
            rsi_ceiling_strong_bullish: dec!(80),
            rsi_ceiling_bullish: dec!(75),
            rsi_deep_oversold: dec!(30),
            volume_multiplier: dec!(1.0),
            bb_proximity: dec!(1.02),
        }
    }

    fn snapshot() -> IndicatorSnapshot {
        IndicatorSnapshot {
            close: dec!(100),
            sma_5: dec!(100),
            sma_20: dec!(99),
            ema_9: dec!(100),
            ema_21: dec!(99),
            rsi: dec!(50),
            macd: dec!(0.5),
            macd_signal: dec!(0.2),
            macd_histogram: dec!(0.3),
            bb_upper: dec!(104),
            bb_middle: dec!(100),
            bb_lower: dec!(96),
            atr: dec!(1),
            volume: dec!(1000),
            volume_avg: dec!(900),
        }
    }

    /// now/prev pair forming a fresh bullish SMA crossover.
    fn crossover_pair() -> (IndicatorSnapshot, IndicatorSnapshot) {
        let mut prev = snapshot();
        prev.sma_5 = dec!(98);
        prev.sma_20 = dec!(99);
        let mut now = snapshot();
        now.sma_5 = dec!(100);
        now.sma_20 = dec!(99);
        (now, prev)
    }

    // -- V1 entries ----------------------------------------------------------

    #[test]
    fn test_v1_strong_buy_full_confluence() {
        let cfg = signal_config(SignalPolicy::V1);
        let (mut now, prev) = crossover_pair();
        now.rsi = dec!(25);
        now.volume = dec!(2000);
        now.volume_avg = dec!(1000);

        let d = evaluate(&now, &prev, TrendLabel::StrongBullish, &cfg);
        assert_eq!(d.signal, Signal::StrongBuy);
        assert!(d.reasons.iter().any(|r| r.contains("volume")));
    }

    #[test]
    fn test_v1_normal_buy_without_volume() {
        let cfg = signal_config(SignalPolicy::V1);
        let (mut now, prev) = crossover_pair();
        now.rsi = dec!(55);
        now.volume = dec!(500);
        now.volume_avg = dec!(1000);

        let d = evaluate(&now, &prev, TrendLabel::Bullish, &cfg);
        assert_eq!(d.signal, Signal::Buy);
    }

    #[test]
    fn test_v1_bounce_buy_near_lower_band() {
        let cfg = signal_config(SignalPolicy::V1);
        let mut now = snapshot();
        // No crossover, but price sits on the lower band while oversold.
        now.sma_5 = dec!(97);
        now.sma_20 = dec!(99);
        now.close = dec!(96.5);
        now.rsi = dec!(28);
        let prev = now.clone();

        let d = evaluate(&now, &prev, TrendLabel::Bullish, &cfg);
        assert_eq!(d.signal, Signal::Buy);
        assert!(d.reasons.iter().any(|r| r.contains("lower band")));
    }

    #[test]
    fn test_v1_no_entry_when_trend_not_bullish() {
        let cfg = signal_config(SignalPolicy::V1);
        let (mut now, prev) = crossover_pair();
        now.rsi = dec!(25);
        now.volume = dec!(2000);
        now.volume_avg = dec!(1000);

        let d = evaluate(&now, &prev, TrendLabel::Neutral, &cfg);
        assert_eq!(d.signal, Signal::Hold);
        assert!(d.reasons.iter().any(|r| r.contains("NEUTRAL")));
    }

    #[test]
    fn test_v1_overbought_blocks_buy() {
        let cfg = signal_config(SignalPolicy::V1);
        let (mut now, prev) = crossover_pair();
        now.rsi = dec!(75);

        let d = evaluate(&now, &prev, TrendLabel::Bullish, &cfg);
        assert_eq!(d.signal, Signal::Hold);
        assert!(d.reasons.iter().any(|r| r.contains("overbought")));
    }

    // -- SELL rules ----------------------------------------------------------

    #[test]
    fn test_sell_on_crossover_down_with_macd_bearish() {
        let cfg = signal_config(SignalPolicy::V1);
        let mut prev = snapshot();
        prev.sma_5 = dec!(100);
        prev.sma_20 = dec!(99);
        let mut now = snapshot();
        now.sma_5 = dec!(98);
        now.sma_20 = dec!(99);
        now.macd = dec!(-0.5);
        now.macd_signal = dec!(0.1);

        let d = evaluate(&now, &prev, TrendLabel::Bullish, &cfg);
        assert_eq!(d.signal, Signal::Sell);
    }

    #[test]
    fn test_sell_on_bearish_trend_with_macd_bearish() {
        let cfg = signal_config(SignalPolicy::V1);
        let mut now = snapshot();
        now.sma_5 = dec!(101);
        now.macd = dec!(-0.5);
        now.macd_signal = dec!(0.1);
        let prev = now.clone();

        let d = evaluate(&now, &prev, TrendLabel::Bearish, &cfg);
        assert_eq!(d.signal, Signal::Sell);
    }

    #[test]
    fn test_no_sell_when_macd_bullish_in_bearish_trend() {
        let cfg = signal_config(SignalPolicy::V1);
        let now = snapshot();
        let prev = now.clone();

        let d = evaluate(&now, &prev, TrendLabel::Bearish, &cfg);
        assert_eq!(d.signal, Signal::Hold);
    }

    // -- V2 entries ----------------------------------------------------------

    #[test]
    fn test_v2_widened_rsi_ceiling_under_strong_trend() {
        // RSI 72 blocks V1 but passes the V2 ceiling of 80.
        let (mut now, prev) = crossover_pair();
        now.rsi = dec!(72);

        let v1 = evaluate(&now, &prev, TrendLabel::StrongBullish, &signal_config(SignalPolicy::V1));
        assert_eq!(v1.signal, Signal::Hold);

        let v2 = evaluate(&now, &prev, TrendLabel::StrongBullish, &signal_config(SignalPolicy::V2));
        assert_eq!(v2.signal, Signal::Buy);
    }

    #[test]
    fn test_v2_reversal_entry_without_crossover() {
        let cfg = signal_config(SignalPolicy::V2);
        let mut now = snapshot();
        now.sma_5 = dec!(98); // below slow SMA — no uptrend yet
        now.sma_20 = dec!(99);
        now.close = dec!(99.5); // but price above slow SMA
        now.rsi = dec!(25);
        let prev = now.clone();

        let d = evaluate(&now, &prev, TrendLabel::StrongBullish, &cfg);
        assert_eq!(d.signal, Signal::StrongBuy);
        assert!(d.reasons.iter().any(|r| r.contains("reversal")));
    }

    #[test]
    fn test_v2_neutral_trend_oversold_entry() {
        let cfg = signal_config(SignalPolicy::V2);
        let mut now = snapshot();
        now.sma_5 = dec!(97);
        now.sma_20 = dec!(99);
        now.close = dec!(96.5);
        now.rsi = dec!(28);
        let prev = now.clone();

        let d = evaluate(&now, &prev, TrendLabel::Neutral, &cfg);
        assert_eq!(d.signal, Signal::Buy);
    }

    #[test]
    fn test_v2_momentum_pullback() {
        let cfg = signal_config(SignalPolicy::V2);
        let mut now = snapshot();
        now.sma_5 = dec!(101); // established uptrend, no fresh crossover
        now.sma_20 = dec!(99);
        now.close = dec!(100.5);
        now.rsi = dec!(38);
        let prev = now.clone();

        let d = evaluate(&now, &prev, TrendLabel::StrongBullish, &cfg);
        assert_eq!(d.signal, Signal::StrongBuy);
        assert!(d.reasons.iter().any(|r| r.contains("pullback")));
    }

    #[test]
    fn test_v2_bearish_trend_still_blocks() {
        let cfg = signal_config(SignalPolicy::V2);
        let mut now = snapshot();
        now.rsi = dec!(25);
        let prev = now.clone();

        let d = evaluate(&now, &prev, TrendLabel::Bearish, &cfg);
        assert_ne!(d.signal, Signal::Buy);
        assert_ne!(d.signal, Signal::StrongBuy);
    }

    // -- Determinism / HOLD justification ------------------------------------

    #[test]
    fn test_determinism_same_inputs_same_output() {
        let cfg = signal_config(SignalPolicy::V1);
        let (now, prev) = crossover_pair();
        let a = evaluate(&now, &prev, TrendLabel::Bullish, &cfg);
        let b = evaluate(&now, &prev, TrendLabel::Bullish, &cfg);
        assert_eq!(a.signal, b.signal);
        assert_eq!(a.reasons, b.reasons);
    }

    #[test]
    fn test_hold_reasons_never_empty() {
        let cfg = signal_config(SignalPolicy::V1);
        let now = snapshot();
        let prev = now.clone();
        let d = evaluate(&now, &prev, TrendLabel::Bullish, &cfg);
        assert_eq!(d.signal, Signal::Hold);
        assert!(!d.reasons.is_empty());
    }

    // -- Warm-up short-circuit -----------------------------------------------

    #[test]
    fn test_wait_on_short_series() {
        let cfg = signal_config(SignalPolicy::V1);
        let ind_cfg = IndicatorConfig {
            sma_fast: 5,
            sma_slow: 20,
            sma_trend: 50,
            ema_fast: 9,
            ema_slow: 21,
            rsi_period: 14,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
            bb_period: 20,
            bb_std: dec!(2),
            atr_period: 14,
            volume_period: 20,
            min_bars: 30,
        };
        let bars: Vec<Bar> = (0..10)
            .map(|i| Bar {
                timestamp: i,
                open: dec!(100),
                high: dec!(101),
                low: dec!(99),
                close: dec!(100),
                volume: dec!(1000),
            })
            .collect();
        let series = IndicatorSeries::compute(&bars, &ind_cfg);
        let d = evaluate_series(&series, TrendLabel::Bullish, &cfg, ind_cfg.min_bars);
        assert_eq!(d.signal, Signal::Wait);
        assert_eq!(d.reasons, vec!["not enough data".to_string()]);
    }

    // -- End-to-end scenario: clean crossover at bar 31 ----------------------

    #[test]
    fn test_end_to_end_strong_buy_scenario() {
        // Direct snapshot construction mirroring the scenario: fresh SMA
        // crossover, RSI 25, volume 2x average, STRONG_BULLISH trend.
        let cfg = signal_config(SignalPolicy::V1);
        let (mut now, prev) = crossover_pair();
        now.rsi = dec!(25);
        now.volume = dec!(2000);
        now.volume_avg = dec!(1000);

        let d = evaluate(&now, &prev, TrendLabel::StrongBullish, &cfg);
        assert_eq!(d.signal, Signal::StrongBuy);
    }
}
