//! Risk-adjusted position sizing via the Kelly criterion.
//!
//! Kelly: `f* = (p·b − q) / b` with `p` = win rate, `q = 1 − p`,
//! `b` = payoff ratio (avg win / avg loss). The raw fraction is clamped to a
//! configured ceiling and then halved (half-Kelly) to reduce variance.
//! Below a minimum closed-trade count the estimator is skipped entirely and
//! a configured default fraction is used instead — Kelly estimates from
//! small samples are unreliable and must not be trusted.
//!
//! References:
//!     Kelly (1956), "A New Interpretation of Information Rate".
//!     Thorp (2008), "The Kelly Criterion in Blackjack, Sports Betting,
//!         and the Stock Market".

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::debug;

use crate::config::SizingConfig;
use crate::types::TradeRecord;

/// Win/loss statistics over a set of closed trades.
#[derive(Debug, Clone)]
pub struct TradeStats {
    pub total_trades: usize,
    pub wins: usize,
    pub losses: usize,
    pub win_rate: Decimal,
    pub avg_win: Decimal,
    /// Stored as a positive magnitude.
    pub avg_loss: Decimal,
    pub payoff_ratio: Decimal,
}

/// Kelly-criterion position sizer.
pub struct KellySizer {
    config: SizingConfig,
}

impl KellySizer {
    pub fn new(config: SizingConfig) -> Self {
        Self { config }
    }

    /// Win/loss statistics from closed trades, optionally filtered to one
    /// symbol. `None` when fewer than the configured minimum exist.
    pub fn trade_statistics(
        &self,
        records: &[TradeRecord],
        symbol: Option<&str>,
    ) -> Option<TradeStats> {
        let mut wins: Vec<Decimal> = Vec::new();
        let mut losses: Vec<Decimal> = Vec::new();

        for record in records.iter().filter(|r| r.is_closed_trade()) {
            if let Some(sym) = symbol {
                if record.symbol != sym {
                    continue;
                }
            }
            if record.pnl > Decimal::ZERO {
                wins.push(record.pnl);
            } else if record.pnl < Decimal::ZERO {
                losses.push(record.pnl.abs());
            }
        }

        let total = wins.len() + losses.len();
        if total < self.config.min_trades_for_kelly {
            return None;
        }

        let win_rate = Decimal::from(wins.len() as u64) / Decimal::from(total as u64);
        let avg_win = if wins.is_empty() {
            Decimal::ZERO
        } else {
            wins.iter().copied().sum::<Decimal>() / Decimal::from(wins.len() as u64)
        };
        let avg_loss = if losses.is_empty() {
            Decimal::ONE
        } else {
            losses.iter().copied().sum::<Decimal>() / Decimal::from(losses.len() as u64)
        };
        let payoff_ratio = if avg_loss > Decimal::ZERO {
            avg_win / avg_loss
        } else {
            Decimal::ONE
        };

        Some(TradeStats {
            total_trades: total,
            wins: wins.len(),
            losses: losses.len(),
            win_rate,
            avg_win,
            avg_loss,
            payoff_ratio,
        })
    }

    /// Half-Kelly capital fraction for the given statistics.
    ///
    /// Raw Kelly is clamped to `[0, max_kelly_fraction]` before halving, so
    /// the result is always within `[0, max_kelly_fraction / 2]` — a
    /// degenerate payoff ratio clamps rather than producing NaN/∞.
    pub fn kelly_fraction(&self, stats: &TradeStats) -> Decimal {
        let p = stats.win_rate;
        let q = Decimal::ONE - p;
        let b = stats.payoff_ratio;

        if b <= Decimal::ZERO {
            return Decimal::ZERO;
        }

        let kelly = (p * b - q) / b;
        let clamped = kelly.max(Decimal::ZERO).min(self.config.max_kelly_fraction);
        clamped / dec!(2)
    }

    /// Capital fraction to deploy: half-Kelly when enough history exists,
    /// otherwise the configured default.
    pub fn capital_fraction(&self, records: &[TradeRecord], symbol: Option<&str>) -> Decimal {
        match self.trade_statistics(records, symbol) {
            Some(stats) => {
                let fraction = self.kelly_fraction(&stats);
                debug!(
                    trades = stats.total_trades,
                    win_rate = %stats.win_rate,
                    payoff = %stats.payoff_ratio,
                    %fraction,
                    "kelly fraction computed"
                );
                fraction
            }
            None => self.config.default_fraction,
        }
    }

    /// Number of units to buy.
    ///
    /// `floor(capital × fraction × confidence / price)`, forced to 1 when it
    /// rounds to 0 but the capital still covers one unit — a qualifying
    /// signal is never silently dropped purely due to rounding.
    pub fn position_size(
        &self,
        capital: Decimal,
        price: Decimal,
        records: &[TradeRecord],
        symbol: Option<&str>,
        confidence: Decimal,
    ) -> u32 {
        if price <= Decimal::ZERO || capital <= Decimal::ZERO {
            return 0;
        }

        let fraction = self.capital_fraction(records, symbol);
        let position_value = capital * fraction * confidence;
        let quantity = (position_value / price)
            .floor()
            .to_u32()
            .unwrap_or(0);

        if quantity == 0 && capital >= price {
            return 1;
        }
        quantity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ExitReason, IndicatorSnapshot, Signal, TradeAction, TradeMode, TradeRecord};

    fn sizing_config() -> SizingConfig {
        SizingConfig {
            default_fraction: dec!(0.50),
            max_kelly_fraction: dec!(0.25),
            min_trades_for_kelly: 10,
        }
    }

    fn snapshot() -> IndicatorSnapshot {
        IndicatorSnapshot {
            close: dec!(100),
            sma_5: dec!(100),
            sma_20: dec!(99),
            ema_9: dec!(100),
            ema_21: dec!(99),
            rsi: dec!(40),
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

    fn sell(symbol: &str, pnl: Decimal) -> TradeRecord {
        TradeRecord::from_execution(
            "2026-08-06T10:00:00+05:30".into(),
            symbol,
            TradeAction::Sell,
            1,
            dec!(100),
            Signal::Buy,
            Some(ExitReason::TargetHit),
            pnl,
            &snapshot(),
            TradeMode::Paper,
        )
    }

    fn stats(win_rate: Decimal, payoff: Decimal) -> TradeStats {
        TradeStats {
            total_trades: 20,
            wins: 10,
            losses: 10,
            win_rate,
            avg_win: Decimal::ZERO,
            avg_loss: Decimal::ONE,
            payoff_ratio: payoff,
        }
    }

    // -- Kelly fraction ------------------------------------------------------

    #[test]
    fn test_kelly_zero_win_rate_gives_zero() {
        let sizer = KellySizer::new(sizing_config());
        assert_eq!(sizer.kelly_fraction(&stats(Decimal::ZERO, dec!(2))), Decimal::ZERO);
    }

    #[test]
    fn test_kelly_degenerate_payoff_clamps() {
        let sizer = KellySizer::new(sizing_config());
        assert_eq!(sizer.kelly_fraction(&stats(dec!(0.6), Decimal::ZERO)), Decimal::ZERO);
        assert_eq!(
            sizer.kelly_fraction(&stats(dec!(0.6), dec!(-1))),
            Decimal::ZERO
        );
    }

    #[test]
    fn test_kelly_always_within_half_max() {
        let sizer = KellySizer::new(sizing_config());
        for (p, b) in [
            (dec!(0.9), dec!(5)),
            (dec!(0.99), dec!(10)),
            (dec!(0.5), dec!(1)),
        ] {
            let f = sizer.kelly_fraction(&stats(p, b));
            assert!(f >= Decimal::ZERO && f <= dec!(0.125), "fraction {f} out of range");
        }
    }

    #[test]
    fn test_kelly_scenario_two_thirds_win_rate() {
        // PnL [+50, +30, -20]: win rate 2/3, avg win 40, avg loss 20,
        // payoff 2.0, raw Kelly = (0.667*2 - 0.333)/2 = 0.5, clamped to
        // 0.25, half-Kelly = 0.125.
        let sizer = KellySizer::new(sizing_config());
        let s = TradeStats {
            total_trades: 3,
            wins: 2,
            losses: 1,
            win_rate: dec!(2) / dec!(3),
            avg_win: dec!(40),
            avg_loss: dec!(20),
            payoff_ratio: dec!(2),
        };
        assert_eq!(sizer.kelly_fraction(&s), dec!(0.125));
    }

    // -- Trade statistics ----------------------------------------------------

    #[test]
    fn test_statistics_below_minimum_is_none() {
        let sizer = KellySizer::new(sizing_config());
        let records: Vec<TradeRecord> =
            (0..5).map(|_| sell("NIFTYBEES-EQ", dec!(10))).collect();
        assert!(sizer.trade_statistics(&records, None).is_none());
    }

    #[test]
    fn test_statistics_symbol_filter() {
        let sizer = KellySizer::new(sizing_config());
        let mut records: Vec<TradeRecord> =
            (0..10).map(|_| sell("GOLDBEES-EQ", dec!(10))).collect();
        records.extend((0..10).map(|_| sell("NIFTYBEES-EQ", dec!(-5))));

        let gold = sizer
            .trade_statistics(&records, Some("GOLDBEES-EQ"))
            .unwrap();
        assert_eq!(gold.total_trades, 10);
        assert_eq!(gold.win_rate, Decimal::ONE);
    }

    #[test]
    fn test_statistics_ignores_breakeven_trades() {
        let sizer = KellySizer::new(sizing_config());
        let mut records: Vec<TradeRecord> =
            (0..10).map(|_| sell("X", dec!(10))).collect();
        records.push(sell("X", Decimal::ZERO));
        let s = sizer.trade_statistics(&records, None).unwrap();
        assert_eq!(s.total_trades, 10);
    }

    // -- Position size -------------------------------------------------------

    #[test]
    fn test_size_uses_default_fraction_below_minimum() {
        let sizer = KellySizer::new(sizing_config());
        // No history: fraction 0.5, confidence 1.0 → 1000*0.5/100 = 5 units.
        let qty = sizer.position_size(dec!(1000), dec!(100), &[], None, Decimal::ONE);
        assert_eq!(qty, 5);
    }

    #[test]
    fn test_size_scaled_by_confidence() {
        let sizer = KellySizer::new(sizing_config());
        let qty = sizer.position_size(dec!(1000), dec!(100), &[], None, dec!(0.5));
        assert_eq!(qty, 2); // floor(1000*0.5*0.5/100)
    }

    #[test]
    fn test_size_forces_one_unit_when_affordable() {
        let sizer = KellySizer::new(sizing_config());
        // Fraction*confidence too small for one unit, but capital covers it.
        let qty = sizer.position_size(dec!(150), dec!(100), &[], None, dec!(0.1));
        assert_eq!(qty, 1);
    }

    #[test]
    fn test_size_zero_when_unaffordable() {
        let sizer = KellySizer::new(sizing_config());
        let qty = sizer.position_size(dec!(50), dec!(100), &[], None, Decimal::ONE);
        assert_eq!(qty, 0);
    }
}
