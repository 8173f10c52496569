//! Position lifecycle: FLAT ⇄ OPEN state machine and exit-rule evaluation.
//!
//! Per cycle, every open bot-owned position is marked to the latest price
//! (ratcheting the high-water mark) and run through the exit ladder:
//!
//!   1. effective stop — max(fixed stop, trailing stop), optionally raised
//!      further by a volatility stop (HWM − k×ATR) when that is more
//!      conservative; reported as "trailing stop" when the trailing leg
//!      binds, else "stop loss"
//!   2. target
//!   3. one-shot partial target at half the target distance, exiting half
//!      the quantity
//!   4. tactical SELL signal ("trend reversal")
//!
//! Exactly one reason fires per cycle; stop-loss protection outranks
//! profit-taking. All mutation happens in [`PositionBook::apply_exit`],
//! which is only called after a successful order — a failed order leaves the
//! position untouched so the next cycle retries.
//!
//! Externally-owned positions (synced from the broker) are price-tracked
//! only; exit evaluation is suppressed for them.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use tracing::info;

use crate::config::RiskConfig;
use crate::types::{ExitReason, Position, Signal};

// ═══════════════════════════════════════════════════════════════════════════
// Stop/target levels
// ═══════════════════════════════════════════════════════════════════════════

/// The protective levels for one position at one price point.
#[derive(Debug, Clone)]
pub struct StopLevels {
    pub fixed_stop: Decimal,
    pub trailing_stop: Decimal,
    /// Highest of the stop candidates — only ever tightens, never loosens.
    pub effective_stop: Decimal,
    pub target: Decimal,
    pub partial_target: Decimal,
}

/// Compute the stop/target ladder for a position.
pub fn stop_levels(position: &Position, atr: Decimal, risk: &RiskConfig) -> StopLevels {
    let fixed_stop = position.entry_price * (Decimal::ONE - risk.stop_loss_pct);
    let trailing_stop = position.highest_price * (Decimal::ONE - risk.trailing_stop_pct);
    let mut effective_stop = fixed_stop.max(trailing_stop);

    // Volatility stop only applies when it is more conservative (higher).
    if atr > Decimal::ZERO && risk.atr_stop_multiplier > Decimal::ZERO {
        let atr_stop = position.highest_price - atr * risk.atr_stop_multiplier;
        effective_stop = effective_stop.max(atr_stop);
    }

    let target = position.entry_price * (Decimal::ONE + risk.target_pct);
    let partial_target = position.entry_price * (Decimal::ONE + risk.target_pct * dec!(0.5));

    StopLevels {
        fixed_stop,
        trailing_stop,
        effective_stop,
        target,
        partial_target,
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Exit evaluation
// ═══════════════════════════════════════════════════════════════════════════

/// What the exit ladder decided for this cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitPlan {
    pub reason: ExitReason,
    /// Units to sell; less than the position quantity only for partials.
    pub quantity: u32,
}

/// Evaluate the exit ladder for a bot-owned position at the current price.
///
/// `signal` is the raw tactical signal for the symbol this cycle. Returns
/// `None` when the position should be held. Externally-owned positions are
/// never exited.
pub fn evaluate_exit(
    position: &Position,
    price: Decimal,
    atr: Decimal,
    signal: Signal,
    risk: &RiskConfig,
) -> Option<ExitPlan> {
    if !position.bot_owned {
        return None;
    }

    let levels = stop_levels(position, atr, risk);

    if price <= levels.effective_stop {
        let reason = if levels.trailing_stop > levels.fixed_stop {
            ExitReason::TrailingStop
        } else {
            ExitReason::StopLoss
        };
        return Some(ExitPlan {
            reason,
            quantity: position.quantity,
        });
    }

    if price >= levels.target {
        return Some(ExitPlan {
            reason: ExitReason::TargetHit,
            quantity: position.quantity,
        });
    }

    if risk.enable_partial_exit
        && !position.partial_exit_done
        && price >= levels.partial_target
        && position.quantity > 1
    {
        return Some(ExitPlan {
            reason: ExitReason::PartialTarget,
            quantity: (position.quantity / 2).max(1),
        });
    }

    if signal == Signal::Sell {
        return Some(ExitPlan {
            reason: ExitReason::TrendReversal,
            quantity: position.quantity,
        });
    }

    None
}

// ═══════════════════════════════════════════════════════════════════════════
// PositionBook
// ═══════════════════════════════════════════════════════════════════════════

/// In-memory map of open positions, at most one per symbol.
#[derive(Debug, Default)]
pub struct PositionBook {
    positions: HashMap<String, Position>,
}

impl PositionBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, symbol: &str) -> Option<&Position> {
        self.positions.get(symbol)
    }

    pub fn get_mut(&mut self, symbol: &str) -> Option<&mut Position> {
        self.positions.get_mut(symbol)
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.positions.contains_key(symbol)
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Position> {
        self.positions.values()
    }

    pub fn symbols(&self) -> Vec<String> {
        self.positions.keys().cloned().collect()
    }

    /// Number of bot-owned positions (the configured maximum applies to
    /// these, not to adopted external holdings).
    pub fn bot_owned_count(&self) -> usize {
        self.positions.values().filter(|p| p.bot_owned).count()
    }

    /// FLAT → OPEN. Replaces any stale entry for the symbol.
    pub fn open(&mut self, position: Position) {
        info!(
            symbol = %position.symbol,
            quantity = position.quantity,
            entry = %position.entry_price,
            signal = %position.signal_type,
            "position opened"
        );
        self.positions.insert(position.symbol.clone(), position);
    }

    /// Adopt a position observed at the broker but not opened by this
    /// process. Existing bot state for the symbol is authoritative and is
    /// only marked to the broker's price.
    pub fn adopt_external(&mut self, position: Position) {
        match self.positions.get_mut(&position.symbol) {
            Some(existing) => {
                existing.update_price(position.current_price);
                if !existing.bot_owned && existing.quantity != position.quantity {
                    existing.quantity = position.quantity;
                }
            }
            None => {
                info!(
                    symbol = %position.symbol,
                    quantity = position.quantity,
                    entry = %position.entry_price,
                    "external position adopted"
                );
                self.positions.insert(position.symbol.clone(), position);
            }
        }
    }

    /// Drop externally-owned positions no longer present at the broker.
    /// Bot-owned positions are authoritative from our own memory and are
    /// kept regardless.
    pub fn prune_external(&mut self, broker_symbols: &[String]) -> Vec<String> {
        let removed: Vec<String> = self
            .positions
            .iter()
            .filter(|(symbol, p)| !p.bot_owned && !broker_symbols.contains(symbol))
            .map(|(symbol, _)| symbol.clone())
            .collect();
        for symbol in &removed {
            info!(symbol = %symbol, "external position closed at broker, dropping");
            self.positions.remove(symbol);
        }
        removed
    }

    /// Apply a successful exit order to the book.
    ///
    /// Full exits remove the position (OPEN → FLAT). Partial exits reduce
    /// the quantity in place, set the one-shot flag, and recompute the entry
    /// price as the weighted average of the remaining shares — algebraically
    /// the original entry price, since all shares were bought at one fill.
    /// Returns the realized PnL of the exited quantity.
    pub fn apply_exit(&mut self, symbol: &str, plan: &ExitPlan, price: Decimal) -> Option<Decimal> {
        let position = self.positions.get_mut(symbol)?;
        let pnl = (price - position.entry_price) * Decimal::from(plan.quantity);

        if plan.quantity >= position.quantity {
            info!(
                symbol,
                reason = %plan.reason,
                quantity = plan.quantity,
                %pnl,
                "position closed"
            );
            self.positions.remove(symbol);
        } else {
            let remaining = position.quantity - plan.quantity;
            let remaining_value = Decimal::from(remaining) * position.entry_price;
            position.entry_price = remaining_value / Decimal::from(remaining);
            position.quantity = remaining;
            position.partial_exit_done = true;
            info!(
                symbol,
                reason = %plan.reason,
                sold = plan.quantity,
                remaining,
                %pnl,
                "partial exit applied"
            );
        }

        Some(pnl)
    }

    /// Snapshot for persistence.
    pub fn to_vec(&self) -> Vec<Position> {
        let mut positions: Vec<Position> = self.positions.values().cloned().collect();
        positions.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        positions
    }

    /// Restore from persistence.
    pub fn load(&mut self, positions: Vec<Position>) {
        for position in positions {
            self.positions.insert(position.symbol.clone(), position);
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SizingConfig;

    fn risk() -> RiskConfig {
        RiskConfig {
            stop_loss_pct: dec!(0.05),
            target_pct: dec!(0.08),
            trailing_stop_pct: dec!(0.03),
            atr_stop_multiplier: Decimal::ZERO,
            enable_partial_exit: true,
            max_daily_loss_pct: dec!(0.10),
            sizing: SizingConfig {
                default_fraction: dec!(0.5),
                max_kelly_fraction: dec!(0.25),
                min_trades_for_kelly: 10,
            },
        }
    }

    fn position(entry: Decimal, quantity: u32) -> Position {
        Position::open(
            "NIFTYBEES-EQ",
            quantity,
            entry,
            "2026-08-06T10:00:00+05:30".into(),
            Signal::Buy,
            dec!(0.9),
        )
    }

    // -- Stop levels ---------------------------------------------------------

    #[test]
    fn test_effective_stop_is_max_of_fixed_and_trailing() {
        let mut p = position(dec!(100), 10);
        let levels = stop_levels(&p, Decimal::ZERO, &risk());
        // Fresh position: trailing = 97 > fixed = 95.
        assert_eq!(levels.fixed_stop, dec!(95));
        assert_eq!(levels.trailing_stop, dec!(97));
        assert_eq!(levels.effective_stop, dec!(97));

        p.update_price(dec!(110));
        let levels = stop_levels(&p, Decimal::ZERO, &risk());
        assert_eq!(levels.trailing_stop, dec!(106.7));
        assert_eq!(levels.effective_stop, dec!(106.7));
    }

    #[test]
    fn test_trailing_stop_monotonically_non_decreasing() {
        let mut p = position(dec!(100), 10);
        let mut last = Decimal::ZERO;
        for price in [100, 104, 108, 112, 109, 111, 107] {
            p.update_price(Decimal::from(price));
            let levels = stop_levels(&p, Decimal::ZERO, &risk());
            assert!(
                levels.effective_stop >= last,
                "effective stop regressed at price {price}"
            );
            assert!(levels.effective_stop >= levels.fixed_stop);
            last = levels.effective_stop;
        }
    }

    #[test]
    fn test_atr_stop_only_tightens() {
        let mut p = position(dec!(100), 10);
        p.update_price(dec!(110));
        let mut r = risk();
        r.atr_stop_multiplier = dec!(2);

        // Wide ATR: 110 - 2*5 = 100 < 106.7 → percentage stop binds.
        let levels = stop_levels(&p, dec!(5), &r);
        assert_eq!(levels.effective_stop, dec!(106.7));

        // Tight ATR: 110 - 2*1 = 108 > 106.7 → volatility stop binds.
        let levels = stop_levels(&p, dec!(1), &r);
        assert_eq!(levels.effective_stop, dec!(108));
    }

    // -- Exit ladder ---------------------------------------------------------

    #[test]
    fn test_trailing_stop_exit_scenario() {
        // entry 100, stop 5%, trailing 3%; path 100→110→106: trailing stop
        // 110×0.97 = 106.7 > fixed 95, so the exit fires at 106 with the
        // trailing-stop reason.
        let mut p = position(dec!(100), 10);
        p.update_price(dec!(110));
        p.update_price(dec!(106));

        let plan = evaluate_exit(&p, dec!(106), Decimal::ZERO, Signal::Hold, &risk()).unwrap();
        assert_eq!(plan.reason, ExitReason::TrailingStop);
        assert_eq!(plan.quantity, 10);
    }

    #[test]
    fn test_fixed_stop_reason_when_trailing_not_binding() {
        // No rally: trailing (97) > fixed (95); gap below both → trailing
        // reason only when it exceeds fixed. Force the fixed-stop label by
        // tightening trailing below fixed: use a wide trailing pct.
        let mut r = risk();
        r.trailing_stop_pct = dec!(0.10); // trailing = 90 < fixed = 95
        let p = position(dec!(100), 10);
        let plan = evaluate_exit(&p, dec!(94), Decimal::ZERO, Signal::Hold, &r).unwrap();
        assert_eq!(plan.reason, ExitReason::StopLoss);
    }

    #[test]
    fn test_target_exit() {
        let p = position(dec!(100), 10);
        let plan = evaluate_exit(&p, dec!(108.5), Decimal::ZERO, Signal::Hold, &risk()).unwrap();
        assert_eq!(plan.reason, ExitReason::TargetHit);
        assert_eq!(plan.quantity, 10);
    }

    #[test]
    fn test_partial_target_half_quantity() {
        let p = position(dec!(100), 9);
        // Partial target at 104; below full target 108.
        let plan = evaluate_exit(&p, dec!(104.5), Decimal::ZERO, Signal::Hold, &risk()).unwrap();
        assert_eq!(plan.reason, ExitReason::PartialTarget);
        assert_eq!(plan.quantity, 4);
    }

    #[test]
    fn test_partial_fires_at_most_once() {
        let mut p = position(dec!(100), 10);
        p.partial_exit_done = true;
        let plan = evaluate_exit(&p, dec!(104.5), Decimal::ZERO, Signal::Hold, &risk());
        assert!(plan.is_none());
    }

    #[test]
    fn test_partial_skipped_for_single_unit() {
        let p = position(dec!(100), 1);
        let plan = evaluate_exit(&p, dec!(104.5), Decimal::ZERO, Signal::Hold, &risk());
        assert!(plan.is_none());
    }

    #[test]
    fn test_sell_signal_trend_reversal() {
        let p = position(dec!(100), 10);
        let plan = evaluate_exit(&p, dec!(101), Decimal::ZERO, Signal::Sell, &risk()).unwrap();
        assert_eq!(plan.reason, ExitReason::TrendReversal);
    }

    #[test]
    fn test_stop_outranks_sell_signal() {
        let mut p = position(dec!(100), 10);
        p.update_price(dec!(110));
        let plan = evaluate_exit(&p, dec!(94), Decimal::ZERO, Signal::Sell, &risk()).unwrap();
        assert_eq!(plan.reason, ExitReason::TrailingStop);
    }

    #[test]
    fn test_external_position_never_exited() {
        let mut p = position(dec!(100), 10);
        p.bot_owned = false;
        // Deep under the stop and a SELL signal — still held.
        let plan = evaluate_exit(&p, dec!(80), Decimal::ZERO, Signal::Sell, &risk());
        assert!(plan.is_none());
    }

    #[test]
    fn test_hold_inside_all_bands() {
        let p = position(dec!(100), 10);
        let plan = evaluate_exit(&p, dec!(101), Decimal::ZERO, Signal::Hold, &risk());
        assert!(plan.is_none());
    }

    // -- PositionBook --------------------------------------------------------

    #[test]
    fn test_book_one_position_per_symbol() {
        let mut book = PositionBook::new();
        book.open(position(dec!(100), 10));
        book.open(position(dec!(105), 5));
        assert_eq!(book.len(), 1);
        assert_eq!(book.get("NIFTYBEES-EQ").unwrap().quantity, 5);
    }

    #[test]
    fn test_apply_full_exit_removes_position() {
        let mut book = PositionBook::new();
        book.open(position(dec!(100), 10));
        let plan = ExitPlan {
            reason: ExitReason::TargetHit,
            quantity: 10,
        };
        let pnl = book.apply_exit("NIFTYBEES-EQ", &plan, dec!(108)).unwrap();
        assert_eq!(pnl, dec!(80));
        assert!(book.is_empty());
    }

    #[test]
    fn test_apply_partial_exit_reduces_in_place() {
        let mut book = PositionBook::new();
        book.open(position(dec!(100), 10));
        let plan = ExitPlan {
            reason: ExitReason::PartialTarget,
            quantity: 5,
        };
        let pnl = book.apply_exit("NIFTYBEES-EQ", &plan, dec!(104)).unwrap();
        assert_eq!(pnl, dec!(20));

        let remaining = book.get("NIFTYBEES-EQ").unwrap();
        assert_eq!(remaining.quantity, 5);
        assert!(remaining.partial_exit_done);
        // Weighted-average repricing reduces to the original entry price.
        assert_eq!(remaining.entry_price, dec!(100));
    }

    #[test]
    fn test_adopt_external_keeps_bot_state() {
        let mut book = PositionBook::new();
        book.open(position(dec!(100), 10));

        let mut external = position(dec!(102), 10);
        external.bot_owned = false;
        external.current_price = dec!(103);
        book.adopt_external(external);

        let p = book.get("NIFTYBEES-EQ").unwrap();
        assert!(p.bot_owned, "bot state is authoritative");
        assert_eq!(p.entry_price, dec!(100));
        assert_eq!(p.current_price, dec!(103));
    }

    #[test]
    fn test_prune_external_keeps_bot_positions() {
        let mut book = PositionBook::new();
        book.open(position(dec!(100), 10));
        let mut external = Position::open(
            "GOLDBEES-EQ",
            4,
            dec!(80),
            "2026-08-05T11:00:00+05:30".into(),
            Signal::Buy,
            Decimal::ONE,
        );
        external.bot_owned = false;
        book.adopt_external(external);

        let removed = book.prune_external(&[]);
        assert_eq!(removed, vec!["GOLDBEES-EQ".to_string()]);
        assert!(book.contains("NIFTYBEES-EQ"));
    }

    #[test]
    fn test_bot_owned_count_excludes_external() {
        let mut book = PositionBook::new();
        book.open(position(dec!(100), 10));
        let mut external = Position::open(
            "GOLDBEES-EQ",
            4,
            dec!(80),
            "2026-08-05T11:00:00+05:30".into(),
            Signal::Buy,
            Decimal::ONE,
        );
        external.bot_owned = false;
        book.adopt_external(external);

        assert_eq!(book.len(), 2);
        assert_eq!(book.bot_owned_count(), 1);
    }
}
