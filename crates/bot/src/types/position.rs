use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::signal::Signal;

/// A currently held long position in one symbol.
///
/// At most one position exists per symbol. Bot-opened positions carry the
/// full exit-rule lifecycle; positions adopted from the brokerage account
/// (`bot_owned == false`) are tracked for price/PnL display only and are
/// never auto-exited.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub quantity: u32,
    #[serde(with = "rust_decimal::serde::str")]
    pub entry_price: Decimal,
    /// Running high-water mark since entry — drives the trailing stop.
    #[serde(with = "rust_decimal::serde::str")]
    pub highest_price: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub current_price: Decimal,
    /// RFC 3339 entry timestamp.
    pub entry_time: String,
    /// Signal that opened the position.
    pub signal_type: Signal,
    /// Combined confidence at entry.
    #[serde(with = "rust_decimal::serde::str")]
    pub confidence: Decimal,
    /// `true` when this process opened the position; `false` when it was
    /// adopted from the broker account.
    #[serde(default = "default_bot_owned")]
    pub bot_owned: bool,
    /// Set once the one-shot partial take-profit has fired.
    #[serde(default)]
    pub partial_exit_done: bool,
}

fn default_bot_owned() -> bool {
    true
}

impl Position {
    /// Open a new bot-owned position at the fill price.
    pub fn open(
        symbol: &str,
        quantity: u32,
        fill_price: Decimal,
        entry_time: String,
        signal_type: Signal,
        confidence: Decimal,
    ) -> Self {
        Self {
            symbol: symbol.to_string(),
            quantity,
            entry_price: fill_price,
            highest_price: fill_price,
            current_price: fill_price,
            entry_time,
            signal_type,
            confidence,
            bot_owned: true,
            partial_exit_done: false,
        }
    }

    /// Update the mark price and ratchet the high-water mark.
    pub fn update_price(&mut self, price: Decimal) {
        self.current_price = price;
        if price > self.highest_price {
            self.highest_price = price;
        }
    }

    /// Unrealized PnL at the current mark.
    pub fn unrealized_pnl(&self) -> Decimal {
        (self.current_price - self.entry_price) * Decimal::from(self.quantity)
    }

    /// Unrealized PnL as a percentage of the entry price.
    pub fn unrealized_pnl_pct(&self) -> Decimal {
        if self.entry_price.is_zero() {
            return Decimal::ZERO;
        }
        (self.current_price - self.entry_price) / self.entry_price * Decimal::from(100u32)
    }
}
