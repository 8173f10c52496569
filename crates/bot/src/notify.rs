//! Telegram alert channel.
//!
//! Every alert is best-effort: delivery failure is logged and reported as
//! `false`, never propagated — losing a notification must not affect the
//! trading loop.

use std::time::Duration;

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::json;
use tracing::{debug, warn};

use crate::config::TelegramConfig;
use crate::types::{ExitReason, IndicatorSnapshot, Position, Signal};

const TELEGRAM_API: &str = "https://api.telegram.org";

/// Telegram notifier. Disabled or unconfigured instances swallow sends.
pub struct Notifier {
    client: reqwest::Client,
    enabled: bool,
    bot_token: Option<String>,
    chat_id: Option<String>,
}

impl Notifier {
    /// Build from config; the token and chat id come from the environment
    /// (`TELEGRAM_BOT_TOKEN`, `TELEGRAM_CHAT_ID`), never from JSON.
    pub fn from_env(config: &TelegramConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("failed to build notifier HTTP client")?;
        Ok(Self {
            client,
            enabled: config.enabled,
            bot_token: std::env::var("TELEGRAM_BOT_TOKEN").ok().filter(|v| !v.is_empty()),
            chat_id: std::env::var("TELEGRAM_CHAT_ID").ok().filter(|v| !v.is_empty()),
        })
    }

    #[cfg(test)]
    fn disabled() -> Self {
        Self {
            client: reqwest::Client::new(),
            enabled: false,
            bot_token: None,
            chat_id: None,
        }
    }

    /// Send a raw HTML-formatted message. Returns whether delivery succeeded.
    pub async fn send(&self, text: &str) -> bool {
        if !self.enabled {
            debug!(preview = %text.lines().next().unwrap_or(""), "telegram disabled, alert dropped");
            return false;
        }
        let (token, chat_id) = match (&self.bot_token, &self.chat_id) {
            (Some(t), Some(c)) => (t, c),
            _ => {
                warn!("telegram enabled but TELEGRAM_BOT_TOKEN/TELEGRAM_CHAT_ID not set");
                return false;
            }
        };

        let url = format!("{TELEGRAM_API}/bot{token}/sendMessage");
        let payload = json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": "HTML",
        });

        match self.client.post(&url).json(&payload).send().await {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                warn!(status = %response.status(), "telegram send rejected");
                false
            }
            Err(e) => {
                warn!(error = %e, "telegram send failed");
                false
            }
        }
    }

    // -----------------------------------------------------------------------
    // Alert builders + senders
    // -----------------------------------------------------------------------

    pub async fn startup(&self, capital: Decimal, symbols: &[String], paper: bool) -> bool {
        let mode = if paper { "PAPER TRADING" } else { "LIVE TRADING" };
        self.send(&format!(
            "<b>BOT STARTED</b>\n\
             capital: {capital}\n\
             symbols: {}\n\
             mode: {mode}\n\n\
             monitoring the market",
            symbols.join(", ")
        ))
        .await
    }

    pub async fn buy_executed(
        &self,
        symbol: &str,
        quantity: u32,
        price: Decimal,
        signal: Signal,
        snapshot: &IndicatorSnapshot,
        stop: Decimal,
        target: Decimal,
    ) -> bool {
        self.send(&format!(
            "<b>BUY EXECUTED</b>\n\
             {symbol}: {quantity} units @ {price}\n\
             signal: {signal}\n\
             RSI {:.1} | MACD {:.3} | SMA5 {:.2} | SMA20 {:.2}\n\
             stop: {stop:.2} | target: {target:.2}",
            snapshot.rsi, snapshot.macd, snapshot.sma_5, snapshot.sma_20
        ))
        .await
    }

    pub async fn sell_executed(
        &self,
        symbol: &str,
        quantity: u32,
        entry_price: Decimal,
        exit_price: Decimal,
        reason: ExitReason,
        pnl: Decimal,
    ) -> bool {
        let pnl_pct = if entry_price.is_zero() {
            Decimal::ZERO
        } else {
            (exit_price - entry_price) / entry_price * dec!(100)
        };
        self.send(&format!(
            "<b>SELL EXECUTED</b>\n\
             {symbol}: {quantity} units\n\
             entry {entry_price} → exit {exit_price}\n\
             reason: {}\n\
             pnl: {pnl:.2} ({pnl_pct:+.2}%)",
            reason.describe()
        ))
        .await
    }

    pub async fn trade_skipped(
        &self,
        symbol: &str,
        signal: Signal,
        learn_confidence: Decimal,
        ml_probability: f64,
        reason: &str,
    ) -> bool {
        self.send(&format!(
            "<b>TRADE SKIPPED</b>\n\
             {symbol} ({signal})\n\
             learning confidence: {learn_confidence:.2}\n\
             ml probability: {ml_probability:.2}\n\
             {reason}"
        ))
        .await
    }

    pub async fn position_update(&self, position: &Position) -> bool {
        self.send(&format!(
            "<b>POSITION UPDATE</b>\n\
             {}: {} units @ {}\n\
             current: {}\n\
             unrealized: {:.2} ({:+.2}%)",
            position.symbol,
            position.quantity,
            position.entry_price,
            position.current_price,
            position.unrealized_pnl(),
            position.unrealized_pnl_pct()
        ))
        .await
    }

    pub async fn daily_summary(
        &self,
        date: &str,
        trades: usize,
        daily_pnl: Decimal,
        total_pnl: Decimal,
        open_positions: usize,
    ) -> bool {
        self.send(&format!(
            "<b>DAILY SUMMARY</b> {date}\n\
             trades: {trades}\n\
             day pnl: {daily_pnl:.2}\n\
             total pnl: {total_pnl:.2}\n\
             open positions: {open_positions}"
        ))
        .await
    }

    pub async fn overnight_positions(&self, positions: &[Position]) -> bool {
        if positions.is_empty() {
            return false;
        }
        let mut lines = vec!["<b>OVERNIGHT POSITIONS</b>".to_string()];
        for p in positions {
            lines.push(format!(
                "{}: {} @ {} (pnl {:.2})",
                p.symbol,
                p.quantity,
                p.entry_price,
                p.unrealized_pnl()
            ));
        }
        self.send(&lines.join("\n")).await
    }

    pub async fn market_closed(&self, reason: &str) -> bool {
        self.send(&format!(
            "<b>MARKET CLOSED</b>\n{reason}\nwaiting for the next session"
        ))
        .await
    }

    pub async fn market_open(&self) -> bool {
        self.send("<b>MARKET OPEN</b>\nactively monitoring for signals")
            .await
    }

    pub async fn error(&self, message: &str) -> bool {
        self.send(&format!("<b>ERROR</b>\n{message}\ncheck the bot logs"))
            .await
    }
}
