use anyhow::{bail, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use super::types::BotConfig;

/// Validate the merged configuration.
///
/// Catches nonsense values at startup rather than mid-cycle: percentage
/// fields outside (0, 1), inverted RSI thresholds, empty symbol lists, and
/// live mode without credentials in the environment.
pub fn validate_config(config: &BotConfig) -> Result<()> {
    let t = &config.trading;

    if t.symbols.is_empty() {
        bail!("trading.symbols must not be empty");
    }
    if t.capital <= Decimal::ZERO {
        bail!("trading.capital must be positive, got {}", t.capital);
    }
    if t.max_positions == 0 {
        bail!("trading.max_positions must be at least 1");
    }
    if t.check_interval_seconds == 0 {
        bail!("trading.check_interval_seconds must be positive");
    }
    parse_hhmm(&t.market_hours.open)?;
    parse_hhmm(&t.market_hours.close)?;
    for w in &t.high_liquidity_windows {
        parse_hhmm(&w.start)?;
        parse_hhmm(&w.end)?;
    }

    let r = &config.risk;
    check_fraction("risk.stop_loss_pct", r.stop_loss_pct)?;
    check_fraction("risk.target_pct", r.target_pct)?;
    check_fraction("risk.trailing_stop_pct", r.trailing_stop_pct)?;
    check_fraction("risk.max_daily_loss_pct", r.max_daily_loss_pct)?;
    if r.atr_stop_multiplier < Decimal::ZERO {
        bail!("risk.atr_stop_multiplier must not be negative");
    }
    check_fraction("risk.sizing.default_fraction", r.sizing.default_fraction)?;
    check_fraction("risk.sizing.max_kelly_fraction", r.sizing.max_kelly_fraction)?;

    let i = &config.indicators;
    for (name, val) in [
        ("sma_fast", i.sma_fast),
        ("sma_slow", i.sma_slow),
        ("sma_trend", i.sma_trend),
        ("ema_fast", i.ema_fast),
        ("ema_slow", i.ema_slow),
        ("rsi_period", i.rsi_period),
        ("macd_fast", i.macd_fast),
        ("macd_slow", i.macd_slow),
        ("macd_signal", i.macd_signal),
        ("bb_period", i.bb_period),
        ("atr_period", i.atr_period),
        ("volume_period", i.volume_period),
    ] {
        if val == 0 {
            bail!("indicators.{name} must be positive");
        }
    }
    if i.sma_fast >= i.sma_slow {
        bail!(
            "indicators.sma_fast ({}) must be smaller than sma_slow ({})",
            i.sma_fast,
            i.sma_slow
        );
    }
    if i.macd_fast >= i.macd_slow {
        bail!("indicators.macd_fast must be smaller than macd_slow");
    }
    if i.min_bars < i.sma_slow {
        bail!(
            "indicators.min_bars ({}) must cover the slow SMA window ({})",
            i.min_bars,
            i.sma_slow
        );
    }

    let s = &config.signals;
    if s.rsi_oversold >= s.rsi_overbought {
        bail!(
            "signals.rsi_oversold ({}) must be below rsi_overbought ({})",
            s.rsi_oversold,
            s.rsi_overbought
        );
    }
    for (name, val) in [
        ("rsi_oversold", s.rsi_oversold),
        ("rsi_overbought", s.rsi_overbought),
        ("rsi_ceiling_strong_bullish", s.rsi_ceiling_strong_bullish),
        ("rsi_ceiling_bullish", s.rsi_ceiling_bullish),
        ("rsi_deep_oversold", s.rsi_deep_oversold),
    ] {
        if val <= Decimal::ZERO || val >= dec!(100) {
            bail!("signals.{name} must be inside (0, 100), got {val}");
        }
    }
    if s.volume_multiplier <= Decimal::ZERO {
        bail!("signals.volume_multiplier must be positive");
    }
    if s.bb_proximity < dec!(1) {
        bail!("signals.bb_proximity must be >= 1.0");
    }

    let l = &config.learning;
    if l.confidence_threshold <= Decimal::ZERO {
        bail!("learning.confidence_threshold must be positive");
    }
    if l.ml.probability_threshold <= Decimal::ZERO || l.ml.probability_threshold >= Decimal::ONE {
        bail!("learning.ml.probability_threshold must be inside (0, 1)");
    }
    if l.ml.learning_rate <= 0.0 {
        bail!("learning.ml.learning_rate must be positive");
    }

    if config.broker.rate_limit.min_interval_ms == 0 {
        bail!("broker.rate_limit.min_interval_ms must be positive (rate limiting is required)");
    }

    // Live trading requires broker credentials in the environment.
    if !t.paper_trading && super::broker_credentials_from_env().is_none() {
        bail!(
            "live mode requires BROKER_API_KEY, BROKER_CLIENT_CODE and BROKER_PIN \
             in the environment"
        );
    }

    Ok(())
}

/// Parse "HH:MM" into minutes since midnight.
pub fn parse_hhmm(value: &str) -> Result<u32> {
    let (h, m) = value
        .split_once(':')
        .ok_or_else(|| anyhow::anyhow!("expected HH:MM, got {value:?}"))?;
    let hours: u32 = h.parse()?;
    let minutes: u32 = m.parse()?;
    if hours > 23 || minutes > 59 {
        bail!("time out of range: {value:?}");
    }
    Ok(hours * 60 + minutes)
}

/// Fraction fields must be strictly inside (0, 1).
fn check_fraction(name: &str, value: Decimal) -> Result<()> {
    if value <= Decimal::ZERO || value >= Decimal::ONE {
        bail!("{name} must be inside (0, 1), got {value}");
    }
    Ok(())
}
