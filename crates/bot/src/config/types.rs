use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;

// ---------------------------------------------------------------------------
// Top-level aggregate
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct BotConfig {
    pub app: AppConfig,
    pub trading: TradingConfig,
    pub risk: RiskConfig,
    pub indicators: IndicatorConfig,
    pub signals: SignalConfig,
    pub learning: LearningConfig,
    pub broker: BrokerConfig,
    pub market_data: MarketDataConfig,
    pub notifications: NotificationsConfig,
    pub events: Option<EventsConfig>,
}

// ---------------------------------------------------------------------------
// app.json
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub logging: LoggingConfig,
    pub data_dir: String,
    pub timezone: TimezoneConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub log_dir: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TimezoneConfig {
    /// Fixed offset from UTC in minutes (IST = 330).
    pub utc_offset_minutes: i32,
}

// ---------------------------------------------------------------------------
// trading.json
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct TradingConfig {
    pub symbols: Vec<String>,
    pub capital: Decimal,
    pub paper_trading: bool,
    pub max_positions: usize,
    pub check_interval_seconds: u64,
    pub market_closed_poll_seconds: u64,
    pub position_sync_interval_seconds: u64,
    pub daily_loss_pause_seconds: u64,
    pub market_hours: MarketHoursConfig,
    pub high_liquidity_windows: Vec<TimeWindowConfig>,
    pub trade_only_high_liquidity: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MarketHoursConfig {
    /// "HH:MM" in the configured timezone.
    pub open: String,
    pub close: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TimeWindowConfig {
    pub start: String,
    pub end: String,
}

// ---------------------------------------------------------------------------
// risk.json
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct RiskConfig {
    pub stop_loss_pct: Decimal,
    pub target_pct: Decimal,
    pub trailing_stop_pct: Decimal,
    /// ATR multiple for the volatility stop; 0 disables it.
    pub atr_stop_multiplier: Decimal,
    pub enable_partial_exit: bool,
    pub max_daily_loss_pct: Decimal,
    pub sizing: SizingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SizingConfig {
    /// Capital fraction used when trade history is too short for Kelly.
    pub default_fraction: Decimal,
    /// Hard ceiling on the raw Kelly fraction before halving.
    pub max_kelly_fraction: Decimal,
    pub min_trades_for_kelly: usize,
}

// ---------------------------------------------------------------------------
// indicators.json
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct IndicatorConfig {
    pub sma_fast: usize,
    pub sma_slow: usize,
    pub sma_trend: usize,
    pub ema_fast: usize,
    pub ema_slow: usize,
    pub rsi_period: usize,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
    pub bb_period: usize,
    pub bb_std: Decimal,
    pub atr_period: usize,
    pub volume_period: usize,
    /// Minimum bars before any signal evaluation.
    pub min_bars: usize,
}

// ---------------------------------------------------------------------------
// signals.json
// ---------------------------------------------------------------------------

/// Which rule table the signal state machine runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalPolicy {
    /// Conservative: crossover-gated entries, bullish trend required.
    V1,
    /// Permissive: widened RSI ceilings, NEUTRAL-trend oversold entries,
    /// reversal and momentum-pullback patterns.
    V2,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SignalConfig {
    pub policy: SignalPolicy,
    pub rsi_oversold: Decimal,
    pub rsi_overbought: Decimal,
    /// V2 ceiling when the combined trend is STRONG_BULLISH.
    pub rsi_ceiling_strong_bullish: Decimal,
    /// V2 ceiling when the combined trend is BULLISH.
    pub rsi_ceiling_bullish: Decimal,
    /// V2 "deeply oversold" threshold for reversal/neutral entries.
    pub rsi_deep_oversold: Decimal,
    pub volume_multiplier: Decimal,
    /// Lower-band proximity factor (1.02 = within 2% above the band).
    pub bb_proximity: Decimal,
}

// ---------------------------------------------------------------------------
// learning.json
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct LearningConfig {
    pub enabled: bool,
    /// Combined-confidence gate for the learning estimator.
    pub confidence_threshold: Decimal,
    /// Closed trades of a signal type required before its win rate is trusted.
    pub min_trades_per_signal: usize,
    pub ml: MlConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MlConfig {
    pub enabled: bool,
    pub min_samples: usize,
    pub probability_threshold: Decimal,
    pub learning_rate: f64,
    pub max_iterations: usize,
}

// ---------------------------------------------------------------------------
// broker.json
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    pub base_url: String,
    pub scrip_master_url: String,
    pub exchange: String,
    pub product_type: String,
    pub order_variety: String,
    pub order_duration: String,
    pub request_timeout_seconds: u64,
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Minimum spacing between broker API calls.
    pub min_interval_ms: u64,
}

/// Secrets read from the environment, never from JSON.
#[derive(Debug, Clone, Default)]
pub struct BrokerCredentials {
    pub api_key: String,
    pub client_code: String,
    pub pin: String,
}

// ---------------------------------------------------------------------------
// market_data.json
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct MarketDataConfig {
    pub base_url: String,
    /// Broker-style symbol suffix, replaced before chart API calls.
    pub symbol_suffix_from: String,
    pub symbol_suffix_to: String,
    pub request_timeout_seconds: u64,
    pub max_attempts: u32,
    pub backoff_base_seconds: u64,
    /// Interval key ("m5"/"h1"/"d1") → chart API range token.
    pub ranges: HashMap<String, String>,
    /// Interval key → cache TTL in seconds.
    pub cache_ttl_seconds: HashMap<String, u64>,
}

// ---------------------------------------------------------------------------
// notifications.json
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct NotificationsConfig {
    pub telegram: TelegramConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramConfig {
    pub enabled: bool,
}

// ---------------------------------------------------------------------------
// events.json (optional)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct EventsConfig {
    /// ISO date → event name.
    pub calendar: HashMap<String, String>,
    /// Event names on which the market is closed / entries are vetoed.
    pub holidays: Vec<String>,
    /// Event names that only warrant a caution warning.
    pub high_volatility: Vec<String>,
}
