pub mod types;
pub mod validate;

pub use types::*;

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use std::path::Path;
use std::str::FromStr;
use tracing::info;

/// Load and merge all config JSON files into a single [`BotConfig`],
/// then apply environment variable overrides and validate.
///
/// Expected directory layout:
/// ```text
/// config/
///   app.json
///   trading.json
///   risk.json
///   indicators.json
///   signals.json
///   learning.json
///   broker.json
///   market_data.json
///   notifications.json
///   events.json   (optional)
/// ```
///
/// # Environment variable overrides
///
/// | Env Var            | Config Field                      |
/// |--------------------|-----------------------------------|
/// | `PAPER_TRADING`    | `trading.paper_trading`           |
/// | `TRADING_CAPITAL`  | `trading.capital`                 |
/// | `BOT_SYMBOLS`      | `trading.symbols` (comma list)    |
/// | `SIGNAL_POLICY`    | `signals.policy` ("v1"/"v2")      |
/// | `TELEGRAM_ENABLED` | `notifications.telegram.enabled`  |
/// | `ML_ENABLED`       | `learning.ml.enabled`             |
pub fn load_config(config_dir: &Path) -> Result<BotConfig> {
    let read = |name: &str| -> Result<String> {
        let path = config_dir.join(name);
        std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read config file: {}", path.display()))
    };

    let app: AppConfig = serde_json::from_str(&read("app.json")?).context("parsing app.json")?;

    let trading: TradingConfig =
        serde_json::from_str(&read("trading.json")?).context("parsing trading.json")?;

    let risk: RiskConfig = serde_json::from_str(&read("risk.json")?).context("parsing risk.json")?;

    let indicators: IndicatorConfig =
        serde_json::from_str(&read("indicators.json")?).context("parsing indicators.json")?;

    let signals: SignalConfig =
        serde_json::from_str(&read("signals.json")?).context("parsing signals.json")?;

    let learning: LearningConfig =
        serde_json::from_str(&read("learning.json")?).context("parsing learning.json")?;

    let broker: BrokerConfig =
        serde_json::from_str(&read("broker.json")?).context("parsing broker.json")?;

    let market_data: MarketDataConfig =
        serde_json::from_str(&read("market_data.json")?).context("parsing market_data.json")?;

    let notifications: NotificationsConfig =
        serde_json::from_str(&read("notifications.json")?).context("parsing notifications.json")?;

    // Event calendar is optional.
    let events: Option<EventsConfig> = match read("events.json") {
        Ok(contents) => Some(serde_json::from_str(&contents).context("parsing events.json")?),
        Err(_) => None,
    };

    let mut config = BotConfig {
        app,
        trading,
        risk,
        indicators,
        signals,
        learning,
        broker,
        market_data,
        notifications,
        events,
    };

    apply_env_overrides(&mut config);
    validate::validate_config(&config)?;

    Ok(config)
}

/// Read broker credentials from the environment.
///
/// Returns `None` when any of the three is missing — acceptable only in
/// paper-trading mode (enforced by [`validate::validate_config`]).
pub fn broker_credentials_from_env() -> Option<BrokerCredentials> {
    let api_key = env_string("BROKER_API_KEY")?;
    let client_code = env_string("BROKER_CLIENT_CODE")?;
    let pin = env_string("BROKER_PIN")?;
    Some(BrokerCredentials {
        api_key,
        client_code,
        pin,
    })
}

// ---------------------------------------------------------------------------
// Environment variable overrides
// ---------------------------------------------------------------------------

/// Apply environment variable overrides to the loaded config.
///
/// Only non-empty env vars take effect. Parse failures are logged and skipped
/// (the JSON default remains).
fn apply_env_overrides(config: &mut BotConfig) {
    if let Some(val) = env_bool("PAPER_TRADING") {
        info!(paper_trading = val, "env override: PAPER_TRADING");
        config.trading.paper_trading = val;
    }

    if let Some(val) = env_decimal("TRADING_CAPITAL") {
        info!(%val, "env override: TRADING_CAPITAL");
        config.trading.capital = val;
    }

    if let Some(val) = env_string("BOT_SYMBOLS") {
        let symbols: Vec<String> = val
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if !symbols.is_empty() {
            info!(count = symbols.len(), "env override: BOT_SYMBOLS");
            config.trading.symbols = symbols;
        }
    }

    if let Some(val) = env_string("SIGNAL_POLICY") {
        match val.to_lowercase().as_str() {
            "v1" => {
                info!("env override: SIGNAL_POLICY=v1");
                config.signals.policy = SignalPolicy::V1;
            }
            "v2" => {
                info!("env override: SIGNAL_POLICY=v2");
                config.signals.policy = SignalPolicy::V2;
            }
            other => info!(value = other, "ignoring unknown SIGNAL_POLICY"),
        }
    }

    if let Some(val) = env_bool("TELEGRAM_ENABLED") {
        info!(enabled = val, "env override: TELEGRAM_ENABLED");
        config.notifications.telegram.enabled = val;
    }

    if let Some(val) = env_bool("ML_ENABLED") {
        info!(enabled = val, "env override: ML_ENABLED");
        config.learning.ml.enabled = val;
    }
}

/// Read a non-empty env var as a `String`.
fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

/// Read a non-empty env var as a bool (`true`, `1`, `yes` → true).
fn env_bool(key: &str) -> Option<bool> {
    env_string(key).map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
}

/// Read a non-empty env var and parse it as `Decimal`.
fn env_decimal(key: &str) -> Option<Decimal> {
    env_string(key).and_then(|v| Decimal::from_str(&v).ok())
}
