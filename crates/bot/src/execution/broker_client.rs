//! Rate-limited REST brokerage client.
//!
//! Every call passes through a minimum-spacing rate limiter. Paper-trading
//! mode short-circuits all network I/O.
//!
//! Contract at this boundary (the lifecycle manager's fail-safe depends on
//! it): `place_order` returns `Some(order_id)` on success and `None` on any
//! failure — it never raises across the boundary. Session-expiry responses
//! trigger one re-login and one retry of the original call; business-rule
//! rejections are reported with actionable guidance and are never retried
//! automatically (retrying on a tight loop would risk duplicate fills).

use std::collections::HashMap;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::{Mutex, RwLock};
use tracing::{error, info, warn};

use crate::config::{BrokerConfig, BrokerCredentials};
use crate::errors::BotError;
use crate::types::{Position, Signal, TradeAction};

/// Response codes the broker uses for session and business-rule failures.
const CODE_SESSION_EXPIRED: &str = "AG8001";
const CODE_EDIS_REQUIRED: &str = "AB1007";
const CODE_CAUTIONARY_LISTING: &str = "AB4036";

/// Generic broker response envelope.
#[derive(Debug, Deserialize)]
struct BrokerResponse {
    status: bool,
    #[serde(default)]
    message: String,
    #[serde(default)]
    error_code: String,
    #[serde(default)]
    data: Value,
}

/// An order rejection that needs operator action rather than a retry.
#[derive(Debug, Clone)]
pub struct OrderRejection {
    pub code: String,
    pub message: String,
    /// Human guidance surfaced via notification.
    pub guidance: String,
}

/// Outcome of a placement attempt, for the strategy layer's reporting.
#[derive(Debug, Clone)]
pub enum OrderOutcome {
    Placed(String),
    Rejected(OrderRejection),
    Failed(String),
}

impl OrderOutcome {
    pub fn order_id(&self) -> Option<&str> {
        match self {
            Self::Placed(id) => Some(id),
            _ => None,
        }
    }

    pub fn is_placed(&self) -> bool {
        matches!(self, Self::Placed(_))
    }
}

struct Session {
    token: String,
    logged_in_at: Instant,
}

/// REST brokerage client with built-in rate limiting.
pub struct BrokerClient {
    client: reqwest::Client,
    config: BrokerConfig,
    credentials: Option<BrokerCredentials>,
    paper_trading: bool,
    session: RwLock<Option<Session>>,
    /// Symbol → exchange token, from the scrip master.
    tokens: RwLock<HashMap<String, String>>,
    last_request: Mutex<Option<Instant>>,
}

impl BrokerClient {
    pub fn new(
        config: BrokerConfig,
        credentials: Option<BrokerCredentials>,
        paper_trading: bool,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()
            .context("failed to build broker HTTP client")?;
        Ok(Self {
            client,
            config,
            credentials,
            paper_trading,
            session: RwLock::new(None),
            tokens: RwLock::new(HashMap::new()),
            last_request: Mutex::new(None),
        })
    }

    /// Enforce the minimum spacing between broker API calls.
    async fn rate_limit(&self) {
        let min_interval = Duration::from_millis(self.config.rate_limit.min_interval_ms);
        let mut last = self.last_request.lock().await;
        if let Some(at) = *last {
            let elapsed = at.elapsed();
            if elapsed < min_interval {
                tokio::time::sleep(min_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    // -----------------------------------------------------------------------
    // Session
    // -----------------------------------------------------------------------

    /// Authenticate and cache the session token.
    ///
    /// Paper mode always succeeds without touching the network. A `false`
    /// return at boot is the only fatal failure in the system.
    pub async fn login(&self) -> bool {
        if self.paper_trading {
            info!("paper trading mode active — skipping broker login");
            return true;
        }

        let credentials = match &self.credentials {
            Some(c) => c,
            None => {
                error!("broker credentials missing — cannot log in");
                return false;
            }
        };

        self.rate_limit().await;
        let url = format!("{}/session/login", self.config.base_url);
        let body = json!({
            "api_key": credentials.api_key,
            "client_code": credentials.client_code,
            "pin": credentials.pin,
        });

        let response = match self.client.post(&url).json(&body).send().await {
            Ok(r) => r,
            Err(e) => {
                error!(error = %e, "broker login request failed");
                return false;
            }
        };

        let parsed: BrokerResponse = match response.json().await {
            Ok(p) => p,
            Err(e) => {
                error!(error = %e, "broker login response unparseable");
                return false;
            }
        };

        if !parsed.status {
            error!(message = %parsed.message, "broker login rejected");
            return false;
        }

        let token = parsed
            .data
            .get("token")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        if token.is_empty() {
            error!("broker login returned no token");
            return false;
        }

        *self.session.write().await = Some(Session {
            token,
            logged_in_at: Instant::now(),
        });
        info!("broker login successful");
        true
    }

    async fn session_token(&self) -> Option<String> {
        self.session.read().await.as_ref().map(|s| s.token.clone())
    }

    /// Re-login when the cached session is older than 12 hours.
    async fn ensure_session(&self) -> bool {
        if self.paper_trading {
            return true;
        }
        let stale = {
            let session = self.session.read().await;
            match session.as_ref() {
                Some(s) => s.logged_in_at.elapsed() > Duration::from_secs(12 * 3600),
                None => true,
            }
        };
        if stale {
            info!("broker session missing or stale, re-authenticating");
            return self.login().await;
        }
        true
    }

    // -----------------------------------------------------------------------
    // Scrip master
    // -----------------------------------------------------------------------

    /// Download the scrip master and build the symbol → token map.
    ///
    /// Failure degrades to an empty map with a warning; orders for unknown
    /// symbols then fail individually.
    pub async fn load_scrip_master(&self) {
        if self.paper_trading {
            return;
        }

        self.rate_limit().await;
        let result = async {
            let response = self
                .client
                .get(&self.config.scrip_master_url)
                .send()
                .await?;
            response.json::<Vec<Value>>().await
        }
        .await;

        let entries = match result {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "scrip master download failed — token map empty");
                return;
            }
        };

        let mut map = HashMap::new();
        for entry in &entries {
            let exchange = entry.get("exchange").and_then(Value::as_str).unwrap_or("");
            if exchange != self.config.exchange {
                continue;
            }
            let symbol = entry.get("symbol").and_then(Value::as_str).unwrap_or("");
            let token = entry.get("token").and_then(Value::as_str).unwrap_or("");
            if !symbol.is_empty() && !token.is_empty() {
                map.insert(symbol.to_string(), token.to_string());
            }
        }

        info!(symbols = map.len(), "scrip master loaded");
        *self.tokens.write().await = map;
    }

    /// Exchange token for a symbol, if known.
    pub async fn get_token(&self, symbol: &str) -> Option<String> {
        self.tokens.read().await.get(symbol).cloned()
    }

    // -----------------------------------------------------------------------
    // Orders
    // -----------------------------------------------------------------------

    /// Place an order. Market order when `price` is `None`, limit otherwise.
    ///
    /// Never raises: every failure path maps to `Rejected` or `Failed`.
    pub async fn place_order(
        &self,
        symbol: &str,
        quantity: u32,
        side: TradeAction,
        price: Option<Decimal>,
    ) -> OrderOutcome {
        if self.paper_trading {
            info!(
                symbol,
                quantity,
                side = %side,
                price = %price.map(|p| p.to_string()).unwrap_or_else(|| "MARKET".into()),
                "[paper] order filled"
            );
            return OrderOutcome::Placed(format!("PAPER-{symbol}-{quantity}"));
        }

        if !self.ensure_session().await {
            return OrderOutcome::Failed("session unavailable".into());
        }

        let token = match self.get_token(symbol).await {
            Some(t) => t,
            None => {
                warn!(symbol, "no exchange token known for symbol");
                return OrderOutcome::Failed(BotError::UnknownSymbol {
                    symbol: symbol.to_string(),
                }
                .to_string());
            }
        };

        match self.submit_order(symbol, &token, quantity, side, price).await {
            Ok(outcome) => outcome,
            Err(BotError::SessionExpired) => {
                // One re-login, one retry; give up for this cycle after that.
                warn!(symbol, "session expired mid-order, re-authenticating");
                if !self.login().await {
                    return OrderOutcome::Failed("re-login failed".into());
                }
                match self.submit_order(symbol, &token, quantity, side, price).await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        error!(symbol, error = %e, "order retry after re-login failed");
                        OrderOutcome::Failed(e.to_string())
                    }
                }
            }
            Err(e) => {
                error!(symbol, error = %e, "order placement failed");
                OrderOutcome::Failed(e.to_string())
            }
        }
    }

    async fn submit_order(
        &self,
        symbol: &str,
        token: &str,
        quantity: u32,
        side: TradeAction,
        price: Option<Decimal>,
    ) -> Result<OrderOutcome, BotError> {
        self.rate_limit().await;

        let session_token = self.session_token().await.unwrap_or_default();
        let url = format!("{}/orders", self.config.base_url);
        let mut body = json!({
            "variety": self.config.order_variety,
            "trading_symbol": symbol,
            "symbol_token": token,
            "transaction_type": side.as_str(),
            "exchange": self.config.exchange,
            "order_type": if price.is_some() { "LIMIT" } else { "MARKET" },
            "product_type": self.config.product_type,
            "duration": self.config.order_duration,
            "quantity": quantity.to_string(),
        });
        if let Some(p) = price {
            body["price"] = json!(p.to_string());
        }

        let response = self
            .client
            .post(&url)
            .bearer_auth(&session_token)
            .json(&body)
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(BotError::SessionExpired);
        }

        let parsed: BrokerResponse = response.json().await?;
        if parsed.status {
            let order_id = parsed
                .data
                .get("order_id")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            if order_id.is_empty() {
                return Ok(OrderOutcome::Failed("no order id in response".into()));
            }
            info!(symbol, order_id = %order_id, side = %side, quantity, "order placed");
            return Ok(OrderOutcome::Placed(order_id));
        }

        let lowered = parsed.message.to_lowercase();
        if parsed.error_code == CODE_SESSION_EXPIRED
            || lowered.contains("token")
            || lowered.contains("expired")
        {
            return Err(BotError::SessionExpired);
        }

        Ok(classify_rejection(
            &parsed.error_code,
            &parsed.message,
            symbol,
        ))
    }

    // -----------------------------------------------------------------------
    // Positions / holdings
    // -----------------------------------------------------------------------

    /// Fetch and normalise all broker-side positions and holdings.
    ///
    /// Returned positions are marked externally-owned; the position book
    /// decides whether bot state overrides them.
    pub async fn sync_positions(&self) -> Result<Vec<Position>, BotError> {
        if self.paper_trading {
            return Ok(Vec::new());
        }
        if !self.ensure_session().await {
            return Err(BotError::SessionExpired);
        }

        let mut raw = self.fetch_records("positions").await?;
        match self.fetch_records("holdings").await {
            Ok(mut holdings) => raw.append(&mut holdings),
            Err(e) => warn!(error = %e, "holdings fetch failed, syncing positions only"),
        }

        let mut positions = Vec::new();
        for record in &raw {
            if let Some(position) = normalize_position(record) {
                positions.push(position);
            }
        }
        info!(count = positions.len(), "broker positions synced");
        Ok(positions)
    }

    async fn fetch_records(&self, endpoint: &str) -> Result<Vec<Value>, BotError> {
        self.rate_limit().await;
        let session_token = self.session_token().await.unwrap_or_default();
        let url = format!("{}/{endpoint}", self.config.base_url);

        let response = self
            .client
            .get(&url)
            .bearer_auth(&session_token)
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(BotError::SessionExpired);
        }

        let parsed: BrokerResponse = response.json().await?;
        Ok(parsed.data.as_array().cloned().unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// Free helpers
// ---------------------------------------------------------------------------

/// Map a failed order response to an outcome with operator guidance.
///
/// Session expiry is filtered out before this point; everything here is a
/// business-rule rejection that must not be auto-retried.
fn classify_rejection(code: &str, message: &str, symbol: &str) -> OrderOutcome {
    let lowered = message.to_lowercase();
    if code == CODE_EDIS_REQUIRED || lowered.contains("edis") {
        return OrderOutcome::Rejected(OrderRejection {
            code: code.to_string(),
            message: message.to_string(),
            guidance: format!(
                "delivery sell for {symbol} needs EDIS authorization; approve the pending \
                 instruction in the broker app, the bot will retry next cycle"
            ),
        });
    }
    if code == CODE_CAUTIONARY_LISTING || lowered.contains("cautionary") {
        return OrderOutcome::Rejected(OrderRejection {
            code: code.to_string(),
            message: message.to_string(),
            guidance: format!(
                "{symbol} is on a cautionary listing and rejects market orders; place a limit \
                 order manually through the broker platform"
            ),
        });
    }
    OrderOutcome::Rejected(OrderRejection {
        code: code.to_string(),
        message: message.to_string(),
        guidance: "order rejected by broker; check the order book before retrying".into(),
    })
}

/// Normalise one raw broker position/holding record.
///
/// Field names vary between the positions and holdings endpoints; quantity
/// and price fall through a list of candidates. Zero-quantity rows are
/// dropped.
pub fn normalize_position(record: &Value) -> Option<Position> {
    let symbol = ["trading_symbol", "symbol_name", "symbol"]
        .iter()
        .find_map(|k| record.get(k).and_then(Value::as_str))
        .filter(|s| !s.is_empty())?;

    let number = |keys: &[&str]| -> Decimal {
        keys.iter()
            .find_map(|k| {
                record.get(k).and_then(|v| match v {
                    Value::String(s) => s.parse::<Decimal>().ok(),
                    Value::Number(n) => n.as_f64().and_then(Decimal::from_f64),
                    _ => None,
                })
            })
            .unwrap_or(Decimal::ZERO)
    };

    let quantity = number(&["net_quantity", "quantity", "buy_quantity"])
        .abs()
        .trunc()
        .to_u32()
        .filter(|&q| q > 0)?;

    let ltp = number(&["ltp", "last_traded_price"]);
    let mut avg_price = number(&["average_price", "buy_price"]);
    if avg_price.is_zero() {
        avg_price = ltp;
    }
    let current_price = if ltp.is_zero() { avg_price } else { ltp };

    Some(Position {
        symbol: symbol.to_string(),
        quantity,
        entry_price: avg_price,
        highest_price: current_price.max(avg_price),
        current_price,
        entry_time: record
            .get("fill_date")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        signal_type: Signal::Hold,
        confidence: Decimal::ZERO,
        bot_owned: false,
        partial_exit_done: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RateLimitConfig;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn broker_config() -> BrokerConfig {
        BrokerConfig {
            base_url: "https://broker.test".into(),
            scrip_master_url: "https://broker.test/scrip-master.json".into(),
            exchange: "NSE".into(),
            product_type: "DELIVERY".into(),
            order_variety: "NORMAL".into(),
            order_duration: "DAY".into(),
            request_timeout_seconds: 5,
            rate_limit: RateLimitConfig {
                min_interval_ms: 10,
            },
        }
    }

    // -- Paper mode ----------------------------------------------------------

    #[tokio::test]
    async fn test_paper_login_always_succeeds() {
        let broker = BrokerClient::new(broker_config(), None, true).unwrap();
        assert!(broker.login().await);
    }

    #[tokio::test]
    async fn test_paper_order_fills_without_network() {
        let broker = BrokerClient::new(broker_config(), None, true).unwrap();
        let outcome = broker
            .place_order("NIFTYBEES-EQ", 5, TradeAction::Buy, None)
            .await;
        assert!(outcome.is_placed());
        assert!(outcome.order_id().unwrap().starts_with("PAPER-"));
    }

    #[tokio::test]
    async fn test_paper_sync_is_empty() {
        let broker = BrokerClient::new(broker_config(), None, true).unwrap();
        assert!(broker.sync_positions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_live_login_without_credentials_fails() {
        let broker = BrokerClient::new(broker_config(), None, false).unwrap();
        assert!(!broker.login().await);
    }

    // -- Rejection classification --------------------------------------------

    #[test]
    fn test_classify_edis_rejection() {
        let outcome = classify_rejection(CODE_EDIS_REQUIRED, "EDIS authorization required", "X");
        match outcome {
            OrderOutcome::Rejected(r) => assert!(r.guidance.contains("EDIS")),
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[test]
    fn test_classify_cautionary_listing() {
        let outcome = classify_rejection(CODE_CAUTIONARY_LISTING, "scrip on cautionary list", "X");
        match outcome {
            OrderOutcome::Rejected(r) => assert!(r.guidance.contains("limit")),
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    // -- Position normalisation ----------------------------------------------

    #[test]
    fn test_normalize_position_from_strings() {
        let record = json!({
            "trading_symbol": "GOLDBEES-EQ",
            "net_quantity": "4",
            "average_price": "80.5",
            "ltp": "81.2"
        });
        let p = normalize_position(&record).unwrap();
        assert_eq!(p.symbol, "GOLDBEES-EQ");
        assert_eq!(p.quantity, 4);
        assert_eq!(p.entry_price, dec!(80.5));
        assert_eq!(p.current_price, dec!(81.2));
        assert!(!p.bot_owned);
    }

    #[test]
    fn test_normalize_position_numeric_fields_and_fallbacks() {
        let record = json!({
            "symbol_name": "NIFTYBEES-EQ",
            "quantity": 10.0,
            "ltp": 250.0
        });
        let p = normalize_position(&record).unwrap();
        // No average price: entry falls back to LTP.
        assert_eq!(p.entry_price, dec!(250));
        assert_eq!(p.quantity, 10);
    }

    #[test]
    fn test_normalize_skips_zero_quantity() {
        let record = json!({
            "trading_symbol": "GOLDBEES-EQ",
            "net_quantity": "0",
            "average_price": "80.5"
        });
        assert!(normalize_position(&record).is_none());
    }

    #[test]
    fn test_normalize_skips_missing_symbol() {
        let record = json!({ "net_quantity": "4" });
        assert!(normalize_position(&record).is_none());
    }
}
