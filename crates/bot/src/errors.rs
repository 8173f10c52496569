use thiserror::Error;

/// Typed error hierarchy for the trading bot.
///
/// Library-internal errors use specific variants; application code wraps with
/// `anyhow::Context` for propagation.
#[derive(Error, Debug)]
pub enum BotError {
    // -- Broker -------------------------------------------------------------
    #[error("broker login failed: {reason}")]
    LoginFailed { reason: String },

    #[error("broker session expired")]
    SessionExpired,

    #[error("order rejected: {reason} (code: {code})")]
    OrderRejected { code: String, reason: String },

    #[error("unknown symbol token for {symbol}")]
    UnknownSymbol { symbol: String },

    // -- Market data --------------------------------------------------------
    #[error("market data unavailable for {symbol} ({interval})")]
    DataUnavailable { symbol: String, interval: String },

    #[error("insufficient history: {got} bars (need {need})")]
    InsufficientHistory { got: usize, need: usize },

    // -- Learning -----------------------------------------------------------
    #[error("predictor not trained: {reason}")]
    NotTrained { reason: String },

    // -- Storage ------------------------------------------------------------
    #[error("trade store error: {reason}")]
    Storage { reason: String },

    // -- Configuration ------------------------------------------------------
    #[error("configuration error: {0}")]
    Config(String),

    // -- Forwarded errors ---------------------------------------------------
    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
