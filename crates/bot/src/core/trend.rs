//! Multi-timeframe trend classifier.
//!
//! Labels the daily and hourly timeframes independently from the same
//! indicator battery, then combines them by a fixed table. Data-source
//! failure for either timeframe degrades that timeframe to NEUTRAL rather
//! than propagating an error — this classifier is queried every cycle for
//! every symbol and must be failure-tolerant.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::IndicatorConfig;
use crate::core::data_service::DataService;
use crate::core::indicators::IndicatorSeries;
use crate::types::{Bar, Interval, TimeframeTrend, TrendLabel};

/// Minimum bars per timeframe before a non-NEUTRAL label is possible.
const MIN_TREND_BARS: usize = 20;

/// Classifies the combined daily + hourly trend for a symbol.
pub struct TrendAnalyzer {
    data: Arc<DataService>,
    indicators: IndicatorConfig,
}

impl TrendAnalyzer {
    pub fn new(data: Arc<DataService>, indicators: IndicatorConfig) -> Self {
        Self { data, indicators }
    }

    /// Combined trend label for the symbol. Never fails.
    pub async fn classify(&self, symbol: &str) -> TrendLabel {
        let daily = self.timeframe_trend(symbol, Interval::D1).await;
        let hourly = self.timeframe_trend(symbol, Interval::H1).await;
        let combined = combine_trends(daily, hourly);
        debug!(symbol, ?daily, ?hourly, label = %combined, "trend classified");
        combined
    }

    async fn timeframe_trend(&self, symbol: &str, interval: Interval) -> TimeframeTrend {
        let bars = match self.data.fetch_bars(symbol, interval).await {
            Ok(bars) => bars,
            Err(e) => {
                warn!(symbol, %interval, error = %e, "trend fetch failed, degrading to NEUTRAL");
                return TimeframeTrend::Neutral;
            }
        };
        match interval {
            Interval::D1 => daily_trend(&bars, &self.indicators),
            _ => hourly_trend(&bars, &self.indicators),
        }
    }
}

/// Daily trend: price above both slow and trend SMAs with a bullish
/// oscillator → Bullish; the mirror condition → Bearish; otherwise Neutral.
///
/// Neutral also covers short series and an unwarmed trend SMA.
pub fn daily_trend(bars: &[Bar], config: &IndicatorConfig) -> TimeframeTrend {
    if bars.len() < MIN_TREND_BARS {
        return TimeframeTrend::Neutral;
    }
    let series = IndicatorSeries::compute(bars, config);
    let last = series.len() - 1;

    let close = series.closes[last];
    let (sma_slow, sma_trend) = match (series.sma_slow[last], series.sma_trend[last]) {
        (Some(s), Some(t)) => (s, t),
        _ => return TimeframeTrend::Neutral,
    };
    let macd = series.macd[last];
    let macd_signal = series.macd_signal[last];

    if close > sma_slow && sma_slow > sma_trend && macd > macd_signal {
        TimeframeTrend::Bullish
    } else if close < sma_slow && sma_slow < sma_trend && macd < macd_signal {
        TimeframeTrend::Bearish
    } else {
        TimeframeTrend::Neutral
    }
}

/// Hourly trend: fast EMA above slow EMA with a bullish oscillator →
/// Bullish; the mirror → Bearish; otherwise Neutral.
pub fn hourly_trend(bars: &[Bar], config: &IndicatorConfig) -> TimeframeTrend {
    if bars.len() < MIN_TREND_BARS {
        return TimeframeTrend::Neutral;
    }
    let series = IndicatorSeries::compute(bars, config);
    let last = series.len() - 1;

    let ema_fast = series.ema_fast[last];
    let ema_slow = series.ema_slow[last];
    let macd = series.macd[last];
    let macd_signal = series.macd_signal[last];

    if ema_fast > ema_slow && macd > macd_signal {
        TimeframeTrend::Bullish
    } else if ema_fast < ema_slow && macd < macd_signal {
        TimeframeTrend::Bearish
    } else {
        TimeframeTrend::Neutral
    }
}

/// Fixed combination table for the two timeframe labels.
pub fn combine_trends(daily: TimeframeTrend, hourly: TimeframeTrend) -> TrendLabel {
    use TimeframeTrend::*;
    match (daily, hourly) {
        (Bullish, Bullish) => TrendLabel::StrongBullish,
        (Bullish, Neutral) => TrendLabel::Bullish,
        (Bearish, Bearish) => TrendLabel::Bearish,
        _ => TrendLabel::Neutral,
    }
}
