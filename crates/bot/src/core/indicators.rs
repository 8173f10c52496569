//! Pure computation module for technical indicators.
//!
//! No I/O, no side effects. Takes a bar series and returns per-bar indicator
//! series. All computations use `Decimal`.
//!
//! Rolling-window indicators (SMA, Bollinger Bands, ATR, RSI, volume SMA)
//! return `None` for every bar inside their warm-up region — callers must
//! never read a computed-but-meaningless number. Exponential averages
//! (EMA, MACD) are span-seeded smoothing recursions defined from the first
//! bar, matching `ewm(span, adjust=false)` semantics.
//!
//! References:
//!     Wilder (1978), "New Concepts in Technical Trading Systems".
//!     Bollinger (2001), "Bollinger on Bollinger Bands".

use rust_decimal::Decimal;
use rust_decimal::MathematicalOps;
use rust_decimal_macros::dec;

use crate::config::IndicatorConfig;
use crate::types::{Bar, IndicatorSnapshot};

// ═══════════════════════════════════════════════════════════════════════════
// Rolling-window indicators
// ═══════════════════════════════════════════════════════════════════════════

/// Simple moving average, aligned to the input.
///
/// `result[i]` is `None` until the window is full at index `period - 1`.
pub fn sma(values: &[Decimal], period: usize) -> Vec<Option<Decimal>> {
    let mut result = vec![None; values.len()];
    if period == 0 || values.len() < period {
        return result;
    }

    let period_d = Decimal::from(period as u64);
    let mut window_sum: Decimal = values[..period].iter().copied().sum();
    result[period - 1] = Some(window_sum / period_d);

    for i in period..values.len() {
        window_sum += values[i] - values[i - period];
        result[i] = Some(window_sum / period_d);
    }

    result
}

/// Exponential moving average with span semantics.
///
/// Multiplier `k = 2 / (period + 1)`; seeded from the first value, so the
/// series is defined for every bar.
pub fn ema(values: &[Decimal], period: usize) -> Vec<Decimal> {
    if values.is_empty() || period == 0 {
        return Vec::new();
    }

    let k = dec!(2) / Decimal::from(period as u64 + 1);
    let one_minus_k = dec!(1) - k;

    let mut result = Vec::with_capacity(values.len());
    result.push(values[0]);
    for &v in &values[1..] {
        let prev = *result.last().expect("result is seeded with first value");
        result.push(v * k + prev * one_minus_k);
    }

    result
}

/// Relative Strength Index from rolling-mean gains/losses, scaled 0–100.
///
/// `result[i]` is `None` until `period` price changes exist (index `period`).
/// All-gain windows read 100, all-loss windows read 0.
pub fn rsi(closes: &[Decimal], period: usize) -> Vec<Option<Decimal>> {
    let mut result = vec![None; closes.len()];
    if period == 0 || closes.len() < period + 1 {
        return result;
    }

    let gains: Vec<Decimal> = closes
        .windows(2)
        .map(|w| (w[1] - w[0]).max(Decimal::ZERO))
        .collect();
    let losses: Vec<Decimal> = closes
        .windows(2)
        .map(|w| (w[0] - w[1]).max(Decimal::ZERO))
        .collect();

    let avg_gain = sma(&gains, period);
    let avg_loss = sma(&losses, period);

    // Change series is offset by one from the close series.
    for i in period..closes.len() {
        let (g, l) = match (avg_gain[i - 1], avg_loss[i - 1]) {
            (Some(g), Some(l)) => (g, l),
            _ => continue,
        };
        result[i] = Some(if l.is_zero() {
            dec!(100)
        } else {
            let rs = g / l;
            dec!(100) - dec!(100) / (dec!(1) + rs)
        });
    }

    result
}

/// Moving Average Convergence Divergence.
///
/// Returns `(macd_line, signal_line, histogram)` series, each defined for
/// every bar (span-seeded EMAs).
pub fn macd(
    closes: &[Decimal],
    fast: usize,
    slow: usize,
    signal: usize,
) -> (Vec<Decimal>, Vec<Decimal>, Vec<Decimal>) {
    let fast_ema = ema(closes, fast);
    let slow_ema = ema(closes, slow);

    let macd_line: Vec<Decimal> = fast_ema
        .iter()
        .zip(slow_ema.iter())
        .map(|(f, s)| f - s)
        .collect();
    let signal_line = ema(&macd_line, signal);
    let histogram: Vec<Decimal> = macd_line
        .iter()
        .zip(signal_line.iter())
        .map(|(m, s)| m - s)
        .collect();

    (macd_line, signal_line, histogram)
}

/// Bollinger Bands: SMA ± `std_mult` sample standard deviations.
///
/// Returns `(upper, middle, lower)` series, `None` during warm-up.
pub fn bollinger_bands(
    closes: &[Decimal],
    period: usize,
    std_mult: Decimal,
) -> (Vec<Option<Decimal>>, Vec<Option<Decimal>>, Vec<Option<Decimal>>) {
    let n = closes.len();
    let mut upper = vec![None; n];
    let middle = sma(closes, period);
    let mut lower = vec![None; n];
    if period < 2 || n < period {
        return (upper, middle, lower);
    }

    let ddof = Decimal::from(period as u64 - 1);

    for i in (period - 1)..n {
        let mean = middle[i].expect("sma defined past warm-up");
        let window = &closes[i + 1 - period..=i];
        // Sample variance (ddof = 1).
        let variance: Decimal = window
            .iter()
            .map(|&c| {
                let d = c - mean;
                d * d
            })
            .sum::<Decimal>()
            / ddof;
        let std_dev = variance.sqrt().unwrap_or(Decimal::ZERO);
        upper[i] = Some(mean + std_mult * std_dev);
        lower[i] = Some(mean - std_mult * std_dev);
    }

    (upper, middle, lower)
}

/// Average True Range: rolling mean of `TR = max(H−L, |H−prevC|, |L−prevC|)`.
///
/// `result[i]` is `None` until `period` true ranges exist (index `period`).
pub fn atr(bars: &[Bar], period: usize) -> Vec<Option<Decimal>> {
    let mut result = vec![None; bars.len()];
    if period == 0 || bars.len() < period + 1 {
        return result;
    }

    let true_ranges: Vec<Decimal> = bars
        .windows(2)
        .map(|w| {
            let hl = w[1].high - w[1].low;
            let hc = (w[1].high - w[0].close).abs();
            let lc = (w[1].low - w[0].close).abs();
            hl.max(hc).max(lc)
        })
        .collect();

    let averaged = sma(&true_ranges, period);
    for i in period..bars.len() {
        result[i] = averaged[i - 1];
    }

    result
}

// ═══════════════════════════════════════════════════════════════════════════
// IndicatorSeries
// ═══════════════════════════════════════════════════════════════════════════

/// The full indicator battery computed over one bar series.
///
/// Series are index-aligned with the input bars. Use [`snapshot_at`] to get a
/// fully-typed [`IndicatorSnapshot`] for one bar, which exists only once
/// every rolling window is warmed up.
///
/// [`snapshot_at`]: IndicatorSeries::snapshot_at
#[derive(Debug, Clone)]
pub struct IndicatorSeries {
    pub closes: Vec<Decimal>,
    pub volumes: Vec<Decimal>,
    pub sma_fast: Vec<Option<Decimal>>,
    pub sma_slow: Vec<Option<Decimal>>,
    pub sma_trend: Vec<Option<Decimal>>,
    pub ema_fast: Vec<Decimal>,
    pub ema_slow: Vec<Decimal>,
    pub rsi: Vec<Option<Decimal>>,
    pub macd: Vec<Decimal>,
    pub macd_signal: Vec<Decimal>,
    pub macd_histogram: Vec<Decimal>,
    pub bb_upper: Vec<Option<Decimal>>,
    pub bb_middle: Vec<Option<Decimal>>,
    pub bb_lower: Vec<Option<Decimal>>,
    pub atr: Vec<Option<Decimal>>,
    pub volume_avg: Vec<Option<Decimal>>,
}

impl IndicatorSeries {
    /// Compute every indicator over the bar series.
    pub fn compute(bars: &[Bar], config: &IndicatorConfig) -> Self {
        let closes: Vec<Decimal> = bars.iter().map(|b| b.close).collect();
        let volumes: Vec<Decimal> = bars.iter().map(|b| b.volume).collect();

        let (macd_line, signal_line, histogram) = macd(
            &closes,
            config.macd_fast,
            config.macd_slow,
            config.macd_signal,
        );
        let (bb_upper, bb_middle, bb_lower) =
            bollinger_bands(&closes, config.bb_period, config.bb_std);

        Self {
            sma_fast: sma(&closes, config.sma_fast),
            sma_slow: sma(&closes, config.sma_slow),
            sma_trend: sma(&closes, config.sma_trend),
            ema_fast: ema(&closes, config.ema_fast),
            ema_slow: ema(&closes, config.ema_slow),
            rsi: rsi(&closes, config.rsi_period),
            macd: macd_line,
            macd_signal: signal_line,
            macd_histogram: histogram,
            bb_upper,
            bb_middle,
            bb_lower,
            atr: atr(bars, config.atr_period),
            volume_avg: sma(&volumes, config.volume_period),
            closes,
            volumes,
        }
    }

    pub fn len(&self) -> usize {
        self.closes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.closes.is_empty()
    }

    /// Snapshot for the bar at `index`.
    ///
    /// `None` while any rolling window is still warming up — the trend SMA
    /// is excluded here and read separately, since the primary workflow only
    /// needs it on the daily timeframe.
    pub fn snapshot_at(&self, index: usize) -> Option<IndicatorSnapshot> {
        if index >= self.len() {
            return None;
        }
        Some(IndicatorSnapshot {
            close: self.closes[index],
            sma_5: self.sma_fast[index]?,
            sma_20: self.sma_slow[index]?,
            ema_9: self.ema_fast[index],
            ema_21: self.ema_slow[index],
            rsi: self.rsi[index]?,
            macd: self.macd[index],
            macd_signal: self.macd_signal[index],
            macd_histogram: self.macd_histogram[index],
            bb_upper: self.bb_upper[index]?,
            bb_middle: self.bb_middle[index]?,
            bb_lower: self.bb_lower[index]?,
            atr: self.atr[index]?,
            volume: self.volumes[index],
            volume_avg: self.volume_avg[index]?,
        })
    }

    /// Snapshot of the most recent bar.
    pub fn latest(&self) -> Option<IndicatorSnapshot> {
        self.snapshot_at(self.len().checked_sub(1)?)
    }

    /// Snapshot of the bar before the most recent one (for crossover logic).
    pub fn previous(&self) -> Option<IndicatorSnapshot> {
        self.snapshot_at(self.len().checked_sub(2)?)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════
