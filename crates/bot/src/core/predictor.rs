//! Trade-success predictor: logistic regression over closed-trade features.
//!
//! Trained offline on the closed-trade history: each SELL row yields a
//! feature vector (oscillator readings, volume ratio, price distance from
//! the slow SMA, volatility as a percentage of price, hour, weekday) labeled
//! 1 when the realized PnL was positive. Features are standardized before a
//! gradient-descent fit; the fitted model (means, stds, weights, bias) is
//! persisted as JSON.
//!
//! Below the minimum training sample, or when ML is disabled, prediction
//! falls back to a deterministic heuristic so the entry gate always has a
//! well-defined numeric output.
//!
//! The statistical path works in `f64` (ndarray), converting from `Decimal`
//! at the boundary.

use chrono::{DateTime, Datelike, FixedOffset, Timelike};
use ndarray::{Array1, Array2};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::MlConfig;
use crate::types::{IndicatorSnapshot, TradeRecord};

pub const FEATURE_COUNT: usize = 9;

pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "rsi",
    "macd",
    "macd_signal",
    "macd_histogram",
    "volume_ratio",
    "sma20_distance_pct",
    "atr_pct",
    "hour",
    "weekday",
];

// ═══════════════════════════════════════════════════════════════════════════
// Model
// ═══════════════════════════════════════════════════════════════════════════

/// A fitted, standardized logistic-regression model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainedModel {
    pub means: Vec<f64>,
    pub stds: Vec<f64>,
    pub weights: Vec<f64>,
    pub bias: f64,
    pub samples: usize,
    pub trained_at: String,
}

impl TrainedModel {
    /// Win probability for one raw (unstandardized) feature vector.
    pub fn predict(&self, features: &[f64; FEATURE_COUNT]) -> f64 {
        let mut z = self.bias;
        for i in 0..FEATURE_COUNT {
            let std = if self.stds[i] > 0.0 { self.stds[i] } else { 1.0 };
            let scaled = (features[i] - self.means[i]) / std;
            z += self.weights[i] * scaled;
        }
        sigmoid(z)
    }
}

/// Numerically stable sigmoid.
fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Predictor
// ═══════════════════════════════════════════════════════════════════════════

/// Success predictor with a heuristic fallback.
pub struct TradePredictor {
    config: MlConfig,
    model: Option<TrainedModel>,
}

impl TradePredictor {
    pub fn new(config: MlConfig, model: Option<TrainedModel>) -> Self {
        Self { config, model }
    }

    pub fn is_trained(&self) -> bool {
        self.model.is_some()
    }

    pub fn model(&self) -> Option<&TrainedModel> {
        self.model.as_ref()
    }

    /// Extract the feature vector for a candidate entry (or a past trade).
    pub fn extract_features(
        snapshot: &IndicatorSnapshot,
        hour: u32,
        weekday: u32,
    ) -> [f64; FEATURE_COUNT] {
        let d = |v: Decimal| v.to_f64().unwrap_or(0.0);

        let volume_avg = snapshot.volume_avg.max(Decimal::ONE);
        let sma_20 = snapshot.sma_20.max(Decimal::ONE);
        let close = snapshot.close.max(Decimal::ONE);

        [
            d(snapshot.rsi),
            d(snapshot.macd),
            d(snapshot.macd_signal),
            d(snapshot.macd - snapshot.macd_signal),
            d(snapshot.volume / volume_avg),
            d((snapshot.close - snapshot.sma_20) / sma_20 * dec!(100)),
            d(snapshot.atr / close * dec!(100)),
            f64::from(hour),
            f64::from(weekday),
        ]
    }

    /// Retrain on the closed-trade history.
    ///
    /// Returns `false` (leaving any previous model in place) when ML is
    /// disabled or the sample is below the configured minimum.
    pub fn train(&mut self, records: &[TradeRecord], now: &str) -> bool {
        if !self.config.enabled {
            return false;
        }

        let (features, labels) = training_data(records);
        if features.len() < self.config.min_samples {
            info!(
                samples = features.len(),
                required = self.config.min_samples,
                "not enough closed trades to train predictor"
            );
            return false;
        }

        let n = features.len();
        let flat: Vec<f64> = features.iter().flatten().copied().collect();
        let x = match Array2::from_shape_vec((n, FEATURE_COUNT), flat) {
            Ok(x) => x,
            Err(e) => {
                warn!(error = %e, "feature matrix construction failed");
                return false;
            }
        };
        let y = Array1::from_vec(labels);

        // Standardize columns (population std).
        let mut means = vec![0.0; FEATURE_COUNT];
        let mut stds = vec![0.0; FEATURE_COUNT];
        let mut x_scaled = x.clone();
        for j in 0..FEATURE_COUNT {
            let col = x.column(j);
            let mean = col.sum() / n as f64;
            let var = col.iter().map(|&v| (v - mean).powi(2)).sum::<f64>() / n as f64;
            let std = var.sqrt();
            means[j] = mean;
            stds[j] = std;
            let divisor = if std > 0.0 { std } else { 1.0 };
            for i in 0..n {
                x_scaled[[i, j]] = (x[[i, j]] - mean) / divisor;
            }
        }

        // Gradient descent on log loss.
        let mut weights = Array1::<f64>::zeros(FEATURE_COUNT);
        let mut bias = 0.0_f64;
        let lr = self.config.learning_rate;
        let n_f = n as f64;

        for _ in 0..self.config.max_iterations {
            let linear = x_scaled.dot(&weights) + bias;
            let predictions = linear.mapv(sigmoid);
            let errors = &predictions - &y;
            let dw = x_scaled.t().dot(&errors) / n_f;
            let db = errors.sum() / n_f;
            weights = &weights - &(&dw * lr);
            bias -= lr * db;
        }

        let wins = y.iter().filter(|&&l| l > 0.5).count();
        info!(samples = n, wins, "predictor trained");

        self.model = Some(TrainedModel {
            means,
            stds,
            weights: weights.to_vec(),
            bias,
            samples: n,
            trained_at: now.to_string(),
        });
        true
    }

    /// Predicted win probability and a confidence measure `|p − 0.5| × 2`.
    pub fn predict(&self, snapshot: &IndicatorSnapshot, hour: u32, weekday: u32) -> (f64, f64) {
        let probability = match (&self.model, self.config.enabled) {
            (Some(model), true) => {
                let features = Self::extract_features(snapshot, hour, weekday);
                model.predict(&features)
            }
            _ => heuristic_score(snapshot),
        };
        let confidence = (probability - 0.5).abs() * 2.0;
        (probability, confidence)
    }

    /// Gate: take the trade iff the predicted probability clears the
    /// configured threshold. Returns `(take, probability, confidence)`.
    pub fn should_take_trade(
        &self,
        snapshot: &IndicatorSnapshot,
        hour: u32,
        weekday: u32,
    ) -> (bool, f64, f64) {
        let (probability, confidence) = self.predict(snapshot, hour, weekday);
        let threshold = self.config.probability_threshold.to_f64().unwrap_or(0.55);
        (probability >= threshold, probability, confidence)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Feature vectors + labels from the closed trades in the log.
fn training_data(records: &[TradeRecord]) -> (Vec<[f64; FEATURE_COUNT]>, Vec<f64>) {
    let mut features = Vec::new();
    let mut labels = Vec::new();

    for record in records.iter().filter(|r| r.is_closed_trade()) {
        let (hour, weekday) = match DateTime::<FixedOffset>::parse_from_rfc3339(&record.timestamp)
        {
            Ok(dt) => (dt.hour(), dt.weekday().num_days_from_monday()),
            Err(_) => continue,
        };

        let snapshot = IndicatorSnapshot {
            close: record.price,
            sma_5: record.sma_5,
            sma_20: record.sma_20,
            ema_9: record.price,
            ema_21: record.price,
            rsi: record.rsi,
            macd: record.macd,
            macd_signal: record.macd_signal,
            macd_histogram: record.macd - record.macd_signal,
            bb_upper: record.price,
            bb_middle: record.price,
            bb_lower: record.price,
            atr: record.atr,
            volume: record.volume,
            volume_avg: record.volume_avg,
        };

        features.push(TradePredictor::extract_features(&snapshot, hour, weekday));
        labels.push(if record.pnl > Decimal::ZERO { 1.0 } else { 0.0 });
    }

    (features, labels)
}

/// Deterministic rule-based score when no trained model is available.
///
/// Midpoint 0.5, nudged by the oscillator zone and the MACD sign, clamped
/// to [0, 1].
pub fn heuristic_score(snapshot: &IndicatorSnapshot) -> f64 {
    let mut score = 0.5_f64;
    let rsi = snapshot.rsi;

    if rsi >= dec!(30) && rsi <= dec!(40) {
        score += 0.15;
    } else if rsi < dec!(30) {
        score += 0.1;
    } else if rsi > dec!(70) {
        score -= 0.15;
    }

    if snapshot.macd > snapshot.macd_signal {
        score += 0.1;
    } else {
        score -= 0.1;
    }

    score.clamp(0.0, 1.0)
}

// ═══════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ExitReason, Signal, TradeAction, TradeMode};

    fn ml_config() -> MlConfig {
        MlConfig {
            enabled: true,
            min_samples: 20,
            probability_threshold: dec!(0.55),
            learning_rate: 0.5,
            max_iterations: 500,
        }
    }

    fn snapshot(rsi: Decimal, macd: Decimal) -> IndicatorSnapshot {
        IndicatorSnapshot {
            close: dec!(100),
            sma_5: dec!(100),
            sma_20: dec!(99),
            ema_9: dec!(100),
            ema_21: dec!(99),
            rsi,
            macd,
            macd_signal: Decimal::ZERO,
            macd_histogram: macd,
            bb_upper: dec!(104),
            bb_middle: dec!(100),
            bb_lower: dec!(96),
            atr: dec!(1),
            volume: dec!(1000),
            volume_avg: dec!(900),
        }
    }

    fn closed_trade(rsi: Decimal, macd: Decimal, pnl: Decimal, hour: u32) -> TradeRecord {
        TradeRecord::from_execution(
            format!("2026-08-06T{hour:02}:30:00+05:30"),
            "NIFTYBEES-EQ",
            TradeAction::Sell,
            5,
            dec!(100),
            Signal::Buy,
            Some(ExitReason::TargetHit),
            pnl,
            &snapshot(rsi, macd),
            TradeMode::Paper,
        )
    }

    // -- Heuristic fallback --------------------------------------------------

    #[test]
    fn test_heuristic_buy_zone_bullish() {
        // RSI in [30, 40] (+0.15) with bullish MACD (+0.1) → 0.75.
        let s = snapshot(dec!(35), dec!(0.5));
        assert!((heuristic_score(&s) - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_heuristic_overbought_bearish() {
        // RSI > 70 (−0.15) with bearish MACD (−0.1) → 0.25.
        let s = snapshot(dec!(75), dec!(-0.5));
        assert!((heuristic_score(&s) - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_heuristic_oversold() {
        let s = snapshot(dec!(25), dec!(0.5));
        assert!((heuristic_score(&s) - 0.70).abs() < 1e-12);
    }

    #[test]
    fn test_untrained_predictor_uses_heuristic() {
        let p = TradePredictor::new(ml_config(), None);
        let s = snapshot(dec!(35), dec!(0.5));
        let (take, probability, confidence) = p.should_take_trade(&s, 10, 2);
        assert!(take);
        assert!((probability - 0.75).abs() < 1e-12);
        assert!((confidence - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_disabled_ml_always_falls_back() {
        let mut config = ml_config();
        config.enabled = false;
        let mut p = TradePredictor::new(config, None);
        let records: Vec<TradeRecord> = (0u32..40)
            .map(|i| closed_trade(dec!(35), dec!(0.5), dec!(10), 9 + (i % 6)))
            .collect();
        assert!(!p.train(&records, "t0"));
        assert!(!p.is_trained());
    }

    // -- Training ------------------------------------------------------------

    #[test]
    fn test_train_requires_minimum_samples() {
        let mut p = TradePredictor::new(ml_config(), None);
        let records: Vec<TradeRecord> = (0..5)
            .map(|_| closed_trade(dec!(35), dec!(0.5), dec!(10), 10))
            .collect();
        assert!(!p.train(&records, "t0"));
        assert!(!p.is_trained());
    }

    #[test]
    fn test_train_separable_data() {
        // Oversold + bullish MACD trades win; overbought + bearish lose.
        let mut records = Vec::new();
        for _ in 0..15 {
            records.push(closed_trade(dec!(32), dec!(0.8), dec!(20), 10));
            records.push(closed_trade(dec!(72), dec!(-0.8), dec!(-15), 14));
        }
        let mut p = TradePredictor::new(ml_config(), None);
        assert!(p.train(&records, "t0"));
        assert!(p.is_trained());

        let (p_win, _) = p.predict(&snapshot(dec!(32), dec!(0.8)), 10, 2);
        let (p_lose, _) = p.predict(&snapshot(dec!(72), dec!(-0.8)), 14, 2);
        assert!(
            p_win > p_lose,
            "winning profile should score higher ({p_win:.3} vs {p_lose:.3})"
        );
        assert!(p_win > 0.5);
        assert!(p_lose < 0.5);
    }

    #[test]
    fn test_model_serde_round_trip() {
        let mut records = Vec::new();
        for _ in 0..15 {
            records.push(closed_trade(dec!(32), dec!(0.8), dec!(20), 10));
            records.push(closed_trade(dec!(72), dec!(-0.8), dec!(-15), 14));
        }
        let mut p = TradePredictor::new(ml_config(), None);
        assert!(p.train(&records, "t0"));

        let json = serde_json::to_string(p.model().unwrap()).unwrap();
        let restored: TrainedModel = serde_json::from_str(&json).unwrap();
        let features =
            TradePredictor::extract_features(&snapshot(dec!(32), dec!(0.8)), 10, 2);
        let a = p.model().unwrap().predict(&features);
        let b = restored.predict(&features);
        assert!((a - b).abs() < 1e-9);
    }

    #[test]
    fn test_confidence_measure_definition() {
        let p = TradePredictor::new(ml_config(), None);
        let s = snapshot(dec!(50), dec!(0.5)); // heuristic → 0.6
        let (probability, confidence) = p.predict(&s, 10, 2);
        assert!((confidence - (probability - 0.5).abs() * 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_feature_extraction_shape() {
        let f = TradePredictor::extract_features(&snapshot(dec!(35), dec!(0.5)), 10, 2);
        assert_eq!(f.len(), FEATURE_COUNT);
        assert!((f[7] - 10.0).abs() < 1e-12); // hour
        assert!((f[8] - 2.0).abs() < 1e-12); // weekday
    }
}
