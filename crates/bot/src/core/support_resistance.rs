//! Support and resistance detection from daily bars.
//!
//! Combines classic pivot points from the prior session with swing
//! highs/lows, clusters nearby levels into zones, and reports the nearest
//! support/resistance relative to the current price. The entry pipeline
//! skips buys placed just under a resistance zone.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::types::Bar;

/// Bars on each side a swing extreme must dominate.
const SWING_WINDOW: usize = 5;
/// How many recent swing extremes feed the clustering.
const SWING_KEEP: usize = 10;

/// Classic pivot levels from one session's high/low/close.
#[derive(Debug, Clone)]
pub struct PivotPoints {
    pub pivot: Decimal,
    pub r1: Decimal,
    pub r2: Decimal,
    pub r3: Decimal,
    pub s1: Decimal,
    pub s2: Decimal,
    pub s3: Decimal,
}

pub fn pivot_points(high: Decimal, low: Decimal, close: Decimal) -> PivotPoints {
    let pivot = (high + low + close) / dec!(3);
    PivotPoints {
        pivot,
        r1: dec!(2) * pivot - low,
        s1: dec!(2) * pivot - high,
        r2: pivot + (high - low),
        s2: pivot - (high - low),
        r3: high + dec!(2) * (pivot - low),
        s3: low - dec!(2) * (high - pivot),
    }
}

/// Swing highs and lows: extremes that dominate `window` bars on each side.
pub fn swing_points(bars: &[Bar], window: usize) -> (Vec<Decimal>, Vec<Decimal>) {
    let mut highs = Vec::new();
    let mut lows = Vec::new();
    if bars.len() < 2 * window + 1 {
        return (highs, lows);
    }

    for i in window..bars.len() - window {
        let is_high = (1..=window)
            .all(|j| bars[i].high > bars[i - j].high && bars[i].high > bars[i + j].high);
        if is_high {
            highs.push(bars[i].high);
        }

        let is_low = (1..=window)
            .all(|j| bars[i].low < bars[i - j].low && bars[i].low < bars[i + j].low);
        if is_low {
            lows.push(bars[i].low);
        }
    }

    (highs, lows)
}

/// Cluster nearby price levels into zone representatives.
///
/// Levels within `tolerance_pct` percent of the previous cluster member are
/// merged; each cluster is replaced by its mean.
pub fn cluster_levels(levels: &[Decimal], tolerance_pct: Decimal) -> Vec<Decimal> {
    if levels.is_empty() {
        return Vec::new();
    }

    let mut sorted = levels.to_vec();
    sorted.sort();

    let mut clusters = Vec::new();
    let mut current: Vec<Decimal> = vec![sorted[0]];

    for &level in &sorted[1..] {
        let anchor = *current.last().expect("cluster is non-empty");
        let close_enough = if anchor.is_zero() {
            level.is_zero()
        } else {
            ((level - anchor).abs() / anchor) <= tolerance_pct / dec!(100)
        };
        if close_enough {
            current.push(level);
        } else {
            clusters.push(mean(&current));
            current = vec![level];
        }
    }
    clusters.push(mean(&current));

    clusters
}

fn mean(values: &[Decimal]) -> Decimal {
    values.iter().copied().sum::<Decimal>() / Decimal::from(values.len() as u64)
}

/// Computed levels for one symbol.
#[derive(Debug, Clone)]
pub struct SrLevels {
    pub current_price: Decimal,
    pub pivot: Decimal,
    pub support_levels: Vec<Decimal>,
    pub resistance_levels: Vec<Decimal>,
    pub nearest_support: Option<Decimal>,
    pub nearest_resistance: Option<Decimal>,
}

impl SrLevels {
    /// Distance to the nearest support, as a percentage of the price.
    pub fn distance_to_support_pct(&self) -> Option<Decimal> {
        let support = self.nearest_support?;
        if self.current_price.is_zero() {
            return None;
        }
        Some((self.current_price - support) / self.current_price * dec!(100))
    }

    /// Distance to the nearest resistance, as a percentage of the price.
    pub fn distance_to_resistance_pct(&self) -> Option<Decimal> {
        let resistance = self.nearest_resistance?;
        if self.current_price.is_zero() {
            return None;
        }
        Some((resistance - self.current_price) / self.current_price * dec!(100))
    }

    pub fn is_near_support(&self, threshold_pct: Decimal) -> bool {
        self.distance_to_support_pct()
            .is_some_and(|d| d <= threshold_pct)
    }

    pub fn is_near_resistance(&self, threshold_pct: Decimal) -> bool {
        self.distance_to_resistance_pct()
            .is_some_and(|d| d <= threshold_pct)
    }
}

/// Derive support/resistance zones from a daily bar series.
///
/// Pivots come from the second-to-last bar (the prior completed session);
/// swing extremes from the whole series. Returns `None` on an empty series.
pub fn compute_levels(bars: &[Bar]) -> Option<SrLevels> {
    if bars.is_empty() {
        return None;
    }

    let reference = if bars.len() > 1 {
        &bars[bars.len() - 2]
    } else {
        &bars[bars.len() - 1]
    };
    let pivots = pivot_points(reference.high, reference.low, reference.close);

    let (swing_highs, swing_lows) = swing_points(bars, SWING_WINDOW);

    let mut resistance_raw = vec![pivots.r1, pivots.r2, pivots.r3];
    resistance_raw.extend(swing_highs.iter().rev().take(SWING_KEEP).copied());
    let resistance_levels = cluster_levels(&resistance_raw, dec!(0.5));

    let mut support_raw = vec![pivots.s1, pivots.s2, pivots.s3];
    support_raw.extend(swing_lows.iter().rev().take(SWING_KEEP).copied());
    let support_levels = cluster_levels(&support_raw, dec!(0.5));

    let current_price = bars.last().expect("non-empty").close;

    let nearest_support = support_levels
        .iter()
        .copied()
        .filter(|&s| s < current_price)
        .max();
    let nearest_resistance = resistance_levels
        .iter()
        .copied()
        .filter(|&r| r > current_price)
        .min();

    Some(SrLevels {
        current_price,
        pivot: pivots.pivot,
        support_levels,
        resistance_levels,
        nearest_support,
        nearest_resistance,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(high: Decimal, low: Decimal, close: Decimal) -> Bar {
        Bar {
            timestamp: 0,
            open: close,
            high,
            low,
            close,
            volume: dec!(1000),
        }
    }

    // -- Pivot points --------------------------------------------------------

    #[test]
    fn test_pivot_points() {
        let p = pivot_points(dec!(110), dec!(90), dec!(100));
        assert_eq!(p.pivot, dec!(100));
        assert_eq!(p.r1, dec!(110));
        assert_eq!(p.s1, dec!(90));
        assert_eq!(p.r2, dec!(120));
        assert_eq!(p.s2, dec!(80));
    }

    // -- Swing points --------------------------------------------------------

    #[test]
    fn test_swing_points_detect_peak_and_trough() {
        // Ramp up to a peak at index 7, down to a trough at 14, up again.
        let mut bars = Vec::new();
        for i in 0..=7 {
            bars.push(bar(Decimal::from(100 + i), Decimal::from(98 + i), Decimal::from(99 + i)));
        }
        for i in 1..=7 {
            bars.push(bar(Decimal::from(107 - i), Decimal::from(105 - i), Decimal::from(106 - i)));
        }
        for i in 1..=7 {
            bars.push(bar(Decimal::from(100 + i), Decimal::from(98 + i), Decimal::from(99 + i)));
        }
        let (highs, lows) = swing_points(&bars, 5);
        assert_eq!(highs, vec![dec!(107)]);
        assert_eq!(lows, vec![dec!(98)]);
    }

    #[test]
    fn test_swing_points_short_series_empty() {
        let bars: Vec<Bar> = (0..5).map(|_| bar(dec!(101), dec!(99), dec!(100))).collect();
        let (highs, lows) = swing_points(&bars, 5);
        assert!(highs.is_empty() && lows.is_empty());
    }

    // -- Clustering ----------------------------------------------------------

    #[test]
    fn test_cluster_merges_nearby_levels() {
        let levels = vec![dec!(100), dec!(100.2), dec!(100.4), dec!(110)];
        let clusters = cluster_levels(&levels, dec!(0.5));
        assert_eq!(clusters.len(), 2);
        assert_eq!(clusters[0], dec!(100.2));
        assert_eq!(clusters[1], dec!(110));
    }

    #[test]
    fn test_cluster_empty() {
        assert!(cluster_levels(&[], dec!(0.5)).is_empty());
    }

    // -- Levels --------------------------------------------------------------

    #[test]
    fn test_compute_levels_nearest_bracketing() {
        let mut bars = Vec::new();
        for i in 0..=7 {
            bars.push(bar(Decimal::from(100 + i), Decimal::from(98 + i), Decimal::from(99 + i)));
        }
        for i in 1..=7 {
            bars.push(bar(Decimal::from(107 - i), Decimal::from(105 - i), Decimal::from(106 - i)));
        }
        for i in 1..=4 {
            bars.push(bar(Decimal::from(100 + i), Decimal::from(98 + i), Decimal::from(99 + i)));
        }
        let levels = compute_levels(&bars).unwrap();
        if let Some(s) = levels.nearest_support {
            assert!(s < levels.current_price);
        }
        if let Some(r) = levels.nearest_resistance {
            assert!(r > levels.current_price);
        }
    }

    #[test]
    fn test_compute_levels_empty_series() {
        assert!(compute_levels(&[]).is_none());
    }

    #[test]
    fn test_near_resistance_threshold() {
        let levels = SrLevels {
            current_price: dec!(100),
            pivot: dec!(99),
            support_levels: vec![dec!(95)],
            resistance_levels: vec![dec!(101)],
            nearest_support: Some(dec!(95)),
            nearest_resistance: Some(dec!(101)),
        };
        assert!(levels.is_near_resistance(dec!(2)));
        assert!(!levels.is_near_resistance(dec!(0.5)));
        assert!(!levels.is_near_support(dec!(2)));
        assert!(levels.is_near_support(dec!(5)));
    }
}
