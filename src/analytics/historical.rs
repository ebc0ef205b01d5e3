//! Multi-timeframe cohort-CVD and price history (C4).
//!
//! Four parallel CVD+price pairs (1h/4h/1d/1w) plus two auxiliary 1h buffers
//! splitting whale flow into passive (resting, absorbed by a wall) and
//! aggressive (taking liquidity) entries.

use chrono::{DateTime, Datelike, Timelike, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;

use crate::domain::{BoundedDeque, CvdDivergenceResult, DivergenceType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeframe {
    H1,
    H4,
    D1,
    W1,
}

impl Timeframe {
    fn maxlen(self) -> usize {
        match self {
            Timeframe::H1 => 60,
            Timeframe::H4 => 168,
            Timeframe::D1 => 30,
            Timeframe::W1 => 52,
        }
    }

    /// Truncates `ts` to this timeframe's bucket boundary, used to decide
    /// whether a new point should be appended to the coarser buffers.
    fn bucket(self, ts: DateTime<Utc>) -> i64 {
        match self {
            Timeframe::H1 => ts.timestamp() / 3_600,
            Timeframe::H4 => ts.timestamp() / (3_600 * 4),
            Timeframe::D1 => ts.date_naive().num_days_from_ce() as i64,
            Timeframe::W1 => ts.iso_week().week() as i64 + ts.iso_week().year() as i64 * 100,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Point {
    ts: DateTime<Utc>,
    cvd: Decimal,
    price: Decimal,
}

struct Series {
    points: BoundedDeque<Point>,
    last_bucket: Option<i64>,
}

impl Series {
    fn new(capacity: usize) -> Self {
        Self { points: BoundedDeque::new(capacity), last_bucket: None }
    }
}

pub struct HistoricalMemory {
    h1: Series,
    h4: Series,
    d1: Series,
    w1: Series,
    whale_passive_accumulation_1h: BoundedDeque<(DateTime<Utc>, Decimal)>,
    whale_aggressive_entry_1h: BoundedDeque<(DateTime<Utc>, Decimal)>,
}

impl Default for HistoricalMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl HistoricalMemory {
    pub fn new() -> Self {
        Self {
            h1: Series::new(Timeframe::H1.maxlen()),
            h4: Series::new(Timeframe::H4.maxlen()),
            d1: Series::new(Timeframe::D1.maxlen()),
            w1: Series::new(Timeframe::W1.maxlen()),
            whale_passive_accumulation_1h: BoundedDeque::new(Timeframe::H1.maxlen()),
            whale_aggressive_entry_1h: BoundedDeque::new(Timeframe::H1.maxlen()),
        }
    }

    /// Always appends to the 1h pair; appends to 4h/1d/1w only when the
    /// truncated-bucket timestamp has advanced since the last stored point.
    /// `minnow_cvd` feeds the passive/aggressive split, not the main
    /// whale-CVD-vs-price divergence series (that stays whale-only, per the
    /// classifier's source flow).
    pub fn update_history(
        &mut self,
        ts: DateTime<Utc>,
        whale_cvd: Decimal,
        minnow_cvd: Decimal,
        price: Decimal,
        is_passive: bool,
    ) {
        let point = Point { ts, cvd: whale_cvd, price };
        self.h1.points.push(point);
        self.h1.last_bucket = Some(Timeframe::H1.bucket(ts));

        for (tf, series) in [(Timeframe::H4, &mut self.h4), (Timeframe::D1, &mut self.d1), (Timeframe::W1, &mut self.w1)] {
            let bucket = tf.bucket(ts);
            if series.last_bucket != Some(bucket) {
                series.points.push(point);
                series.last_bucket = Some(bucket);
            }
        }

        if is_passive {
            self.whale_passive_accumulation_1h.push((ts, minnow_cvd));
        } else {
            self.whale_aggressive_entry_1h.push((ts, minnow_cvd));
        }
    }

    fn series(&self, tf: Timeframe) -> &Series {
        match tf {
            Timeframe::H1 => &self.h1,
            Timeframe::H4 => &self.h4,
            Timeframe::D1 => &self.d1,
            Timeframe::W1 => &self.w1,
        }
    }

    pub fn points(&self, tf: Timeframe, n: usize) -> Vec<(DateTime<Utc>, Decimal, Decimal)> {
        self.series(tf).points.last_n(n).into_iter().map(|p| (p.ts, p.cvd, p.price)).collect()
    }

    pub fn whale_passive_accumulation_1h(&self) -> &BoundedDeque<(DateTime<Utc>, Decimal)> {
        &self.whale_passive_accumulation_1h
    }

    pub fn whale_aggressive_entry_1h(&self) -> &BoundedDeque<(DateTime<Utc>, Decimal)> {
        &self.whale_aggressive_entry_1h
    }

    /// Slices the last `k` (k >= 3) points of `timeframe` and looks for a
    /// price/CVD divergence: price lower-low + CVD higher-low => bullish;
    /// price higher-high + CVD lower-high => bearish. Confidence is the mean
    /// of both series' step-monotonicity ratio in the expected direction.
    pub fn detect_cvd_divergence(&self, timeframe: Timeframe) -> Option<CvdDivergenceResult> {
        let points = self.series(timeframe).points.last_n(8);
        if points.len() < 3 {
            return None;
        }

        let prices: Vec<f64> = points.iter().map(|p| p.price.to_f64().unwrap_or(0.0)).collect();
        let cvds: Vec<f64> = points.iter().map(|p| p.cvd.to_f64().unwrap_or(0.0)).collect();

        let (last_price, prev_prices) = prices.split_last().expect("at least 3 points");
        let (last_cvd, prev_cvds) = cvds.split_last().expect("at least 3 points");

        let prev_price_min = prev_prices.iter().cloned().fold(f64::INFINITY, f64::min);
        let prev_price_max = prev_prices.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let prev_cvd_min = prev_cvds.iter().cloned().fold(f64::INFINITY, f64::min);
        let prev_cvd_max = prev_cvds.iter().cloned().fold(f64::NEG_INFINITY, f64::max);

        let lower_low_price = *last_price < prev_price_min;
        let higher_low_cvd = *last_cvd > prev_cvd_min;
        let higher_high_price = *last_price > prev_price_max;
        let lower_high_cvd = *last_cvd < prev_cvd_max;

        let div_type = if lower_low_price && higher_low_cvd {
            DivergenceType::Bullish
        } else if higher_high_price && lower_high_cvd {
            DivergenceType::Bearish
        } else {
            return None;
        };

        let price_ratio = monotonicity_ratio(&prices, div_type == DivergenceType::Bullish);
        let cvd_ratio = monotonicity_ratio(&cvds, div_type != DivergenceType::Bullish);
        let confidence = ((price_ratio + cvd_ratio) / 2.0).clamp(0.0, 1.0);

        Some(CvdDivergenceResult { div_type, confidence })
    }
}

/// Fraction of consecutive steps moving down (when `down` is true) or up
/// (when false).
fn monotonicity_ratio(series: &[f64], down: bool) -> f64 {
    if series.len() < 2 {
        return 0.0;
    }
    let matching = series
        .windows(2)
        .filter(|w| if down { w[1] < w[0] } else { w[1] > w[0] })
        .count();
    matching as f64 / (series.len() - 1) as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn t(s: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(s, 0).unwrap()
    }

    #[test]
    fn bullish_divergence_scenario_matches_spec_example() {
        let mut mem = HistoricalMemory::new();
        let rows = [
            (95000, 1000),
            (94500, 1200),
            (94000, 1500),
            (94200, 1800),
            (93800, 2000),
        ];
        for (i, (price, cvd)) in rows.iter().enumerate() {
            mem.update_history(t(i as i64 * 3600), Decimal::from(*cvd), Decimal::ZERO, Decimal::from(*price), true);
        }
        let result = mem.detect_cvd_divergence(Timeframe::H1).expect("bullish divergence");
        assert_eq!(result.div_type, DivergenceType::Bullish);
        assert!(result.confidence >= 0.5);
    }

    #[test]
    fn fewer_than_three_points_yields_no_divergence() {
        let mut mem = HistoricalMemory::new();
        mem.update_history(t(0), dec!(100), dec!(0), dec!(50000), true);
        mem.update_history(t(3600), dec!(110), dec!(0), dec!(50100), true);
        assert!(mem.detect_cvd_divergence(Timeframe::H1).is_none());
    }

    #[test]
    fn coarser_timeframe_only_advances_on_new_bucket() {
        let mut mem = HistoricalMemory::new();
        mem.update_history(t(0), dec!(100), dec!(0), dec!(50000), true);
        mem.update_history(t(60), dec!(105), dec!(0), dec!(50050), true);
        assert_eq!(mem.series(Timeframe::D1).points.len(), 1);
    }

    #[test]
    fn passive_and_aggressive_whale_flow_routes_separately() {
        let mut mem = HistoricalMemory::new();
        mem.update_history(t(0), dec!(100), dec!(5), dec!(50000), true);
        mem.update_history(t(1), dec!(110), dec!(7), dec!(50010), false);
        assert_eq!(mem.whale_passive_accumulation_1h().len(), 1);
        assert_eq!(mem.whale_aggressive_entry_1h().len(), 1);
    }
}
