//! USD-notional trade cohorting and minnow algo-pattern classification (C6).
//!
//! Cohort thresholds are dynamic: once enough trades have been observed they
//! track the 95th/20th percentile of recent trade notionals rather than the
//! static per-asset floors, so a thin SOL book and a deep BTC book don't
//! share one whale bar. The three lock-step rings on the book only ever see
//! minnow trades — whale/dolphin flow never feeds the algo classifier.

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use statrs::statistics::{Data, OrderStatistics};

use crate::config::AssetConfig;
use crate::domain::{AlgoDetectedEvent, AlgoKind, Cohort, TradeEvent, TradeSide};
use crate::orderbook::LocalOrderBook;

/// Below this many observed trade sizes, cohort thresholds fall back to the
/// static per-asset floors rather than a statistically thin percentile.
const MIN_SAMPLES_FOR_DYNAMIC: usize = 100;
/// Minnow trades accumulate in the algo rings until this many are buffered
/// before the classifier looks for a pattern.
const ALGO_CLASSIFY_AT: usize = 200;

pub struct WhaleAnalyzer {
    config: &'static AssetConfig,
}

impl WhaleAnalyzer {
    pub fn new(config: &'static AssetConfig) -> Self {
        Self { config }
    }

    /// Cohorts `trade`, folds its signed notional into the book's whale CVD,
    /// and — for minnow trades only — feeds the algo-pattern rings, possibly
    /// returning a detected pattern and clearing them.
    pub fn update(&self, book: &mut LocalOrderBook, trade: &TradeEvent) -> (Cohort, Decimal, Option<AlgoDetectedEvent>) {
        let volume_usd = trade.notional_usd();
        book.push_trade_size(volume_usd);

        let is_sell = trade.is_buyer_maker;
        let signed_volume_usd = if is_sell { -volume_usd } else { volume_usd };

        let (whale_threshold, minnow_threshold) = self.dynamic_thresholds(book);
        let volume_usd_f64 = volume_usd.to_f64().unwrap_or(0.0);
        let cohort = if volume_usd_f64 > whale_threshold {
            Cohort::Whale
        } else if volume_usd_f64 <= minnow_threshold {
            Cohort::Minnow
        } else {
            Cohort::Dolphin
        };

        book.add_whale_cvd(cohort, signed_volume_usd);

        let algo_alert = if cohort == Cohort::Minnow {
            self.feed_algo_rings(book, trade, is_sell)
        } else {
            None
        };

        (cohort, volume_usd, algo_alert)
    }

    /// 95th/20th percentile of recent trade notionals, floored by the
    /// asset's static minimums and sanity-checked so the whale bar is never
    /// at or below the minnow bar. Falls back to the static thresholds
    /// outright under [`MIN_SAMPLES_FOR_DYNAMIC`] samples.
    fn dynamic_thresholds(&self, book: &LocalOrderBook) -> (f64, f64) {
        let history = book.trade_size_history();
        if history.len() < MIN_SAMPLES_FOR_DYNAMIC {
            return (self.config.static_whale_threshold_usd, self.config.static_minnow_threshold_usd);
        }
        let samples: Vec<f64> = history.iter().filter_map(|d| d.to_f64()).collect();
        let mut data = Data::new(samples);
        let whale = data.percentile(95).max(self.config.min_whale_floor_usd);
        let mut minnow = data.percentile(20).max(self.config.min_minnow_floor_usd);
        let whale = if whale <= minnow { minnow * 10.0 } else { whale };
        if minnow >= whale {
            minnow = whale / 10.0;
        }
        (whale, minnow)
    }

    fn feed_algo_rings(&self, book: &mut LocalOrderBook, trade: &TradeEvent, is_sell: bool) -> Option<AlgoDetectedEvent> {
        let size_usd = trade.notional_usd();
        book.push_algo_trade(trade.event_time_ms as i64, is_sell, size_usd);

        if book.algo_window().len() < ALGO_CLASSIFY_AT {
            return None;
        }

        let total = book.algo_window().len();
        let sell_count = book.algo_window().iter().filter(|(_, s)| *s).count();
        let buy_count = total - sell_count;
        let directional_ratio = (sell_count.max(buy_count) as f64) / total as f64;
        if directional_ratio < 0.85 {
            return None;
        }

        let direction = if sell_count >= buy_count { TradeSide::Sell } else { TradeSide::Buy };
        let (std_dev_ms, mean_interval_ms) = Self::timing_pattern(book);
        let size_uniformity = Self::size_pattern(book);
        let classification = Self::classify_algo_type(std_dev_ms, mean_interval_ms, size_uniformity, directional_ratio);

        let event = classification.map(|(kind, confidence)| AlgoDetectedEvent {
            id: uuid::Uuid::new_v4(),
            symbol: book.symbol.clone(),
            direction,
            kind,
            confidence,
            event_time: trade_event_time(trade),
        });

        if event.is_some() {
            book.clear_algo_rings();
        } else if directional_ratio > 0.90 {
            let fallback = AlgoDetectedEvent {
                id: uuid::Uuid::new_v4(),
                symbol: book.symbol.clone(),
                direction,
                kind: AlgoKind::Algo,
                confidence: directional_ratio,
                event_time: trade_event_time(trade),
            };
            book.clear_algo_rings();
            return Some(fallback);
        }
        event
    }

    /// Sample mean/stdev of recent inter-trade intervals, `(0, 0)` under 10
    /// samples (too thin to call a pattern).
    fn timing_pattern(book: &LocalOrderBook) -> (f64, f64) {
        let intervals = book.algo_interval_history();
        let n = intervals.len();
        if n < 10 {
            return (0.0, 0.0);
        }
        let mean = intervals.iter().sum::<f64>() / n as f64;
        let variance = intervals.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1) as f64;
        (variance.sqrt(), mean)
    }

    /// Fraction of recent trade sizes equal to the single most common size
    /// (rounded to cents), `0.0` under 10 samples.
    fn size_pattern(book: &LocalOrderBook) -> f64 {
        let sizes = book.algo_size_pattern();
        let n = sizes.len();
        if n < 10 {
            return 0.0;
        }
        let rounded: Vec<Decimal> = sizes.iter().map(|d| d.round_dp(2)).collect();
        let mut counts: std::collections::HashMap<Decimal, usize> = std::collections::HashMap::new();
        for size in &rounded {
            *counts.entry(*size).or_insert(0) += 1;
        }
        let max_count = counts.values().copied().max().unwrap_or(0);
        max_count as f64 / n as f64
    }

    /// Decision order matters: size uniformity is checked first (an iceberg
    /// footprint can otherwise masquerade as a fast sweep), then sweep speed
    /// is checked *before* the CV-based TWAP/VWAP split, since a sweep's
    /// interval is what makes it a sweep regardless of its size CV.
    fn classify_algo_type(
        std_dev_ms: f64,
        mean_interval_ms: f64,
        size_uniformity: f64,
        directional_ratio: f64,
    ) -> Option<(AlgoKind, f64)> {
        if directional_ratio < 0.85 {
            return None;
        }
        if size_uniformity > 0.90 {
            return Some((AlgoKind::Iceberg, (size_uniformity + directional_ratio) / 2.0));
        }
        if mean_interval_ms <= 0.0 {
            return None;
        }
        if mean_interval_ms < 50.0 {
            let speed_score = 1.0 - (mean_interval_ms / 50.0);
            return Some((AlgoKind::Sweep, (speed_score + directional_ratio) / 2.0));
        }
        let cv = std_dev_ms / mean_interval_ms;
        if cv < 0.10 {
            let stability = 1.0 - cv;
            Some((AlgoKind::Twap, (stability + directional_ratio) / 2.0))
        } else if cv < 0.50 {
            let adaptation = 1.0 - (cv - 0.10) / 0.40;
            Some((AlgoKind::Vwap, (adaptation + directional_ratio) / 2.0))
        } else {
            None
        }
    }
}

fn trade_event_time(trade: &TradeEvent) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(trade.event_time_ms as i64).single().unwrap_or_else(Utc::now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::get_config;
    use crate::domain::{Price, Qty};
    use rust_decimal_macros::dec;

    fn book(now: DateTime<Utc>) -> LocalOrderBook {
        LocalOrderBook::new("BTCUSDT", get_config("BTCUSDT"), now)
    }

    fn trade(qty: Decimal, price: Decimal, is_buyer_maker: bool, ts_ms: u64) -> TradeEvent {
        TradeEvent { price: Price(price), quantity: Qty(qty), is_buyer_maker, event_time_ms: ts_ms, trade_id: None }
    }

    #[test]
    fn large_notional_trade_classified_whale_under_static_floor() {
        let analyzer = WhaleAnalyzer::new(get_config("BTCUSDT"));
        let mut b = book(Utc.timestamp_millis_opt(0).unwrap());
        let t = trade(dec!(2), dec!(100000), false, 0);
        let (cohort, volume_usd, _) = analyzer.update(&mut b, &t);
        assert_eq!(cohort, Cohort::Whale);
        assert_eq!(volume_usd, dec!(200000));
    }

    #[test]
    fn tiny_notional_trade_classified_minnow() {
        let analyzer = WhaleAnalyzer::new(get_config("BTCUSDT"));
        let mut b = book(Utc.timestamp_millis_opt(0).unwrap());
        let t = trade(dec!(0.001), dec!(100000), false, 0);
        let (cohort, _, _) = analyzer.update(&mut b, &t);
        assert_eq!(cohort, Cohort::Minnow);
    }

    #[test]
    fn sell_side_trade_contributes_negative_cvd() {
        let analyzer = WhaleAnalyzer::new(get_config("BTCUSDT"));
        let mut b = book(Utc.timestamp_millis_opt(0).unwrap());
        let t = trade(dec!(2), dec!(100000), true, 0);
        analyzer.update(&mut b, &t);
        assert!(b.whale_cvd[&Cohort::Whale] < Decimal::ZERO);
    }

    proptest::proptest! {
        /// Percentile-threshold monotonicity law (spec.md §8): scaling every
        /// observed trade size up must never push the whale threshold down.
        #[test]
        fn whale_threshold_does_not_decrease_when_every_size_grows(
            sizes in proptest::collection::vec(1.0f64..100_000.0, 120..150),
            scale in 1.0f64..5.0,
        ) {
            let analyzer = WhaleAnalyzer::new(get_config("BTCUSDT"));
            let mut base = book(Utc.timestamp_millis_opt(0).unwrap());
            let mut scaled = book(Utc.timestamp_millis_opt(0).unwrap());
            for s in &sizes {
                base.push_trade_size(Decimal::try_from(*s).unwrap());
                scaled.push_trade_size(Decimal::try_from(s * scale).unwrap());
            }
            let (whale_base, _) = analyzer.dynamic_thresholds(&base);
            let (whale_scaled, _) = analyzer.dynamic_thresholds(&scaled);
            proptest::prop_assert!(whale_scaled >= whale_base - 1e-6);
        }
    }

    #[test]
    fn fast_varied_size_minnow_bursts_classify_as_sweep() {
        let analyzer = WhaleAnalyzer::new(get_config("BTCUSDT"));
        let mut b = book(Utc.timestamp_millis_opt(0).unwrap());
        let sizes = [dec!(0.001), dec!(0.002), dec!(0.003)];
        for i in 0..200 {
            let t = trade(sizes[i % sizes.len()], dec!(100000), true, (i * 10) as u64);
            analyzer.update(&mut b, &t);
        }
        assert!(b.algo_window().is_empty(), "a pattern should clear the rings once classified");
    }
}
