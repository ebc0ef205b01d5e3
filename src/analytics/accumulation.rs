//! Multi-timeframe Wyckoff classification (C8): reads the CVD/price
//! divergence the book already cached, corroborates it against iceberg
//! absorption and order-book imbalance, and clusters nearby iceberg levels
//! into the price zones that raise confidence near a defended wall.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::config::AssetConfig;
use crate::domain::{CvdDivergenceResult, DivergenceType, Price, PriceZone, WyckoffPattern, WyckoffResult};
use crate::orderbook::LocalOrderBook;

use super::historical::Timeframe;

/// A level absorbs "strongly" once its hidden volume reaches this multiple
/// of the visible depth it sits behind.
const STRONG_ABSORPTION_RATIO: Decimal = dec!(1.5);
/// Price zones within this fraction of the current mid count as "near" for
/// the `near_strong_zone` confidence bonus.
const STRONG_ZONE_PROXIMITY_PCT: f64 = 0.002;

pub struct AccumulationDetector {
    config: &'static AssetConfig,
}

impl AccumulationDetector {
    pub fn new(config: &'static AssetConfig) -> Self {
        Self { config }
    }

    /// Classifies the Wyckoff pattern implied by `timeframe`'s cached
    /// CVD/price divergence, or `None` if the book hasn't detected one.
    pub fn detect(&self, book: &LocalOrderBook, timeframe: Timeframe, current_mid: Decimal) -> Option<WyckoffResult> {
        let divergence = book.detect_cvd_divergence(timeframe)?;
        let bullish = divergence.div_type == DivergenceType::Bullish;

        let zones = self.cluster_icebergs_to_zones(book, STRONG_ZONE_PROXIMITY_PCT);
        let matching_side_is_ask = !bullish;
        let absorption_detected = self.has_strong_absorption(book, matching_side_is_ask);
        let obi = book.get_weighted_obi(self.config.ofi_depth, true);
        let obi_confirms = if bullish { obi > 0.0 } else { obi < 0.0 };
        let near_strong_zone = self.near_strong_zone(&zones, matching_side_is_ask, current_mid);

        let pattern = match (bullish, absorption_detected) {
            (true, true) => WyckoffPattern::Spring,
            (true, false) => WyckoffPattern::Accumulation,
            (false, true) => WyckoffPattern::Upthrust,
            (false, false) => WyckoffPattern::Distribution,
        };

        let mut confidence = divergence.confidence;
        if absorption_detected {
            confidence = (confidence + 0.1).min(1.0);
        }
        if near_strong_zone {
            confidence = (confidence + 0.1).min(1.0);
        }
        if !obi_confirms {
            confidence *= 0.85;
        }

        Some(WyckoffResult {
            pattern,
            div_type: divergence.div_type,
            confidence: confidence.clamp(0.0, 1.0),
            absorption_detected,
            obi_confirms,
            near_strong_zone,
        })
    }

    /// Whether at least one active iceberg on `is_ask`'s side currently
    /// holds hidden volume `>= 1.5x` the visible depth it sits behind.
    fn has_strong_absorption(&self, book: &LocalOrderBook, is_ask: bool) -> bool {
        let visible_depth = book.visible_depth(is_ask, self.config.ofi_depth);
        book.active_icebergs
            .values()
            .filter(|level| level.is_ask == is_ask)
            .any(|level| level.calculate_relative_depth_ratio(visible_depth) >= STRONG_ABSORPTION_RATIO)
    }

    fn near_strong_zone(&self, zones: &[PriceZone], is_ask: bool, current_mid: Decimal) -> bool {
        if current_mid.is_zero() {
            return false;
        }
        zones.iter().filter(|z| z.is_ask == is_ask && z.is_strong()).any(|z| {
            let distance_pct = ((z.center_price.inner() - current_mid) / current_mid).abs();
            distance_pct <= Decimal::from_f64_retain(STRONG_ZONE_PROXIMITY_PCT).unwrap_or(Decimal::ZERO)
        })
    }

    /// Groups active icebergs on the same side into `PriceZone`s: walking
    /// levels in price order, a level joins the current zone if it sits
    /// within `tolerance_pct` of the zone's last price, else it starts a
    /// new one. A bid and an ask are never grouped into the same zone.
    pub fn cluster_icebergs_to_zones(&self, book: &LocalOrderBook, tolerance_pct: f64) -> Vec<PriceZone> {
        let tolerance = Decimal::from_f64_retain(tolerance_pct).unwrap_or(Decimal::ZERO);
        let mut zones = Vec::new();

        for is_ask in [false, true] {
            let mut levels: Vec<(Price, Decimal)> = book
                .active_icebergs
                .iter()
                .filter(|(_, level)| level.is_ask == is_ask)
                .map(|(price, level)| (*price, level.total_hidden_volume.inner()))
                .collect();
            levels.sort_by_key(|(price, _)| *price);

            let mut current: Option<(Decimal, Decimal, Decimal, usize)> = None; // (zone_low, zone_high, total_volume, count)
            for (price, hidden) in levels {
                match &mut current {
                    Some((_, high, total, count)) if price.inner() - *high <= tolerance * *high => {
                        *high = price.inner();
                        *total += hidden;
                        *count += 1;
                    }
                    _ => {
                        if let Some((low, high, total, count)) = current.take() {
                            zones.push(Self::finish_zone(low, high, total, count, is_ask));
                        }
                        current = Some((price.inner(), price.inner(), hidden, 1));
                    }
                }
            }
            if let Some((low, high, total, count)) = current {
                zones.push(Self::finish_zone(low, high, total, count, is_ask));
            }
        }

        zones
    }

    fn finish_zone(low: Decimal, high: Decimal, total_hidden_volume: Decimal, level_count: usize, is_ask: bool) -> PriceZone {
        let center = (low + high) / Decimal::TWO;
        PriceZone { center_price: Price(center), total_hidden_volume, level_count, is_ask }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::get_config;
    use crate::domain::{IcebergLevel, Qty};
    use chrono::{DateTime, TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn t(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(ms).unwrap()
    }

    fn book_with_bullish_divergence() -> LocalOrderBook {
        let mut b = LocalOrderBook::new("BTCUSDT", get_config("BTCUSDT"), t(0));
        let rows = [(95000, 1000), (94500, 1200), (94000, 1500), (94200, 1800), (93800, 2000)];
        for (i, (price, cvd)) in rows.iter().enumerate() {
            b.historical_memory.update_history(
                t(i as i64 * 3_600_000),
                Decimal::from(*cvd),
                Decimal::ZERO,
                Decimal::from(*price),
                true,
            );
        }
        b
    }

    #[test]
    fn bullish_divergence_without_absorption_is_accumulation() {
        let detector = AccumulationDetector::new(get_config("BTCUSDT"));
        let b = book_with_bullish_divergence();
        let result = detector.detect(&b, Timeframe::H1, dec!(93800)).expect("divergence present");
        assert_eq!(result.pattern, WyckoffPattern::Accumulation);
        assert!(!result.absorption_detected);
    }

    #[test]
    fn bullish_divergence_with_strong_bid_absorption_is_spring() {
        let detector = AccumulationDetector::new(get_config("BTCUSDT"));
        let mut b = book_with_bullish_divergence();
        b.active_icebergs.insert(
            Price(dec!(93800)),
            IcebergLevel::new(Price(dec!(93800)), false, Qty(dec!(100)), 0.9, t(0)),
        );
        let result = detector.detect(&b, Timeframe::H1, dec!(93800)).expect("divergence present");
        assert_eq!(result.pattern, WyckoffPattern::Spring);
        assert!(result.absorption_detected);
        assert!(result.confidence >= 0.7);
    }

    #[test]
    fn no_cached_divergence_yields_no_result() {
        let detector = AccumulationDetector::new(get_config("BTCUSDT"));
        let b = LocalOrderBook::new("BTCUSDT", get_config("BTCUSDT"), t(0));
        assert!(detector.detect(&b, Timeframe::H1, dec!(100)).is_none());
    }

    #[test]
    fn clustering_never_mixes_bid_and_ask_into_one_zone() {
        let detector = AccumulationDetector::new(get_config("BTCUSDT"));
        let mut b = LocalOrderBook::new("BTCUSDT", get_config("BTCUSDT"), t(0));
        b.active_icebergs.insert(Price(dec!(100)), IcebergLevel::new(Price(dec!(100)), false, Qty(dec!(1)), 0.9, t(0)));
        b.active_icebergs.insert(Price(dec!(100.01)), IcebergLevel::new(Price(dec!(100.01)), true, Qty(dec!(1)), 0.9, t(0)));
        let zones = detector.cluster_icebergs_to_zones(&b, 0.01);
        assert_eq!(zones.len(), 2);
        assert_ne!(zones[0].is_ask, zones[1].is_ask);
    }

    #[test]
    fn three_nearby_levels_form_a_strong_zone() {
        let detector = AccumulationDetector::new(get_config("BTCUSDT"));
        let mut b = LocalOrderBook::new("BTCUSDT", get_config("BTCUSDT"), t(0));
        for price in [dec!(100), dec!(100.1), dec!(100.2)] {
            b.active_icebergs.insert(Price(price), IcebergLevel::new(Price(price), false, Qty(dec!(1)), 0.9, t(0)));
        }
        let zones = detector.cluster_icebergs_to_zones(&b, 0.01);
        assert_eq!(zones.len(), 1);
        assert!(zones[0].is_strong());
    }
}
