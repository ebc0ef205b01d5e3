//! Volume-synchronized probability of informed trading (C5).
//!
//! `VolumeBucket` mutation lives on [`LocalOrderBook`]
//! (`record_trade_for_vpin`); this analyzer is the read side: the VPIN
//! score itself and the reliability gate dependent analyzers check before
//! trusting it.

use crate::config::AssetConfig;
use crate::error::SkipReason;
use crate::orderbook::LocalOrderBook;

const MIN_BUCKETS: usize = 10;
const DEFAULT_WINDOW: usize = 50;
const STALENESS_S: f64 = 300.0;
/// Spread below this (as a fraction of mid) is dead-flat, retail-maker
/// noise rather than a genuine informed-flow signal.
const DEAD_FLAT_SPREAD_BPS: f64 = 1.0;

pub struct FlowToxicityAnalyzer {
    config: &'static AssetConfig,
}

impl FlowToxicityAnalyzer {
    pub fn new(config: &'static AssetConfig) -> Self {
        Self { config }
    }

    /// `Err(SkipReason::UnreliableVpin)` when fewer than [`MIN_BUCKETS`]
    /// completed buckets exist, the spread is dead-flat, or the youngest
    /// bucket has gone stale (the "Frozen VPIN" guard).
    pub fn is_reliable(&self, book: &LocalOrderBook, now: chrono::DateTime<chrono::Utc>) -> Result<(), SkipReason> {
        if book.vpin_buckets.len() < MIN_BUCKETS {
            return Err(SkipReason::UnreliableVpin);
        }
        if let Some(spread_bps) = book.spread_bps() {
            if spread_bps < DEAD_FLAT_SPREAD_BPS {
                return Err(SkipReason::UnreliableVpin);
            }
        }
        let youngest_age = book.vpin_buckets.back().map(|b| b.age_seconds(now)).unwrap_or(f64::INFINITY);
        if youngest_age > STALENESS_S {
            return Err(SkipReason::UnreliableVpin);
        }
        Ok(())
    }

    /// `VPIN = sum(|buy_i - sell_i|) / (n * bucket_size)` over the last n
    /// (default 50) completed buckets. `None` unless
    /// [`FlowToxicityAnalyzer::is_reliable`] passes.
    pub fn vpin(&self, book: &LocalOrderBook, now: chrono::DateTime<chrono::Utc>) -> Option<f64> {
        self.is_reliable(book, now).ok()?;
        let n = DEFAULT_WINDOW.min(book.vpin_buckets.len());
        if n == 0 {
            return None;
        }
        let skip = book.vpin_buckets.len() - n;
        let imbalance: rust_decimal::Decimal =
            book.vpin_buckets.iter().skip(skip).map(|b| b.calculate_imbalance()).sum();
        let denom = self.config.vpin_bucket_size * rust_decimal::Decimal::from(n);
        if denom.is_zero() {
            return None;
        }
        use rust_decimal::prelude::ToPrimitive;
        (imbalance / denom).to_f64()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn t(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(ms).unwrap()
    }

    fn seeded_book(n_buckets: usize) -> LocalOrderBook {
        let mut book = LocalOrderBook::new("BTCUSDT", crate::config::get_config("BTCUSDT"), t(0));
        book.apply_snapshot(
            vec![crate::domain::PriceLevel::new(dec!(100), dec!(1))],
            vec![crate::domain::PriceLevel::new(dec!(101), dec!(1))],
            1,
        );
        for i in 0..n_buckets {
            let ts = t(i as i64 * 1000);
            book.record_trade_for_vpin(crate::domain::Qty(book.config.vpin_bucket_size), true, ts);
        }
        book
    }

    #[test]
    fn fewer_than_minimum_buckets_is_unreliable() {
        let analyzer = FlowToxicityAnalyzer::new(crate::config::get_config("BTCUSDT"));
        let book = seeded_book(3);
        assert!(analyzer.vpin(&book, t(3000)).is_none());
    }

    #[test]
    fn enough_fresh_buckets_yields_a_score() {
        let analyzer = FlowToxicityAnalyzer::new(crate::config::get_config("BTCUSDT"));
        let book = seeded_book(12);
        let vpin = analyzer.vpin(&book, t(12_000)).expect("reliable");
        // Every bucket is all-buy here, so VPIN saturates at 1.0.
        assert!((vpin - 1.0).abs() < 1e-9);
    }

    #[test]
    fn stale_youngest_bucket_is_unreliable() {
        let analyzer = FlowToxicityAnalyzer::new(crate::config::get_config("BTCUSDT"));
        let book = seeded_book(12);
        assert!(analyzer.vpin(&book, t(12_000 + 301_000)).is_none());
    }
}
