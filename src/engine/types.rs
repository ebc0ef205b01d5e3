//! Small shared types for the engine's orchestration layer: the item the
//! reordering buffer actually carries, the engine's observability counters,
//! and the snapshot the derivatives refresher hands to the consumer loop.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;

use crate::domain::{GammaProfile, OrderBookUpdate, TradeEvent};

/// What the reordering buffer (C1) carries. Trades sort first at equal
/// `event_time_ms` via [`crate::pipeline::reorder::PRIORITY_TRADE`].
#[derive(Debug, Clone)]
pub enum IngestionItem {
    Trade(TradeEvent),
    Depth(OrderBookUpdate),
}

impl IngestionItem {
    pub fn event_time_ms(&self) -> i64 {
        match self {
            IngestionItem::Trade(t) => t.event_time_ms as i64,
            IngestionItem::Depth(d) => d.event_time_ms as i64,
        }
    }

    pub fn priority(&self) -> u8 {
        match self {
            IngestionItem::Trade(_) => crate::pipeline::reorder::PRIORITY_TRADE,
            IngestionItem::Depth(_) => crate::pipeline::reorder::PRIORITY_DEPTH,
        }
    }
}

/// Structured counters for conditions that are never surfaced as errors
/// (§7): stale diffs, negative `Δt` refill candidates, unreliable VPIN
/// reads, and stale derivatives reads. Exposed for observability, not
/// control flow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SkipCounters {
    pub stale_updates: u64,
    pub negative_delta_t: u64,
    pub unreliable_vpin: u64,
    pub stale_derivatives: u64,
    pub gap_resyncs: u64,
}

/// Single-writer/single-reader payload carried over a `tokio::sync::watch`
/// channel from the periodic derivatives refresher to the consumer loop.
#[derive(Debug, Clone, Copy, Default)]
pub struct DerivativesSnapshot {
    pub gamma_profile: Option<GammaProfile>,
    pub basis_apr: Option<f64>,
    pub options_skew: Option<f64>,
}

pub(super) fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Rolling trade-price window the consumer loop maintains itself —
/// `LocalOrderBook` has no price-history field of its own. Feeds
/// [`crate::orderbook::LocalOrderBook::mark_cancelled_if_vanished`]'s
/// `price_velocity_5s` argument and the feature snapshot's `twap_5m` /
/// `volatility_1h` fields, all off one bounded ring — same windowed
/// mean/stdev shape as [`crate::pipeline::latency::LatencyMonitor`].
pub struct PriceHistory {
    samples: VecDeque<(i64, Decimal)>,
    max_age_ms: i64,
    max_samples: usize,
}

impl PriceHistory {
    pub fn new(max_age_ms: i64, max_samples: usize) -> Self {
        Self { samples: VecDeque::new(), max_age_ms, max_samples }
    }

    pub fn push(&mut self, now_ms: i64, price: Decimal) {
        self.samples.push_back((now_ms, price));
        while self.samples.len() > self.max_samples {
            self.samples.pop_front();
        }
        while let Some((t, _)) = self.samples.front() {
            if now_ms - *t > self.max_age_ms {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    fn in_window(&self, now_ms: i64, window_ms: i64) -> Vec<(i64, Decimal)> {
        let cutoff = now_ms - window_ms;
        self.samples.iter().filter(|(t, _)| *t >= cutoff).copied().collect()
    }

    /// `(last_price - first_price) / elapsed_seconds` over the window; `0.0`
    /// with fewer than two distinct-time samples.
    pub fn velocity(&self, now_ms: i64, window_ms: i64) -> f64 {
        let samples = self.in_window(now_ms, window_ms);
        let (Some(first), Some(last)) = (samples.first(), samples.last()) else { return 0.0 };
        if first.0 == last.0 {
            return 0.0;
        }
        let dt_s = (last.0 - first.0) as f64 / 1000.0;
        (last.1 - first.1).to_f64().unwrap_or(0.0) / dt_s
    }

    pub fn mean(&self, now_ms: i64, window_ms: i64) -> Option<Decimal> {
        let samples = self.in_window(now_ms, window_ms);
        if samples.is_empty() {
            return None;
        }
        let sum: Decimal = samples.iter().map(|(_, p)| *p).sum();
        Some(sum / Decimal::from(samples.len()))
    }

    /// Sample stdev of the window as a fraction of its mean, `0.0` under two
    /// samples or a zero mean.
    pub fn stdev_pct(&self, now_ms: i64, window_ms: i64) -> f64 {
        let samples = self.in_window(now_ms, window_ms);
        let prices: Vec<f64> = samples.iter().filter_map(|(_, p)| p.to_f64()).collect();
        if prices.len() < 2 {
            return 0.0;
        }
        let mean = prices.iter().sum::<f64>() / prices.len() as f64;
        if mean == 0.0 {
            return 0.0;
        }
        let variance = prices.iter().map(|p| (p - mean).powi(2)).sum::<f64>() / (prices.len() - 1) as f64;
        variance.sqrt() / mean
    }
}

#[cfg(test)]
mod price_history_tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn velocity_is_positive_for_a_rising_price() {
        let mut h = PriceHistory::new(5_000, 100);
        h.push(0, dec!(100));
        h.push(5_000, dec!(110));
        assert!(h.velocity(5_000, 5_000) > 0.0);
    }

    #[test]
    fn samples_older_than_max_age_are_pruned() {
        let mut h = PriceHistory::new(1_000, 100);
        h.push(0, dec!(100));
        h.push(2_000, dec!(101));
        assert_eq!(h.samples.len(), 1);
    }

    #[test]
    fn mean_is_none_with_no_samples_in_window() {
        let h = PriceHistory::new(5_000, 100);
        assert!(h.mean(10_000, 1_000).is_none());
    }
}
