//! Iceberg level lifecycle state.
//!
//! `IcebergLevel` accumulates across refills for as long as a hidden order
//! keeps reloading at a price; it is the richest piece of state the core
//! carries, since swing-trading labels (intention, wall resilience) are
//! derived from its whole lifecycle rather than any single refill.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use super::types::{Price, Qty};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IcebergStatus {
    Active,
    Breached,
    Cancelled,
}

/// Snapshot of book/price context captured at the moment a level transitions
/// to `Cancelled`, feeding the anti-spoofing score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CancellationContext {
    pub mid_price_at_cancel: Decimal,
    pub distance_from_level_pct: f64,
    pub price_velocity_5s: f64,
    pub moving_towards_level: bool,
    pub volume_executed_pct: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WallResilience {
    Strong,
    Moderate,
    Weak,
    Exhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntentionType {
    Scalper,
    Intraday,
    Positional,
    Unknown,
}

/// Coin-quantity cohort used only for the per-level trade footprint. Kept
/// separate from the USD-based whale/dolphin/minnow cohorting on the book —
/// the two labelings are never merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FootprintCohort {
    Whale,
    Dolphin,
    Fish,
}

impl FootprintCohort {
    fn classify(qty: Decimal) -> Self {
        if qty >= Decimal::from(5) {
            FootprintCohort::Whale
        } else if qty >= Decimal::from(1) {
            FootprintCohort::Dolphin
        } else {
            FootprintCohort::Fish
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TradeFootprint {
    pub buy_volume: Decimal,
    pub sell_volume: Decimal,
    pub by_cohort: HashMap<FootprintCohort, Decimal>,
}

impl TradeFootprint {
    pub fn add_trade(&mut self, qty: Qty, is_buy: bool) {
        if is_buy {
            self.buy_volume += qty.inner();
        } else {
            self.sell_volume += qty.inner();
        }
        *self.by_cohort.entry(FootprintCohort::classify(qty.inner())).or_insert(Decimal::ZERO) +=
            qty.inner();
    }

    /// Fraction of total footprint volume that was buyer-initiated; 0.5
    /// (neutral) when no trades have been recorded yet.
    pub fn buy_ratio(&self) -> f64 {
        let total = self.buy_volume + self.sell_volume;
        if total.is_zero() {
            0.5
        } else {
            (self.buy_volume / total).to_string().parse::<f64>().unwrap_or(0.5)
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IcebergLevel {
    pub price: Price,
    pub is_ask: bool,
    pub total_hidden_volume: Qty,
    pub creation_time: DateTime<Utc>,
    pub last_update_time: DateTime<Utc>,
    pub status: IcebergStatus,
    pub confidence_score: f64,
    pub refill_count: u32,
    pub last_refill_time: Option<DateTime<Utc>>,
    pub average_refill_delay_ms: Option<f64>,
    pub is_gamma_wall: bool,
    pub spoofing_probability: f64,
    pub cancellation_context: Option<CancellationContext>,
    pub is_dolphin: bool,
    pub vpin_history: Vec<f64>,
    pub trade_footprint: TradeFootprint,
}

impl IcebergLevel {
    pub fn new(price: Price, is_ask: bool, hidden: Qty, confidence: f64, now: DateTime<Utc>) -> Self {
        Self {
            price,
            is_ask,
            total_hidden_volume: hidden,
            creation_time: now,
            last_update_time: now,
            status: IcebergStatus::Active,
            confidence_score: confidence.clamp(0.0, 1.0),
            refill_count: 0,
            last_refill_time: None,
            average_refill_delay_ms: None,
            is_gamma_wall: false,
            spoofing_probability: 0.0,
            cancellation_context: None,
            is_dolphin: false,
            vpin_history: Vec::new(),
            trade_footprint: TradeFootprint::default(),
        }
    }

    /// Registers an accepted refill: accumulates hidden volume, updates the
    /// running mean refill delay, bumps `refill_count`.
    pub fn register_refill(&mut self, additional_hidden: Qty, now: DateTime<Utc>) {
        self.total_hidden_volume = self.total_hidden_volume + additional_hidden;
        if let Some(prev) = self.last_refill_time {
            let delay_ms = (now - prev).num_milliseconds() as f64;
            self.average_refill_delay_ms = Some(match self.average_refill_delay_ms {
                Some(prev_avg) => {
                    let n = self.refill_count as f64;
                    (prev_avg * n + delay_ms) / (n + 1.0)
                }
                None => delay_ms,
            });
        }
        self.last_refill_time = Some(now);
        self.refill_count += 1;
        self.last_update_time = now;
    }

    /// Refills per minute, or `None` before the second refill (no interval
    /// to measure yet).
    pub fn get_refill_frequency(&self) -> Option<f64> {
        let avg_ms = self.average_refill_delay_ms?;
        if avg_ms <= 0.0 {
            return None;
        }
        Some(60_000.0 / avg_ms)
    }

    pub fn calculate_wall_resilience(&self) -> Option<WallResilience> {
        let avg_ms = self.average_refill_delay_ms?;
        Some(if avg_ms < 50.0 {
            WallResilience::Strong
        } else if avg_ms < 200.0 {
            WallResilience::Moderate
        } else if avg_ms < 500.0 {
            WallResilience::Weak
        } else {
            WallResilience::Exhausted
        })
    }

    /// Exponential time-decay of confidence: `Conf(t) = Conf_initial *
    /// exp(-ln2 * Δt / half_life)`. A negative `Δt` (clock skew, or `now`
    /// predating `last_update_time`) leaves the confidence unchanged.
    pub fn get_decayed_confidence(&self, now: DateTime<Utc>, half_life_seconds: f64) -> f64 {
        let delta_s = (now - self.last_update_time).num_milliseconds() as f64 / 1000.0;
        if delta_s < 0.0 {
            return self.confidence_score;
        }
        let lambda = std::f64::consts::LN_2 / half_life_seconds;
        (self.confidence_score * (-lambda * delta_s).exp()).clamp(0.0, 1.0)
    }

    /// Hidden-to-visible ratio over the top-`depth` levels on this level's
    /// side, given the visible depth the caller has already summed from the
    /// book. Values > 1.0 mean more liquidity is hidden than displayed.
    pub fn calculate_relative_depth_ratio(&self, visible_depth: Decimal) -> Decimal {
        if visible_depth.is_zero() {
            return Decimal::MAX;
        }
        self.total_hidden_volume.inner() / visible_depth
    }

    /// Crypto-aware correction to confidence based on who is driving the
    /// flow refilling this level: heavy whale participation during a
    /// high-VPIN refill reads as an informed "whale attack" (penalize);
    /// heavy minnow participation during high VPIN reads as retail
    /// capitulation this level is absorbing ("panic absorption", bonus) —
    /// the opposite of a textbook VPIN reading, because the level is the
    /// liquidity provider here, not the aggressor. Only engages once VPIN
    /// itself reads toxic (`>= 0.5`); a calm refill is left untouched.
    pub fn update_micro_divergence(
        &mut self,
        vpin_at_refill: Option<f64>,
        whale_volume_pct: f64,
        minnow_volume_pct: f64,
        price_drift_bps: f64,
    ) {
        if let Some(vpin) = vpin_at_refill {
            self.vpin_history.push(vpin);
        }

        let Some(vpin) = vpin_at_refill else { return };
        if vpin < 0.5 {
            return;
        }

        if whale_volume_pct > 0.6 {
            let mut penalty = if vpin > 0.7 { 0.25 } else { 0.15 };
            if price_drift_bps > 5.0 {
                penalty += 0.1;
            }
            self.confidence_score = (self.confidence_score - penalty).max(0.0);
        } else if minnow_volume_pct > 0.6 {
            if vpin > 0.8 {
                self.confidence_score = (self.confidence_score + 0.1).min(1.0);
            }
            if price_drift_bps > 10.0 {
                self.confidence_score = (self.confidence_score - 0.05).max(0.0);
            }
        } else {
            let penalty = if vpin > 0.7 { 0.1 } else { 0.05 };
            self.confidence_score = (self.confidence_score - penalty).max(0.0);
        }
    }

    /// Classifies the likely holding-period intention behind this level from
    /// its Iceberg Impact Ratio (hidden volume / 20-day average daily
    /// volume). Unknown without an ADV figure to compare against.
    pub fn classify_intention(hidden_volume: Qty, adv_20d: Decimal) -> IntentionType {
        if adv_20d <= Decimal::ZERO {
            return IntentionType::Unknown;
        }
        let iir = hidden_volume.inner() / adv_20d;
        if iir < Decimal::new(1, 4) {
            IntentionType::Scalper
        } else if iir < Decimal::new(1, 3) {
            IntentionType::Intraday
        } else {
            IntentionType::Positional
        }
    }

    pub fn add_trade_to_footprint(&mut self, qty: Qty, is_buy: bool) {
        self.trade_footprint.add_trade(qty, is_buy);
    }

    pub fn get_footprint_buy_ratio(&self) -> f64 {
        self.trade_footprint.buy_ratio()
    }

    /// Whether this level has lived long enough to be a meaningful input to
    /// swing-trading (as opposed to scalp-horizon) analysis.
    pub fn is_significant_for_swing(&self, now: DateTime<Utc>, min_lifetime_seconds: i64) -> bool {
        (now - self.creation_time).num_seconds() >= min_lifetime_seconds
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn t(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(ms).unwrap()
    }

    fn level() -> IcebergLevel {
        IcebergLevel::new(Price(dec!(100000)), true, Qty(dec!(1.0)), 1.0, t(0))
    }

    #[test]
    fn decayed_confidence_halves_after_one_half_life() {
        let lvl = level();
        let decayed = lvl.get_decayed_confidence(t(300_000), 300.0);
        assert!((decayed - 0.5).abs() < 1e-6);
    }

    #[test]
    fn decayed_confidence_unchanged_for_negative_delta() {
        let lvl = level();
        let decayed = lvl.get_decayed_confidence(t(-1000), 300.0);
        assert_eq!(decayed, lvl.confidence_score);
    }

    #[test]
    fn wall_resilience_buckets_by_average_delay() {
        let mut lvl = level();
        lvl.register_refill(Qty(dec!(0.1)), t(1000));
        lvl.register_refill(Qty(dec!(0.1)), t(1020));
        assert_eq!(lvl.calculate_wall_resilience(), Some(WallResilience::Strong));
    }

    #[test]
    fn micro_divergence_whale_attack_penalizes() {
        let mut lvl = level();
        let before = lvl.confidence_score;
        lvl.update_micro_divergence(Some(0.8), 0.9, 0.05, 10.0);
        assert!(lvl.confidence_score < before);
    }

    #[test]
    fn micro_divergence_panic_absorption_bonuses() {
        let mut lvl = level();
        lvl.confidence_score = 0.5;
        let before = lvl.confidence_score;
        lvl.update_micro_divergence(Some(0.85), 0.05, 0.9, 2.0);
        assert!(lvl.confidence_score > before);
    }

    #[test]
    fn micro_divergence_is_a_noop_below_vpin_gate() {
        let mut lvl = level();
        let before = lvl.confidence_score;
        // Whale-dominated composition that would penalize heavily above the
        // gate, but VPIN itself is calm (< 0.5) so nothing should happen.
        lvl.update_micro_divergence(Some(0.3), 0.9, 0.05, 10.0);
        assert_eq!(lvl.confidence_score, before);
        assert_eq!(lvl.vpin_history, vec![0.3]);
    }

    #[test]
    fn classify_intention_buckets_by_iir() {
        assert_eq!(
            IcebergLevel::classify_intention(Qty(dec!(0.5)), dec!(10000)),
            IntentionType::Scalper
        );
        assert_eq!(
            IcebergLevel::classify_intention(Qty(dec!(5)), dec!(10000)),
            IntentionType::Intraday
        );
        assert_eq!(
            IcebergLevel::classify_intention(Qty(dec!(50)), dec!(10000)),
            IntentionType::Positional
        );
        assert_eq!(
            IcebergLevel::classify_intention(Qty(dec!(1)), dec!(0)),
            IntentionType::Unknown
        );
    }

    #[test]
    fn footprint_buy_ratio_reflects_cohort_volume() {
        let mut fp = TradeFootprint::default();
        fp.add_trade(Qty(dec!(2)), true);
        fp.add_trade(Qty(dec!(1)), false);
        assert!((fp.buy_ratio() - 2.0 / 3.0).abs() < 1e-9);
    }
}
