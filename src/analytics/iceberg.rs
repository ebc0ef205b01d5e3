//! Iceberg refill detection (C7): the Native/Synthetic split, the regime
//! adapter that stretches both paths' thresholds with realized volatility,
//! and the three-phase gamma/VPIN/CVD confidence adjustment.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;

use crate::config::AssetConfig;
use crate::domain::{Cohort, CvdDivergenceResult, DivergenceType, GammaProfile, IcebergDetectedEvent, Price, Qty};
use crate::orderbook::LocalOrderBook;

/// Synthetic-path sigmoid rejects a candidate below this refill probability
/// even if the volume ratio alone looked convincing.
const MIN_REFILL_PROBABILITY: f64 = 0.2;
/// `adjust_confidence_by_gamma`'s VPIN phase only engages once a toxicity
/// reading is trusted; the analyzer never sees `UnreliableVpin` readings —
/// the caller passes `None` in that case.
const VPIN_TOXIC_THRESHOLD: f64 = 0.7;
const VPIN_CALM_THRESHOLD: f64 = 0.3;

/// `P(refill | delta_t) = 1 / (1 + exp(decay * (delta_t - cutoff)))`, the
/// synthetic-path refill-probability sigmoid. Clamped exponent guards
/// against overflow far from `cutoff` rather than relying on `f64::exp`'s
/// own saturation behavior.
fn refill_probability(delta_t_ms: i64, cutoff_ms: i64, decay: f64) -> f64 {
    let exponent = decay * (delta_t_ms - cutoff_ms) as f64;
    if exponent > 50.0 {
        0.0
    } else if exponent < -50.0 {
        1.0
    } else {
        1.0 / (1.0 + exponent.exp())
    }
}

/// Single-trade stand-in for the original's windowed whale/minnow flow
/// composition: the refill-triggering trade's own USD cohort stands in for
/// "who's driving this refill" since the core doesn't keep a rolling window
/// of cohort shares per price level. Dolphin trades count as neither,
/// landing in `update_micro_divergence`'s conservative mixed-flow branch.
fn cohort_composition(cohort: Cohort) -> (f64, f64) {
    match cohort {
        Cohort::Whale => (1.0, 0.0),
        Cohort::Minnow => (0.0, 1.0),
        Cohort::Dolphin => (0.0, 0.0),
    }
}

/// Signed drift of the book's mid towards this level, in bps of the level's
/// own price — positive means price has moved towards (or through) the
/// level since the refill, the "weakening" direction `update_micro_divergence`
/// penalizes.
fn price_drift_bps(mid: Option<Decimal>, price: Price, is_ask: bool) -> f64 {
    let Some(mid) = mid else { return 0.0 };
    let mid_f64 = mid.to_f64().unwrap_or(0.0);
    let price_f64 = price.inner().to_f64().unwrap_or(0.0);
    if price_f64 == 0.0 {
        return 0.0;
    }
    if is_ask {
        (mid_f64 - price_f64) / price_f64 * 10_000.0
    } else {
        (price_f64 - mid_f64) / price_f64 * 10_000.0
    }
}

/// Stretches the native-refill window and softens the minimum iceberg ratio
/// as realized spread volatility rises, so a momentarily choppy book doesn't
/// starve native-path detection or demand an unrealistically high ratio.
pub struct RegimeAdapter;

impl RegimeAdapter {
    /// `(current_spread - mean) / stdev`, clamped to `[0, 3]`; `0` when
    /// `stdev` is zero (a perfectly flat recent spread carries no signal).
    pub fn volatility_factor(current_spread_bps: f64, mean_spread_bps: f64, stdev_spread_bps: f64) -> f64 {
        if stdev_spread_bps == 0.0 {
            return 0.0;
        }
        ((current_spread_bps - mean_spread_bps) / stdev_spread_bps).clamp(0.0, 3.0)
    }

    /// Widens the native-refill window exponentially with volatility,
    /// capped at 12ms so a runaway regime never lets "native" swallow what
    /// should be scored as synthetic.
    pub fn dynamic_native_limit_ms(base_ms: f64, vol_factor: f64) -> f64 {
        (base_ms * (vol_factor / 2.0).exp()).min(12.0)
    }

    /// Linearly relaxes the minimum iceberg ratio as volatility rises,
    /// floored at 0.10 so the ratio gate is never fully disabled.
    pub fn dynamic_min_ratio(base_ratio: f64, vol_factor: f64) -> f64 {
        (base_ratio * (1.0 - vol_factor / 5.0)).max(0.10)
    }
}

pub struct IcebergAnalyzer {
    config: &'static AssetConfig,
}

impl IcebergAnalyzer {
    pub fn new(config: &'static AssetConfig) -> Self {
        Self { config }
    }

    /// Evaluates a trade/depth-refill pair already correlated by the engine
    /// (`delta_t_ms` is the gap between the trade and the depth update that
    /// restored the level). Returns `None` on any rejection — a refill too
    /// slow to be this mechanism, a dust/ratio miss, or a synthetic-path
    /// sigmoid below [`MIN_REFILL_PROBABILITY`] — never an error, since a
    /// declined candidate is an ordinary outcome, not a fault.
    #[allow(clippy::too_many_arguments)]
    pub fn analyze_with_timing(
        &self,
        book: &mut LocalOrderBook,
        price: Price,
        is_ask: bool,
        trade_qty: Qty,
        visible_before: Qty,
        delta_t_ms: i64,
        vpin_score: Option<f64>,
        cvd_divergence: Option<CvdDivergenceResult>,
        cohort: Cohort,
        now: DateTime<Utc>,
    ) -> Option<IcebergDetectedEvent> {
        if delta_t_ms < 0 {
            return None;
        }
        if visible_before.inner() < self.config.dust_threshold {
            return None;
        }
        if trade_qty.inner() <= visible_before.inner() {
            return None;
        }

        let (native_max_ms, min_ratio) = self.regime_adjusted_thresholds(book);
        if delta_t_ms as f64 > self.config.synthetic_refill_max_ms as f64 {
            return None;
        }

        let hidden_volume = Qty::from(trade_qty.inner() - visible_before.inner());
        let iceberg_ratio = hidden_volume.inner() / trade_qty.inner();
        if hidden_volume.inner() <= self.config.min_hidden_volume || iceberg_ratio <= min_ratio {
            return None;
        }

        let base_confidence = if (delta_t_ms as f64) <= native_max_ms {
            1.0
        } else {
            let p_refill = refill_probability(
                delta_t_ms,
                self.config.synthetic_cutoff_ms,
                self.config.synthetic_probability_decay,
            );
            if p_refill < MIN_REFILL_PROBABILITY {
                return None;
            }
            let volume_confidence = iceberg_ratio.to_f64().unwrap_or(0.0).min(0.95);
            volume_confidence * p_refill
        };

        let gamma_profile = book.gamma_profile(now).copied();
        let (confidence, is_major_event) =
            self.adjust_confidence_by_gamma(base_confidence, gamma_profile.as_ref(), price, is_ask, vpin_score, cvd_divergence, now);

        book.register_iceberg(price, is_ask, hidden_volume, confidence, now);
        let mid = book.mid_price();
        let (whale_pct, minnow_pct) = cohort_composition(cohort);
        let drift_bps = price_drift_bps(mid, price, is_ask);
        let confidence = if let Some(level) = book.active_icebergs.get_mut(&price) {
            level.is_gamma_wall = is_major_event || level.is_gamma_wall;
            level.confidence_score = confidence;
            level.update_micro_divergence(vpin_score, whale_pct, minnow_pct, drift_bps);
            level.confidence_score
        } else {
            confidence
        };

        Some(IcebergDetectedEvent {
            id: uuid::Uuid::new_v4(),
            symbol: book.symbol.clone(),
            price,
            detected_hidden_volume: hidden_volume,
            visible_volume_before: visible_before,
            confidence,
            event_time: now,
        })
    }

    fn regime_adjusted_thresholds(&self, book: &LocalOrderBook) -> (f64, f64) {
        let base_native = self.config.native_refill_max_ms as f64;
        let base_ratio = self.config.min_iceberg_ratio.to_f64().unwrap_or(0.3);
        let Some(current_spread) = book.spread_bps() else { return (base_native, base_ratio) };
        let Some((mean, stdev)) = book.spread_mean_std() else { return (base_native, base_ratio) };
        let vol_factor = RegimeAdapter::volatility_factor(current_spread, mean, stdev);
        (
            RegimeAdapter::dynamic_native_limit_ms(base_native, vol_factor),
            RegimeAdapter::dynamic_min_ratio(base_ratio, vol_factor),
        )
    }

    /// Three independent multiplicative phases applied to `base_confidence`,
    /// each clamped into the running total only implicitly via the final
    /// clamp — an extreme combination of all three can still legitimately
    /// reach 0 or 1. Returns whether any phase judged this a "major" event
    /// (sits on a gamma wall, or aligns with a high-confidence CVD
    /// divergence) worth flagging distinctly from an ordinary refill.
    fn adjust_confidence_by_gamma(
        &self,
        base_confidence: f64,
        gamma_profile: Option<&GammaProfile>,
        price: Price,
        is_ask: bool,
        vpin_score: Option<f64>,
        cvd_divergence: Option<CvdDivergenceResult>,
        now: DateTime<Utc>,
    ) -> (f64, bool) {
        let mut confidence = base_confidence;
        let mut is_major = false;

        if let Some(profile) = gamma_profile {
            if profile.is_gex_significant() {
                let decay_factor = profile.hours_to_expiry(now).map(|h| (h / 2.0).min(1.0)).unwrap_or(1.0);
                let price_f64 = price.inner().to_f64().unwrap_or(0.0);
                let tolerance = price_f64 * self.config.gamma_wall_tolerance_pct.to_f64().unwrap_or(0.0);
                let on_call_wall = (price_f64 - profile.call_wall).abs() < tolerance;
                let on_put_wall = (price_f64 - profile.put_wall).abs() < tolerance;
                let on_wall = on_call_wall || on_put_wall;

                if profile.is_positive_gex() {
                    if on_wall {
                        confidence *= 1.0 + 0.8 * decay_factor;
                        is_major = true;
                    } else {
                        confidence *= 1.0 + 0.2 * decay_factor;
                    }
                } else if on_wall {
                    confidence *= 1.0 + 0.3 * decay_factor;
                    is_major = true;
                } else {
                    confidence *= 1.0 - 0.25 * decay_factor;
                }
                let _ = is_ask;
            }
        }

        if let Some(vpin) = vpin_score {
            if vpin > VPIN_TOXIC_THRESHOLD {
                confidence *= (1.0 - (vpin - VPIN_TOXIC_THRESHOLD) * 1.5).max(0.55);
            } else if vpin < VPIN_CALM_THRESHOLD {
                confidence *= (1.0 + (VPIN_CALM_THRESHOLD - vpin) * 0.67).min(1.2);
            }
        }

        if let Some(div) = cvd_divergence {
            if div.confidence > 0.5 {
                let aligned = matches!(
                    (div.div_type, is_ask),
                    (DivergenceType::Bullish, false) | (DivergenceType::Bearish, true)
                );
                if aligned {
                    confidence *= 1.0 + div.confidence * 0.25;
                    is_major = true;
                } else {
                    confidence *= 1.0 - div.confidence * 0.15;
                }
            }
        }

        (confidence.clamp(0.0, 1.0), is_major)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::get_config;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn t(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(ms).unwrap()
    }

    fn book() -> LocalOrderBook {
        LocalOrderBook::new("BTCUSDT", get_config("BTCUSDT"), t(0))
    }

    #[test]
    fn native_refill_scores_full_confidence() {
        let analyzer = IcebergAnalyzer::new(get_config("BTCUSDT"));
        let mut b = book();
        let event = analyzer.analyze_with_timing(
            &mut b,
            Price(dec!(95000)),
            true,
            Qty(dec!(1.5)),
            Qty(dec!(0.5)),
            3,
            None,
            None,
            Cohort::Dolphin,
            t(1000),
        );
        let event = event.expect("native refill should register");
        assert!(event.confidence >= 0.95);
    }

    #[test]
    fn synthetic_borderline_refill_scores_mid_confidence() {
        let analyzer = IcebergAnalyzer::new(get_config("BTCUSDT"));
        let mut b = book();
        let event = analyzer.analyze_with_timing(
            &mut b,
            Price(dec!(95000)),
            true,
            Qty(dec!(1.5)),
            Qty(dec!(0.5)),
            30,
            None,
            None,
            Cohort::Dolphin,
            t(1000),
        );
        let event = event.expect("synthetic refill at the cutoff should still register");
        assert!(event.confidence >= 0.2 && event.confidence <= 0.7);
    }

    #[test]
    fn refill_slower_than_synthetic_max_is_rejected() {
        let analyzer = IcebergAnalyzer::new(get_config("BTCUSDT"));
        let mut b = book();
        let event = analyzer.analyze_with_timing(
            &mut b,
            Price(dec!(95000)),
            true,
            Qty(dec!(1.5)),
            Qty(dec!(0.5)),
            60,
            None,
            None,
            Cohort::Dolphin,
            t(1000),
        );
        assert!(event.is_none());
    }

    #[test]
    fn negative_delta_t_is_rejected() {
        let analyzer = IcebergAnalyzer::new(get_config("BTCUSDT"));
        let mut b = book();
        let event = analyzer.analyze_with_timing(
            &mut b,
            Price(dec!(95000)),
            true,
            Qty(dec!(1.5)),
            Qty(dec!(0.5)),
            -5,
            None,
            None,
            Cohort::Dolphin,
            t(1000),
        );
        assert!(event.is_none());
    }

    #[test]
    fn high_vpin_penalizes_confidence() {
        let analyzer = IcebergAnalyzer::new(get_config("BTCUSDT"));
        let mut plain = book();
        let mut toxic = book();
        let plain_conf = analyzer
            .analyze_with_timing(
                &mut plain,
                Price(dec!(95000)),
                true,
                Qty(dec!(1.5)),
                Qty(dec!(0.5)),
                3,
                None,
                None,
                Cohort::Dolphin,
                t(1000),
            )
            .unwrap()
            .confidence;
        let toxic_conf = analyzer
            .analyze_with_timing(
                &mut toxic,
                Price(dec!(95000)),
                true,
                Qty(dec!(1.5)),
                Qty(dec!(0.5)),
                3,
                Some(0.9),
                None,
                Cohort::Dolphin,
                t(1000),
            )
            .unwrap()
            .confidence;
        assert!(toxic_conf < plain_conf);
    }

    #[test]
    fn volatility_factor_is_zero_signal_noise() {
        assert_eq!(RegimeAdapter::volatility_factor(10.0, 10.0, 0.0), 0.0);
        assert!(RegimeAdapter::volatility_factor(100.0, 10.0, 1.0) <= 3.0);
    }

    #[test]
    fn regime_adapter_stretches_native_limit_with_volatility() {
        let stretched = RegimeAdapter::dynamic_native_limit_ms(5.0, 2.0);
        assert!(stretched > 5.0);
        assert!(stretched <= 12.0);
    }

    proptest::proptest! {
        /// Sigmoid bounds law (spec.md §8): for every `delta_t`, `P` lands
        /// in `[0, 1]`, and the native/synthetic boundary is never less
        /// convincing than the synthetic ceiling.
        #[test]
        fn sigmoid_probability_stays_in_unit_interval(
            delta_t_ms in -1_000i64..10_000,
            cutoff_ms in 1i64..200,
            decay in 0.01f64..2.0,
        ) {
            let p = refill_probability(delta_t_ms, cutoff_ms, decay);
            prop_assert!((0.0..=1.0).contains(&p));
        }

        #[test]
        fn sigmoid_probability_decreases_as_delta_t_grows(
            cutoff_ms in 1i64..200,
            decay in 0.01f64..2.0,
            native_max_ms in 0i64..50,
            synthetic_max_ms in 50i64..500,
        ) {
            let p_native = refill_probability(native_max_ms, cutoff_ms, decay);
            let p_synthetic = refill_probability(synthetic_max_ms, cutoff_ms, decay);
            prop_assert!(p_native >= p_synthetic);
        }
    }
}
