//! Anti-spoofing scoring (C9): a weighted blend of how long a cancelled
//! level lived, whether its cancellation context looks like a deliberate
//! fade-as-price-approaches, and whether its execution history looks like a
//! genuine resting order rather than a probe. The engine applies the score
//! multiplicatively against a level's base confidence at the point a
//! cancellation (or a confirmed iceberg event) is observed.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;

use crate::config::AssetConfig;
use crate::domain::IcebergLevel;

const DURATION_WEIGHT: f64 = 0.3;
const CONTEXT_WEIGHT: f64 = 0.5;
const EXECUTION_WEIGHT: f64 = 0.2;

/// Duration decay halves roughly every ~7s of lifetime
/// (`1 / (1 + 0.1*lifetime_seconds)`), so a level cancelled within the first
/// second or two still scores close to 1.0.
const DURATION_DECAY_RATE: f64 = 0.1;
/// A refill cadence faster than this (per minute) reads as a legitimate
/// resting algo rather than a spoof, halving the execution score.
const LEGITIMATE_REFILL_FREQUENCY_PER_MIN: f64 = 10.0;
/// Executed volume below this fraction of the level's lifetime volume counts
/// as "few fills" for the execution phase.
const FEW_FILLS_THRESHOLD: f64 = 0.1;

pub struct SpoofingAnalyzer {
    config: &'static AssetConfig,
}

impl SpoofingAnalyzer {
    pub fn new(config: &'static AssetConfig) -> Self {
        Self { config }
    }

    /// `0.3*duration + 0.5*context + 0.2*execution`, clamped to `[0, 1]`.
    /// The engine applies this as `final_confidence = base * (1 - score)`.
    pub fn score(&self, level: &IcebergLevel, recent_spread_bps: f64) -> f64 {
        let duration = self.duration_score(level);
        let context = self.context_score(level, recent_spread_bps);
        let execution = self.execution_score(level);
        (DURATION_WEIGHT * duration + CONTEXT_WEIGHT * context + EXECUTION_WEIGHT * execution).clamp(0.0, 1.0)
    }

    fn duration_score(&self, level: &IcebergLevel) -> f64 {
        let lifetime_seconds = lifetime_seconds(level);
        1.0 / (1.0 + DURATION_DECAY_RATE * lifetime_seconds)
    }

    /// High when the level vanished while price was close and actively
    /// approaching it — the signature of a fade rather than an execution.
    fn context_score(&self, level: &IcebergLevel, recent_spread_bps: f64) -> f64 {
        let Some(ctx) = level.cancellation_context else { return 0.3 };

        let recent_spread_pct = recent_spread_bps / 10_000.0;
        let breach_tolerance_pct = self.config.breach_tolerance_pct.to_f64().unwrap_or(0.0);
        let close_threshold_pct = (2.0 * recent_spread_pct).max(breach_tolerance_pct);
        let is_close = ctx.distance_from_level_pct <= close_threshold_pct;

        if is_close && ctx.moving_towards_level {
            let proximity = 1.0 - (ctx.distance_from_level_pct / close_threshold_pct.max(1e-9)).min(1.0);
            0.7 + 0.3 * proximity
        } else if is_close {
            0.4
        } else {
            0.1
        }
    }

    /// High for a level that accumulated little hidden volume and executed
    /// few fills before cancelling; a fast legitimate refill cadence pulls
    /// the score back down.
    fn execution_score(&self, level: &IcebergLevel) -> f64 {
        let Some(ctx) = level.cancellation_context else { return 0.3 };

        let small_volume = level.total_hidden_volume.inner() < self.config.spoofing_volume_threshold;
        let few_fills = ctx.volume_executed_pct < FEW_FILLS_THRESHOLD;

        let mut score = if small_volume && few_fills {
            0.9
        } else if few_fills {
            0.6
        } else {
            0.2
        };

        if let Some(frequency) = level.get_refill_frequency() {
            if frequency > LEGITIMATE_REFILL_FREQUENCY_PER_MIN {
                score *= 0.5;
            }
        }
        score.clamp(0.0, 1.0)
    }
}

fn lifetime_seconds(level: &IcebergLevel) -> f64 {
    let delta = (level.last_update_time - level.creation_time).num_milliseconds() as f64 / 1000.0;
    delta.max(0.0)
}

/// `final_confidence = base_confidence * (1 - score)`, applied wherever a
/// cancelled/breached level's spoofing score is folded into its confidence.
pub fn apply_spoofing_discount(base_confidence: f64, score: f64) -> f64 {
    (base_confidence * (1.0 - score)).clamp(0.0, 1.0)
}
