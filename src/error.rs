//! Error Types and Handling
//!
//! Structured error types for the order-book reconstruction and analytics
//! pipeline. Most conditions here are not "errors" in the handled-at-the-call-site
//! sense — they are control-flow signals the engine counts and reacts to
//! (resync, skip, treat-as-absent) rather than messages shown to an operator.

use thiserror::Error;

/// Failure conditions raised while mutating a `LocalOrderBook`.
///
/// Only [`CoreError::GapDetected`] and [`CoreError::InvariantViolation`] ever
/// escape `LocalOrderBook::apply_update` as an `Err`; the rest are represented
/// as plain `bool`/`Option` return values at their call sites and never
/// constructed as a long-lived error value.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A depth update's `first_update_id` skipped past `last_update_id + 1`.
    /// Recovered by a full resync: REST snapshot, reconcile, re-enter warm-up.
    #[error("gap detected in order book diff stream: expected first_update_id <= {expected}, got {got}")]
    GapDetected { expected: u64, got: u64 },

    /// `best_bid >= best_ask` after applying an update. Treated identically
    /// to [`CoreError::GapDetected`] — the book state cannot be trusted.
    #[error("order book invariant violated: best_bid {best_bid} >= best_ask {best_ask}")]
    InvariantViolation { best_bid: String, best_ask: String },
}

/// Non-fatal analytics-pipeline conditions.
///
/// These are never propagated as `Result::Err`; they describe why an
/// analyzer declined to produce a signal. Call sites match on them to decide
/// whether to skip, substitute a default, or simply move on silently.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Diff's `final_update_id <= last_update_id`; already applied.
    #[error("stale update, already applied")]
    StaleUpdate,

    /// A depth update appears to have arrived before the trade that caused
    /// it (`delta_t_ms < 0`). Counted for observability, never surfaced.
    #[error("negative delta_t between trade and depth update")]
    NegativeDeltaT,

    /// VPIN has too few completed buckets, a dead-flat spread, or a stale
    /// bucket (the "Frozen VPIN" guard). Dependent analyzers treat VPIN as
    /// absent rather than erroring.
    #[error("vpin reading is not reliable")]
    UnreliableVpin,

    /// Cached derivatives metrics (basis, skew, GEX) are older than their
    /// TTL. Treated as absent; no GEX confidence adjustment is applied.
    #[error("cached derivatives metrics are stale")]
    StaleDerivatives,
}

/// Errors surfaced by the engine's orchestration layer (task setup, ingestion
/// plumbing). Unlike [`CoreError`], these can legitimately terminate a task.
#[derive(Debug, Error)]
pub enum EngineError {
    /// An ingestion source failed to produce a snapshot or stream item.
    #[error("ingestion source error: {0}")]
    Ingestion(String),

    /// Propagated from the order book during the consumer loop; triggers a
    /// resync rather than terminating the engine.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// The persistence sink rejected a write. Logged and dropped — a
    /// persistence failure must never stall the hot path.
    #[error("persistence sink error: {0}")]
    Persistence(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gap_detected_message_includes_ids() {
        let err = CoreError::GapDetected { expected: 101, got: 105 };
        assert!(err.to_string().contains("101"));
        assert!(err.to_string().contains("105"));
    }

    #[test]
    fn skip_reason_is_copy_and_comparable() {
        let a = SkipReason::StaleUpdate;
        let b = a;
        assert_eq!(a, b);
    }

    #[test]
    fn engine_error_wraps_core_error_transparently() {
        let core = CoreError::InvariantViolation {
            best_bid: "100".into(),
            best_ask: "99".into(),
        };
        let engine: EngineError = core.into();
        assert!(matches!(engine, EngineError::Core(_)));
    }
}
