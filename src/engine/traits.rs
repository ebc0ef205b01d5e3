//! Seams the engine is generic over: where book state is (re)seeded from,
//! where detection/persistence rows land, and where derivatives context
//! (GEX, basis, skew) is refreshed from. None of these are hardcoded to an
//! exchange — a concrete adapter lives outside this crate.

use std::future::Future;
use std::pin::Pin;

use crate::domain::{BookSnapshot, FeatureSnapshotRow, GammaProfile, IcebergLifecycleRow, MarketMetricsRow, OrderBookUpdate, TradeEvent};
use crate::error::EngineError;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Produces a full-depth REST snapshot to (re)seed the book — on startup and
/// again after every resync.
pub trait SnapshotSource: Send + Sync {
    fn fetch_snapshot<'a>(&'a self) -> BoxFuture<'a, Result<BookSnapshot, EngineError>>;
}

/// The two upstream feeds (depth diffs, aggregate trades) a producer task
/// polls and forwards into the reordering buffer. One call per item rather
/// than a `Stream` so a concrete adapter (outside this crate) can wrap
/// whatever transport it likes — a WebSocket read loop, a replay file, a
/// test fixture — behind the same seam. `None` signals the feed has ended
/// (connection closed); the producer task exits without error.
pub trait IngestionSource: Send + Sync {
    fn next_depth_update<'a>(&'a self) -> BoxFuture<'a, Option<OrderBookUpdate>>;
    fn next_trade<'a>(&'a self) -> BoxFuture<'a, Option<TradeEvent>>;
}

/// Periodically refreshed, read-only derivatives context. A `None` return
/// leaves the book's cached value in place — absence here means "nothing
/// new," not "error."
pub trait DerivativesSource: Send + Sync {
    fn fetch_gamma_profile<'a>(&'a self) -> BoxFuture<'a, Option<GammaProfile>>;
    fn fetch_basis_apr<'a>(&'a self) -> BoxFuture<'a, Option<f64>>;
    fn fetch_options_skew<'a>(&'a self) -> BoxFuture<'a, Option<f64>>;
}

/// Fire-and-forget downstream writer. A persistence failure must never
/// stall the hot path, so these are synchronous and non-fallible from the
/// engine's point of view — a real sink logs and drops its own errors.
pub trait PersistenceSink: Send + Sync {
    fn write_lifecycle_row(&self, row: IcebergLifecycleRow);
    fn write_feature_snapshot(&self, row: FeatureSnapshotRow);
    fn write_market_metrics(&self, row: MarketMetricsRow);
}

/// Test double standing in for a real exchange REST client. Returns an
/// empty book at `last_update_id: 0`.
pub struct NullSnapshotSource;

impl SnapshotSource for NullSnapshotSource {
    fn fetch_snapshot<'a>(&'a self) -> BoxFuture<'a, Result<BookSnapshot, EngineError>> {
        Box::pin(async { Ok(BookSnapshot { last_update_id: 0, bids: Vec::new(), asks: Vec::new() }) })
    }
}

/// Test double standing in for an options-Greeks collaborator. Never
/// produces a reading — the book's derivatives cache simply stays empty.
pub struct NullDerivativesSource;

impl DerivativesSource for NullDerivativesSource {
    fn fetch_gamma_profile<'a>(&'a self) -> BoxFuture<'a, Option<GammaProfile>> {
        Box::pin(async { None })
    }
    fn fetch_basis_apr<'a>(&'a self) -> BoxFuture<'a, Option<f64>> {
        Box::pin(async { None })
    }
    fn fetch_options_skew<'a>(&'a self) -> BoxFuture<'a, Option<f64>> {
        Box::pin(async { None })
    }
}

/// Test double / default sink: drops every row. Used by tests and by a
/// deployment that only cares about the live detection-event stream.
pub struct NullPersistenceSink;

impl PersistenceSink for NullPersistenceSink {
    fn write_lifecycle_row(&self, _row: IcebergLifecycleRow) {}
    fn write_feature_snapshot(&self, _row: FeatureSnapshotRow) {}
    fn write_market_metrics(&self, _row: MarketMetricsRow) {}
}

/// Test double standing in for a real exchange stream. Ends the feed
/// immediately — useful for exercising bootstrap/shutdown without a live
/// producer task ever pushing an item.
pub struct NullIngestionSource;

impl IngestionSource for NullIngestionSource {
    fn next_depth_update<'a>(&'a self) -> BoxFuture<'a, Option<OrderBookUpdate>> {
        Box::pin(async { None })
    }
    fn next_trade<'a>(&'a self) -> BoxFuture<'a, Option<TradeEvent>> {
        Box::pin(async { None })
    }
}
