//! Shared data model: fixed-point price/quantity types, wire contracts,
//! iceberg lifecycle state, and downstream event/row contracts.

pub mod accumulation;
pub mod bounded;
pub mod cache;
pub mod events;
pub mod gamma;
pub mod iceberg;
pub mod market;
pub mod persistence;
pub mod types;
pub mod volume_bucket;

pub use accumulation::{CvdDivergenceResult, PriceZone, WyckoffResult};
pub use bounded::BoundedDeque;
pub use cache::Cached;
pub use events::*;
pub use gamma::GammaProfile;
pub use iceberg::{
    CancellationContext, FootprintCohort, IcebergLevel, IcebergStatus, IntentionType, TradeFootprint,
    WallResilience,
};
pub use market::{BookSnapshot, OrderBookUpdate, PriceLevel, TradeEvent};
pub use persistence::{FeatureSnapshotRow, IcebergLifecycleRow, LifecycleEventType, MarketMetricsRow};
pub use types::{Cohort, Price, Qty, Side};
pub use volume_bucket::VolumeBucket;
