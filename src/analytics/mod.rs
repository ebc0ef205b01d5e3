//! Stateless-by-construction analyzers: each holds only an `AssetConfig`
//! reference (and, for whale-pattern rings, config-free working sets) and
//! takes `&LocalOrderBook`/`&mut LocalOrderBook` as parameters. None of them
//! holds a reference back to the engine.

pub mod accumulation;
pub mod flow;
pub mod historical;
pub mod iceberg;
pub mod spoofing;
pub mod whale;

pub use accumulation::AccumulationDetector;
pub use flow::FlowToxicityAnalyzer;
pub use historical::{HistoricalMemory, Timeframe};
pub use iceberg::{IcebergAnalyzer, RegimeAdapter};
pub use spoofing::SpoofingAnalyzer;
pub use whale::WhaleAnalyzer;
