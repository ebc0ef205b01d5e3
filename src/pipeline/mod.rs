//! Ingestion-ordering and latency-adaptation layer (C1/C2).

pub mod latency;
pub mod reorder;

pub use latency::{LatencyMonitor, LatencyStats};
pub use reorder::ReorderingBuffer;
