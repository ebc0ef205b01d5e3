//! Market-microstructure analytics engine.
//!
//! Reconstructs a local order book per symbol from upstream depth-diff and
//! trade feeds, and runs order-flow analytics over it: iceberg detection,
//! VPIN-based flow toxicity, whale/dolphin/minnow cohort CVD tracking,
//! accumulation/distribution (Wyckoff) divergence, and anti-spoofing
//! scoring. [`engine::TradingEngine`] is the composition root; everything
//! else is a library a concrete deployment wires together.

pub mod analytics;
pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod orderbook;
pub mod pipeline;

pub use engine::TradingEngine;
pub use error::EngineError;
