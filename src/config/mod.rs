//! Configuration Management
//!
//! Per-symbol analytics configuration (`AssetConfig`), resolved through a
//! small static registry rather than a global.

pub mod asset;

pub use asset::{AssetConfig, get_config};
