//! Shared result types for price/CVD divergence and Wyckoff classification,
//! kept in `domain` so `orderbook::book` can cache the latest result without
//! depending on the `analytics` module that computes it.

use super::events::{DivergenceType, WyckoffPattern};
use super::types::Price;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CvdDivergenceResult {
    pub div_type: DivergenceType,
    pub confidence: f64,
}

/// A cluster of nearby iceberg levels on the same side, treated as one wall
/// for Wyckoff "strong zone" context.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceZone {
    pub center_price: Price,
    pub total_hidden_volume: rust_decimal::Decimal,
    pub level_count: usize,
    pub is_ask: bool,
}

impl PriceZone {
    pub fn is_strong(&self) -> bool {
        self.level_count >= 3
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WyckoffResult {
    pub pattern: WyckoffPattern,
    pub div_type: DivergenceType,
    pub confidence: f64,
    pub absorption_detected: bool,
    pub obi_confirms: bool,
    pub near_strong_zone: bool,
}
