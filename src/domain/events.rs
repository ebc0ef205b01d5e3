//! Downstream detection events emitted by the core.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::types::{Price, Qty};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeSide {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlgoKind {
    Twap,
    Vwap,
    Iceberg,
    Sweep,
    Algo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DivergenceType {
    Bullish,
    Bearish,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WyckoffPattern {
    Spring,
    Upthrust,
    Accumulation,
    Distribution,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IcebergDetectedEvent {
    pub id: Uuid,
    pub symbol: String,
    pub price: Price,
    pub detected_hidden_volume: Qty,
    pub visible_volume_before: Qty,
    pub confidence: f64,
    pub event_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IcebergBreachedEvent {
    pub id: Uuid,
    pub symbol: String,
    pub price: Price,
    pub last_total_hidden_volume: Qty,
    pub is_gamma_wall: bool,
    pub event_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhaleTradeEvent {
    pub id: Uuid,
    pub symbol: String,
    pub price: Price,
    pub volume_usd: Decimal,
    pub side: TradeSide,
    pub event_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlgoDetectedEvent {
    pub id: Uuid,
    pub symbol: String,
    pub direction: TradeSide,
    pub kind: AlgoKind,
    pub confidence: f64,
    pub event_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccumulationEvent {
    pub id: Uuid,
    pub symbol: String,
    pub timeframe: String,
    pub div_type: DivergenceType,
    pub pattern: WyckoffPattern,
    pub confidence: f64,
    pub absorption_detected: bool,
    pub obi_confirms: bool,
    pub near_strong_zone: bool,
    pub event_time: DateTime<Utc>,
}

/// Umbrella enum so the engine can route every detection kind through one
/// persistence/logging seam without a trait object per event type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DetectionEvent {
    IcebergDetected(IcebergDetectedEvent),
    IcebergBreached(IcebergBreachedEvent),
    WhaleTrade(WhaleTradeEvent),
    AlgoDetected(AlgoDetectedEvent),
    Accumulation(AccumulationEvent),
}
