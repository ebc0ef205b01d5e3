//! Downstream persistence row contracts.
//!
//! The SQL writer itself lives outside this core (an external collaborator);
//! these types are the wire-contract-exact shape the engine hands to a
//! [`crate::engine::PersistenceSink`].

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::iceberg::IntentionType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LifecycleEventType {
    Detected,
    Refilled,
    Breached,
    Exhausted,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IcebergLifecycleRow {
    pub symbol: String,
    pub price: Decimal,
    pub is_ask: bool,
    pub event_type: LifecycleEventType,
    pub event_time: DateTime<Utc>,
    pub survival_seconds: Option<f64>,
    pub total_volume_absorbed: Option<Decimal>,
    pub refill_count: u32,
    pub outcome: Option<String>,
    pub price_at_death: Option<Decimal>,
    pub intention_type: Option<IntentionType>,
    pub iir_value: Option<f64>,
}

/// At least 25 numeric/categorical fields covering orderbook, flow,
/// derivatives, price, spoofing, regime, and multi-horizon whale-CVD trends
/// — one row captured per significant trade or active-iceberg touch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureSnapshotRow {
    pub symbol: String,
    pub snapshot_time: DateTime<Utc>,

    // Orderbook
    pub obi_value: f64,
    pub ofi_value: f64,
    pub spread_bps: f64,
    pub depth_ratio: f64,

    // Flow / cohort CVD
    pub whale_cvd: Decimal,
    pub dolphin_cvd: Decimal,
    pub fish_cvd: Decimal,
    pub whale_cvd_delta_5m: Decimal,
    pub total_cvd: Decimal,

    // Multi-horizon whale-CVD trend
    pub whale_cvd_trend_1w: Decimal,
    pub whale_cvd_trend_1m: Decimal,
    pub whale_cvd_trend_3m: Decimal,
    pub whale_cvd_trend_6m: Decimal,

    // VPIN
    pub vpin_score: Option<f64>,
    pub vpin_level: Option<String>,

    // Derivatives
    pub futures_basis_apr: Option<f64>,
    pub basis_state: Option<String>,
    pub options_skew: Option<f64>,
    pub skew_state: Option<String>,
    pub total_gex: Option<f64>,
    pub dist_to_gamma_wall: Option<f64>,
    pub gamma_wall_type: Option<String>,

    // Price
    pub current_price: Decimal,
    pub twap_5m: Decimal,
    pub price_vs_twap_pct: f64,
    pub volatility_1h: f64,

    // Spoofing / regime
    pub spoofing_score: f64,
    pub cancel_ratio_5m: f64,
    pub trend_regime: String,
    pub volatility_regime: String,

    // HTF divergence context
    pub is_htf_divergence: bool,
    pub basis_regime_weekly: Option<String>,
}

/// Wire-contract-exact: column names and order must match the downstream
/// ingest exactly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketMetricsRow {
    pub time: DateTime<Utc>,
    pub symbol: String,
    pub price: Decimal,
    pub spread_bps: f64,
    pub book_ofi: f64,
    pub book_obi: f64,
    pub flow_whale_cvd_delta: Decimal,
    pub flow_dolphin_cvd_delta: Decimal,
    pub flow_minnow_cvd_delta: Decimal,
    pub wall_whale_vol: Decimal,
    pub wall_dolphin_vol: Decimal,
    pub basis_apr: Option<f64>,
    pub options_skew: Option<f64>,
    pub oi_delta: Option<f64>,
    pub is_aggressor_buy: bool,
}
