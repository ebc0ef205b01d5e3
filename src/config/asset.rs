//! Per-asset configuration.
//!
//! Every analyzer is constructed with an `AssetConfig` value (or a reference
//! to one owned by the order book) rather than reading global state — no
//! analyzer retains configuration beyond what it was built with.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Immutable per-symbol configuration. Passed by reference at analyzer
/// construction; never mutated for the lifetime of an engine instance.
#[derive(Debug, Clone, PartialEq)]
pub struct AssetConfig {
    pub symbol: &'static str,

    /// Book quantities at or below this are treated as noise.
    pub dust_threshold: Decimal,

    /// Minimum absolute hidden volume to consider a refill significant.
    pub min_hidden_volume: Decimal,
    /// Minimum `hidden / visible_total` ratio to consider a refill significant.
    pub min_iceberg_ratio: Decimal,

    /// Proximity (as a fraction of price) within which a level counts as
    /// sitting on a gamma wall.
    pub gamma_wall_tolerance_pct: Decimal,

    pub static_whale_threshold_usd: f64,
    pub static_minnow_threshold_usd: f64,
    pub min_whale_floor_usd: f64,
    pub min_minnow_floor_usd: f64,

    /// Total hidden volume above which a cancelled level is scored as a
    /// possible spoof rather than a legitimate, small hidden order.
    pub spoofing_volume_threshold: Decimal,
    /// Proximity (as a fraction of price) within which price crossing a
    /// level counts as a breach.
    pub breach_tolerance_pct: Decimal,

    /// OBI/OFI exponential distance-decay coefficient.
    pub lambda_decay: f64,
    /// OFI/OBI top-N depth.
    pub ofi_depth: usize,

    pub vpin_bucket_size: Decimal,

    pub native_refill_max_ms: i64,
    pub synthetic_refill_max_ms: i64,
    pub synthetic_cutoff_ms: i64,
    pub synthetic_probability_decay: f64,

    pub warmup_period_ms: i64,

    /// Rough 20-day average daily volume, used only to bucket a cancelled
    /// iceberg's hidden volume into an intention class (scalper/intraday/
    /// positional). Not fed by a live historical feed; a coarse per-asset
    /// estimate is good enough for this classification's resolution.
    pub estimated_adv_20d: Decimal,
}

pub static BTC_CONFIG: AssetConfig = AssetConfig {
    symbol: "BTCUSDT",
    dust_threshold: dec!(0.0001),
    min_hidden_volume: dec!(0.05),
    min_iceberg_ratio: dec!(0.3),
    gamma_wall_tolerance_pct: dec!(0.001),
    static_whale_threshold_usd: 100_000.0,
    static_minnow_threshold_usd: 1_000.0,
    min_whale_floor_usd: 10_000.0,
    min_minnow_floor_usd: 100.0,
    spoofing_volume_threshold: dec!(0.1),
    breach_tolerance_pct: dec!(0.0005),
    lambda_decay: 0.1,
    ofi_depth: 20,
    vpin_bucket_size: dec!(10),
    native_refill_max_ms: 5,
    synthetic_refill_max_ms: 50,
    synthetic_cutoff_ms: 30,
    synthetic_probability_decay: 0.15,
    warmup_period_ms: 10_000,
    estimated_adv_20d: dec!(10_000),
};

pub static ETH_CONFIG: AssetConfig = AssetConfig {
    symbol: "ETHUSDT",
    dust_threshold: dec!(0.01),
    min_hidden_volume: dec!(1.0),
    min_iceberg_ratio: dec!(0.3),
    gamma_wall_tolerance_pct: dec!(0.0015),
    static_whale_threshold_usd: 50_000.0,
    static_minnow_threshold_usd: 500.0,
    min_whale_floor_usd: 5_000.0,
    min_minnow_floor_usd: 50.0,
    spoofing_volume_threshold: dec!(2.0),
    breach_tolerance_pct: dec!(0.001),
    lambda_decay: 0.05,
    ofi_depth: 30,
    vpin_bucket_size: dec!(100),
    native_refill_max_ms: 5,
    synthetic_refill_max_ms: 50,
    synthetic_cutoff_ms: 30,
    synthetic_probability_decay: 0.15,
    warmup_period_ms: 10_000,
    estimated_adv_20d: dec!(120_000),
};

pub static SOL_CONFIG: AssetConfig = AssetConfig {
    symbol: "SOLUSDT",
    dust_threshold: dec!(0.1),
    min_hidden_volume: dec!(10.0),
    min_iceberg_ratio: dec!(0.3),
    gamma_wall_tolerance_pct: dec!(0.002),
    static_whale_threshold_usd: 25_000.0,
    static_minnow_threshold_usd: 200.0,
    min_whale_floor_usd: 2_000.0,
    min_minnow_floor_usd: 20.0,
    spoofing_volume_threshold: dec!(20.0),
    breach_tolerance_pct: dec!(0.001),
    lambda_decay: 0.03,
    ofi_depth: 50,
    vpin_bucket_size: dec!(1000),
    native_refill_max_ms: 5,
    synthetic_refill_max_ms: 50,
    synthetic_cutoff_ms: 30,
    synthetic_probability_decay: 0.15,
    warmup_period_ms: 10_000,
    estimated_adv_20d: dec!(4_000_000),
};

/// Returns the configuration for `symbol`, defaulting to [`BTC_CONFIG`] for
/// unrecognized symbols — matching the registry's fallback behavior.
pub fn get_config(symbol: &str) -> &'static AssetConfig {
    match symbol {
        "ETHUSDT" => &ETH_CONFIG,
        "SOLUSDT" => &SOL_CONFIG,
        _ => &BTC_CONFIG,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_symbol_defaults_to_btc() {
        let cfg = get_config("DOGEUSDT");
        assert_eq!(cfg.symbol, "BTCUSDT");
    }

    #[test]
    fn known_symbols_resolve_to_distinct_configs() {
        assert_eq!(get_config("ETHUSDT").ofi_depth, 30);
        assert_eq!(get_config("SOLUSDT").ofi_depth, 50);
        assert_eq!(get_config("BTCUSDT").ofi_depth, 20);
    }
}
