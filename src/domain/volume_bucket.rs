//! Fixed-volume buckets underlying the VPIN calculation.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use super::types::Qty;

/// A single volume-synchronized bucket. Invariant: `buy_volume + sell_volume
/// <= bucket_size`, enforced by `add_trade`'s overflow split rather than by
/// a constructor check (the bucket grows incrementally).
#[derive(Debug, Clone, PartialEq)]
pub struct VolumeBucket {
    pub bucket_size: Decimal,
    pub symbol: String,
    pub buy_volume: Decimal,
    pub sell_volume: Decimal,
    pub is_complete: bool,
    pub created_at: DateTime<Utc>,
    pub last_update_at: DateTime<Utc>,
}

impl VolumeBucket {
    pub fn new(symbol: impl Into<String>, bucket_size: Decimal, now: DateTime<Utc>) -> Self {
        Self {
            bucket_size,
            symbol: symbol.into(),
            buy_volume: Decimal::ZERO,
            sell_volume: Decimal::ZERO,
            is_complete: false,
            created_at: now,
            last_update_at: now,
        }
    }

    pub fn total_volume(&self) -> Decimal {
        self.buy_volume + self.sell_volume
    }

    pub fn age_seconds(&self, now: DateTime<Utc>) -> f64 {
        (now - self.last_update_at).num_milliseconds() as f64 / 1000.0
    }

    pub fn calculate_imbalance(&self) -> Decimal {
        (self.buy_volume - self.sell_volume).abs()
    }

    /// Adds `qty` to the buy or sell side. If this would overflow
    /// `bucket_size`, fills the bucket to the brim, marks it complete, and
    /// returns the overflow `Qty` for the caller to apply to a fresh bucket
    /// (recursively, since an unusually large trade can span several
    /// buckets).
    pub fn add_trade(&mut self, qty: Qty, is_buy: bool, now: DateTime<Utc>) -> Option<Qty> {
        self.last_update_at = now;

        let remaining = self.bucket_size - self.total_volume();
        if remaining <= Decimal::ZERO {
            self.is_complete = true;
            return Some(qty);
        }

        if qty.inner() <= remaining {
            if is_buy {
                self.buy_volume += qty.inner();
            } else {
                self.sell_volume += qty.inner();
            }
            if self.total_volume() >= self.bucket_size {
                self.is_complete = true;
            }
            None
        } else {
            if is_buy {
                self.buy_volume += remaining;
            } else {
                self.sell_volume += remaining;
            }
            self.is_complete = true;
            Some(Qty(qty.inner() - remaining))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn t(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(ms).unwrap()
    }

    #[test]
    fn trade_within_capacity_does_not_overflow() {
        let mut bucket = VolumeBucket::new("BTCUSDT", dec!(10), t(0));
        let overflow = bucket.add_trade(Qty(dec!(4)), true, t(1));
        assert!(overflow.is_none());
        assert_eq!(bucket.buy_volume, dec!(4));
        assert!(!bucket.is_complete);
    }

    #[test]
    fn trade_exceeding_capacity_splits_and_completes() {
        let mut bucket = VolumeBucket::new("BTCUSDT", dec!(10), t(0));
        bucket.add_trade(Qty(dec!(8)), true, t(1));
        let overflow = bucket.add_trade(Qty(dec!(5)), false, t(2));
        assert_eq!(overflow, Some(Qty(dec!(3))));
        assert!(bucket.is_complete);
        assert_eq!(bucket.total_volume(), bucket.bucket_size);
    }

    #[test]
    fn imbalance_is_absolute_difference() {
        let mut bucket = VolumeBucket::new("BTCUSDT", dec!(10), t(0));
        bucket.add_trade(Qty(dec!(7)), true, t(1));
        bucket.add_trade(Qty(dec!(2)), false, t(2));
        assert_eq!(bucket.calculate_imbalance(), dec!(5));
    }
}
