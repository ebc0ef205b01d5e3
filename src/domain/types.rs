//! Fixed-point price/quantity types.
//!
//! All order-book and volume arithmetic goes through these two newtypes so a
//! `Decimal` meant for a derived statistic (confidence, VPIN, OFI, OBI —
//! which may legitimately be `f64`) can never be accidentally substituted
//! for one meant for book state.

use std::fmt;
use std::ops::{Add, Div, Mul, Sub};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

macro_rules! decimal_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Decimal);

        impl $name {
            pub const ZERO: $name = $name(Decimal::ZERO);

            pub fn is_zero(&self) -> bool {
                self.0.is_zero()
            }

            pub fn inner(&self) -> Decimal {
                self.0
            }
        }

        impl From<Decimal> for $name {
            fn from(value: Decimal) -> Self {
                $name(value)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl Add for $name {
            type Output = $name;
            fn add(self, rhs: Self) -> Self::Output {
                $name(self.0 + rhs.0)
            }
        }

        impl Sub for $name {
            type Output = $name;
            fn sub(self, rhs: Self) -> Self::Output {
                $name(self.0 - rhs.0)
            }
        }

        impl Mul<Decimal> for $name {
            type Output = $name;
            fn mul(self, rhs: Decimal) -> Self::Output {
                $name(self.0 * rhs)
            }
        }

        impl Div<Decimal> for $name {
            type Output = $name;
            fn div(self, rhs: Decimal) -> Self::Output {
                $name(self.0 / rhs)
            }
        }
    };
}

decimal_newtype!(Price);
decimal_newtype!(Qty);

impl Price {
    /// Notional value of `qty` units at this price, in quote-currency terms.
    pub fn notional(&self, qty: Qty) -> Decimal {
        self.0 * qty.0
    }
}

/// Which side of the book a level, trade, or iceberg sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Bid,
    Ask,
}

impl Side {
    pub fn is_ask(&self) -> bool {
        matches!(self, Side::Ask)
    }

    pub fn from_is_ask(is_ask: bool) -> Self {
        if is_ask { Side::Ask } else { Side::Bid }
    }
}

/// Trade-size cohort. Distinct from the coin-quantity-based `is_dolphin`
/// wall labeling on `IcebergLevel` — the two labelings are never merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Cohort {
    Whale,
    Dolphin,
    Minnow,
}

impl fmt::Display for Cohort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Cohort::Whale => "whale",
            Cohort::Dolphin => "dolphin",
            Cohort::Minnow => "minnow",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn price_notional_multiplies_qty() {
        let p = Price(dec!(100));
        let q = Qty(dec!(2.5));
        assert_eq!(p.notional(q), dec!(250.0));
    }

    #[test]
    fn side_round_trips_through_is_ask() {
        assert_eq!(Side::from_is_ask(true), Side::Ask);
        assert_eq!(Side::from_is_ask(false), Side::Bid);
    }
}
