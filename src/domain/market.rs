//! Upstream wire contracts: order-book diffs and trades.
//!
//! These mirror the exchange message shapes exactly (camelCase on the wire,
//! string-encoded decimals) so an external adapter can deserialize directly
//! into them; the core never parses exchange JSON itself.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::types::{Price, Qty};

/// A single price/quantity pair as carried in a depth update's `bids`/`asks`.
/// A `qty == 0` entry deletes the level at `price`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: Price,
    pub qty: Qty,
}

impl PriceLevel {
    pub fn new(price: Decimal, qty: Decimal) -> Self {
        Self { price: Price(price), qty: Qty(qty) }
    }

    pub fn is_deletion(&self) -> bool {
        self.qty.is_zero()
    }
}

/// Incremental order-book diff ("depthUpdate").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderBookUpdate {
    pub first_update_id: u64,
    pub final_update_id: u64,
    pub event_time_ms: u64,
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
}

/// Aggregate trade ("aggTrade").
///
/// `is_buyer_maker == false` means the taker bought — an aggressive buy
/// lifting the ask.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeEvent {
    pub price: Price,
    pub quantity: Qty,
    pub is_buyer_maker: bool,
    pub event_time_ms: u64,
    pub trade_id: Option<u64>,
}

impl TradeEvent {
    /// The resting side that was hit: the bid if a taker sold into it
    /// (`is_buyer_maker == true`), the ask otherwise.
    pub fn resting_side_is_ask(&self) -> bool {
        !self.is_buyer_maker
    }

    pub fn notional_usd(&self) -> Decimal {
        self.price.notional(self.quantity)
    }
}

/// A REST full-depth snapshot used to (re)seed a `LocalOrderBook`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookSnapshot {
    pub last_update_id: u64,
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn zero_qty_level_is_a_deletion() {
        let level = PriceLevel::new(dec!(100), dec!(0));
        assert!(level.is_deletion());
    }

    #[test]
    fn resting_side_matches_is_buyer_maker() {
        let buy = TradeEvent {
            price: Price(dec!(100)),
            quantity: Qty(dec!(1)),
            is_buyer_maker: false,
            event_time_ms: 0,
            trade_id: None,
        };
        assert!(buy.resting_side_is_ask());

        let sell = TradeEvent { is_buyer_maker: true, ..buy };
        assert!(!sell.resting_side_is_ask());
    }
}
