//! Matching engine shared types
//!
//! `PriceLevel`'s fixed-point representation is lifted directly from the
//! teacher's `services/matching/types.rs` — it lets price levels live as
//! `BTreeMap` keys with exact ordering, which `Decimal`'s varying scale
//! does not guarantee.

use rust_decimal::Decimal;
use serde::Serialize;
use std::cmp::Ordering;

use crate::models::{OrderId, Side, TradeId, UserId};

// ============================================================================
// Price Level
// ============================================================================

/// Price scaled to a fixed 8 fractional digits for exact `BTreeMap`
/// ordering. Per-symbol price precision is enforced separately at
/// validation time (`TradingPair::validate_price`); this type only
/// needs to order prices consistently, not to round them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PriceLevel(i128);

const SCALE: i128 = 100_000_000;

impl PriceLevel {
    pub fn from_decimal(price: Decimal) -> Self {
        let scaled = price * Decimal::from(SCALE);
        let truncated = scaled.trunc();
        let value = truncated.mantissa() / 10i128.pow(truncated.scale());
        PriceLevel(value)
    }

    pub fn to_decimal(self) -> Decimal {
        Decimal::from(self.0) / Decimal::from(SCALE)
    }
}

impl Ord for PriceLevel {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl PartialOrd for PriceLevel {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// ============================================================================
// Resting order reference (what lives inside a book level's FIFO)
// ============================================================================

/// A resting order as tracked inside a price-level FIFO. Carries just
/// enough to match and to unwind on cancel; the authoritative `Order`
/// record lives in the engine's order table.
#[derive(Debug, Clone)]
pub struct OrderRef {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub price: Decimal,
    pub remaining: Decimal,
    /// Insertion sequence, used as the FIFO tie-break within a level
    /// (spec §4.A: "Tie-break: within a level, FIFO by insertion
    /// sequence").
    pub sequence: u64,
}

// ============================================================================
// Snapshot / delta
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct BookLevelView {
    pub price: Decimal,
    pub quantity: Decimal,
    pub order_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderBookSnapshot {
    pub symbol: String,
    pub sequence: u64,
    pub bids: Vec<BookLevelView>,
    pub asks: Vec<BookLevelView>,
    pub timestamp: i64,
}

/// Level changes since some previous sequence. An entry with
/// `quantity == 0` means the level was removed (spec §4.A).
#[derive(Debug, Clone, Serialize)]
pub struct BookDelta {
    pub symbol: String,
    pub from_sequence: u64,
    pub to_sequence: u64,
    pub bids: Vec<BookLevelView>,
    pub asks: Vec<BookLevelView>,
}

// ============================================================================
// Match result / events
// ============================================================================

#[derive(Debug, Clone)]
pub struct TradeExecution {
    pub trade_id: TradeId,
    pub maker_order_id: OrderId,
    pub taker_order_id: OrderId,
    pub maker_user_id: UserId,
    pub taker_user_id: UserId,
    pub price: Decimal,
    pub quantity: Decimal,
    pub timestamp: i64,
}

#[derive(Debug, Clone)]
pub struct SubmitOrderResult {
    pub order_id: OrderId,
    pub status: crate::models::OrderStatus,
    pub filled_quantity: Decimal,
    pub remaining_quantity: Decimal,
    pub average_price: Decimal,
    pub trades: Vec<TradeExecution>,
}

/// Domain events fanned out to external subscribers (K-line aggregation,
/// WebSocket push, the Persister) — spec §9: "Domain events ... become
/// messages on typed channels".
#[derive(Debug, Clone, Serialize)]
pub struct TradeExecuted {
    pub trade_id: TradeId,
    pub symbol: String,
    pub price: Decimal,
    pub quantity: Decimal,
    pub buy_order_id: OrderId,
    pub sell_order_id: OrderId,
    pub buyer_id: UserId,
    pub seller_id: UserId,
    pub aggressor_side: Side,
    pub executed_at: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderPlaced {
    pub order_id: OrderId,
    pub symbol: String,
    pub user_id: UserId,
    pub side: Side,
    pub price: Decimal,
    pub remaining: Decimal,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderCancelled {
    pub order_id: OrderId,
    pub symbol: String,
    pub user_id: UserId,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderBookChanged {
    pub symbol: String,
    pub sequence: u64,
    pub timestamp: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn price_level_round_trips() {
        let price = dec!(97500.50123456);
        let level = PriceLevel::from_decimal(price);
        assert_eq!(level.to_decimal(), price);
    }

    #[test]
    fn price_level_orders_numerically() {
        let p1 = PriceLevel::from_decimal(dec!(100.0));
        let p2 = PriceLevel::from_decimal(dec!(200.0));
        assert!(p1 < p2);
    }
}
