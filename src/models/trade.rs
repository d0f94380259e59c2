//! Trade record — append-only, immutable once created

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::ids::{OrderId, TradeId, UserId};
use super::order::Side;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub id: TradeId,
    pub symbol: String,
    pub price: Decimal,
    pub quantity: Decimal,
    pub buy_order_id: OrderId,
    pub sell_order_id: OrderId,
    pub buyer_id: UserId,
    pub seller_id: UserId,
    /// The aggressor (taker) side.
    pub side: Side,
    pub executed_at: i64,
}
