//! Order entity and its state machine

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::ids::{OrderId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "buy"),
            Side::Sell => write!(f, "sell"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Limit,
    Market,
}

/// Order status. Transitions are driven exclusively by the matching
/// engine (spec §4.E state machine): `Pending -> Active ->
/// PartiallyFilled -> Filled` is the only non-terminal lattice; any
/// non-terminal state can move to `Cancelled`, and `Pending` alone can
/// move to `Rejected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Active,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::Rejected
        )
    }

    /// Whether `self -> next` is a legal transition in the lattice
    /// `Pending -> Active -> PartiallyFilled -> Filled`, with
    /// `Cancelled`/`Rejected` as sinks reachable from any non-terminal
    /// state (and `Rejected` only from `Pending`).
    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        if self.is_terminal() {
            return false;
        }
        matches!(
            (self, next),
            (Pending, Active)
                | (Pending, PartiallyFilled)
                | (Pending, Filled)
                | (Pending, Rejected)
                | (Pending, Cancelled)
                | (Active, PartiallyFilled)
                | (Active, Filled)
                | (Active, Cancelled)
                | (PartiallyFilled, Filled)
                | (PartiallyFilled, Cancelled)
        )
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Active => "active",
            OrderStatus::PartiallyFilled => "partially_filled",
            OrderStatus::Filled => "filled",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Rejected => "rejected",
        };
        write!(f, "{}", s)
    }
}

/// An order as tracked by the engine, independent of whether it is
/// currently resting in a book.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub user_id: UserId,
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub quantity: Decimal,
    pub price: Option<Decimal>,
    pub filled_quantity: Decimal,
    pub average_price: Decimal,
    pub status: OrderStatus,
    pub created_at: i64,
    /// For a buy market order, the quote amount the caller asked to
    /// spend (spec §4.B step 2: "freeze a caller-supplied quote
    /// amount"). `None` for every other order shape.
    pub quote_budget: Option<Decimal>,
}

impl Order {
    pub fn remaining(&self) -> Decimal {
        self.quantity - self.filled_quantity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_lattice_never_regresses() {
        assert!(OrderStatus::Pending.can_transition_to(OrderStatus::Active));
        assert!(OrderStatus::Active.can_transition_to(OrderStatus::PartiallyFilled));
        assert!(OrderStatus::PartiallyFilled.can_transition_to(OrderStatus::Filled));
        assert!(!OrderStatus::Filled.can_transition_to(OrderStatus::Active));
        assert!(!OrderStatus::Cancelled.can_transition_to(OrderStatus::Filled));
        assert!(!OrderStatus::PartiallyFilled.can_transition_to(OrderStatus::Pending));
    }

    #[test]
    fn remaining_is_quantity_minus_filled() {
        let order = Order {
            id: OrderId(1),
            user_id: UserId(1),
            symbol: "BTCUSDT".into(),
            side: Side::Buy,
            order_type: OrderType::Limit,
            quantity: Decimal::new(100, 0),
            price: Some(Decimal::new(100, 0)),
            filled_quantity: Decimal::new(40, 0),
            average_price: Decimal::ZERO,
            status: OrderStatus::PartiallyFilled,
            created_at: 0,
            quote_budget: None,
        };
        assert_eq!(order.remaining(), Decimal::new(60, 0));
    }
}
