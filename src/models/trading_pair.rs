//! Trading pair metadata
//!
//! Immutable from the engine's perspective (spec §3: "updated
//! out-of-band"). `TradingPairRegistry` is the read-mostly lookup the
//! matching engine and auto-trader consult for precision/quantity
//! bounds and the active flag.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingPair {
    pub symbol: String,
    pub base: String,
    pub quote: String,
    pub price_precision: u32,
    pub quantity_precision: u32,
    pub min_quantity: Decimal,
    pub max_quantity: Decimal,
    pub is_active: bool,
}

impl TradingPair {
    /// Whether `quantity` has no more fractional digits than
    /// `quantity_precision` allows and falls within
    /// `[min_quantity, max_quantity]`.
    pub fn validate_quantity(&self, quantity: Decimal) -> bool {
        quantity > Decimal::ZERO
            && quantity >= self.min_quantity
            && quantity <= self.max_quantity
            && quantity.scale() <= self.quantity_precision
    }

    pub fn validate_price(&self, price: Decimal) -> bool {
        price > Decimal::ZERO && price.scale() <= self.price_precision
    }
}

#[derive(Debug, Default)]
pub struct TradingPairRegistry {
    pairs: HashMap<String, TradingPair>,
}

impl TradingPairRegistry {
    pub fn new() -> Self {
        Self {
            pairs: HashMap::new(),
        }
    }

    pub fn insert(&mut self, pair: TradingPair) {
        self.pairs.insert(pair.symbol.clone(), pair);
    }

    pub fn get(&self, symbol: &str) -> Option<&TradingPair> {
        self.pairs.get(symbol)
    }

    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.pairs.keys().map(|s| s.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn btcusdt() -> TradingPair {
        TradingPair {
            symbol: "BTCUSDT".into(),
            base: "BTC".into(),
            quote: "USDT".into(),
            price_precision: 2,
            quantity_precision: 6,
            min_quantity: Decimal::new(1, 4),
            max_quantity: Decimal::new(1000, 0),
            is_active: true,
        }
    }

    #[test]
    fn rejects_quantity_below_minimum() {
        let pair = btcusdt();
        assert!(!pair.validate_quantity(Decimal::new(1, 5)));
    }

    #[test]
    fn rejects_excess_precision() {
        let pair = btcusdt();
        assert!(!pair.validate_price(Decimal::new(123456, 5)));
        assert!(pair.validate_price(Decimal::new(12345, 2)));
    }
}
