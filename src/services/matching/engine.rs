//! Matching engine — owns one `Orderbook` per symbol and the order table
//!
//! Grounded on the teacher's `MatchingEngine`/`OrderFlowOrchestrator` split
//! (`services/matching/orchestrator.rs`): a synchronous, in-memory
//! submit/cancel path that fans domain events out over
//! `tokio::sync::broadcast` channels for external consumers, while the
//! actual settlement now runs against the asset ledger (4.C) instead of
//! the teacher's fee-charging flow — this crate charges no fees.

use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tokio::sync::broadcast;
use tracing::instrument;

use crate::clock::Clock;
use crate::error::EngineError;
use crate::models::{Order, OrderId, OrderStatus, OrderType, Side, Trade, TradingPairRegistry, UserId};
use crate::services::ledger::{AssetLedger, TradeSettlement};

use super::orderbook::Orderbook;
use super::types::{
    BookDelta, OrderBookChanged, OrderBookSnapshot, OrderCancelled, OrderPlaced, SubmitOrderResult,
    TradeExecuted, TradeExecution,
};

const EVENT_CHANNEL_CAPACITY: usize = 4096;

/// Bookkeeping the engine keeps per order beyond the public `Order`
/// record: which asset was frozen, how much, and how much of that
/// freeze has actually been consumed by settled trades. The remainder
/// is refunded once the order reaches a terminal state.
struct OrderState {
    order: Order,
    frozen_asset: String,
    frozen_amount: Decimal,
    consumed_amount: Decimal,
}

pub struct MatchingEngine {
    books: DashMap<String, Orderbook>,
    orders: DashMap<OrderId, Mutex<OrderState>>,
    trades: DashMap<crate::models::TradeId, Trade>,
    registry: Arc<TradingPairRegistry>,
    ledger: Arc<AssetLedger>,
    clock: Arc<dyn Clock>,
    next_order_id: AtomicU64,
    next_trade_id: AtomicU64,
    trade_tx: broadcast::Sender<TradeExecuted>,
    order_tx: broadcast::Sender<OrderPlaced>,
    cancel_tx: broadcast::Sender<OrderCancelled>,
    book_tx: broadcast::Sender<OrderBookChanged>,
}

impl MatchingEngine {
    pub fn new(registry: Arc<TradingPairRegistry>, ledger: Arc<AssetLedger>, clock: Arc<dyn Clock>) -> Self {
        let (trade_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (order_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (cancel_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (book_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Self {
            books: DashMap::new(),
            orders: DashMap::new(),
            trades: DashMap::new(),
            registry,
            ledger,
            clock,
            next_order_id: AtomicU64::new(1),
            next_trade_id: AtomicU64::new(1),
            trade_tx,
            order_tx,
            cancel_tx,
            book_tx,
        }
    }

    pub fn subscribe_trades(&self) -> broadcast::Receiver<TradeExecuted> {
        self.trade_tx.subscribe()
    }

    pub fn subscribe_orders(&self) -> broadcast::Receiver<OrderPlaced> {
        self.order_tx.subscribe()
    }

    pub fn subscribe_cancels(&self) -> broadcast::Receiver<OrderCancelled> {
        self.cancel_tx.subscribe()
    }

    pub fn subscribe_book_changes(&self) -> broadcast::Receiver<OrderBookChanged> {
        self.book_tx.subscribe()
    }

    fn book(&self, symbol: &str) -> dashmap::mapref::one::RefMut<'_, String, Orderbook> {
        self.books
            .entry(symbol.to_string())
            .or_insert_with(|| Orderbook::new(symbol))
    }

    fn alloc_order_id(&self) -> OrderId {
        OrderId(self.next_order_id.fetch_add(1, AtomicOrdering::Relaxed))
    }

    fn alloc_trade_id(&self) -> crate::models::TradeId {
        crate::models::TradeId(self.next_trade_id.fetch_add(1, AtomicOrdering::Relaxed))
    }

    pub fn get_order(&self, order_id: OrderId) -> Option<Order> {
        self.orders.get(&order_id).map(|s| s.lock().order.clone())
    }

    /// Looks up a single appended trade record (spec §4.B step 3e:
    /// "Append `Trade`; emit `TradeExecuted` event").
    pub fn get_trade(&self, trade_id: crate::models::TradeId) -> Option<Trade> {
        self.trades.get(&trade_id).map(|t| t.clone())
    }

    /// Available (unfrozen) balance for `(user_id, symbol)`. Read-only
    /// escape hatch for callers, such as the auto-trader, that need to
    /// self-enforce a policy (a reserve floor) the engine itself has no
    /// opinion on.
    pub fn available_balance(&self, user_id: UserId, symbol: &str) -> Decimal {
        self.ledger.balance(user_id, symbol).available
    }

    pub fn trading_pair(&self, symbol: &str) -> Option<crate::models::TradingPair> {
        self.registry.get(symbol).cloned()
    }

    pub fn order_book_snapshot(&self, symbol: &str, depth: usize) -> Result<OrderBookSnapshot, EngineError> {
        if self.registry.get(symbol).is_none() {
            return Err(EngineError::Validation(format!("unknown symbol: {symbol}")));
        }
        let mut snapshot = self.book(symbol).snapshot(depth);
        snapshot.timestamp = self.clock.now_millis();
        Ok(snapshot)
    }

    pub fn order_book_delta(&self, symbol: &str, from_sequence: u64) -> Result<Option<BookDelta>, EngineError> {
        if self.registry.get(symbol).is_none() {
            return Err(EngineError::Validation(format!("unknown symbol: {symbol}")));
        }
        Ok(self.book(symbol).delta_since(from_sequence))
    }

    /// Submits a new order (spec §4.B steps 1-5): validate, freeze, match
    /// against the resting book, settle each fill against the ledger,
    /// rest any remainder (limit orders only).
    #[instrument(skip(self), fields(user_id = %user_id, symbol))]
    pub fn submit_order(
        &self,
        user_id: UserId,
        symbol: &str,
        side: Side,
        order_type: OrderType,
        quantity: Decimal,
        price: Option<Decimal>,
        quote_budget: Option<Decimal>,
    ) -> Result<SubmitOrderResult, EngineError> {
        let pair = self
            .registry
            .get(symbol)
            .ok_or_else(|| EngineError::Validation(format!("unknown symbol: {symbol}")))?
            .clone();
        if !pair.is_active {
            return Err(EngineError::SymbolInactive(symbol.to_string()));
        }

        match order_type {
            OrderType::Limit => {
                let price = price.ok_or_else(|| EngineError::Validation("limit order requires price".into()))?;
                if !pair.validate_price(price) {
                    return Err(EngineError::Validation("price precision out of bounds".into()));
                }
                if !pair.validate_quantity(quantity) {
                    return Err(EngineError::Validation("quantity out of bounds".into()));
                }
            }
            OrderType::Market => {
                if side == Side::Buy {
                    let budget = quote_budget
                        .ok_or_else(|| EngineError::Validation("market buy requires quote_budget".into()))?;
                    if budget <= Decimal::ZERO {
                        return Err(EngineError::Validation("quote_budget must be positive".into()));
                    }
                } else if !pair.validate_quantity(quantity) {
                    return Err(EngineError::Validation("quantity out of bounds".into()));
                }
            }
        }

        let (frozen_asset, frozen_amount) = match (side, order_type) {
            (Side::Buy, OrderType::Limit) => (pair.quote.clone(), quantity * price.unwrap()),
            (Side::Buy, OrderType::Market) => (pair.quote.clone(), quote_budget.unwrap()),
            (Side::Sell, _) => (pair.base.clone(), quantity),
        };
        self.ledger.freeze(user_id, &frozen_asset, frozen_amount)?;

        let order_id = self.alloc_order_id();
        let now = self.clock.now_millis();
        let mut order = Order {
            id: order_id,
            user_id,
            symbol: symbol.to_string(),
            side,
            order_type,
            quantity,
            price,
            filled_quantity: Decimal::ZERO,
            average_price: Decimal::ZERO,
            status: OrderStatus::Pending,
            created_at: now,
            quote_budget,
        };

        let is_market_order = matches!(order_type, OrderType::Market);
        let (trades, remaining_quantity, leftover_budget) = {
            let book = self.book(symbol);
            match (side, order_type) {
                (Side::Buy, OrderType::Market) => {
                    let (trades, _filled_qty, leftover_budget) = book.match_budget(
                        order_id,
                        user_id,
                        frozen_amount,
                        self.clock.as_ref(),
                        &|| self.alloc_trade_id(),
                    );
                    (trades, Decimal::ZERO, leftover_budget)
                }
                _ => {
                    let (trades, leftover) = book.match_against(
                        order_id,
                        user_id,
                        side,
                        quantity,
                        price,
                        self.clock.as_ref(),
                        &|| self.alloc_trade_id(),
                    );
                    (trades, leftover, Decimal::ZERO)
                }
            }
        };

        let mut consumed = Decimal::ZERO;
        for (idx, trade) in trades.iter().enumerate() {
            let settlement = self.settlement_for(order_id, side, symbol, &pair, trade);
            if let Err(e) = self.ledger.settle_trade(&settlement) {
                // Spec §4.B step 3c: abort the whole submission. Rewind the
                // book mutations for this trade and every trade after it in
                // the batch (none of those settled either), unfreeze
                // whatever wasn't actually consumed, and record the order
                // as Rejected rather than silently losing the already
                // durable partial fill.
                let maker_side = match side {
                    Side::Buy => Side::Sell,
                    Side::Sell => Side::Buy,
                };
                let book = self.book(symbol);
                for unsettled in &trades[idx..] {
                    book.restore(maker_side, unsettled.maker_order_id, unsettled.maker_user_id, unsettled.price, unsettled.quantity);
                }
                drop(book);

                order.status = OrderStatus::Rejected;
                let refund = frozen_amount - consumed;
                if refund > Decimal::ZERO {
                    self.ledger.unfreeze(user_id, &frozen_asset, refund)?;
                }

                tracing::warn!(order_id = order_id.0, trade_id = trade.trade_id.0, error = %e, "settlement failed mid-submission, rejecting order");

                let result = SubmitOrderResult {
                    order_id,
                    status: order.status,
                    filled_quantity: order.filled_quantity,
                    remaining_quantity: if is_market_order && side == Side::Buy { Decimal::ZERO } else { order.remaining() },
                    average_price: order.average_price,
                    trades: trades[..idx].to_vec(),
                };

                self.orders.insert(
                    order_id,
                    Mutex::new(OrderState {
                        order,
                        frozen_asset,
                        frozen_amount,
                        consumed_amount: consumed,
                    }),
                );

                return Ok(result);
            }

            consumed += match side {
                Side::Buy => trade.price * trade.quantity,
                Side::Sell => trade.quantity,
            };

            let trade_value = trade.price * trade.quantity;
            let new_filled = order.filled_quantity + trade.quantity;
            order.average_price = if new_filled > Decimal::ZERO {
                (order.average_price * order.filled_quantity + trade_value) / new_filled
            } else {
                Decimal::ZERO
            };
            order.filled_quantity = new_filled;

            self.trades.insert(
                trade.trade_id,
                Trade {
                    id: trade.trade_id,
                    symbol: symbol.to_string(),
                    price: trade.price,
                    quantity: trade.quantity,
                    buy_order_id: settlement.buy_order_id,
                    sell_order_id: settlement.sell_order_id,
                    buyer_id: settlement.buyer_id,
                    seller_id: settlement.seller_id,
                    side,
                    executed_at: trade.timestamp,
                },
            );

            let _ = self.trade_tx.send(TradeExecuted {
                trade_id: trade.trade_id,
                symbol: symbol.to_string(),
                price: trade.price,
                quantity: trade.quantity,
                buy_order_id: if side == Side::Buy { order_id } else { trade.maker_order_id },
                sell_order_id: if side == Side::Sell { order_id } else { trade.maker_order_id },
                buyer_id: if side == Side::Buy { user_id } else { trade.maker_user_id },
                seller_id: if side == Side::Sell { user_id } else { trade.maker_user_id },
                aggressor_side: side,
                executed_at: trade.timestamp,
            });
        }

        // A market order never rests: whatever liquidity wasn't there to
        // match, or whatever budget/quantity was left once the book ran
        // dry, is simply not transacted. It always reaches a terminal
        // state here, never `Active`/`PartiallyFilled`-and-resting.
        let ran_dry = if side == Side::Buy { leftover_budget > Decimal::ZERO } else { remaining_quantity > Decimal::ZERO };

        if is_market_order {
            order.quantity = order.filled_quantity;
            order.status = if !ran_dry {
                OrderStatus::Filled
            } else if order.filled_quantity > Decimal::ZERO {
                OrderStatus::PartiallyFilled
            } else {
                OrderStatus::Cancelled
            };
        } else if remaining_quantity <= Decimal::ZERO {
            order.status = OrderStatus::Filled;
        } else {
            order.status = if order.filled_quantity > Decimal::ZERO {
                OrderStatus::PartiallyFilled
            } else {
                OrderStatus::Active
            };
            self.book(symbol).place(side, order_id, user_id, price.unwrap(), remaining_quantity);
            let _ = self.order_tx.send(OrderPlaced {
                order_id,
                symbol: symbol.to_string(),
                user_id,
                side,
                price: price.unwrap(),
                remaining: remaining_quantity,
                timestamp: now,
            });
        }

        let _ = self.book_tx.send(OrderBookChanged {
            symbol: symbol.to_string(),
            sequence: self.book(symbol).sequence(),
            timestamp: now,
        });

        // Market orders never rest, so any unconsumed freeze must be
        // released here even when the order only partially filled.
        if order.status.is_terminal() || is_market_order {
            let refund = frozen_amount - consumed;
            if refund > Decimal::ZERO {
                self.ledger.unfreeze(user_id, &frozen_asset, refund)?;
            }
        }

        let result = SubmitOrderResult {
            order_id,
            status: order.status,
            filled_quantity: order.filled_quantity,
            remaining_quantity: order.remaining(),
            average_price: order.average_price,
            trades,
        };

        self.orders.insert(
            order_id,
            Mutex::new(OrderState {
                order,
                frozen_asset,
                frozen_amount,
                consumed_amount: consumed,
            }),
        );

        Ok(result)
    }

    /// Cancels a resting or not-yet-resting order. Rejects terminal
    /// orders with `OrderTerminal` rather than treating re-cancel as a
    /// no-op success (Open Question, resolved in favor of surfacing
    /// client bugs).
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub fn cancel_order(&self, user_id: UserId, order_id: OrderId) -> Result<(), EngineError> {
        self.cancel_order_impl(Some(user_id), order_id)
    }

    /// Cancels any user's order with no ownership check, for an admin
    /// caller (spec §4.B/§6: `CancelOrder { userId?, orderId }` —
    /// `callerUserId = null` means an admin rather than the owner).
    #[instrument(skip(self))]
    pub fn cancel_order_as_admin(&self, order_id: OrderId) -> Result<(), EngineError> {
        self.cancel_order_impl(None, order_id)
    }

    /// Cancels every non-terminal order whose `created_at` is older
    /// than `ttl_seconds`, via the same cancel pipeline `cancel_order`
    /// uses. Run periodically by an external scheduler (spec §4.B
    /// "Expiry"); bypasses the ownership check since it's a system
    /// action, not a user-initiated cancel.
    pub fn expire_stale_orders(&self, ttl_seconds: i64) -> Vec<OrderId> {
        let cutoff = self.clock.now_millis() - ttl_seconds * 1000;
        let stale: Vec<OrderId> = self
            .orders
            .iter()
            .filter_map(|entry| {
                let state = entry.value().lock();
                (!state.order.status.is_terminal() && state.order.created_at < cutoff).then_some(*entry.key())
            })
            .collect();

        for order_id in &stale {
            if let Err(e) = self.cancel_order_impl(None, *order_id) {
                tracing::warn!(order_id = order_id.0, error = %e, "failed to expire stale order");
            }
        }
        stale
    }

    fn cancel_order_impl(&self, user_id: Option<UserId>, order_id: OrderId) -> Result<(), EngineError> {
        let state_lock = self
            .orders
            .get(&order_id)
            .ok_or(EngineError::OrderNotFound(order_id.0))?;
        let mut state = state_lock.lock();

        if let Some(user_id) = user_id {
            if state.order.user_id != user_id {
                return Err(EngineError::Unauthorized);
            }
        }
        if state.order.status.is_terminal() {
            return Err(EngineError::OrderTerminal(order_id.0));
        }

        let owner = state.order.user_id;
        let symbol = state.order.symbol.clone();
        let removed_remaining = self.book(&symbol).remove(order_id);

        state.order.status = OrderStatus::Cancelled;
        let refund = state.frozen_amount - state.consumed_amount;
        drop(state);
        drop(state_lock);

        if refund > Decimal::ZERO {
            let asset = self.orders.get(&order_id).unwrap().lock().frozen_asset.clone();
            self.ledger.unfreeze(owner, &asset, refund)?;
        }

        let _ = self.cancel_tx.send(OrderCancelled {
            order_id,
            symbol,
            user_id: owner,
            timestamp: self.clock.now_millis(),
        });
        let _ = removed_remaining;
        Ok(())
    }

    fn settlement_for(
        &self,
        taker_order_id: OrderId,
        taker_side: Side,
        symbol: &str,
        pair: &crate::models::TradingPair,
        trade: &TradeExecution,
    ) -> TradeSettlement {
        let (buyer_id, seller_id, buy_order_id, sell_order_id) = if taker_side == Side::Buy {
            (trade.taker_user_id, trade.maker_user_id, taker_order_id, trade.maker_order_id)
        } else {
            (trade.maker_user_id, trade.taker_user_id, trade.maker_order_id, taker_order_id)
        };

        TradeSettlement {
            trade_id: trade.trade_id,
            symbol: symbol.to_string(),
            base_asset: pair.base.clone(),
            quote_asset: pair.quote.clone(),
            buyer_id,
            seller_id,
            quote_amount: trade.price * trade.quantity,
            base_amount: trade.quantity,
            buy_order_id,
            sell_order_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TestClock;
    use crate::models::TradingPair;
    use rust_decimal_macros::dec;

    fn registry() -> Arc<TradingPairRegistry> {
        let mut registry = TradingPairRegistry::new();
        registry.insert(TradingPair {
            symbol: "BTCUSDT".into(),
            base: "BTC".into(),
            quote: "USDT".into(),
            price_precision: 2,
            quantity_precision: 6,
            min_quantity: Decimal::new(1, 4),
            max_quantity: Decimal::new(1000, 0),
            is_active: true,
        });
        Arc::new(registry)
    }

    fn engine() -> (MatchingEngine, crossbeam::channel::Receiver<crate::services::ledger::AssetDirty>) {
        let (tx, rx) = crossbeam::channel::unbounded();
        let ledger = Arc::new(AssetLedger::new(tx));
        ledger.credit(UserId(1), "USDT", dec!(100000));
        ledger.credit(UserId(2), "BTC", dec!(100));
        let engine = MatchingEngine::new(registry(), ledger, Arc::new(TestClock::new(1_000)));
        (engine, rx)
    }

    #[test]
    fn limit_buy_rests_when_book_is_empty() {
        let (engine, _rx) = engine();
        let result = engine
            .submit_order(UserId(1), "BTCUSDT", Side::Buy, OrderType::Limit, dec!(1.0), Some(dec!(100.0)), None)
            .unwrap();

        assert_eq!(result.status, OrderStatus::Active);
        assert_eq!(result.filled_quantity, dec!(0));
        let snapshot = engine.order_book_snapshot("BTCUSDT", 10).unwrap();
        assert_eq!(snapshot.bids[0].price, dec!(100.0));
    }

    #[test]
    fn crossing_limit_orders_fill_and_settle() {
        let (engine, _rx) = engine();
        engine
            .submit_order(UserId(2), "BTCUSDT", Side::Sell, OrderType::Limit, dec!(1.0), Some(dec!(100.0)), None)
            .unwrap();

        let result = engine
            .submit_order(UserId(1), "BTCUSDT", Side::Buy, OrderType::Limit, dec!(1.0), Some(dec!(100.0)), None)
            .unwrap();

        assert_eq!(result.status, OrderStatus::Filled);
        assert_eq!(result.filled_quantity, dec!(1.0));
        assert_eq!(result.average_price, dec!(100.0));

        let buyer_btc = engine.ledger.balance(UserId(1), "BTC");
        let seller_usdt = engine.ledger.balance(UserId(2), "USDT");
        assert_eq!(buyer_btc.available, dec!(1.0));
        assert_eq!(seller_usdt.available, dec!(100.0));

        let trade_id = result.trades[0].trade_id;
        let trade = engine.get_trade(trade_id).unwrap();
        assert_eq!(trade.buyer_id, UserId(1));
        assert_eq!(trade.seller_id, UserId(2));
        assert_eq!(trade.quantity, dec!(1.0));
    }

    #[test]
    fn cancel_on_terminal_order_is_an_error() {
        let (engine, _rx) = engine();
        engine
            .submit_order(UserId(2), "BTCUSDT", Side::Sell, OrderType::Limit, dec!(1.0), Some(dec!(100.0)), None)
            .unwrap();
        let result = engine
            .submit_order(UserId(1), "BTCUSDT", Side::Buy, OrderType::Limit, dec!(1.0), Some(dec!(100.0)), None)
            .unwrap();

        let err = engine.cancel_order(UserId(1), result.order_id).unwrap_err();
        assert!(matches!(err, EngineError::OrderTerminal(_)));
    }

    #[test]
    fn cancel_refunds_unused_frozen_balance() {
        let (engine, _rx) = engine();
        let result = engine
            .submit_order(UserId(1), "BTCUSDT", Side::Buy, OrderType::Limit, dec!(2.0), Some(dec!(100.0)), None)
            .unwrap();

        engine.cancel_order(UserId(1), result.order_id).unwrap();
        let balance = engine.ledger.balance(UserId(1), "USDT");
        assert_eq!(balance.available, dec!(100000));
        assert_eq!(balance.frozen, dec!(0));
    }

    #[test]
    fn market_buy_spends_budget_against_resting_asks() {
        let (engine, _rx) = engine();
        engine
            .submit_order(UserId(2), "BTCUSDT", Side::Sell, OrderType::Limit, dec!(2.0), Some(dec!(100.0)), None)
            .unwrap();

        let result = engine
            .submit_order(UserId(1), "BTCUSDT", Side::Buy, OrderType::Market, Decimal::ZERO, None, Some(dec!(150.0)))
            .unwrap();

        assert_eq!(result.status, OrderStatus::Filled);
        assert_eq!(result.filled_quantity, dec!(1.5));
    }

    #[test]
    fn expire_stale_orders_cancels_and_refunds() {
        let (engine, _rx) = engine();
        let result = engine
            .submit_order(UserId(1), "BTCUSDT", Side::Buy, OrderType::Limit, dec!(1.0), Some(dec!(100.0)), None)
            .unwrap();

        let expired = engine.expire_stale_orders(-1);
        assert_eq!(expired, vec![result.order_id]);
        assert_eq!(engine.get_order(result.order_id).unwrap().status, OrderStatus::Cancelled);
        assert_eq!(engine.ledger.balance(UserId(1), "USDT").frozen, dec!(0));
    }

    #[test]
    fn market_buy_partially_fills_when_book_runs_dry_before_budget_exhausted() {
        let (engine, _rx) = engine();
        engine
            .submit_order(UserId(2), "BTCUSDT", Side::Sell, OrderType::Limit, dec!(1.0), Some(dec!(100.0)), None)
            .unwrap();

        let result = engine
            .submit_order(UserId(1), "BTCUSDT", Side::Buy, OrderType::Market, Decimal::ZERO, None, Some(dec!(150.0)))
            .unwrap();

        assert_eq!(result.status, OrderStatus::PartiallyFilled);
        assert_eq!(result.filled_quantity, dec!(1.0));
        let buyer_usdt = engine.ledger.balance(UserId(1), "USDT");
        assert_eq!(buyer_usdt.frozen, dec!(0));
        assert_eq!(buyer_usdt.available, dec!(100000) - dec!(100.0));
    }

    #[test]
    fn market_buy_cancelled_when_book_is_empty() {
        let (engine, _rx) = engine();
        let result = engine
            .submit_order(UserId(1), "BTCUSDT", Side::Buy, OrderType::Market, Decimal::ZERO, None, Some(dec!(150.0)))
            .unwrap();

        assert_eq!(result.status, OrderStatus::Cancelled);
        assert_eq!(result.filled_quantity, dec!(0));
        let buyer_usdt = engine.ledger.balance(UserId(1), "USDT");
        assert_eq!(buyer_usdt.frozen, dec!(0));
        assert_eq!(buyer_usdt.available, dec!(100000));
    }

    #[test]
    fn market_sell_partially_fills_when_book_runs_dry() {
        let (engine, _rx) = engine();
        engine
            .submit_order(UserId(1), "BTCUSDT", Side::Buy, OrderType::Limit, dec!(0.5), Some(dec!(100.0)), None)
            .unwrap();

        let result = engine
            .submit_order(UserId(2), "BTCUSDT", Side::Sell, OrderType::Market, dec!(2.0), None, None)
            .unwrap();

        assert_eq!(result.status, OrderStatus::PartiallyFilled);
        assert_eq!(result.filled_quantity, dec!(0.5));
        let seller_btc = engine.ledger.balance(UserId(2), "BTC");
        assert_eq!(seller_btc.frozen, dec!(0));
    }

    #[test]
    fn settle_trade_failure_rejects_order_and_rewinds_book() {
        let (engine, _rx) = engine();
        engine
            .submit_order(UserId(2), "BTCUSDT", Side::Sell, OrderType::Limit, dec!(1.0), Some(dec!(100.0)), None)
            .unwrap();
        // Desync the seller's frozen BTC from what's actually resting in
        // the book, so settlement of the upcoming fill fails downstream
        // of matching having already mutated the book.
        engine.ledger.unfreeze(UserId(2), "BTC", dec!(0.5)).unwrap();

        let result = engine
            .submit_order(UserId(1), "BTCUSDT", Side::Buy, OrderType::Limit, dec!(1.0), Some(dec!(100.0)), None)
            .unwrap();

        assert_eq!(result.status, OrderStatus::Rejected);
        assert!(result.trades.is_empty());

        let buyer_usdt = engine.ledger.balance(UserId(1), "USDT");
        assert_eq!(buyer_usdt.frozen, dec!(0));
        assert_eq!(buyer_usdt.available, dec!(100000));

        let snapshot = engine.order_book_snapshot("BTCUSDT", 10).unwrap();
        assert_eq!(snapshot.asks[0].price, dec!(100.0));
        assert_eq!(snapshot.asks[0].quantity, dec!(1.0));
    }

    #[test]
    fn admin_can_cancel_any_users_order() {
        let (engine, _rx) = engine();
        let result = engine
            .submit_order(UserId(1), "BTCUSDT", Side::Buy, OrderType::Limit, dec!(1.0), Some(dec!(100.0)), None)
            .unwrap();

        engine.cancel_order_as_admin(result.order_id).unwrap();
        assert_eq!(engine.get_order(result.order_id).unwrap().status, OrderStatus::Cancelled);
        assert_eq!(engine.ledger.balance(UserId(1), "USDT").frozen, dec!(0));
    }

    #[test]
    fn rejects_unknown_symbol() {
        let (engine, _rx) = engine();
        let err = engine
            .submit_order(UserId(1), "ETHUSDT", Side::Buy, OrderType::Limit, dec!(1.0), Some(dec!(100.0)), None)
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }
}
