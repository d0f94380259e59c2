//! Per-symbol single-writer actor
//!
//! Grounded on the teacher's `tokio::spawn` background-worker pattern
//! (`services/matching/orchestrator.rs::start_persistence_worker`,
//! `main.rs`'s price-feed/liquidation workers): one task per symbol
//! drains a bounded `mpsc` channel and owns that symbol's slice of the
//! engine's state exclusively, so submits and cancels against the same
//! symbol are never interleaved from two callers at once. Callers that
//! don't need serialized access can still call `MatchingEngine` methods
//! directly (snapshot reads are already lock-free).

use std::sync::Arc;

use dashmap::DashMap;
use rust_decimal::Decimal;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

use crate::error::EngineError;
use crate::models::{Order, OrderId, OrderType, Side, UserId};

use super::engine::MatchingEngine;
use super::types::{BookDelta, OrderBookSnapshot, SubmitOrderResult};

pub enum SymbolCommand {
    Submit {
        user_id: UserId,
        side: Side,
        order_type: OrderType,
        quantity: Decimal,
        price: Option<Decimal>,
        quote_budget: Option<Decimal>,
        reply: oneshot::Sender<Result<SubmitOrderResult, EngineError>>,
    },
    Cancel {
        /// `None` is an admin caller cancelling on another user's behalf
        /// (spec §4.B/§6: `CancelOrder { userId?, orderId }`).
        user_id: Option<UserId>,
        order_id: OrderId,
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
}

/// Handle for a registry of per-symbol actors fronting a shared
/// `MatchingEngine`. Reads (snapshot, delta, get_order) bypass the
/// actor queues entirely since they don't mutate anything.
pub struct SymbolActorHandle {
    engine: Arc<MatchingEngine>,
    senders: DashMap<String, mpsc::Sender<SymbolCommand>>,
    queue_capacity: usize,
}

impl SymbolActorHandle {
    pub fn new(engine: Arc<MatchingEngine>, queue_capacity: usize) -> Self {
        Self {
            engine,
            senders: DashMap::new(),
            queue_capacity,
        }
    }

    /// Spawns the drain task for `symbol` if it isn't already running,
    /// and returns its command sender.
    fn sender_for(&self, symbol: &str) -> mpsc::Sender<SymbolCommand> {
        if let Some(tx) = self.senders.get(symbol) {
            return tx.clone();
        }
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        self.senders.insert(symbol.to_string(), tx.clone());
        spawn_worker(Arc::clone(&self.engine), symbol.to_string(), rx);
        tx
    }

    /// Submits an order through the symbol's single-writer queue. Fails
    /// fast with `Overloaded` instead of blocking when the queue is
    /// full, per spec's "queue depth exceeds a configured threshold at
    /// enqueue time".
    pub async fn submit_order(
        &self,
        symbol: &str,
        user_id: UserId,
        side: Side,
        order_type: OrderType,
        quantity: Decimal,
        price: Option<Decimal>,
        quote_budget: Option<Decimal>,
    ) -> Result<SubmitOrderResult, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let command = SymbolCommand::Submit {
            user_id,
            side,
            order_type,
            quantity,
            price,
            quote_budget,
            reply: reply_tx,
        };
        self.sender_for(symbol)
            .try_send(command)
            .map_err(|_| EngineError::Overloaded)?;
        reply_rx
            .await
            .map_err(|_| EngineError::Internal("symbol actor dropped reply channel".into()))?
    }

    pub async fn cancel_order(&self, symbol: &str, user_id: UserId, order_id: OrderId) -> Result<(), EngineError> {
        self.cancel_order_impl(symbol, Some(user_id), order_id).await
    }

    /// Cancels any user's order with no ownership check, for an admin
    /// caller (`callerUserId = null` in spec §4.B/§6's `CancelOrder`).
    pub async fn cancel_order_as_admin(&self, symbol: &str, order_id: OrderId) -> Result<(), EngineError> {
        self.cancel_order_impl(symbol, None, order_id).await
    }

    async fn cancel_order_impl(&self, symbol: &str, user_id: Option<UserId>, order_id: OrderId) -> Result<(), EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let command = SymbolCommand::Cancel {
            user_id,
            order_id,
            reply: reply_tx,
        };
        self.sender_for(symbol)
            .try_send(command)
            .map_err(|_| EngineError::Overloaded)?;
        reply_rx
            .await
            .map_err(|_| EngineError::Internal("symbol actor dropped reply channel".into()))?
    }

    pub fn order_book_snapshot(&self, symbol: &str, depth: usize) -> Result<OrderBookSnapshot, EngineError> {
        self.engine.order_book_snapshot(symbol, depth)
    }

    pub fn order_book_delta(&self, symbol: &str, from_sequence: u64) -> Result<Option<BookDelta>, EngineError> {
        self.engine.order_book_delta(symbol, from_sequence)
    }

    pub fn get_order(&self, order_id: OrderId) -> Option<Order> {
        self.engine.get_order(order_id)
    }

    pub fn engine(&self) -> &Arc<MatchingEngine> {
        &self.engine
    }
}

fn spawn_worker(engine: Arc<MatchingEngine>, symbol: String, mut rx: mpsc::Receiver<SymbolCommand>) {
    tokio::spawn(async move {
        info!(symbol = %symbol, "symbol actor started");
        while let Some(command) = rx.recv().await {
            match command {
                SymbolCommand::Submit {
                    user_id,
                    side,
                    order_type,
                    quantity,
                    price,
                    quote_budget,
                    reply,
                } => {
                    let result = engine.submit_order(user_id, &symbol, side, order_type, quantity, price, quote_budget);
                    if reply.send(result).is_err() {
                        warn!(symbol = %symbol, "submit_order caller went away before reply");
                    }
                }
                SymbolCommand::Cancel { user_id, order_id, reply } => {
                    let result = match user_id {
                        Some(user_id) => engine.cancel_order(user_id, order_id),
                        None => engine.cancel_order_as_admin(order_id),
                    };
                    if reply.send(result).is_err() {
                        warn!(symbol = %symbol, "cancel_order caller went away before reply");
                    }
                }
            }
        }
        info!(symbol = %symbol, "symbol actor stopped");
    });
}
