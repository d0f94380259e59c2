//! The Persister: bridges live domain events into the cache-tier queues
//! and drains those queues into the durable store.
//!
//! Two kinds of worker, both grounded on the teacher's
//! `tokio::spawn` + channel-drain worker shape:
//!   - ingest workers turn `TradeExecuted` broadcasts and `AssetDirty`
//!     notifications into queue entries (`rpush`). The asset side
//!     originates on a `crossbeam` channel from the synchronous ledger
//!     hot path, so it's drained on a blocking thread and forwarded
//!     into the async world rather than polled from an async task.
//!   - drain workers peek a batch off a queue, write it to the durable
//!     store, and ack only on success — a failed write leaves the batch
//!     in place for the next poll, per spec's at-least-once guarantee.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::services::ledger::{AssetDirty, AssetLedger};
use crate::services::matching::types::TradeExecuted;

use super::cache_store::CacheStore;
use super::durable_store::{DurableStore, PersistedAssetDelta, PersistedTrade};
use super::{ASSET_QUEUE, TRADE_QUEUE};

#[derive(Debug, Clone)]
pub struct PersisterConfig {
    /// Max items a drain worker writes per durable-store round trip.
    pub batch_size: usize,
    /// How long a drain worker sleeps after finding an empty queue, or
    /// after a failed write, before polling again.
    pub poll_interval_ms: u64,
}

impl Default for PersisterConfig {
    fn default() -> Self {
        Self {
            batch_size: 500,
            poll_interval_ms: 100,
        }
    }
}

pub struct Persister<C: CacheStore + 'static, D: DurableStore + 'static> {
    cache: Arc<C>,
    durable: Arc<D>,
    config: PersisterConfig,
}

impl<C: CacheStore + 'static, D: DurableStore + 'static> Persister<C, D> {
    pub fn new(cache: Arc<C>, durable: Arc<D>, config: PersisterConfig) -> Self {
        Self { cache, durable, config }
    }

    /// Subscribes to the engine's trade feed and pushes each fill onto
    /// `sync_queue:trades` as it happens.
    pub fn spawn_trade_ingest(&self, mut trades: broadcast::Receiver<TradeExecuted>) {
        let cache = Arc::clone(&self.cache);
        tokio::spawn(async move {
            info!("trade ingest worker started");
            loop {
                match trades.recv().await {
                    Ok(trade) => {
                        use crate::models::Side;
                        let (maker_order_id, taker_order_id, maker_user_id, taker_user_id) =
                            if trade.aggressor_side == Side::Buy {
                                (trade.sell_order_id, trade.buy_order_id, trade.seller_id, trade.buyer_id)
                            } else {
                                (trade.buy_order_id, trade.sell_order_id, trade.buyer_id, trade.seller_id)
                            };
                        let persisted = PersistedTrade {
                            trade_id: trade.trade_id,
                            symbol: trade.symbol.clone(),
                            maker_order_id,
                            taker_order_id,
                            maker_user_id,
                            taker_user_id,
                            price: trade.price,
                            quantity: trade.quantity,
                            executed_at: trade.executed_at,
                        };
                        match serde_json::to_vec(&persisted) {
                            Ok(bytes) => {
                                if let Err(e) = cache.rpush(TRADE_QUEUE, bytes).await {
                                    error!(trade_id = trade.trade_id.0, error = %e, "failed to enqueue trade");
                                }
                            }
                            Err(e) => error!(trade_id = trade.trade_id.0, error = %e, "failed to serialize trade"),
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "trade ingest lagged, events were dropped before enqueue");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!("trade feed closed, stopping trade ingest worker");
                        break;
                    }
                }
            }
        });
    }

    /// Drains the ledger's dirty-row channel (a `crossbeam` channel fed
    /// from the synchronous hot path) and pushes the row's current
    /// state onto `sync_queue:assets`.
    pub fn spawn_asset_ingest(&self, dirty_rx: crossbeam::channel::Receiver<AssetDirty>, ledger: Arc<AssetLedger>) {
        let cache = Arc::clone(&self.cache);
        let (bridge_tx, mut bridge_rx) = tokio::sync::mpsc::unbounded_channel::<AssetDirty>();

        std::thread::spawn(move || {
            while let Ok(dirty) = dirty_rx.recv() {
                if bridge_tx.send(dirty).is_err() {
                    break;
                }
            }
        });

        tokio::spawn(async move {
            info!("asset ingest worker started");
            while let Some(dirty) = bridge_rx.recv().await {
                let asset = ledger.balance(dirty.user_id, &dirty.symbol);
                let persisted = PersistedAssetDelta {
                    user_id: dirty.user_id,
                    symbol: dirty.symbol.clone(),
                    version: dirty.version,
                    available: asset.available,
                    frozen: asset.frozen,
                };
                match serde_json::to_vec(&persisted) {
                    Ok(bytes) => {
                        if let Err(e) = cache.rpush(ASSET_QUEUE, bytes).await {
                            error!(user_id = %dirty.user_id, symbol = %dirty.symbol, error = %e, "failed to enqueue asset delta");
                        }
                    }
                    Err(e) => error!(error = %e, "failed to serialize asset delta"),
                }
            }
            info!("asset ingest worker stopped");
        });
    }

    pub fn spawn_trade_drain(&self) {
        let cache = Arc::clone(&self.cache);
        let durable = Arc::clone(&self.durable);
        let config = self.config.clone();
        tokio::spawn(async move {
            info!("trade drain worker started");
            loop {
                match drain_once::<_, PersistedTrade>(cache.as_ref(), TRADE_QUEUE, config.batch_size).await {
                    Ok(Some(batch)) => match durable.write_trades(&batch).await {
                        Ok(()) => {
                            if let Err(e) = cache.ack_batch(TRADE_QUEUE, batch.len()).await {
                                error!(error = %e, "failed to ack trade batch after durable write");
                            } else {
                                debug!(count = batch.len(), "flushed trade batch to durable store");
                            }
                        }
                        Err(e) => warn!(error = %e, "durable trade write failed, retaining batch for retry"),
                    },
                    Ok(None) => {}
                    Err(e) => warn!(error = %e, "trade queue peek failed"),
                }
                tokio::time::sleep(Duration::from_millis(config.poll_interval_ms)).await;
            }
        });
    }

    pub fn spawn_asset_drain(&self) {
        let cache = Arc::clone(&self.cache);
        let durable = Arc::clone(&self.durable);
        let config = self.config.clone();
        tokio::spawn(async move {
            info!("asset drain worker started");
            loop {
                match drain_once::<_, PersistedAssetDelta>(cache.as_ref(), ASSET_QUEUE, config.batch_size).await {
                    Ok(Some(batch)) => match durable.write_asset_deltas(&batch).await {
                        Ok(()) => {
                            if let Err(e) = cache.ack_batch(ASSET_QUEUE, batch.len()).await {
                                error!(error = %e, "failed to ack asset batch after durable write");
                            } else {
                                debug!(count = batch.len(), "flushed asset batch to durable store");
                            }
                        }
                        Err(e) => warn!(error = %e, "durable asset write failed, retaining batch for retry"),
                    },
                    Ok(None) => {}
                    Err(e) => warn!(error = %e, "asset queue peek failed"),
                }
                tokio::time::sleep(Duration::from_millis(config.poll_interval_ms)).await;
            }
        });
    }
}

async fn drain_once<C: CacheStore, T: serde::de::DeserializeOwned>(
    cache: &C,
    queue: &str,
    batch_size: usize,
) -> Result<Option<Vec<T>>, crate::error::EngineError> {
    let raw = cache.peek_batch(queue, batch_size).await?;
    if raw.is_empty() {
        return Ok(None);
    }
    let mut items = Vec::with_capacity(raw.len());
    for bytes in raw {
        match serde_json::from_slice::<T>(&bytes) {
            Ok(item) => items.push(item),
            Err(e) => {
                error!(error = %e, "dropping unparseable queue entry");
            }
        }
    }
    Ok(Some(items))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{OrderId, TradeId, UserId};
    use crate::services::persistence::cache_store::InMemoryCacheStore;
    use crate::services::persistence::durable_store::InMemoryDurableStore;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn drain_once_returns_none_on_empty_queue() {
        let cache = InMemoryCacheStore::new();
        let result = drain_once::<_, PersistedTrade>(&cache, TRADE_QUEUE, 10).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn trade_drain_flushes_then_acks() {
        let cache = Arc::new(InMemoryCacheStore::new());
        let durable = Arc::new(InMemoryDurableStore::new());
        let persister = Persister::new(Arc::clone(&cache), Arc::clone(&durable), PersisterConfig {
            batch_size: 10,
            poll_interval_ms: 10,
        });

        let trade = PersistedTrade {
            trade_id: TradeId(1),
            symbol: "BTCUSDT".into(),
            maker_order_id: OrderId(1),
            taker_order_id: OrderId(2),
            maker_user_id: UserId(1),
            taker_user_id: UserId(2),
            price: dec!(100),
            quantity: dec!(1),
            executed_at: 1000,
        };
        cache.rpush(TRADE_QUEUE, serde_json::to_vec(&trade).unwrap()).await.unwrap();

        persister.spawn_trade_drain();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(cache.queue_len(TRADE_QUEUE).await.unwrap(), 0);
        assert!(durable.trades.lock().contains_key(&1));
    }
}
