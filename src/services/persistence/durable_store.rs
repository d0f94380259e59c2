//! Durable store — the system of record the persister writes behind to
//!
//! Grounded on `services/matching/orchestrator.rs::persist_trade` (sqlx
//! batch insert, `ON CONFLICT ... DO NOTHING` idempotency) and
//! `db/timescale.rs` (`PgPool`-backed query modules). Unlike the
//! teacher's orchestrator, nothing here runs on the matching hot path:
//! the persister is the only caller.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::error::EngineError;
use crate::models::{OrderId, TradeId, UserId};

/// A settled trade leg pair, as queued on `sync_queue:trades`.
/// Idempotency key: `trade_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedTrade {
    pub trade_id: TradeId,
    pub symbol: String,
    pub maker_order_id: OrderId,
    pub taker_order_id: OrderId,
    pub maker_user_id: UserId,
    pub taker_user_id: UserId,
    pub price: Decimal,
    pub quantity: Decimal,
    pub executed_at: i64,
}

/// An asset-row mutation, as queued on `sync_queue:assets`.
/// Idempotency key: `(user_id, symbol, version)` — a write with a
/// version already seen for that row is a no-op.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedAssetDelta {
    pub user_id: UserId,
    pub symbol: String,
    pub version: u64,
    pub available: Decimal,
    pub frozen: Decimal,
}

pub trait DurableStore: Send + Sync {
    async fn write_trades(&self, trades: &[PersistedTrade]) -> Result<(), EngineError>;
    async fn write_asset_deltas(&self, deltas: &[PersistedAssetDelta]) -> Result<(), EngineError>;
}

pub struct PostgresDurableStore {
    pool: PgPool,
}

impl PostgresDurableStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl DurableStore for PostgresDurableStore {
    async fn write_trades(&self, trades: &[PersistedTrade]) -> Result<(), EngineError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| EngineError::Internal(format!("begin trade batch: {e}")))?;

        for trade in trades {
            sqlx::query(
                r#"
                INSERT INTO trades (id, symbol, maker_order_id, taker_order_id, maker_user_id, taker_user_id, price, quantity, executed_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, to_timestamp($9::double precision / 1000))
                ON CONFLICT (id) DO NOTHING
                "#,
            )
            .bind(trade.trade_id.0 as i64)
            .bind(&trade.symbol)
            .bind(trade.maker_order_id.0 as i64)
            .bind(trade.taker_order_id.0 as i64)
            .bind(trade.maker_user_id.0 as i64)
            .bind(trade.taker_user_id.0 as i64)
            .bind(trade.price)
            .bind(trade.quantity)
            .bind(trade.executed_at as f64)
            .execute(&mut *tx)
            .await
            .map_err(|e| EngineError::Internal(format!("insert trade {}: {e}", trade.trade_id.0)))?;
        }

        tx.commit()
            .await
            .map_err(|e| EngineError::Internal(format!("commit trade batch: {e}")))
    }

    async fn write_asset_deltas(&self, deltas: &[PersistedAssetDelta]) -> Result<(), EngineError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| EngineError::Internal(format!("begin asset batch: {e}")))?;

        for delta in deltas {
            sqlx::query(
                r#"
                INSERT INTO asset_balances (user_id, symbol, available, frozen, version)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (user_id, symbol) DO UPDATE SET
                    available = EXCLUDED.available,
                    frozen = EXCLUDED.frozen,
                    version = EXCLUDED.version
                WHERE asset_balances.version < EXCLUDED.version
                "#,
            )
            .bind(delta.user_id.0 as i64)
            .bind(&delta.symbol)
            .bind(delta.available)
            .bind(delta.frozen)
            .bind(delta.version as i64)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                EngineError::Internal(format!(
                    "upsert asset row user={} symbol={}: {e}",
                    delta.user_id.0, delta.symbol
                ))
            })?;
        }

        tx.commit()
            .await
            .map_err(|e| EngineError::Internal(format!("commit asset batch: {e}")))
    }
}

#[cfg(test)]
pub struct InMemoryDurableStore {
    pub trades: parking_lot::Mutex<std::collections::HashMap<u64, PersistedTrade>>,
    pub asset_versions: parking_lot::Mutex<std::collections::HashMap<(UserId, String), u64>>,
}

#[cfg(test)]
impl InMemoryDurableStore {
    pub fn new() -> Self {
        Self {
            trades: parking_lot::Mutex::new(std::collections::HashMap::new()),
            asset_versions: parking_lot::Mutex::new(std::collections::HashMap::new()),
        }
    }
}

#[cfg(test)]
impl DurableStore for InMemoryDurableStore {
    async fn write_trades(&self, trades: &[PersistedTrade]) -> Result<(), EngineError> {
        let mut store = self.trades.lock();
        for trade in trades {
            store.entry(trade.trade_id.0).or_insert_with(|| trade.clone());
        }
        Ok(())
    }

    async fn write_asset_deltas(&self, deltas: &[PersistedAssetDelta]) -> Result<(), EngineError> {
        let mut versions = self.asset_versions.lock();
        for delta in deltas {
            let key = (delta.user_id, delta.symbol.clone());
            let newer = match versions.get(&key) {
                Some(v) => *v < delta.version,
                None => true,
            };
            if newer {
                versions.insert(key, delta.version);
            }
        }
        Ok(())
    }
}
