//! Write-behind persistence
//!
//! Grounded on `services/matching/orchestrator.rs`'s
//! `start_persistence_worker` (spawn a task that drains a
//! `broadcast::Receiver` and writes batches to Postgres) and
//! `cache/redis_client.rs`'s retry discipline, reshaped around the
//! spec's two named reliable queues instead of a bare broadcast drain:
//! broadcast channels drop under lag, which would break the
//! at-least-once guarantee.

pub mod cache_store;
pub mod durable_store;
pub mod persister;

pub use cache_store::{CacheStore, RedisCacheStore};
pub use durable_store::{DurableStore, PersistedAssetDelta, PersistedTrade, PostgresDurableStore};
pub use persister::{Persister, PersisterConfig};

pub const TRADE_QUEUE: &str = "sync_queue:trades";
pub const ASSET_QUEUE: &str = "sync_queue:assets";
