//! Cache-tier queue abstraction
//!
//! Grounded on `cache/redis_client.rs`'s `RedisClient`: same
//! retry-with-backoff discipline (`with_retry`), but narrowed to the
//! list operations the persister needs for `sync_queue:trades` and
//! `sync_queue:assets`. Items are peeked (not popped) so a durable-store
//! write failure leaves them in place for the next cycle — the spec's
//! "acknowledges by removing the items from the queue; failures retain
//! the items" semantics.

use redis::AsyncCommands;

use crate::cache::redis_client::RedisClient;
use crate::error::EngineError;

/// A reliable FIFO queue in the cache tier. Implementors must make
/// `peek_batch` followed by `ack_batch(same count)` equivalent to a
/// pop: nothing else may remove from the front of the queue out of
/// band.
pub trait CacheStore: Send + Sync {
    async fn rpush(&self, queue: &str, item: Vec<u8>) -> Result<(), EngineError>;

    /// Returns up to `max` items from the front of `queue` without
    /// removing them.
    async fn peek_batch(&self, queue: &str, max: usize) -> Result<Vec<Vec<u8>>, EngineError>;

    /// Removes the first `count` items from `queue` (the batch just
    /// durably written).
    async fn ack_batch(&self, queue: &str, count: usize) -> Result<(), EngineError>;

    async fn queue_len(&self, queue: &str) -> Result<usize, EngineError>;
}

pub struct RedisCacheStore {
    client: std::sync::Arc<RedisClient>,
}

impl RedisCacheStore {
    pub fn new(client: std::sync::Arc<RedisClient>) -> Self {
        Self { client }
    }
}

impl CacheStore for RedisCacheStore {
    async fn rpush(&self, queue: &str, item: Vec<u8>) -> Result<(), EngineError> {
        self.client
            .with_retry(|mut conn| {
                let queue = queue.to_string();
                let item = item.clone();
                async move { conn.rpush::<_, _, ()>(&queue, item).await }
            })
            .await
            .map_err(|e| EngineError::CacheUnavailable(e.to_string()))
    }

    async fn peek_batch(&self, queue: &str, max: usize) -> Result<Vec<Vec<u8>>, EngineError> {
        self.client
            .with_retry(|mut conn| {
                let queue = queue.to_string();
                async move { conn.lrange(&queue, 0, max as isize - 1).await }
            })
            .await
            .map_err(|e| EngineError::CacheUnavailable(e.to_string()))
    }

    async fn ack_batch(&self, queue: &str, count: usize) -> Result<(), EngineError> {
        if count == 0 {
            return Ok(());
        }
        self.client
            .with_retry(|mut conn| {
                let queue = queue.to_string();
                async move { conn.ltrim(&queue, count as isize, -1).await }
            })
            .await
            .map_err(|e| EngineError::CacheUnavailable(e.to_string()))
    }

    async fn queue_len(&self, queue: &str) -> Result<usize, EngineError> {
        self.client
            .with_retry(|mut conn| {
                let queue = queue.to_string();
                async move { conn.llen(&queue).await }
            })
            .await
            .map_err(|e| EngineError::CacheUnavailable(e.to_string()))
    }
}

/// In-process stand-in used by the persister's own tests and by
/// startup reconciliation tests elsewhere, so they don't need a live
/// Redis instance.
#[cfg(test)]
pub struct InMemoryCacheStore {
    queues: parking_lot::Mutex<std::collections::HashMap<String, std::collections::VecDeque<Vec<u8>>>>,
}

#[cfg(test)]
impl InMemoryCacheStore {
    pub fn new() -> Self {
        Self {
            queues: parking_lot::Mutex::new(std::collections::HashMap::new()),
        }
    }
}

#[cfg(test)]
impl CacheStore for InMemoryCacheStore {
    async fn rpush(&self, queue: &str, item: Vec<u8>) -> Result<(), EngineError> {
        self.queues.lock().entry(queue.to_string()).or_default().push_back(item);
        Ok(())
    }

    async fn peek_batch(&self, queue: &str, max: usize) -> Result<Vec<Vec<u8>>, EngineError> {
        Ok(self
            .queues
            .lock()
            .get(queue)
            .map(|q| q.iter().take(max).cloned().collect())
            .unwrap_or_default())
    }

    async fn ack_batch(&self, queue: &str, count: usize) -> Result<(), EngineError> {
        if let Some(q) = self.queues.lock().get_mut(queue) {
            for _ in 0..count.min(q.len()) {
                q.pop_front();
            }
        }
        Ok(())
    }

    async fn queue_len(&self, queue: &str) -> Result<usize, EngineError> {
        Ok(self.queues.lock().get(queue).map(|q| q.len()).unwrap_or(0))
    }
}
