//! Redis-backed [`SharedStore`].
//!
//! One Redis instance (or cluster entry point) is shared by every gateway
//! replica; Redis's single-threaded command execution provides the per-key
//! serialization the rate limiter and breaker rely on. Every call carries a
//! short deadline so a slow store degrades the affected feature instead of
//! stalling the request.

use super::{SharedStore, StoreError};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::time::Duration;

/// Shared-store client over a reconnecting Redis connection.
pub struct RedisStore {
    manager: ConnectionManager,
    op_timeout: Duration,
}

impl RedisStore {
    /// Connects to `url` (e.g. `redis://127.0.0.1:6379/0`).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Connection`] when the URL is invalid or the
    /// initial connection cannot be established within `op_timeout`.
    pub async fn connect(url: &str, op_timeout: Duration) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)
            .map_err(|e| StoreError::Connection(format!("invalid redis url: {e}")))?;
        let manager = tokio::time::timeout(op_timeout, client.get_connection_manager())
            .await
            .map_err(|_| StoreError::Connection("redis connect deadline exceeded".to_string()))?
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        Ok(Self { manager, op_timeout })
    }

    fn conn(&self) -> ConnectionManager {
        self.manager.clone()
    }

    async fn deadline<T>(
        &self,
        fut: impl std::future::Future<Output = Result<T, redis::RedisError>> + Send,
    ) -> Result<T, StoreError> {
        tokio::time::timeout(self.op_timeout, fut)
            .await
            .map_err(|_| StoreError::Connection("redis deadline exceeded".to_string()))?
            .map_err(|e| StoreError::Operation(e.to_string()))
    }
}

fn ttl_secs(ttl: Duration) -> i64 {
    // Redis TTLs are whole seconds; never round a positive TTL down to zero.
    i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX).max(1)
}

#[async_trait]
impl SharedStore for RedisStore {
    async fn zset_add(&self, key: &str, member: &str, score: f64) -> Result<(), StoreError> {
        let mut conn = self.conn();
        let key = key.to_string();
        let member = member.to_string();
        self.deadline(async move { conn.zadd::<_, _, _, ()>(key, member, score).await }).await
    }

    async fn zset_remove_range_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
    ) -> Result<u64, StoreError> {
        let mut conn = self.conn();
        let key = key.to_string();
        self.deadline(async move { conn.zrembyscore::<_, _, _, u64>(key, min, max).await }).await
    }

    async fn zset_count(&self, key: &str, min: f64, max: f64) -> Result<u64, StoreError> {
        let mut conn = self.conn();
        let key = key.to_string();
        self.deadline(async move { conn.zcount::<_, _, _, u64>(key, min, max).await }).await
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn();
        let key = key.to_string();
        self.deadline(async move { conn.get::<_, Option<String>>(key).await }).await
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut conn = self.conn();
        let key = key.to_string();
        let value = value.to_string();
        self.deadline(async move { conn.set::<_, _, ()>(key, value).await }).await
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let mut conn = self.conn();
        let key = key.to_string();
        let value = value.to_string();
        let secs = ttl_secs(ttl);
        // SET key value NX EX ttl -> OK when created, nil when it existed.
        let reply: Option<String> = self
            .deadline(async move {
                redis::cmd("SET")
                    .arg(&key)
                    .arg(&value)
                    .arg("NX")
                    .arg("EX")
                    .arg(secs)
                    .query_async(&mut conn)
                    .await
            })
            .await?;
        Ok(reply.is_some())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.conn();
        let key = key.to_string();
        self.deadline(async move { conn.del::<_, ()>(key).await }).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut conn = self.conn();
        let key = key.to_string();
        let secs = ttl_secs(ttl);
        self.deadline(async move { conn.expire::<_, bool>(key, secs).await }).await
    }
}
