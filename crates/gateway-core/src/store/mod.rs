//! Shared coordination store.
//!
//! All cross-instance state — replay markers, rate-limit windows, circuit
//! breaker scalars and failure sets, probe tokens — lives behind the
//! [`SharedStore`] trait. Two implementations ship: [`MemoryStore`] for
//! single-node deployments and tests, and [`RedisStore`] for a fleet of
//! gateway instances sharing one Redis.
//!
//! Callers rely on the store's per-key serialization for correctness; no
//! additional coordination happens between gateway instances.

pub mod memory;
pub mod redis;

pub use memory::MemoryStore;
pub use redis::RedisStore;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by store operations.
///
/// Pipeline call sites decide the degradation policy per operation: replay
/// checks, rate-limit checks and breaker reads fail open on these errors.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The backend could not be reached (connect failure, deadline hit).
    #[error("store connection failed: {0}")]
    Connection(String),

    /// The backend rejected or failed the operation.
    #[error("store operation failed: {0}")]
    Operation(String),
}

/// Key/value + ordered-set operations with TTLs.
///
/// Ordered sets map unique members to `f64` scores (epoch-millisecond
/// timestamps throughout this crate). Score ranges are inclusive on both
/// ends.
#[async_trait]
pub trait SharedStore: Send + Sync {
    /// Adds `member` with `score`, overwriting the score of an existing
    /// member.
    async fn zset_add(&self, key: &str, member: &str, score: f64) -> Result<(), StoreError>;

    /// Removes members with score in `[min, max]`; returns how many were
    /// removed.
    async fn zset_remove_range_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
    ) -> Result<u64, StoreError>;

    /// Counts members with score in `[min, max]`.
    async fn zset_count(&self, key: &str, min: f64, max: f64) -> Result<u64, StoreError>;

    /// Reads a string value; `None` when absent or expired.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Unconditionally writes a string value. Callers that need a TTL
    /// follow up with [`SharedStore::expire`].
    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Atomic SET-IF-ABSENT with TTL. Returns `true` if this call created
    /// the key, `false` if it already existed.
    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError>;

    /// Deletes a key of either kind. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Sets the TTL of an existing key. Returns `false` when the key does
    /// not exist.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError>;
}
