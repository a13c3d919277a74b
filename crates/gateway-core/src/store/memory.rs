//! In-process [`SharedStore`] backed by `DashMap`.
//!
//! Correct for a single gateway instance; tests use it as the reference
//! implementation. Expiry is lazy: an expired entry is dropped by the next
//! operation that touches its key, and the per-key entry lock makes each
//! operation atomic with respect to concurrent requests on the same key.

use super::{SharedStore, StoreError};
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct ValueEntry {
    value: String,
    expires_at: Option<Instant>,
}

#[derive(Debug, Clone, Default)]
struct ZSetEntry {
    members: BTreeMap<String, f64>,
    expires_at: Option<Instant>,
}

fn expired(expires_at: Option<Instant>, now: Instant) -> bool {
    expires_at.is_some_and(|at| at <= now)
}

/// In-memory store with TTL bookkeeping.
#[derive(Default)]
pub struct MemoryStore {
    strings: DashMap<String, ValueEntry>,
    zsets: DashMap<String, ZSetEntry>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (non-expired) keys across both kinds; test helper.
    #[must_use]
    pub fn len(&self) -> usize {
        let now = Instant::now();
        let strings =
            self.strings.iter().filter(|entry| !expired(entry.expires_at, now)).count();
        let zsets = self.zsets.iter().filter(|entry| !expired(entry.expires_at, now)).count();
        strings + zsets
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl SharedStore for MemoryStore {
    async fn zset_add(&self, key: &str, member: &str, score: f64) -> Result<(), StoreError> {
        let now = Instant::now();
        let mut entry = self.zsets.entry(key.to_string()).or_default();
        if expired(entry.expires_at, now) {
            entry.members.clear();
            entry.expires_at = None;
        }
        entry.members.insert(member.to_string(), score);
        Ok(())
    }

    async fn zset_remove_range_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
    ) -> Result<u64, StoreError> {
        let now = Instant::now();
        let Some(mut entry) = self.zsets.get_mut(key) else {
            return Ok(0);
        };
        if expired(entry.expires_at, now) {
            entry.members.clear();
            entry.expires_at = None;
            return Ok(0);
        }
        let before = entry.members.len();
        entry.members.retain(|_, score| *score < min || *score > max);
        Ok((before - entry.members.len()) as u64)
    }

    async fn zset_count(&self, key: &str, min: f64, max: f64) -> Result<u64, StoreError> {
        let now = Instant::now();
        let Some(entry) = self.zsets.get(key) else {
            return Ok(0);
        };
        if expired(entry.expires_at, now) {
            return Ok(0);
        }
        Ok(entry.members.values().filter(|score| **score >= min && **score <= max).count() as u64)
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = Instant::now();
        if let Some(entry) = self.strings.get(key) {
            if !expired(entry.expires_at, now) {
                return Ok(Some(entry.value.clone()));
            }
        }
        // Drop the read guard before removing the stale key.
        self.strings.remove_if(key, |_, entry| expired(entry.expires_at, now));
        Ok(None)
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let now = Instant::now();
        let mut entry = self
            .strings
            .entry(key.to_string())
            .or_insert_with(|| ValueEntry { value: String::new(), expires_at: None });
        if expired(entry.expires_at, now) {
            entry.expires_at = None;
        }
        entry.value = value.to_string();
        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let now = Instant::now();
        match self.strings.entry(key.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(mut occupied) => {
                if expired(occupied.get().expires_at, now) {
                    occupied.insert(ValueEntry {
                        value: value.to_string(),
                        expires_at: Some(now + ttl),
                    });
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(ValueEntry {
                    value: value.to_string(),
                    expires_at: Some(now + ttl),
                });
                Ok(true)
            }
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.strings.remove(key);
        self.zsets.remove(key);
        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let now = Instant::now();
        if let Some(mut entry) = self.strings.get_mut(key) {
            if !expired(entry.expires_at, now) {
                entry.expires_at = Some(now + ttl);
                return Ok(true);
            }
        }
        if let Some(mut entry) = self.zsets.get_mut(key) {
            if !expired(entry.expires_at, now) {
                entry.expires_at = Some(now + ttl);
                return Ok(true);
            }
        }
        Ok(false)
    }
}
