// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Ephemeral key/value entries with a time-to-live.
//!
//! This is the locking primitive behind the idempotency gate: `set_if_absent`
//! is an atomic acquire, and every entry expires on its own so a crashed
//! request can never block an activity forever. `MemoryTtlStore` covers the
//! single-instance deployment; a multi-instance deployment would implement
//! the same trait on an external cache.

use crate::error::AppError;
use async_trait::async_trait;
use chrono::Duration;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::time::Instant;

/// Expired entries are compacted once the map grows past this size.
const COMPACT_THRESHOLD: usize = 4096;

#[async_trait]
pub trait TtlStore: Send + Sync {
    /// Store `value` under `key` only if no live entry exists.
    /// Returns `true` if this call created the entry.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, AppError>;

    /// Store `value` under `key`, replacing any existing entry.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), AppError>;

    async fn get(&self, key: &str) -> Result<Option<String>, AppError>;

    /// Remove and return the live entry under `key`. At most one concurrent
    /// caller receives the value.
    async fn take(&self, key: &str) -> Result<Option<String>, AppError>;

    async fn remove(&self, key: &str) -> Result<(), AppError>;
}

struct TtlEntry {
    value: String,
    expires_at: Instant,
}

impl TtlEntry {
    fn new(value: &str, ttl: Duration) -> Self {
        // Negative TTLs are treated as already expired.
        let ttl = ttl.to_std().unwrap_or_default();
        Self {
            value: value.to_string(),
            expires_at: Instant::now() + ttl,
        }
    }

    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// In-process `TtlStore` backed by a sharded concurrent map.
#[derive(Default)]
pub struct MemoryTtlStore {
    entries: DashMap<String, TtlEntry>,
}

impl MemoryTtlStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn compact_if_needed(&self) {
        if self.entries.len() > COMPACT_THRESHOLD {
            let now = Instant::now();
            self.entries.retain(|_, e| e.is_live(now));
        }
    }
}

#[async_trait]
impl TtlStore for MemoryTtlStore {
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, AppError> {
        self.compact_if_needed();
        let now = Instant::now();

        // The entry guard holds the shard lock, so check-and-insert is atomic.
        let acquired = match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_live(now) {
                    false
                } else {
                    occupied.insert(TtlEntry::new(value, ttl));
                    true
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(TtlEntry::new(value, ttl));
                true
            }
        };

        Ok(acquired)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), AppError> {
        self.compact_if_needed();
        self.entries.insert(key.to_string(), TtlEntry::new(value, ttl));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, AppError> {
        let now = Instant::now();
        Ok(self
            .entries
            .get(key)
            .filter(|e| e.is_live(now))
            .map(|e| e.value.clone()))
    }

    async fn take(&self, key: &str) -> Result<Option<String>, AppError> {
        let now = Instant::now();
        Ok(self
            .entries
            .remove(key)
            .map(|(_, e)| e)
            .filter(|e| e.is_live(now))
            .map(|e| e.value))
    }

    async fn remove(&self, key: &str) -> Result<(), AppError> {
        self.entries.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_set_if_absent_only_once() {
        let store = MemoryTtlStore::new();
        let ttl = Duration::seconds(30);

        assert!(store.set_if_absent("lock:a", "1", ttl).await.unwrap());
        assert!(!store.set_if_absent("lock:a", "2", ttl).await.unwrap());
        assert_eq!(store.get("lock:a").await.unwrap().as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn test_expired_entry_can_be_reacquired() {
        let store = MemoryTtlStore::new();

        assert!(store
            .set_if_absent("lock:b", "1", Duration::milliseconds(20))
            .await
            .unwrap());
        tokio::time::sleep(std::time::Duration::from_millis(40)).await;

        assert_eq!(store.get("lock:b").await.unwrap(), None);
        assert!(store
            .set_if_absent("lock:b", "2", Duration::seconds(30))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_take_is_single_winner() {
        let store = Arc::new(MemoryTtlStore::new());
        store
            .set("pending:x", "payload", Duration::hours(24))
            .await
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move { store.take("pending:x").await }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap().unwrap().is_some() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_concurrent_acquire_single_winner() {
        let store = Arc::new(MemoryTtlStore::new());

        let mut handles = Vec::new();
        for i in 0..32 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .set_if_absent("lock:race", &i.to_string(), Duration::seconds(30))
                    .await
            }));
        }

        let mut acquired = 0;
        for handle in handles {
            if handle.await.unwrap().unwrap() {
                acquired += 1;
            }
        }
        assert_eq!(acquired, 1);
    }
}
