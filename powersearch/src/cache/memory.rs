//! In-process cache store.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::{CacheEntry, CacheStore};
use crate::errors::CacheError;

/// Writes between sweeps of expired entries.
const PURGE_INTERVAL: usize = 64;

/// Concurrent in-memory store.
///
/// Expired entries are evicted when read, and swept from the whole map
/// every [`PURGE_INTERVAL`] writes so keys that are never read again do
/// not accumulate.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, CacheEntry>,
    writes: AtomicUsize,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, including expired ones not yet evicted.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the store holds nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops every expired entry.
    pub fn purge_expired(&self) {
        self.entries.retain(|_, entry| !entry.is_expired());
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        let entry = self.entries.get(key).map(|e| e.value().clone());
        match entry {
            Some(entry) if entry.is_expired() => {
                self.entries.remove(key);
                Ok(None)
            }
            other => Ok(other),
        }
    }

    async fn set(&self, entry: CacheEntry) -> Result<(), CacheError> {
        self.entries.insert(entry.key.clone(), entry);
        let writes = self.writes.fetch_add(1, Ordering::Relaxed) + 1;
        if writes % PURGE_INTERVAL == 0 {
            self.purge_expired();
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.entries.remove(key);
        Ok(())
    }

    async fn clear(&self) -> Result<(), CacheError> {
        self.entries.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_memory_store_basic() {
        let store = MemoryStore::new();
        assert!(store.is_empty());

        store
            .set(CacheEntry::new("k1", "{\"a\":1}", Duration::from_secs(60)))
            .await
            .unwrap();
        assert_eq!(store.len(), 1);

        let entry = store.get("k1").await.unwrap().unwrap();
        assert_eq!(entry.payload, "{\"a\":1}");

        store.delete("k1").await.unwrap();
        assert!(store.get("k1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_store_expiry_evicts() {
        let store = MemoryStore::new();
        store
            .set(CacheEntry::new("k", "v", Duration::ZERO))
            .await
            .unwrap();
        assert!(store.get("k").await.unwrap().is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_expired_unread_keys_are_swept_on_write() {
        let store = MemoryStore::new();
        for i in 0..(PURGE_INTERVAL * 3 + 5) {
            store
                .set(CacheEntry::new(format!("k{i}"), "v", Duration::ZERO))
                .await
                .unwrap();
        }
        assert_eq!(store.len(), 5);

        store
            .set(CacheEntry::new("live", "v", Duration::from_secs(60)))
            .await
            .unwrap();
        for i in 0..PURGE_INTERVAL {
            store
                .set(CacheEntry::new(format!("x{i}"), "v", Duration::ZERO))
                .await
                .unwrap();
        }
        assert!(store.get("live").await.unwrap().is_some());
        assert!(store.len() < PURGE_INTERVAL);
    }

    #[tokio::test]
    async fn test_memory_store_clear_and_purge() {
        let store = MemoryStore::new();
        store.set(CacheEntry::new("a", "1", Duration::from_secs(60))).await.unwrap();
        store.set(CacheEntry::new("b", "2", Duration::ZERO)).await.unwrap();

        store.purge_expired();
        assert_eq!(store.len(), 1);

        store.clear().await.unwrap();
        assert!(store.is_empty());
    }
}
