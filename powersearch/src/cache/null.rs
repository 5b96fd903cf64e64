//! A store that never retains anything.

use async_trait::async_trait;

use super::{CacheEntry, CacheStore};
use crate::errors::CacheError;

/// Accepts writes and always misses. Keeps the cache code path active
/// without making results depend on earlier runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullStore;

#[async_trait]
impl CacheStore for NullStore {
    fn name(&self) -> &'static str {
        "null"
    }

    async fn get(&self, _key: &str) -> Result<Option<CacheEntry>, CacheError> {
        Ok(None)
    }

    async fn set(&self, _entry: CacheEntry) -> Result<(), CacheError> {
        Ok(())
    }

    async fn delete(&self, _key: &str) -> Result<(), CacheError> {
        Ok(())
    }

    async fn clear(&self) -> Result<(), CacheError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_null_store_always_misses() {
        let store = NullStore;
        store
            .set(CacheEntry::new("k", "v", Duration::from_secs(60)))
            .await
            .unwrap();
        assert!(store.get("k").await.unwrap().is_none());
    }
}
