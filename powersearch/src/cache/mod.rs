//! Pluggable response cache.
//!
//! A [`CacheStore`] is a key/value store with per-entry TTL. Backends are
//! chosen once from a selector string:
//!
//! | selector                      | backend        |
//! |-------------------------------|----------------|
//! | unset, empty, `none`          | caching off    |
//! | `memory`                      | [`MemoryStore`]|
//! | `null`                        | [`NullStore`]  |
//! | `file://<dir>`                | [`DiskStore`]  |
//! | `redis://<host>:<port>/<db>`  | `RedisStore`   |
//!
//! [`ResponseCache`] layers typed JSON payloads and the configured TTL on
//! top of a store.

mod disk;
mod key;
mod memory;
mod null;
#[cfg(feature = "redis-cache")]
mod redis;

pub use disk::DiskStore;
pub use key::CacheKey;
pub use memory::MemoryStore;
pub use null::NullStore;
#[cfg(feature = "redis-cache")]
pub use redis::RedisStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::future::Future;
use std::time::Duration;

use crate::config::CacheSettings;
use crate::errors::{CacheError, ConfigError};

/// A stored payload with its creation time and TTL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Cache key.
    pub key: String,
    /// Serialized payload, stored verbatim.
    pub payload: String,
    /// When the entry was written.
    pub created_at: DateTime<Utc>,
    /// Lifetime in seconds.
    pub ttl_seconds: u64,
}

impl CacheEntry {
    /// Creates an entry written now.
    #[must_use]
    pub fn new(key: impl Into<String>, payload: impl Into<String>, ttl: Duration) -> Self {
        Self {
            key: key.into(),
            payload: payload.into(),
            created_at: Utc::now(),
            ttl_seconds: ttl.as_secs(),
        }
    }

    /// Whether the entry has outlived its TTL.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Whether the entry is expired at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        let ttl_ms = i64::try_from(self.ttl_seconds.saturating_mul(1000)).unwrap_or(i64::MAX);
        now.signed_duration_since(self.created_at).num_milliseconds() >= ttl_ms
    }
}

/// Key/value storage with TTL. Implementations handle their own locking.
#[async_trait]
pub trait CacheStore: Send + Sync + std::fmt::Debug {
    /// Backend name for logs and events.
    fn name(&self) -> &'static str;

    /// Reads an unexpired entry.
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError>;

    /// Writes an entry, replacing any previous one.
    async fn set(&self, entry: CacheEntry) -> Result<(), CacheError>;

    /// Removes an entry.
    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    /// Removes every entry.
    async fn clear(&self) -> Result<(), CacheError>;
}

/// Parsed cache backend selector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheSelector {
    /// Caching is off; the pipeline always runs live.
    Disabled,
    /// In-process store.
    Memory,
    /// Store that never retains anything.
    Null,
    /// On-disk store rooted at a directory.
    Disk(PathBuf),
    /// Redis store at a URL.
    Redis(String),
}

impl CacheSelector {
    /// Parses a selector string.
    pub fn parse(selector: Option<&str>) -> Result<Self, ConfigError> {
        let Some(raw) = selector.map(str::trim) else {
            return Ok(Self::Disabled);
        };
        let lowered = raw.to_ascii_lowercase();

        if raw.is_empty() || lowered == "none" {
            return Ok(Self::Disabled);
        }
        if lowered == "memory" {
            return Ok(Self::Memory);
        }
        if lowered == "null" {
            return Ok(Self::Null);
        }
        if lowered.starts_with("file://") {
            let path = &raw["file://".len()..];
            if path.is_empty() {
                return Err(ConfigError::invalid(
                    "cache.selector",
                    "'file://' storage requires a directory path",
                ));
            }
            return Ok(Self::Disk(expand_home(path)));
        }
        if lowered.starts_with("redis://") {
            let url = url::Url::parse(raw)
                .map_err(|_| ConfigError::UnsupportedCacheSelector(raw.to_string()))?;
            if url.host_str().map_or(true, str::is_empty) {
                return Err(ConfigError::UnsupportedCacheSelector(raw.to_string()));
            }
            return Ok(Self::Redis(raw.to_string()));
        }
        Err(ConfigError::UnsupportedCacheSelector(raw.to_string()))
    }

    /// Builds the store, or `None` when caching is disabled.
    ///
    /// `timeout` bounds connection setup and responses of networked stores.
    #[cfg_attr(not(feature = "redis-cache"), allow(unused_variables))]
    pub fn build(
        &self,
        collection: &str,
        timeout: Duration,
    ) -> Result<Option<Arc<dyn CacheStore>>, ConfigError> {
        let store: Arc<dyn CacheStore> = match self {
            Self::Disabled => return Ok(None),
            Self::Memory => Arc::new(MemoryStore::new()),
            Self::Null => Arc::new(NullStore),
            Self::Disk(dir) => Arc::new(DiskStore::new(dir, collection)),
            #[cfg(feature = "redis-cache")]
            Self::Redis(url) => Arc::new(RedisStore::new(url, collection)?.with_timeout(timeout)),
            #[cfg(not(feature = "redis-cache"))]
            Self::Redis(_) => {
                return Err(ConfigError::invalid(
                    "cache.selector",
                    "redis support requires the 'redis-cache' feature",
                ))
            }
        };
        Ok(Some(store))
    }
}

fn expand_home(path: &str) -> PathBuf {
    if path == "~" || path.starts_with("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(path.trim_start_matches('~').trim_start_matches('/'));
        }
    }
    PathBuf::from(path)
}

/// Default bound on a single store call.
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(2);

/// Typed JSON payloads over a [`CacheStore`] with a fixed TTL.
///
/// Every store call is bounded by the operation timeout; a stalled backend
/// yields `CacheError::Timeout` instead of blocking the caller.
#[derive(Debug, Clone)]
pub struct ResponseCache {
    store: Arc<dyn CacheStore>,
    ttl: Duration,
    timeout: Duration,
}

impl ResponseCache {
    /// Wraps a store.
    #[must_use]
    pub fn new(store: Arc<dyn CacheStore>, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            timeout: DEFAULT_OPERATION_TIMEOUT,
        }
    }

    /// Sets the per-operation time limit.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Builds the cache described by `settings`, or `None` when disabled.
    pub fn from_settings(settings: &CacheSettings) -> Result<Option<Self>, ConfigError> {
        let selector = CacheSelector::parse(settings.selector.as_deref())?;
        Ok(selector
            .build(&settings.collection, settings.timeout())?
            .map(|store| Self::new(store, settings.ttl()).with_timeout(settings.timeout())))
    }

    /// Backend name.
    #[must_use]
    pub fn backend(&self) -> &'static str {
        self.store.name()
    }

    /// Entry TTL.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Per-operation time limit.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// The underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    /// Reads and decodes a payload.
    pub async fn read<T: DeserializeOwned>(&self, key: &CacheKey) -> Result<Option<T>, CacheError> {
        match self.bounded("read", self.store.get(key.as_str())).await? {
            Some(entry) => serde_json::from_str(&entry.payload)
                .map(Some)
                .map_err(|e| CacheError::Corrupt(format!("{key}: {e}"))),
            None => Ok(None),
        }
    }

    /// Encodes and writes a payload with the configured TTL.
    pub async fn write<T: Serialize>(&self, key: &CacheKey, value: &T) -> Result<(), CacheError> {
        let payload =
            serde_json::to_string(value).map_err(|e| CacheError::Corrupt(format!("{key}: {e}")))?;
        let entry = CacheEntry::new(key.as_str(), payload, self.ttl);
        self.bounded("write", self.store.set(entry)).await
    }

    async fn bounded<T>(
        &self,
        operation: &'static str,
        call: impl Future<Output = Result<T, CacheError>>,
    ) -> Result<T, CacheError> {
        tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| CacheError::Timeout {
                operation,
                timeout_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
            })?
    }
}
