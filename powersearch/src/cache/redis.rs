//! Networked cache store backed by Redis.

use async_trait::async_trait;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::AsyncCommands;
use std::time::Duration;
use tokio::sync::OnceCell;

use super::{CacheEntry, CacheStore, DEFAULT_OPERATION_TIMEOUT};
use crate::errors::{CacheError, ConfigError};

/// Reconnect attempts made by the connection manager before giving up.
const CONNECT_RETRIES: usize = 1;

/// Redis store. Keys are `<collection>:<key>`; TTL is enforced by
/// `SET ... EX` as well as by the entry itself.
///
/// The connection is opened on first use, so an unreachable server only
/// surfaces as per-operation `CacheError::Backend`. Connection setup and
/// every response are bounded by the store timeout.
pub struct RedisStore {
    client: redis::Client,
    collection: String,
    timeout: Duration,
    connection: OnceCell<ConnectionManager>,
}

impl RedisStore {
    /// Creates a store for `url` (`redis://<host>:<port>/<db>`).
    pub fn new(url: &str, collection: &str) -> Result<Self, ConfigError> {
        let client = redis::Client::open(url)
            .map_err(|_| ConfigError::UnsupportedCacheSelector(url.to_string()))?;
        Ok(Self {
            client,
            collection: collection.to_string(),
            timeout: DEFAULT_OPERATION_TIMEOUT,
            connection: OnceCell::new(),
        })
    }

    /// Sets the connection and response timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn namespaced(&self, key: &str) -> String {
        format!("{}:{key}", self.collection)
    }

    fn manager_config(&self) -> ConnectionManagerConfig {
        ConnectionManagerConfig::new()
            .set_connection_timeout(self.timeout)
            .set_response_timeout(self.timeout)
            .set_number_of_retries(CONNECT_RETRIES)
    }

    async fn connection(&self) -> Result<ConnectionManager, CacheError> {
        self.connection
            .get_or_try_init(|| async {
                let connect = self
                    .client
                    .get_connection_manager_with_config(self.manager_config());
                // the manager's own retries sleep between attempts
                match tokio::time::timeout(self.timeout, connect).await {
                    Ok(result) => result.map_err(backend_error),
                    Err(_) => Err(CacheError::Backend(format!(
                        "connection not established within {}ms",
                        self.timeout.as_millis()
                    ))),
                }
            })
            .await
            .cloned()
    }
}

fn backend_error(e: redis::RedisError) -> CacheError {
    CacheError::Backend(e.to_string())
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("collection", &self.collection)
            .field("timeout", &self.timeout)
            .field("connected", &self.connection.initialized())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl CacheStore for RedisStore {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        let mut conn = self.connection().await?;
        let raw: Option<String> = conn.get(self.namespaced(key)).await.map_err(backend_error)?;
        let Some(raw) = raw else {
            return Ok(None);
        };
        let entry: CacheEntry =
            serde_json::from_str(&raw).map_err(|e| CacheError::Corrupt(e.to_string()))?;
        Ok((!entry.is_expired()).then_some(entry))
    }

    async fn set(&self, entry: CacheEntry) -> Result<(), CacheError> {
        // EX 0 is rejected by the server and the entry would be expired anyway
        if entry.ttl_seconds == 0 {
            return Ok(());
        }
        let mut conn = self.connection().await?;
        let raw = serde_json::to_string(&entry).map_err(|e| CacheError::Corrupt(e.to_string()))?;
        let key = self.namespaced(&entry.key);
        conn.set_ex::<_, _, ()>(key, raw, entry.ttl_seconds)
            .await
            .map_err(backend_error)
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.connection().await?;
        conn.del::<_, ()>(self.namespaced(key))
            .await
            .map_err(backend_error)
    }

    async fn clear(&self) -> Result<(), CacheError> {
        let mut conn = self.connection().await?;
        let keys: Vec<String> = conn
            .keys(format!("{}:*", self.collection))
            .await
            .map_err(backend_error)?;
        if keys.is_empty() {
            return Ok(());
        }
        conn.del::<_, ()>(keys).await.map_err(backend_error)
    }
}
