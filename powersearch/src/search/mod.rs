//! Upstream meta-search backends.

#[cfg(feature = "http")]
mod searxng;

#[cfg(feature = "http")]
pub use searxng::{search_endpoint, SearxngClient};

use async_trait::async_trait;

use crate::errors::Result;
use crate::models::{Query, RawHit};

/// A source of raw search hits.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    /// Runs `query` and returns hits in upstream order.
    ///
    /// Transient failures must be classified retryable so the pipeline can
    /// back off and try again.
    async fn search(&self, query: &Query) -> Result<Vec<RawHit>>;

    /// Backend name for logs.
    fn name(&self) -> &str {
        "search"
    }
}
