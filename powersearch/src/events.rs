//! Observability events for absorbed failures and run milestones.
//!
//! Degraded fetches and cache failures never reach the caller as errors.
//! They are reported here instead, so they are never silent.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn, Level};

/// Dotted event names emitted by the pipeline.
pub mod names {
    /// A cache read failed and was treated as a miss.
    pub const CACHE_READ_FAILED: &str = "cache.read_failed";
    /// A cache write failed; the live result was still returned.
    pub const CACHE_WRITE_FAILED: &str = "cache.write_failed";
    /// A cached entry was served.
    pub const CACHE_HIT: &str = "cache.hit";
    /// A result was not cached because the run was incomplete.
    pub const CACHE_SKIPPED: &str = "cache.skipped";
    /// A result fell back to its snippet.
    pub const FETCH_DEGRADED: &str = "fetch.degraded";
    /// The total fetch budget expired with work outstanding.
    pub const FETCH_BUDGET_EXPIRED: &str = "fetch.budget_expired";
    /// An upstream attempt failed and will be retried.
    pub const SEARCH_RETRY: &str = "search.retry";
    /// A pipeline run finished.
    pub const PIPELINE_COMPLETED: &str = "pipeline.completed";
    /// A chunk summary failed and was replaced by raw content.
    pub const SUMMARY_CHUNK_FAILED: &str = "summary.chunk_failed";
    /// A summarization task was cancelled.
    pub const SUMMARY_CANCELLED: &str = "summary.cancelled";
}

/// Receives pipeline events.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Emits an event asynchronously.
    async fn emit(&self, event_type: &str, data: Option<serde_json::Value>);

    /// Emits an event without blocking. Must never fail.
    fn try_emit(&self, event_type: &str, data: Option<serde_json::Value>);
}

/// Shared sink handle.
pub type SharedEventSink = Arc<dyn EventSink>;

/// Discards all events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

#[async_trait]
impl EventSink for NoOpEventSink {
    async fn emit(&self, _event_type: &str, _data: Option<serde_json::Value>) {}

    fn try_emit(&self, _event_type: &str, _data: Option<serde_json::Value>) {}
}

/// Forwards events to `tracing`.
///
/// Events whose name marks a failure (`*_failed`, `*.degraded`,
/// `*.budget_expired`) are logged at WARN regardless of the configured level.
#[derive(Debug, Clone)]
pub struct LoggingEventSink {
    level: Level,
}

impl Default for LoggingEventSink {
    fn default() -> Self {
        Self { level: Level::INFO }
    }
}

impl LoggingEventSink {
    /// Creates a sink logging at `level`.
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    /// Debug-level sink.
    #[must_use]
    pub fn debug() -> Self {
        Self::new(Level::DEBUG)
    }

    fn is_failure(event_type: &str) -> bool {
        event_type.ends_with("_failed")
            || event_type.ends_with(".degraded")
            || event_type.ends_with(".budget_expired")
    }

    fn log_event(&self, event_type: &str, data: Option<&serde_json::Value>) {
        if Self::is_failure(event_type) {
            warn!(event_type = %event_type, event_data = ?data, "Event: {}", event_type);
        } else if self.level == Level::DEBUG {
            debug!(event_type = %event_type, event_data = ?data, "Event: {}", event_type);
        } else {
            info!(event_type = %event_type, event_data = ?data, "Event: {}", event_type);
        }
    }
}

#[async_trait]
impl EventSink for LoggingEventSink {
    async fn emit(&self, event_type: &str, data: Option<serde_json::Value>) {
        self.log_event(event_type, data.as_ref());
    }

    fn try_emit(&self, event_type: &str, data: Option<serde_json::Value>) {
        self.log_event(event_type, data.as_ref());
    }
}

/// Records events in memory, for tests.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: parking_lot::RwLock<Vec<(String, Option<serde_json::Value>)>>,
}

impl CollectingEventSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All collected events.
    #[must_use]
    pub fn events(&self) -> Vec<(String, Option<serde_json::Value>)> {
        self.events.read().clone()
    }

    /// Number of collected events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Returns true if nothing was collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Events whose name starts with `type_prefix`.
    #[must_use]
    pub fn events_of_type(&self, type_prefix: &str) -> Vec<(String, Option<serde_json::Value>)> {
        self.events
            .read()
            .iter()
            .filter(|(t, _)| t.starts_with(type_prefix))
            .cloned()
            .collect()
    }

    /// Clears collected events.
    pub fn clear(&self) {
        self.events.write().clear();
    }
}

#[async_trait]
impl EventSink for CollectingEventSink {
    async fn emit(&self, event_type: &str, data: Option<serde_json::Value>) {
        self.events.write().push((event_type.to_string(), data));
    }

    fn try_emit(&self, event_type: &str, data: Option<serde_json::Value>) {
        self.events.write().push((event_type.to_string(), data));
    }
}
