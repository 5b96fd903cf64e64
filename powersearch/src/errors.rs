//! Error types for the powersearch pipeline.
//!
//! Only configuration errors and exhausted upstream failures propagate to the
//! caller. Per-result content errors and cache errors are absorbed by the
//! pipeline and surface as degraded output plus events.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// The pipeline stage an error originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Configuration or request validation.
    Config,
    /// Upstream meta-search request.
    Search,
    /// Content fetch.
    Fetch,
    /// Content extraction.
    Extract,
    /// Cache backend.
    Cache,
    /// Summarization sampling.
    Summarize,
    /// Pipeline plumbing (serialization, task joins).
    Pipeline,
}

impl Stage {
    /// Returns the stage name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Config => "config",
            Self::Search => "search",
            Self::Fetch => "fetch",
            Self::Extract => "extract",
            Self::Cache => "cache",
            Self::Summarize => "summarize",
            Self::Pipeline => "pipeline",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The main error type for powersearch operations.
#[derive(Debug, Error)]
pub enum PowerSearchError {
    /// Invalid configuration, detected at construction time.
    #[error("{0}")]
    Config(#[from] ConfigError),

    /// The request itself is malformed (e.g. unknown time range).
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The upstream search backend failed.
    #[error("Upstream search failed: {message}")]
    Upstream {
        /// Human readable reason.
        message: String,
        /// HTTP status, when the backend answered.
        status: Option<u16>,
        /// Whether the failure is transient.
        retryable: bool,
    },

    /// A content fetch failed.
    #[error("{0}")]
    Fetch(#[from] FetchError),

    /// Content extraction failed.
    #[error("{0}")]
    Extract(#[from] ExtractError),

    /// A cache backend failed.
    #[error("{0}")]
    Cache(#[from] CacheError),

    /// The sampling capability failed.
    #[error("{0}")]
    Summarize(#[from] SamplingError),

    /// Every retry attempt failed.
    #[error("Retries exhausted after {attempts} attempts: {source}")]
    RetriesExhausted {
        /// Number of attempts made.
        attempts: usize,
        /// The last failure.
        #[source]
        source: Box<PowerSearchError>,
    },

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PowerSearchError {
    /// Creates a retryable upstream error.
    #[must_use]
    pub fn upstream_transient(message: impl Into<String>, status: Option<u16>) -> Self {
        Self::Upstream {
            message: message.into(),
            status,
            retryable: true,
        }
    }

    /// Creates a non-retryable upstream error.
    #[must_use]
    pub fn upstream_permanent(message: impl Into<String>, status: Option<u16>) -> Self {
        Self::Upstream {
            message: message.into(),
            status,
            retryable: false,
        }
    }

    /// Returns the stage the error originated from.
    #[must_use]
    pub fn stage(&self) -> Stage {
        match self {
            Self::Config(_) => Stage::Config,
            Self::InvalidRequest(_) | Self::Upstream { .. } => Stage::Search,
            Self::Fetch(_) => Stage::Fetch,
            Self::Extract(_) => Stage::Extract,
            Self::Cache(_) => Stage::Cache,
            Self::Summarize(_) => Stage::Summarize,
            Self::RetriesExhausted { source, .. } => source.stage(),
            Self::Serialization(_) | Self::Internal(_) => Stage::Pipeline,
        }
    }

    /// Whether the failure is transient and worth retrying.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Upstream { retryable, .. } => *retryable,
            Self::Fetch(e) => e.is_transient(),
            Self::RetriesExhausted { source, .. } => source.is_retryable(),
            Self::Summarize(e) => matches!(e, SamplingError::Unavailable(_)),
            Self::Config(_)
            | Self::InvalidRequest(_)
            | Self::Extract(_)
            | Self::Cache(_)
            | Self::Serialization(_)
            | Self::Internal(_) => false,
        }
    }

    /// Converts to a dictionary representation for callers.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("stage".to_string(), serde_json::json!(self.stage().as_str()));
        map.insert("retryable".to_string(), serde_json::json!(self.is_retryable()));
        map.insert("message".to_string(), serde_json::json!(self.to_string()));
        if let Self::Upstream { status: Some(status), .. } = self {
            map.insert("status".to_string(), serde_json::json!(status));
        }
        if let Self::RetriesExhausted { attempts, .. } = self {
            map.insert("attempts".to_string(), serde_json::json!(attempts));
        }
        map
    }
}

impl From<serde_json::Error> for PowerSearchError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Error raised when configuration validation fails.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A field holds an out-of-range or malformed value.
    #[error("Invalid configuration for '{field}': {message}")]
    Invalid {
        /// The offending field.
        field: String,
        /// What is wrong with it.
        message: String,
    },

    /// The cache selector string could not be parsed.
    #[error(
        "Unsupported cache selector '{0}'. Use memory, null, file://<path>, or redis://<host>:<port>/<db>"
    )]
    UnsupportedCacheSelector(String),
}

impl ConfigError {
    /// Creates an invalid field error.
    #[must_use]
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Typed failure of a single content fetch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// The fetch did not complete in time.
    #[error("Fetch timed out for {url} after {timeout_ms}ms")]
    Timeout {
        /// The requested URL.
        url: String,
        /// The timeout that elapsed.
        timeout_ms: u64,
    },

    /// The site refused to serve the page.
    #[error("Fetch blocked for {url}: status {status}")]
    Blocked {
        /// The requested URL.
        url: String,
        /// The refusing status code.
        status: u16,
    },

    /// Transport failure or unexpected status.
    #[error("Fetch failed for {url}: {message}")]
    Network {
        /// The requested URL.
        url: String,
        /// Failure detail.
        message: String,
    },
}

impl FetchError {
    /// Whether retrying could plausibly succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Network { .. })
    }
}

/// Typed failure of content extraction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractError {
    /// The extracted text is below the configured minimum size.
    #[error("Extracted content too short: {length} < {minimum} characters")]
    TooShort {
        /// Extracted length in characters.
        length: usize,
        /// Configured minimum.
        minimum: usize,
    },

    /// The content duplicates a page already extracted.
    #[error("Extracted content duplicates an earlier page")]
    Duplicate,

    /// Extraction produced nothing usable.
    #[error("Extraction failed: {0}")]
    ExtractionFailed(String),
}

/// Failure of a cache backend.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The backend could not be reached or rejected the command.
    #[error("Cache backend error: {0}")]
    Backend(String),

    /// The backend did not answer in time.
    #[error("Cache {operation} timed out after {timeout_ms}ms")]
    Timeout {
        /// `read` or `write`.
        operation: &'static str,
        /// The limit that was exceeded.
        timeout_ms: u64,
    },

    /// A stored entry could not be decoded.
    #[error("Cache entry corrupt: {0}")]
    Corrupt(String),

    /// Local IO failure.
    #[error("Cache IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure of the sampling capability.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SamplingError {
    /// The sampler is unavailable right now.
    #[error("Sampler unavailable: {0}")]
    Unavailable(String),

    /// The sampler rejected or failed the request.
    #[error("Sampling failed: {0}")]
    Failed(String),
}

/// Convenience result alias.
pub type Result<T> = std::result::Result<T, PowerSearchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_display() {
        assert_eq!(Stage::Search.to_string(), "search");
        assert_eq!(Stage::Summarize.as_str(), "summarize");
    }

    #[test]
    fn test_upstream_classification() {
        let transient = PowerSearchError::upstream_transient("502 Bad Gateway", Some(502));
        assert!(transient.is_retryable());
        assert_eq!(transient.stage(), Stage::Search);

        let permanent = PowerSearchError::upstream_permanent("400 Bad Request", Some(400));
        assert!(!permanent.is_retryable());
    }

    #[test]
    fn test_config_error_not_retryable() {
        let err: PowerSearchError = ConfigError::invalid("ranking.top_k", "must be >= 0").into();
        assert!(!err.is_retryable());
        assert_eq!(err.stage(), Stage::Config);
        assert!(err.to_string().contains("ranking.top_k"));
    }

    #[test]
    fn test_fetch_error_transience() {
        let timeout = FetchError::Timeout {
            url: "https://example.com".to_string(),
            timeout_ms: 100,
        };
        let blocked = FetchError::Blocked {
            url: "https://example.com".to_string(),
            status: 403,
        };
        assert!(timeout.is_transient());
        assert!(!blocked.is_transient());
        assert!(PowerSearchError::from(timeout).is_retryable());
        assert!(!PowerSearchError::from(blocked).is_retryable());
    }

    #[test]
    fn test_retries_exhausted_reports_source_stage() {
        let err = PowerSearchError::RetriesExhausted {
            attempts: 3,
            source: Box::new(PowerSearchError::upstream_transient("connection refused", None)),
        };
        assert_eq!(err.stage(), Stage::Search);
        assert!(err.is_retryable());

        let dict = err.to_dict();
        assert_eq!(dict.get("stage").unwrap(), "search");
        assert_eq!(dict.get("attempts").unwrap(), 3);
        assert_eq!(dict.get("retryable").unwrap(), true);
    }

    #[test]
    fn test_to_dict_includes_status() {
        let err = PowerSearchError::upstream_permanent("not found", Some(404));
        let dict = err.to_dict();
        assert_eq!(dict.get("status").unwrap(), 404);
        assert_eq!(dict.get("retryable").unwrap(), false);
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<PowerSearchError>();
    }
}
