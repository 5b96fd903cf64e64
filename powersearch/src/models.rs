//! Data models flowing through the search pipeline.
//!
//! `RawHit` → `RankedResult` → `ResolvedResult`, wrapped in a
//! `PipelineResult` that is what the cache stores.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use crate::errors::PowerSearchError;

/// Recency restriction understood by the upstream backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeRange {
    /// Past day.
    Day,
    /// Past month.
    Month,
    /// Past year.
    Year,
}

impl TimeRange {
    /// Returns the wire value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Day => "day",
            Self::Month => "month",
            Self::Year => "year",
        }
    }
}

impl FromStr for TimeRange {
    type Err = PowerSearchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "day" => Ok(Self::Day),
            "month" => Ok(Self::Month),
            "year" => Ok(Self::Year),
            other => Err(PowerSearchError::InvalidRequest(format!(
                "invalid time_range '{other}', choose one of day, month, year"
            ))),
        }
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How result content is populated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentStrategy {
    /// Use the upstream snippet; no network I/O.
    Quick,
    /// Fetch and extract each page.
    #[default]
    Fetch,
}

impl ContentStrategy {
    /// Returns the configuration value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Quick => "quick",
            Self::Fetch => "fetch",
        }
    }
}

impl FromStr for ContentStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "quick" => Ok(Self::Quick),
            "fetch" => Ok(Self::Fetch),
            other => Err(format!("unknown content strategy '{other}'")),
        }
    }
}

/// A normalized search request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    /// The query text.
    pub text: String,
    /// Engine allow-list; empty means backend default.
    pub engines: Vec<String>,
    /// IETF language tag.
    pub language: String,
    /// Safe search level (0, 1 or 2).
    pub safe_search: u8,
    /// Number of result pages to request.
    pub page_count: u32,
    /// Optional recency restriction.
    pub time_range: Option<TimeRange>,
}

impl Query {
    /// Creates a query with backend defaults.
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            engines: Vec::new(),
            language: "en".to_string(),
            safe_search: 1,
            page_count: 1,
            time_range: None,
        }
    }

    /// Sets the engine allow-list.
    #[must_use]
    pub fn with_engines(mut self, engines: Vec<String>) -> Self {
        self.engines = engines;
        self
    }

    /// Sets the language.
    #[must_use]
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    /// Sets the safe search level.
    #[must_use]
    pub fn with_safe_search(mut self, level: u8) -> Self {
        self.safe_search = level;
        self
    }

    /// Sets the number of pages.
    #[must_use]
    pub fn with_page_count(mut self, pages: u32) -> Self {
        self.page_count = pages;
        self
    }

    /// Sets the time range.
    #[must_use]
    pub fn with_time_range(mut self, time_range: Option<TimeRange>) -> Self {
        self.time_range = time_range;
        self
    }
}

/// One upstream search result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawHit {
    /// Result URL.
    pub url: String,
    /// Result title.
    pub title: String,
    /// Snippet text supplied by the backend.
    pub snippet: String,
    /// Engine-assigned relevance score.
    pub score: f64,
    /// Engine that produced the hit.
    pub engine: Option<String>,
    /// Zero-based position in the upstream response.
    pub position: usize,
}

impl RawHit {
    /// Creates a new hit.
    #[must_use]
    pub fn new(url: impl Into<String>, title: impl Into<String>, score: f64) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            snippet: String::new(),
            score,
            engine: None,
            position: 0,
        }
    }

    /// Sets the snippet.
    #[must_use]
    pub fn with_snippet(mut self, snippet: impl Into<String>) -> Self {
        self.snippet = snippet.into();
        self
    }

    /// Sets the engine.
    #[must_use]
    pub fn with_engine(mut self, engine: impl Into<String>) -> Self {
        self.engine = Some(engine.into());
        self
    }

    /// Sets the upstream position.
    #[must_use]
    pub fn with_position(mut self, position: usize) -> Self {
        self.position = position;
        self
    }
}

/// A hit after scoring and filtering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedResult {
    /// The underlying hit.
    pub hit: RawHit,
    /// Share of input hits (0-100) scoring at or below this one.
    pub percentile_rank: f64,
    /// Whether the hit survived filtering.
    pub retained: bool,
    /// Zero-based position in the final ordering.
    pub rank: usize,
}

/// Where a resolved result's content came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentSource {
    /// The upstream snippet.
    Snippet,
    /// A fetched and extracted page.
    Fetched,
}

/// Status of one content resolution attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchStatus {
    /// Content fetched and extracted.
    Ok,
    /// Per-result timeout or total budget expired.
    Timeout,
    /// The site refused the request.
    Blocked,
    /// Transport failure or unexpected status.
    NetworkError,
    /// Extraction produced nothing usable (or a duplicate).
    ExtractFailed,
    /// Extraction produced too little text.
    TooShort,
}

impl FetchStatus {
    /// Returns the status name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Timeout => "timeout",
            Self::Blocked => "blocked",
            Self::NetworkError => "network_error",
            Self::ExtractFailed => "extract_failed",
            Self::TooShort => "too_short",
        }
    }
}

/// Result of one content resolution attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOutcome {
    /// Outcome status.
    pub status: FetchStatus,
    /// Extracted markdown when `status` is `Ok`.
    pub content: Option<String>,
    /// Failure detail otherwise.
    pub detail: Option<String>,
}

impl FetchOutcome {
    /// Successful outcome.
    #[must_use]
    pub fn ok(content: String) -> Self {
        Self {
            status: FetchStatus::Ok,
            content: Some(content),
            detail: None,
        }
    }

    /// Failed outcome.
    #[must_use]
    pub fn failed(status: FetchStatus, detail: impl Into<String>) -> Self {
        Self {
            status,
            content: None,
            detail: Some(detail.into()),
        }
    }
}

/// A ranked result with content attached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedResult {
    /// The ranked result this content belongs to.
    pub ranked: RankedResult,
    /// Markdown or snippet content; never absent.
    pub content: String,
    /// Where the content came from.
    pub source: ContentSource,
    /// Whether the content was cut at the content limit.
    pub truncated: bool,
    /// Fetch outcome, when a fetch was attempted.
    pub fetch_status: Option<FetchStatus>,
    /// Failure detail for degraded results.
    pub fetch_error: Option<String>,
}

impl ResolvedResult {
    /// Builds a snippet-backed result.
    #[must_use]
    pub fn from_snippet(ranked: RankedResult) -> Self {
        let content = ranked.hit.snippet.clone();
        Self {
            ranked,
            content,
            source: ContentSource::Snippet,
            truncated: false,
            fetch_status: None,
            fetch_error: None,
        }
    }

    /// Result URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.ranked.hit.url
    }

    /// Result title.
    #[must_use]
    pub fn title(&self) -> &str {
        &self.ranked.hit.title
    }

    /// Whether the result fell back to its snippet after a failed fetch.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        matches!(self.fetch_status, Some(status) if status != FetchStatus::Ok)
    }

    /// Applies a character limit to the content.
    pub fn apply_limit(&mut self, limit: Option<usize>) {
        if let Some(limit) = limit {
            let (content, truncated) = truncate_chars(&self.content, limit);
            if truncated {
                self.content = content;
                self.truncated = true;
            }
        }
    }

    /// Converts to the agent-facing record.
    #[must_use]
    pub fn to_record(&self) -> SearchResultRecord {
        SearchResultRecord {
            title: self.title().to_string(),
            url: self.url().to_string(),
            content: self.content.clone(),
        }
    }
}

/// Agent-facing search record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResultRecord {
    /// Title of the search result.
    pub title: String,
    /// URL of the search result.
    pub url: String,
    /// Cleaned content of the result.
    pub content: String,
}

/// Counters describing one pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineStats {
    /// Hits returned by the upstream backend.
    pub hits_received: usize,
    /// Hits retained by ranking.
    pub hits_retained: usize,
    /// Outcome counts keyed by fetch status name.
    pub outcomes: BTreeMap<String, usize>,
    /// Whether the total fetch budget expired.
    pub budget_expired: bool,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: f64,
}

impl PipelineStats {
    /// Records a fetch outcome.
    pub fn record(&mut self, status: FetchStatus) {
        *self.outcomes.entry(status.as_str().to_string()).or_insert(0) += 1;
    }

    /// Returns how many results ended with `status`.
    #[must_use]
    pub fn count(&self, status: FetchStatus) -> usize {
        self.outcomes.get(status.as_str()).copied().unwrap_or(0)
    }
}

/// Output of one pipeline run; what the cache stores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineResult {
    /// The query text.
    pub query: String,
    /// Resolved results in rank order.
    pub results: Vec<ResolvedResult>,
    /// Run statistics.
    pub stats: PipelineStats,
    /// Run identifier.
    pub run_id: String,
    /// Whether this result was served from the cache.
    #[serde(default)]
    pub cached: bool,
}

impl PipelineResult {
    /// Whether the run finished without the budget expiring.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        !self.stats.budget_expired
    }

    /// Agent-facing records.
    #[must_use]
    pub fn records(&self) -> Vec<SearchResultRecord> {
        self.results.iter().map(ResolvedResult::to_record).collect()
    }

    /// Converts to dictionary.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut dict = HashMap::new();
        dict.insert("query".to_string(), serde_json::json!(self.query));
        dict.insert("results".to_string(), serde_json::json!(self.records()));
        dict.insert("cached".to_string(), serde_json::json!(self.cached));
        dict.insert("complete".to_string(), serde_json::json!(self.is_complete()));
        dict.insert("run_id".to_string(), serde_json::json!(self.run_id));
        dict.insert("stats".to_string(), serde_json::json!(self.stats));
        dict
    }
}

/// Truncates `text` to at most `limit` characters.
///
/// Returns the (possibly shortened) text and whether it was cut.
#[must_use]
pub fn truncate_chars(text: &str, limit: usize) -> (String, bool) {
    match text.char_indices().nth(limit) {
        Some((byte_idx, _)) => (text[..byte_idx].to_string(), true),
        None => (text.to_string(), false),
    }
}
