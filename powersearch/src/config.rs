//! Configuration for the search pipeline.
//!
//! A single immutable [`PowerSearchConfig`] is built once at startup (from
//! defaults, a serialized document, or `POWERSEARCH_*` environment variables)
//! and handed to the pipeline. Nothing inside the pipeline reads ambient
//! settings.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

use crate::errors::ConfigError;
use crate::models::{ContentStrategy, Query};
use crate::retry::{JitterStrategy, RetryConfig};

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "POWERSEARCH_";

/// Upstream meta-search settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchSettings {
    /// Base URL of the meta-search backend.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Engine allow-list; empty means backend default.
    #[serde(default)]
    pub engines: Vec<String>,
    /// IETF language tag.
    #[serde(default = "default_language")]
    pub language: String,
    /// Safe search level (0, 1 or 2).
    #[serde(default = "default_safe_search")]
    pub safe_search: u8,
    /// Number of result pages to request.
    #[serde(default = "default_page_count")]
    pub page_count: u32,
    /// Whether to verify TLS certificates.
    #[serde(default = "default_true")]
    pub verify_tls: bool,
    /// Timeout for one upstream request in milliseconds.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_base_url() -> String {
    "http://127.0.0.1:9876".to_string()
}

fn default_language() -> String {
    "en".to_string()
}

const fn default_safe_search() -> u8 {
    1
}

const fn default_page_count() -> u32 {
    1
}

const fn default_true() -> bool {
    true
}

const fn default_request_timeout_ms() -> u64 {
    10_000
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            engines: Vec::new(),
            language: default_language(),
            safe_search: default_safe_search(),
            page_count: default_page_count(),
            verify_tls: true,
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl SearchSettings {
    /// Per-request timeout as a duration.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Builds a normalized query for `text`.
    #[must_use]
    pub fn query(&self, text: &str) -> Query {
        let mut engines: Vec<String> = self
            .engines
            .iter()
            .map(|e| e.trim().to_string())
            .filter(|e| !e.is_empty())
            .collect();
        engines.sort();
        engines.dedup();

        Query::new(text.trim())
            .with_engines(engines)
            .with_language(self.language.clone())
            .with_safe_search(self.safe_search)
            .with_page_count(self.page_count)
    }
}

/// Ranking and filtering settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankingSettings {
    /// Score percentile cutoff; `None` disables percentile filtering.
    #[serde(default = "default_percentile")]
    pub percentile: Option<f64>,
    /// Maximum results retained.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

#[allow(clippy::unnecessary_wraps)]
const fn default_percentile() -> Option<f64> {
    Some(75.0)
}

const fn default_top_k() -> usize {
    10
}

impl Default for RankingSettings {
    fn default() -> Self {
        Self {
            percentile: default_percentile(),
            top_k: default_top_k(),
        }
    }
}

/// Content resolution settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentSettings {
    /// Snippet-only or fetch+extract.
    #[serde(default)]
    pub strategy: ContentStrategy,
    /// Per-result character cap; `None` disables trimming.
    #[serde(default)]
    pub content_limit: Option<usize>,
    /// Total budget for search plus content handling, in milliseconds.
    #[serde(default = "default_total_timeout_ms")]
    pub total_timeout_ms: u64,
    /// Per-result fetch timeout; `None` uses the remaining budget.
    #[serde(default)]
    pub per_result_timeout_ms: Option<u64>,
    /// Maximum concurrent fetches.
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
}

const fn default_total_timeout_ms() -> u64 {
    20_000
}

const fn default_max_in_flight() -> usize {
    8
}

impl Default for ContentSettings {
    fn default() -> Self {
        Self {
            strategy: ContentStrategy::Fetch,
            content_limit: None,
            total_timeout_ms: default_total_timeout_ms(),
            per_result_timeout_ms: None,
            max_in_flight: default_max_in_flight(),
        }
    }
}

impl ContentSettings {
    /// Total budget as a duration.
    #[must_use]
    pub fn total_budget(&self) -> Duration {
        Duration::from_millis(self.total_timeout_ms)
    }

    /// Per-result timeout as a duration.
    #[must_use]
    pub fn per_result_timeout(&self) -> Option<Duration> {
        self.per_result_timeout_ms.map(Duration::from_millis)
    }
}

/// Content extraction options.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExtractionOptions {
    /// Keep hyperlinks as markdown links.
    #[serde(default)]
    pub include_links: bool,
    /// Keep images as markdown images.
    #[serde(default)]
    pub include_images: bool,
    /// Render tables.
    #[serde(default = "default_true")]
    pub include_tables: bool,
    /// Keep HTML comments as text.
    #[serde(default)]
    pub include_comments: bool,
    /// Keep bold/italic/code formatting.
    #[serde(default)]
    pub include_formatting: bool,
    /// Drop repeated blocks and duplicate pages.
    #[serde(default = "default_true")]
    pub deduplicate: bool,
    /// Prefer precision over recall when choosing content.
    #[serde(default = "default_true")]
    pub favor_precision: bool,
    /// Minimum extracted size in characters.
    #[serde(default = "default_min_size")]
    pub min_extracted_size: usize,
    /// Minimum block size considered by the duplicate check.
    #[serde(default = "default_min_size")]
    pub min_duplcheck_size: usize,
    /// Maximum repetitions of an identical block.
    #[serde(default = "default_max_repetitions")]
    pub max_repetitions: usize,
    /// Extraction time limit in milliseconds; 0 disables it.
    #[serde(default)]
    pub extraction_timeout_ms: u64,
}

const fn default_min_size() -> usize {
    100
}

const fn default_max_repetitions() -> usize {
    2
}

impl Default for ExtractionOptions {
    fn default() -> Self {
        Self {
            include_links: false,
            include_images: false,
            include_tables: true,
            include_comments: false,
            include_formatting: false,
            deduplicate: true,
            favor_precision: true,
            min_extracted_size: default_min_size(),
            min_duplcheck_size: default_min_size(),
            max_repetitions: default_max_repetitions(),
            extraction_timeout_ms: 0,
        }
    }
}

impl ExtractionOptions {
    /// Extraction time limit, if any.
    #[must_use]
    pub fn extraction_timeout(&self) -> Option<Duration> {
        (self.extraction_timeout_ms > 0).then(|| Duration::from_millis(self.extraction_timeout_ms))
    }
}

/// Cache settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Backend selector; `None` disables caching.
    #[serde(default)]
    pub selector: Option<String>,
    /// Entry time-to-live in seconds.
    #[serde(default = "default_cache_ttl")]
    pub ttl_seconds: u64,
    /// Namespace prefix for stored keys.
    #[serde(default = "default_collection")]
    pub collection: String,
    /// Upper bound on a single cache read or write, in milliseconds.
    #[serde(default = "default_cache_timeout")]
    pub timeout_ms: u64,
}

const fn default_cache_ttl() -> u64 {
    3600
}

const fn default_cache_timeout() -> u64 {
    2000
}

fn default_collection() -> String {
    "powersearch".to_string()
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            selector: None,
            ttl_seconds: default_cache_ttl(),
            collection: default_collection(),
            timeout_ms: default_cache_timeout(),
        }
    }
}

impl CacheSettings {
    /// Entry TTL as a duration.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }

    /// Per-operation time limit as a duration.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Summarization settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummarySettings {
    /// Results per map-reduce chunk.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Per-result character cap applied before summarizing.
    #[serde(default)]
    pub content_limit: Option<usize>,
    /// Sampling temperature.
    #[serde(default)]
    pub temperature: f64,
    /// Maximum tokens requested per sampling call.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: Option<u32>,
    /// Largest rendered prompt (in characters) sent in a single call.
    #[serde(default = "default_input_budget")]
    pub input_budget_chars: usize,
}

const fn default_chunk_size() -> usize {
    4
}

#[allow(clippy::unnecessary_wraps)]
const fn default_max_tokens() -> Option<u32> {
    Some(800)
}

const fn default_input_budget() -> usize {
    48_000
}

impl Default for SummarySettings {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            content_limit: None,
            temperature: 0.0,
            max_tokens: default_max_tokens(),
            input_budget_chars: default_input_budget(),
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogSettings {
    /// Default filter directive when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Complete pipeline configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PowerSearchConfig {
    /// Upstream search.
    #[serde(default)]
    pub search: SearchSettings,
    /// Ranking and filtering.
    #[serde(default)]
    pub ranking: RankingSettings,
    /// Content resolution.
    #[serde(default)]
    pub content: ContentSettings,
    /// Extraction.
    #[serde(default)]
    pub extraction: ExtractionOptions,
    /// Retry policy around the live path.
    #[serde(default)]
    pub retry: RetryConfig,
    /// Cache.
    #[serde(default)]
    pub cache: CacheSettings,
    /// Summarization.
    #[serde(default)]
    pub summary: SummarySettings,
    /// Logging.
    #[serde(default)]
    pub logging: LogSettings,
}

impl PowerSearchConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the backend base URL.
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.search.base_url = url.into();
        self
    }

    /// Sets the percentile cutoff.
    #[must_use]
    pub fn with_percentile(mut self, percentile: Option<f64>) -> Self {
        self.ranking.percentile = percentile;
        self
    }

    /// Sets top-K.
    #[must_use]
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.ranking.top_k = top_k;
        self
    }

    /// Sets the content strategy.
    #[must_use]
    pub fn with_strategy(mut self, strategy: ContentStrategy) -> Self {
        self.content.strategy = strategy;
        self
    }

    /// Sets the total timeout budget.
    #[must_use]
    pub fn with_total_timeout_ms(mut self, ms: u64) -> Self {
        self.content.total_timeout_ms = ms;
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the cache selector.
    #[must_use]
    pub fn with_cache(mut self, selector: Option<&str>) -> Self {
        self.cache.selector = selector.map(str::to_string);
        self
    }

    /// Loads configuration from `POWERSEARCH_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration from an arbitrary key lookup.
    ///
    /// Keys are full variable names (`POWERSEARCH_FILTER_TOP_K`). Unset keys
    /// keep their defaults. The result is validated.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = EnvReader { lookup };
        let mut config = Self::default();

        // search
        if let Some(v) = env.raw("BASE_URL") {
            config.search.base_url = v;
        }
        if let Some(v) = env.raw("ENGINES") {
            config.search.engines = v
                .split(',')
                .map(str::trim)
                .filter(|e| !e.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(v) = env.raw("LANGUAGE") {
            config.search.language = v;
        }
        env.set(&mut config.search.safe_search, "SAFE_SEARCH")?;
        env.set(&mut config.search.page_count, "MAX_PAGE")?;
        env.set(&mut config.search.verify_tls, "VERIFY")?;
        env.set(&mut config.search.request_timeout_ms, "REQUEST_TIMEOUT_MS")?;

        // ranking
        env.set_optional(&mut config.ranking.percentile, "FILTER_SCORE_PERCENTILE")?;
        env.set(&mut config.ranking.top_k, "FILTER_TOP_K")?;

        // content
        env.set(&mut config.content.strategy, "CONTENT_STRATEGY")?;
        env.set_optional(&mut config.content.content_limit, "CONTENT_LIMIT")?;
        if let Some(secs) = env.parse::<f64>("TIMEOUT_SEC")? {
            config.content.total_timeout_ms = seconds_to_ms("TIMEOUT_SEC", secs)?;
        }
        env.set_optional(&mut config.content.per_result_timeout_ms, "PER_RESULT_TIMEOUT_MS")?;
        env.set(&mut config.content.max_in_flight, "MAX_IN_FLIGHT")?;

        // extraction
        let ex = &mut config.extraction;
        env.set(&mut ex.include_links, "EXTRACT_INCLUDE_LINKS")?;
        env.set(&mut ex.include_images, "EXTRACT_INCLUDE_IMAGES")?;
        env.set(&mut ex.include_tables, "EXTRACT_INCLUDE_TABLES")?;
        env.set(&mut ex.include_comments, "EXTRACT_INCLUDE_COMMENTS")?;
        env.set(&mut ex.include_formatting, "EXTRACT_INCLUDE_FORMATTING")?;
        env.set(&mut ex.deduplicate, "EXTRACT_DEDUPLICATE")?;
        env.set(&mut ex.favor_precision, "EXTRACT_FAVOR_PRECISION")?;
        env.set(&mut ex.min_extracted_size, "EXTRACT_MIN_EXTRACTED_SIZE")?;
        env.set(&mut ex.min_duplcheck_size, "EXTRACT_MIN_DUPLCHECK_SIZE")?;
        env.set(&mut ex.max_repetitions, "EXTRACT_MAX_REPETITIONS")?;
        if let Some(secs) = env.parse::<f64>("EXTRACT_TIMEOUT")? {
            ex.extraction_timeout_ms = seconds_to_ms("EXTRACT_TIMEOUT", secs)?;
        }

        // retry
        env.set(&mut config.retry.max_retries, "RETRY_RETRIES")?;
        if let Some(secs) = env.parse::<f64>("RETRY_BASE_DELAY")? {
            config.retry.base_delay_ms = seconds_to_ms("RETRY_BASE_DELAY", secs)?;
        }
        if let Some(secs) = env.parse::<f64>("RETRY_MAX_DELAY")? {
            config.retry.max_delay_ms = seconds_to_ms("RETRY_MAX_DELAY", secs)?;
        }
        env.set(&mut config.retry.backoff_multiplier, "RETRY_BACKOFF_MULTIPLIER")?;
        if let Some(v) = env.raw("RETRY_JITTER") {
            config.retry.jitter = match v.to_ascii_lowercase().as_str() {
                "none" => JitterStrategy::None,
                "full" => JitterStrategy::Full,
                "equal" => JitterStrategy::Equal,
                other => {
                    return Err(ConfigError::invalid(
                        env.key("RETRY_JITTER"),
                        format!("unknown jitter strategy '{other}'"),
                    ))
                }
            };
        }

        // cache
        if let Some(v) = env.raw("CACHE") {
            config.cache.selector = Some(v);
        }
        env.set(&mut config.cache.ttl_seconds, "CACHE_TTL_SEC")?;
        env.set(&mut config.cache.timeout_ms, "CACHE_TIMEOUT_MS")?;

        // summary
        env.set(&mut config.summary.chunk_size, "SUMMARY_CHUNK_SIZE")?;
        env.set_optional(&mut config.summary.content_limit, "SUMMARY_CONTENT_LIMIT")?;
        env.set(&mut config.summary.temperature, "SUMMARY_TEMPERATURE")?;
        env.set_optional(&mut config.summary.max_tokens, "SUMMARY_MAX_TOKENS")?;
        env.set(&mut config.summary.input_budget_chars, "SUMMARY_INPUT_BUDGET")?;

        // logging
        if let Some(v) = env.raw("LOG_LEVEL") {
            config.logging.level = v;
        }
        env.set(&mut config.logging.json, "LOG_JSON")?;

        config.validate()?;
        Ok(config)
    }

    /// Validates every section, failing on the first invalid value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.search.base_url.trim().is_empty() {
            return Err(ConfigError::invalid("search.base_url", "must not be empty"));
        }
        url::Url::parse(&self.search.base_url)
            .map_err(|e| ConfigError::invalid("search.base_url", e.to_string()))?;
        if self.search.safe_search > 2 {
            return Err(ConfigError::invalid("search.safe_search", "must be 0, 1 or 2"));
        }
        if self.search.request_timeout_ms == 0 {
            return Err(ConfigError::invalid(
                "search.request_timeout_ms",
                "must be greater than 0",
            ));
        }
        if self.search.page_count == 0 {
            return Err(ConfigError::invalid("search.page_count", "must be at least 1"));
        }
        if let Some(p) = self.ranking.percentile {
            if !(0.0..=100.0).contains(&p) {
                return Err(ConfigError::invalid(
                    "ranking.percentile",
                    "must be between 0 and 100",
                ));
            }
        }
        if self.content.total_timeout_ms == 0 {
            return Err(ConfigError::invalid(
                "content.total_timeout_ms",
                "must be greater than 0",
            ));
        }
        if self.content.per_result_timeout_ms == Some(0) {
            return Err(ConfigError::invalid(
                "content.per_result_timeout_ms",
                "must be greater than 0",
            ));
        }
        if self.content.max_in_flight == 0 {
            return Err(ConfigError::invalid(
                "content.max_in_flight",
                "must be at least 1",
            ));
        }
        self.retry.validate()?;
        if self.summary.chunk_size == 0 {
            return Err(ConfigError::invalid("summary.chunk_size", "must be at least 1"));
        }
        if !(0.0..=2.0).contains(&self.summary.temperature) {
            return Err(ConfigError::invalid(
                "summary.temperature",
                "must be between 0.0 and 2.0",
            ));
        }
        if self.summary.max_tokens == Some(0) {
            return Err(ConfigError::invalid("summary.max_tokens", "must be at least 1"));
        }
        if self.cache.timeout_ms == 0 {
            return Err(ConfigError::invalid("cache.timeout_ms", "must be greater than 0"));
        }
        crate::cache::CacheSelector::parse(self.cache.selector.as_deref())?;
        Ok(())
    }
}

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn key(&self, suffix: &str) -> String {
        format!("{ENV_PREFIX}{suffix}")
    }

    fn raw(&self, suffix: &str) -> Option<String> {
        (self.lookup)(&self.key(suffix))
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T>(&self, suffix: &str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.raw(suffix)
            .map(|v| {
                v.parse::<T>()
                    .map_err(|e| ConfigError::invalid(self.key(suffix), format!("'{v}': {e}")))
            })
            .transpose()
    }

    fn set<T>(&self, target: &mut T, suffix: &str) -> Result<(), ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        if let Some(v) = self.parse(suffix)? {
            *target = v;
        }
        Ok(())
    }

    /// `none` / `null` clear the value.
    fn set_optional<T>(&self, target: &mut Option<T>, suffix: &str) -> Result<(), ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.raw(suffix) {
            None => Ok(()),
            Some(v) if v.eq_ignore_ascii_case("none") || v.eq_ignore_ascii_case("null") => {
                *target = None;
                Ok(())
            }
            Some(_) => {
                *target = self.parse(suffix)?;
                Ok(())
            }
        }
    }
}

fn seconds_to_ms(field: &str, secs: f64) -> Result<u64, ConfigError> {
    if !secs.is_finite() || secs < 0.0 {
        return Err(ConfigError::invalid(
            format!("{ENV_PREFIX}{field}"),
            "must be a non-negative number of seconds",
        ));
    }
    Ok((secs * 1000.0).round() as u64)
}
