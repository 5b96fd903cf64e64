//! Cache-aware pipeline facade: search → rank → resolve, memoized.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::cache::{CacheKey, ResponseCache};
use crate::config::{ContentSettings, ExtractionOptions, PowerSearchConfig, RankingSettings};
use crate::errors::{ConfigError, PowerSearchError, Result};
use crate::events::{names, NoOpEventSink, SharedEventSink};
use crate::fetch::{ContentExtractor, ContentFetcher, FetchOrchestrator, ResolveOptions};
use crate::models::{PipelineResult, PipelineStats, Query, TimeRange};
use crate::observability::RunTimer;
use crate::ranking;
use crate::retry::with_retry;
use crate::search::SearchBackend;

/// Tool name for full search runs.
pub const SEARCH_TOOL: &str = "search";

/// Tool name for single-page fetches.
pub const FETCH_URL_TOOL: &str = "fetch_url";

/// Default timeout for [`PowerSearch::fetch_url`].
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Everything that determines a search result.
///
/// Hashed into the cache key, so two requests that resolve to the same
/// effective configuration share an entry.
#[derive(Serialize)]
struct SearchFingerprint<'a> {
    query: &'a Query,
    ranking: &'a RankingSettings,
    content: &'a ContentSettings,
    extraction: &'a ExtractionOptions,
}

#[derive(Serialize)]
struct FetchFingerprint<'a> {
    url: &'a str,
    extraction: &'a ExtractionOptions,
    content_limit: Option<usize>,
}

/// The search pipeline.
///
/// Cheap to share behind an `Arc`; holds no per-request state.
pub struct PowerSearch {
    config: Arc<PowerSearchConfig>,
    backend: Arc<dyn SearchBackend>,
    orchestrator: FetchOrchestrator,
    cache: Option<ResponseCache>,
    events: SharedEventSink,
}

impl PowerSearch {
    /// Builds a pipeline with the HTTP backend, fetcher and extractor.
    #[cfg(feature = "http")]
    pub fn new(config: PowerSearchConfig) -> std::result::Result<Self, ConfigError> {
        Self::builder(config).build()
    }

    /// Starts a builder for custom collaborators.
    #[must_use]
    pub fn builder(config: PowerSearchConfig) -> PowerSearchBuilder {
        PowerSearchBuilder::new(config)
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &PowerSearchConfig {
        &self.config
    }

    /// The cache, when enabled.
    #[must_use]
    pub fn cache(&self) -> Option<&ResponseCache> {
        self.cache.as_ref()
    }

    /// Searches for `text`, optionally restricted to a time range
    /// (`day`, `month` or `year`).
    ///
    /// Invalid input is rejected before any I/O.
    pub async fn search(&self, text: &str, time_range: Option<&str>) -> Result<PipelineResult> {
        let text = text.trim();
        if text.is_empty() {
            return Err(PowerSearchError::InvalidRequest("query must not be empty".to_string()));
        }
        let time_range = time_range.map(str::parse::<TimeRange>).transpose()?;
        let query = self.config.search.query(text).with_time_range(time_range);
        self.run(query).await
    }

    /// Runs the pipeline for a prepared query.
    pub async fn run(&self, query: Query) -> Result<PipelineResult> {
        let run_id = Uuid::new_v4().to_string();
        let span = info_span!("pipeline", run_id = %run_id, query = %query.text);
        self.run_inner(query, run_id).instrument(span).await
    }

    async fn run_inner(&self, query: Query, run_id: String) -> Result<PipelineResult> {
        let timer = RunTimer::start();
        let key = CacheKey::for_params(
            SEARCH_TOOL,
            &SearchFingerprint {
                query: &query,
                ranking: &self.config.ranking,
                content: &self.config.content,
                extraction: &self.config.extraction,
            },
        )
        .map_err(|e| PowerSearchError::Serialization(e.to_string()))?;

        if let Some(mut cached) = self.read_cached::<PipelineResult>(&key).await {
            cached.cached = true;
            info!(key = %key, "Serving search from cache");
            self.events.try_emit(
                names::CACHE_HIT,
                Some(json!({ "tool": SEARCH_TOOL, "key": key.as_str() })),
            );
            return Ok(cached);
        }

        let mut attempt = 0usize;
        let hits = with_retry(&self.config.retry, SEARCH_TOOL, || {
            attempt += 1;
            if attempt > 1 {
                self.events.try_emit(
                    names::SEARCH_RETRY,
                    Some(json!({ "attempt": attempt, "backend": self.backend.name() })),
                );
            }
            self.backend.search(&query)
        })
        .await?;

        if hits.is_empty() {
            warn!(backend = self.backend.name(), "Search returned no hits");
        }

        let hits_received = hits.len();
        let settings = &self.config.ranking;
        let ranked = ranking::filter(hits, settings.percentile, settings.top_k);
        let resolution = self
            .orchestrator
            .resolve(ranked, &ResolveOptions::from_settings(&self.config.content))
            .await;

        let mut stats = PipelineStats {
            hits_received,
            hits_retained: resolution.results.len(),
            ..PipelineStats::default()
        };
        resolution.record_stats(&mut stats);
        stats.duration_ms = timer.elapsed_ms();

        let result = PipelineResult {
            query: query.text.clone(),
            results: resolution.results,
            stats,
            run_id,
            cached: false,
        };

        if result.is_complete() {
            self.write_cached(&key, &result).await;
        } else if self.cache.is_some() {
            self.events.try_emit(
                names::CACHE_SKIPPED,
                Some(json!({ "key": key.as_str(), "reason": "fetch budget expired" })),
            );
        }

        info!(
            hits = hits_received,
            retained = result.stats.hits_retained,
            complete = result.is_complete(),
            duration_ms = result.stats.duration_ms,
            "Search pipeline completed"
        );
        self.events.try_emit(
            names::PIPELINE_COMPLETED,
            Some(json!({
                "run_id": result.run_id,
                "retained": result.stats.hits_retained,
                "complete": result.is_complete(),
            })),
        );
        Ok(result)
    }

    /// Fetches one page and returns its cleaned markdown.
    ///
    /// There is no snippet to fall back on, so fetch and extraction errors
    /// propagate. `timeout` defaults to [`DEFAULT_FETCH_TIMEOUT`].
    pub async fn fetch_url(&self, url: &str, timeout: Option<Duration>) -> Result<String> {
        let parsed = url::Url::parse(url.trim())
            .map_err(|e| PowerSearchError::InvalidRequest(format!("invalid url '{url}': {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(PowerSearchError::InvalidRequest(format!(
                "unsupported url scheme '{}'",
                parsed.scheme()
            )));
        }
        let timeout = timeout.unwrap_or(DEFAULT_FETCH_TIMEOUT);
        if timeout.is_zero() {
            return Err(PowerSearchError::InvalidRequest("timeout must be positive".to_string()));
        }

        let key = CacheKey::for_params(
            FETCH_URL_TOOL,
            &FetchFingerprint {
                url: parsed.as_str(),
                extraction: &self.config.extraction,
                content_limit: self.config.content.content_limit,
            },
        )
        .map_err(|e| PowerSearchError::Serialization(e.to_string()))?;

        if let Some(cached) = self.read_cached::<String>(&key).await {
            self.events.try_emit(
                names::CACHE_HIT,
                Some(json!({ "tool": FETCH_URL_TOOL, "key": key.as_str() })),
            );
            return Ok(cached);
        }

        let extracted = self
            .orchestrator
            .fetch_and_extract(parsed.as_str(), timeout)
            .instrument(info_span!("fetch_url", url = %parsed))
            .await?;
        let markdown = match self.config.content.content_limit {
            Some(limit) => crate::models::truncate_chars(&extracted.markdown, limit).0,
            None => extracted.markdown,
        };

        self.write_cached(&key, &markdown).await;
        Ok(markdown)
    }

    async fn read_cached<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        let cache = self.cache.as_ref()?;
        match cache.read(key).await {
            Ok(value) => value,
            Err(e) => {
                warn!(
                    key = %key,
                    backend = cache.backend(),
                    error = %e,
                    "Cache read failed, running live"
                );
                self.events.try_emit(
                    names::CACHE_READ_FAILED,
                    Some(json!({ "key": key.as_str(), "error": e.to_string() })),
                );
                None
            }
        }
    }

    async fn write_cached<T: Serialize + Sync>(&self, key: &CacheKey, value: &T) {
        let Some(cache) = &self.cache else {
            return;
        };
        if let Err(e) = cache.write(key, value).await {
            warn!(key = %key, backend = cache.backend(), error = %e, "Cache write failed");
            self.events.try_emit(
                names::CACHE_WRITE_FAILED,
                Some(json!({ "key": key.as_str(), "error": e.to_string() })),
            );
        }
    }
}

impl std::fmt::Debug for PowerSearch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PowerSearch")
            .field("backend", &self.backend.name())
            .field("cache", &self.cache.as_ref().map(ResponseCache::backend))
            .field("orchestrator", &self.orchestrator)
            .finish_non_exhaustive()
    }
}

/// Builder for [`PowerSearch`].
///
/// Collaborators left unset fall back to the HTTP implementations when the
/// `http` feature is enabled. The cache comes from `config.cache` unless
/// overridden.
pub struct PowerSearchBuilder {
    config: PowerSearchConfig,
    backend: Option<Arc<dyn SearchBackend>>,
    fetcher: Option<Arc<dyn ContentFetcher>>,
    extractor: Option<Arc<dyn ContentExtractor>>,
    cache: Option<Option<ResponseCache>>,
    events: SharedEventSink,
}

impl PowerSearchBuilder {
    fn new(config: PowerSearchConfig) -> Self {
        Self {
            config,
            backend: None,
            fetcher: None,
            extractor: None,
            cache: None,
            events: Arc::new(NoOpEventSink),
        }
    }

    /// Uses a custom search backend.
    #[must_use]
    pub fn with_backend(mut self, backend: Arc<dyn SearchBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Uses a custom page fetcher.
    #[must_use]
    pub fn with_fetcher(mut self, fetcher: Arc<dyn ContentFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Uses a custom extractor.
    #[must_use]
    pub fn with_extractor(mut self, extractor: Arc<dyn ContentExtractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    /// Overrides the configured cache; `None` disables caching.
    #[must_use]
    pub fn with_cache(mut self, cache: Option<ResponseCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, events: SharedEventSink) -> Self {
        self.events = events;
        self
    }

    /// Validates the configuration and assembles the pipeline.
    pub fn build(self) -> std::result::Result<PowerSearch, ConfigError> {
        self.config.validate()?;

        let backend = match self.backend {
            Some(backend) => backend,
            None => default_backend(&self.config)?,
        };
        let fetcher = match self.fetcher {
            Some(fetcher) => fetcher,
            None => default_fetcher(&self.config)?,
        };
        let extractor = match self.extractor {
            Some(extractor) => extractor,
            None => default_extractor()?,
        };
        let cache = match self.cache {
            Some(cache) => cache,
            None => ResponseCache::from_settings(&self.config.cache)?,
        };

        let orchestrator = FetchOrchestrator::new(fetcher, extractor)
            .with_extraction_options(self.config.extraction.clone())
            .with_max_in_flight(self.config.content.max_in_flight)
            .with_event_sink(Arc::clone(&self.events));

        Ok(PowerSearch {
            config: Arc::new(self.config),
            backend,
            orchestrator,
            cache,
            events: self.events,
        })
    }
}

#[cfg(feature = "http")]
fn default_backend(
    config: &PowerSearchConfig,
) -> std::result::Result<Arc<dyn SearchBackend>, ConfigError> {
    Ok(Arc::new(crate::search::SearxngClient::new(&config.search)?))
}

#[cfg(not(feature = "http"))]
fn default_backend(
    _config: &PowerSearchConfig,
) -> std::result::Result<Arc<dyn SearchBackend>, ConfigError> {
    Err(ConfigError::invalid("search", "no search backend configured"))
}

#[cfg(feature = "http")]
fn default_fetcher(
    config: &PowerSearchConfig,
) -> std::result::Result<Arc<dyn ContentFetcher>, ConfigError> {
    Ok(Arc::new(crate::fetch::HttpFetcher::new(config.search.verify_tls)?))
}

#[cfg(not(feature = "http"))]
fn default_fetcher(
    _config: &PowerSearchConfig,
) -> std::result::Result<Arc<dyn ContentFetcher>, ConfigError> {
    Err(ConfigError::invalid("content", "no content fetcher configured"))
}

#[cfg(feature = "http")]
#[allow(clippy::unnecessary_wraps)]
fn default_extractor() -> std::result::Result<Arc<dyn ContentExtractor>, ConfigError> {
    Ok(Arc::new(crate::fetch::HtmlExtractor::new()))
}

#[cfg(not(feature = "http"))]
fn default_extractor() -> std::result::Result<Arc<dyn ContentExtractor>, ConfigError> {
    Err(ConfigError::invalid("extraction", "no content extractor configured"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryStore;
    use crate::errors::FetchError;
    use crate::events::CollectingEventSink;
    use crate::models::{ContentStrategy, FetchStatus};
    use crate::retry::RetryConfig;
    use crate::testing::{
        hits, PassthroughExtractor, ScriptedBackend, ScriptedFetcher, StalledStore,
        UnreachableStore,
    };
    use pretty_assertions::assert_eq;

    const PAGE: &str = "A fetched page body long enough for extraction to accept it as content.";

    fn config() -> PowerSearchConfig {
        let mut config = PowerSearchConfig::new()
            .with_percentile(None)
            .with_top_k(3)
            .with_strategy(ContentStrategy::Quick)
            .with_retry(
                RetryConfig::new()
                    .with_max_retries(2)
                    .with_base_delay_ms(1)
                    .with_max_delay_ms(2),
            );
        config.extraction.min_extracted_size = 10;
        config
    }

    fn memory_cache() -> ResponseCache {
        ResponseCache::new(Arc::new(MemoryStore::new()), Duration::from_secs(60))
    }

    fn pipeline(
        config: PowerSearchConfig,
        backend: Arc<ScriptedBackend>,
        fetcher: ScriptedFetcher,
        cache: Option<ResponseCache>,
        events: Arc<CollectingEventSink>,
    ) -> PowerSearch {
        PowerSearch::builder(config)
            .with_backend(backend)
            .with_fetcher(Arc::new(fetcher))
            .with_extractor(Arc::new(PassthroughExtractor))
            .with_cache(cache)
            .with_event_sink(events)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_search_ranks_and_resolves() {
        let backend = Arc::new(ScriptedBackend::new(hits(5)));
        let events = Arc::new(CollectingEventSink::new());
        let ps = pipeline(config(), backend.clone(), ScriptedFetcher::new(), None, events.clone());

        let result = ps.search("  rust async  ", None).await.unwrap();
        assert_eq!(result.query, "rust async");
        assert_eq!(result.results.len(), 3);
        assert_eq!(result.results[0].content, "snippet 0");
        assert_eq!(result.stats.hits_received, 5);
        assert_eq!(result.stats.hits_retained, 3);
        assert!(!result.cached);
        assert!(result.is_complete());
        assert_eq!(backend.queries()[0].text, "rust async");
        assert_eq!(events.events_of_type(names::PIPELINE_COMPLETED).len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_input_rejected_before_io() {
        let backend = Arc::new(ScriptedBackend::new(hits(2)));
        let ps = pipeline(
            config(),
            backend.clone(),
            ScriptedFetcher::new(),
            None,
            Arc::new(CollectingEventSink::new()),
        );

        let err = ps.search("rust", Some("week")).await.unwrap_err();
        assert!(matches!(err, PowerSearchError::InvalidRequest(_)));
        assert!(ps.search("   ", None).await.is_err());
        assert_eq!(backend.call_count(), 0);

        let result = ps.search("rust", Some("day")).await.unwrap();
        assert_eq!(result.results.len(), 2);
        assert_eq!(backend.queries()[0].time_range, Some(TimeRange::Day));
    }

    #[tokio::test]
    async fn test_cache_hit_skips_upstream() {
        let backend = Arc::new(ScriptedBackend::new(hits(3)));
        let events = Arc::new(CollectingEventSink::new());
        let ps = pipeline(
            config(),
            backend.clone(),
            ScriptedFetcher::new(),
            Some(memory_cache()),
            events.clone(),
        );

        let first = ps.search("rust", None).await.unwrap();
        let second = ps.search("rust", None).await.unwrap();

        assert_eq!(backend.call_count(), 1);
        assert!(!first.cached);
        assert!(second.cached);
        assert_eq!(first.results, second.results);
        assert_eq!(first.run_id, second.run_id);
        assert_eq!(events.events_of_type(names::CACHE_HIT).len(), 1);
    }

    #[tokio::test]
    async fn test_different_time_range_is_a_different_key() {
        let backend = Arc::new(ScriptedBackend::new(hits(3)));
        let ps = pipeline(
            config(),
            backend.clone(),
            ScriptedFetcher::new(),
            Some(memory_cache()),
            Arc::new(CollectingEventSink::new()),
        );

        ps.search("rust", None).await.unwrap();
        ps.search("rust", Some("year")).await.unwrap();
        assert_eq!(backend.call_count(), 2);
    }

    #[tokio::test]
    async fn test_unreachable_cache_falls_back_to_live() {
        let backend = Arc::new(ScriptedBackend::new(hits(3)));
        let events = Arc::new(CollectingEventSink::new());
        let store = Arc::new(UnreachableStore::new());
        let cache = ResponseCache::new(store.clone(), Duration::from_secs(60));
        let ps = pipeline(
            config(),
            backend.clone(),
            ScriptedFetcher::new(),
            Some(cache),
            events.clone(),
        );

        let result = ps.search("rust", None).await.unwrap();
        assert_eq!(result.results.len(), 3);
        assert_eq!(store.attempts(), 2);
        assert_eq!(events.events_of_type(names::CACHE_READ_FAILED).len(), 1);
        assert_eq!(events.events_of_type(names::CACHE_WRITE_FAILED).len(), 1);
    }

    #[tokio::test]
    async fn test_stalled_cache_does_not_block_search() {
        let backend = Arc::new(ScriptedBackend::new(hits(3)));
        let events = Arc::new(CollectingEventSink::new());
        let store = Arc::new(StalledStore::new());
        let cache = ResponseCache::new(store.clone(), Duration::from_secs(60))
            .with_timeout(Duration::from_millis(50));
        let ps = pipeline(
            config(),
            backend.clone(),
            ScriptedFetcher::new(),
            Some(cache),
            events.clone(),
        );

        let result = tokio::time::timeout(Duration::from_secs(5), ps.search("rust", None))
            .await
            .expect("search stalled on the cache")
            .unwrap();
        assert_eq!(result.results.len(), 3);
        assert!(!result.cached);
        assert_eq!(backend.call_count(), 1);
        assert_eq!(store.attempts(), 2);
        assert_eq!(events.events_of_type(names::CACHE_READ_FAILED).len(), 1);
        assert_eq!(events.events_of_type(names::CACHE_WRITE_FAILED).len(), 1);
    }

    #[tokio::test]
    async fn test_transient_upstream_error_is_retried() {
        let backend = Arc::new(
            ScriptedBackend::new(hits(2))
                .fail_with(PowerSearchError::upstream_transient("bad gateway", Some(502))),
        );
        let events = Arc::new(CollectingEventSink::new());
        let ps = pipeline(config(), backend.clone(), ScriptedFetcher::new(), None, events.clone());

        let result = ps.search("rust", None).await.unwrap();
        assert_eq!(result.results.len(), 2);
        assert_eq!(backend.call_count(), 2);
        assert_eq!(events.events_of_type(names::SEARCH_RETRY).len(), 1);
    }

    #[tokio::test]
    async fn test_permanent_upstream_error_is_not_retried() {
        let backend = Arc::new(
            ScriptedBackend::new(hits(2))
                .fail_with(PowerSearchError::upstream_permanent("bad request", Some(400))),
        );
        let ps = pipeline(
            config(),
            backend.clone(),
            ScriptedFetcher::new(),
            None,
            Arc::new(CollectingEventSink::new()),
        );

        let err = ps.search("rust", None).await.unwrap_err();
        assert!(!err.is_retryable());
        assert_eq!(backend.call_count(), 1);
    }

    #[tokio::test]
    async fn test_exhausted_retries_surface_stage() {
        let backend = Arc::new(
            ScriptedBackend::new(hits(2))
                .fail_with(PowerSearchError::upstream_transient("down", Some(503)))
                .fail_with(PowerSearchError::upstream_transient("down", Some(503)))
                .fail_with(PowerSearchError::upstream_transient("down", Some(503))),
        );
        let ps = pipeline(
            config(),
            backend.clone(),
            ScriptedFetcher::new(),
            None,
            Arc::new(CollectingEventSink::new()),
        );

        let err = ps.search("rust", None).await.unwrap_err();
        assert!(matches!(err, PowerSearchError::RetriesExhausted { attempts: 3, .. }));
        assert_eq!(err.to_dict().get("stage").unwrap(), "search");
        assert_eq!(backend.call_count(), 3);
    }

    #[tokio::test]
    async fn test_budget_expiry_is_not_cached() {
        let backend = Arc::new(ScriptedBackend::new(hits(1)));
        let events = Arc::new(CollectingEventSink::new());
        let fetcher = ScriptedFetcher::new().page_after(
            "https://example.com/0",
            PAGE,
            Duration::from_secs(10),
        );
        let config = config()
            .with_strategy(ContentStrategy::Fetch)
            .with_total_timeout_ms(100);
        let ps = pipeline(config, backend.clone(), fetcher, Some(memory_cache()), events.clone());

        let result = ps.search("rust", None).await.unwrap();
        assert!(!result.is_complete());
        assert_eq!(result.results[0].fetch_status, Some(FetchStatus::Timeout));
        assert_eq!(result.results[0].content, "snippet 0");
        assert_eq!(events.events_of_type(names::CACHE_SKIPPED).len(), 1);

        ps.search("rust", None).await.unwrap();
        assert_eq!(backend.call_count(), 2);
    }

    #[tokio::test]
    async fn test_fetch_strategy_uses_page_content() {
        let backend = Arc::new(ScriptedBackend::new(hits(2)));
        let fetcher = ScriptedFetcher::new()
            .page("https://example.com/0", PAGE)
            .fail(
                "https://example.com/1",
                FetchError::Blocked {
                    url: "https://example.com/1".into(),
                    status: 429,
                },
            );
        let config = config().with_strategy(ContentStrategy::Fetch);
        let ps = pipeline(
            config,
            backend,
            fetcher,
            Some(memory_cache()),
            Arc::new(CollectingEventSink::new()),
        );

        let result = ps.search("rust", None).await.unwrap();
        assert_eq!(result.results[0].content, PAGE);
        assert_eq!(result.results[1].content, "snippet 1");
        assert_eq!(result.stats.count(FetchStatus::Ok), 1);
        assert_eq!(result.stats.count(FetchStatus::Blocked), 1);
        assert!(result.is_complete());
    }

    #[tokio::test]
    async fn test_fetch_url_caches_markdown() {
        let backend = Arc::new(ScriptedBackend::new(Vec::new()));
        let fetcher = ScriptedFetcher::new().page("https://example.com/doc", PAGE);
        let events = Arc::new(CollectingEventSink::new());
        let ps = pipeline(config(), backend, fetcher, Some(memory_cache()), events.clone());

        let first = ps.fetch_url("https://example.com/doc", None).await.unwrap();
        let second = ps.fetch_url("https://example.com/doc", None).await.unwrap();
        assert_eq!(first, PAGE);
        assert_eq!(first, second);
        assert_eq!(events.events_of_type(names::CACHE_HIT).len(), 1);
    }

    #[tokio::test]
    async fn test_fetch_url_errors_propagate() {
        let fetcher = ScriptedFetcher::new().fail(
            "https://example.com/denied",
            FetchError::Blocked {
                url: "https://example.com/denied".into(),
                status: 403,
            },
        );
        let ps = pipeline(
            config(),
            Arc::new(ScriptedBackend::new(Vec::new())),
            fetcher,
            None,
            Arc::new(CollectingEventSink::new()),
        );

        let err = ps.fetch_url("https://example.com/denied", None).await.unwrap_err();
        assert!(matches!(err, PowerSearchError::Fetch(FetchError::Blocked { status: 403, .. })));

        let err = ps.fetch_url("ftp://example.com/file", None).await.unwrap_err();
        assert!(matches!(err, PowerSearchError::InvalidRequest(_)));
        let err = ps.fetch_url("not a url", None).await.unwrap_err();
        assert!(matches!(err, PowerSearchError::InvalidRequest(_)));
    }

    #[test]
    fn test_build_rejects_invalid_config() {
        let err = PowerSearch::builder(config().with_percentile(Some(150.0)))
            .with_backend(Arc::new(ScriptedBackend::new(Vec::new())))
            .with_fetcher(Arc::new(ScriptedFetcher::new()))
            .with_extractor(Arc::new(PassthroughExtractor))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("percentile"));
    }
}
