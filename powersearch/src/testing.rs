//! Scripted collaborators for tests.
//!
//! Each double records how it was called so tests can assert on ordering,
//! concurrency and call counts without network access.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::cache::{CacheEntry, CacheStore};
use crate::config::ExtractionOptions;
use crate::errors::{CacheError, ExtractError, FetchError, PowerSearchError, Result, SamplingError};
use crate::fetch::{ContentExtractor, ContentFetcher, Extracted, PageMetadata};
use crate::models::{Query, RawHit};
use crate::search::SearchBackend;
use crate::summarize::{Sampler, SamplingRequest};

/// Search backend returning canned hits, optionally failing first.
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    hits: Vec<RawHit>,
    failures: Mutex<VecDeque<PowerSearchError>>,
    calls: AtomicUsize,
    queries: Mutex<Vec<Query>>,
}

impl ScriptedBackend {
    /// Backend that always returns `hits`.
    #[must_use]
    pub fn new(hits: Vec<RawHit>) -> Self {
        Self {
            hits,
            ..Self::default()
        }
    }

    /// Queues an error returned before any hits.
    #[must_use]
    pub fn fail_with(self, error: PowerSearchError) -> Self {
        self.failures.lock().push_back(error);
        self
    }

    /// Number of `search` calls.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Queries received, in order.
    #[must_use]
    pub fn queries(&self) -> Vec<Query> {
        self.queries.lock().clone()
    }
}

#[async_trait]
impl SearchBackend for ScriptedBackend {
    async fn search(&self, query: &Query) -> Result<Vec<RawHit>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.queries.lock().push(query.clone());
        if let Some(error) = self.failures.lock().pop_front() {
            return Err(error);
        }
        Ok(self.hits.clone())
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// What a scripted fetch does.
#[derive(Debug, Clone)]
pub enum FetchScript {
    /// Return this body after a delay.
    Page {
        /// Response body.
        html: String,
        /// Simulated latency.
        delay: Duration,
    },
    /// Fail with this error after a delay.
    Fail {
        /// Returned error.
        error: FetchError,
        /// Simulated latency.
        delay: Duration,
    },
}

/// Fetcher answering from a per-URL script.
///
/// Unscripted URLs fail with a network error.
#[derive(Debug, Default)]
pub struct ScriptedFetcher {
    scripts: HashMap<String, FetchScript>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    started: Mutex<Vec<String>>,
}

impl ScriptedFetcher {
    /// Creates a fetcher with no scripts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Serves `html` for `url` immediately.
    #[must_use]
    pub fn page(self, url: &str, html: impl Into<String>) -> Self {
        self.page_after(url, html, Duration::ZERO)
    }

    /// Serves `html` for `url` after `delay`.
    #[must_use]
    pub fn page_after(mut self, url: &str, html: impl Into<String>, delay: Duration) -> Self {
        self.scripts.insert(
            url.to_string(),
            FetchScript::Page {
                html: html.into(),
                delay,
            },
        );
        self
    }

    /// Fails `url` with `error`.
    #[must_use]
    pub fn fail(mut self, url: &str, error: FetchError) -> Self {
        self.scripts.insert(
            url.to_string(),
            FetchScript::Fail {
                error,
                delay: Duration::ZERO,
            },
        );
        self
    }

    /// Highest number of concurrent fetches observed.
    #[must_use]
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// URLs in the order their fetch started.
    #[must_use]
    pub fn started(&self) -> Vec<String> {
        self.started.lock().clone()
    }
}

#[async_trait]
impl ContentFetcher for ScriptedFetcher {
    async fn fetch(
        &self,
        url: &str,
        _timeout: Duration,
    ) -> std::result::Result<String, FetchError> {
        self.started.lock().push(url.to_string());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let result = match self.scripts.get(url) {
            Some(FetchScript::Page { html, delay }) => {
                tokio::time::sleep(*delay).await;
                Ok(html.clone())
            }
            Some(FetchScript::Fail { error, delay }) => {
                tokio::time::sleep(*delay).await;
                Err(error.clone())
            }
            None => Err(FetchError::Network {
                url: url.to_string(),
                message: "no script".to_string(),
            }),
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// Extractor treating the body as already-clean markdown.
///
/// Honors `min_extracted_size` so too-short handling can be exercised.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughExtractor;

impl ContentExtractor for PassthroughExtractor {
    fn extract(
        &self,
        html: &str,
        options: &ExtractionOptions,
    ) -> std::result::Result<Extracted, ExtractError> {
        let markdown = html.trim().to_string();
        if markdown.is_empty() {
            return Err(ExtractError::ExtractionFailed("empty body".to_string()));
        }
        let length = markdown.chars().count();
        if length < options.min_extracted_size {
            return Err(ExtractError::TooShort {
                length,
                minimum: options.min_extracted_size,
            });
        }
        Ok(Extracted {
            metadata: PageMetadata {
                word_count: markdown.split_whitespace().count(),
                ..PageMetadata::default()
            },
            markdown,
        })
    }
}

/// Sampler answering from a script and recording every prompt.
#[derive(Debug, Default)]
pub struct ScriptedSampler {
    fail_on_calls: Vec<usize>,
    delay: Duration,
    requests: Mutex<Vec<SamplingRequest>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedSampler {
    /// Sampler that answers every call.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails the given 1-based call numbers.
    #[must_use]
    pub fn failing_calls(mut self, calls: &[usize]) -> Self {
        self.fail_on_calls = calls.to_vec();
        self
    }

    /// Adds latency to every call.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Requests received, in order.
    #[must_use]
    pub fn requests(&self) -> Vec<SamplingRequest> {
        self.requests.lock().clone()
    }

    /// Number of calls received.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.requests.lock().len()
    }

    /// Highest number of concurrent calls observed.
    #[must_use]
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Sampler for ScriptedSampler {
    async fn sample(&self, request: SamplingRequest) -> std::result::Result<String, SamplingError> {
        let call = {
            let mut requests = self.requests.lock();
            requests.push(request);
            requests.len()
        };
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.fail_on_calls.contains(&call) {
            Err(SamplingError::Failed(format!("scripted failure on call {call}")))
        } else {
            Ok(format!("summary {call}"))
        }
    }
}

/// Cache store whose every operation fails, like an unreachable server.
#[derive(Debug, Default)]
pub struct UnreachableStore {
    attempts: AtomicUsize,
}

impl UnreachableStore {
    /// Creates the store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Operations attempted.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    fn refuse(&self) -> CacheError {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        CacheError::Backend("connection refused".to_string())
    }
}

#[async_trait]
impl CacheStore for UnreachableStore {
    fn name(&self) -> &'static str {
        "unreachable"
    }

    async fn get(&self, _key: &str) -> std::result::Result<Option<CacheEntry>, CacheError> {
        Err(self.refuse())
    }

    async fn set(&self, _entry: CacheEntry) -> std::result::Result<(), CacheError> {
        Err(self.refuse())
    }

    async fn delete(&self, _key: &str) -> std::result::Result<(), CacheError> {
        Err(self.refuse())
    }

    async fn clear(&self) -> std::result::Result<(), CacheError> {
        Err(self.refuse())
    }
}

/// Cache store whose operations never complete, like a server that accepts
/// connections but never answers.
#[derive(Debug, Default)]
pub struct StalledStore {
    attempts: AtomicUsize,
}

impl StalledStore {
    /// Creates the store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Operations attempted.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    async fn stall<T>(&self) -> std::result::Result<T, CacheError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        std::future::pending().await
    }
}

#[async_trait]
impl CacheStore for StalledStore {
    fn name(&self) -> &'static str {
        "stalled"
    }

    async fn get(&self, _key: &str) -> std::result::Result<Option<CacheEntry>, CacheError> {
        self.stall().await
    }

    async fn set(&self, _entry: CacheEntry) -> std::result::Result<(), CacheError> {
        self.stall().await
    }

    async fn delete(&self, _key: &str) -> std::result::Result<(), CacheError> {
        self.stall().await
    }

    async fn clear(&self) -> std::result::Result<(), CacheError> {
        self.stall().await
    }
}

/// Builds `n` hits with descending scores and snippets.
#[must_use]
pub fn hits(n: usize) -> Vec<RawHit> {
    (0..n)
        .map(|i| {
            RawHit::new(
                format!("https://example.com/{i}"),
                format!("Result {i}"),
                (n - i) as f64,
            )
            .with_snippet(format!("snippet {i}"))
            .with_position(i)
        })
        .collect()
}
