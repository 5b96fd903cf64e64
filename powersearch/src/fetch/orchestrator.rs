//! Time-budgeted, bounded-concurrency content resolution.

use futures::stream::{FuturesUnordered, StreamExt};
use parking_lot::Mutex;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::{ContentExtractor, ContentFetcher, Extracted};
use crate::config::{ContentSettings, ExtractionOptions};
use crate::errors::{ExtractError, FetchError, PowerSearchError};
use crate::events::{names, NoOpEventSink, SharedEventSink};
use crate::models::{
    ContentSource, ContentStrategy, FetchOutcome, FetchStatus, PipelineStats, RankedResult,
    ResolvedResult,
};

/// Per-call resolution parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveOptions {
    /// Snippet-only or fetch+extract.
    pub strategy: ContentStrategy,
    /// Cap on a single fetch; the remaining budget applies regardless.
    pub per_result_timeout: Option<Duration>,
    /// Wall-clock budget for the whole batch, starting when resolution begins.
    pub total_budget: Duration,
    /// Per-result character cap.
    pub content_limit: Option<usize>,
}

impl ResolveOptions {
    /// Derives options from content settings.
    #[must_use]
    pub fn from_settings(settings: &ContentSettings) -> Self {
        Self {
            strategy: settings.strategy,
            per_result_timeout: settings.per_result_timeout(),
            total_budget: settings.total_budget(),
            content_limit: settings.content_limit,
        }
    }
}

/// Output of one resolution batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Resolution {
    /// Results in input order, one per input.
    pub results: Vec<ResolvedResult>,
    /// Whether the budget expired with fetches outstanding.
    pub budget_expired: bool,
}

impl Resolution {
    /// Adds outcome counts and the budget flag to `stats`.
    pub fn record_stats(&self, stats: &mut PipelineStats) {
        for result in &self.results {
            if let Some(status) = result.fetch_status {
                stats.record(status);
            }
        }
        stats.budget_expired |= self.budget_expired;
    }
}

/// Resolves content for ranked results.
pub struct FetchOrchestrator {
    fetcher: Arc<dyn ContentFetcher>,
    extractor: Arc<dyn ContentExtractor>,
    options: ExtractionOptions,
    max_in_flight: usize,
    events: SharedEventSink,
}

impl FetchOrchestrator {
    /// Creates an orchestrator with default extraction options.
    #[must_use]
    pub fn new(fetcher: Arc<dyn ContentFetcher>, extractor: Arc<dyn ContentExtractor>) -> Self {
        Self {
            fetcher,
            extractor,
            options: ExtractionOptions::default(),
            max_in_flight: 8,
            events: Arc::new(NoOpEventSink),
        }
    }

    /// Sets extraction options.
    #[must_use]
    pub fn with_extraction_options(mut self, options: ExtractionOptions) -> Self {
        self.options = options;
        self
    }

    /// Caps concurrent fetches.
    #[must_use]
    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight.max(1);
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, events: SharedEventSink) -> Self {
        self.events = events;
        self
    }

    /// Resolves content for every input result.
    ///
    /// Never fails and never drops a result: failures and budget expiry
    /// degrade to the snippet. Output order equals input order.
    pub async fn resolve(
        &self,
        results: Vec<RankedResult>,
        options: &ResolveOptions,
    ) -> Resolution {
        let mut resolution = match options.strategy {
            ContentStrategy::Quick => Resolution {
                results: results.into_iter().map(ResolvedResult::from_snippet).collect(),
                budget_expired: false,
            },
            ContentStrategy::Fetch => self.resolve_fetched(results, options).await,
        };
        for result in &mut resolution.results {
            result.apply_limit(options.content_limit);
        }
        resolution
    }

    /// Fetches and extracts a single page.
    ///
    /// Fetch errors surface as `PowerSearchError::Fetch`, extraction errors
    /// as `PowerSearchError::Extract`.
    pub async fn fetch_and_extract(
        &self,
        url: &str,
        timeout: Duration,
    ) -> Result<Extracted, PowerSearchError> {
        let html = match tokio::time::timeout(timeout, self.fetcher.fetch(url, timeout)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(FetchError::Timeout {
                    url: url.to_string(),
                    timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                }
                .into())
            }
        };
        self.extract(html).await
    }

    async fn extract(&self, html: String) -> Result<Extracted, PowerSearchError> {
        let extractor = Arc::clone(&self.extractor);
        let options = self.options.clone();
        let limit = options.extraction_timeout();
        let task = tokio::task::spawn_blocking(move || extractor.extract(&html, &options));

        let joined = match limit {
            Some(limit) => tokio::time::timeout(limit, task).await.map_err(|_| {
                ExtractError::ExtractionFailed(format!(
                    "extraction exceeded {}ms",
                    limit.as_millis()
                ))
            })?,
            None => task.await,
        };
        let extracted = joined
            .map_err(|e| ExtractError::ExtractionFailed(format!("extraction task failed: {e}")))??;
        Ok(extracted)
    }

    async fn resolve_fetched(
        &self,
        results: Vec<RankedResult>,
        options: &ResolveOptions,
    ) -> Resolution {
        if results.is_empty() {
            return Resolution::default();
        }

        let started = Instant::now();
        let deadline = started + options.total_budget;
        let workers = results.len().min(self.max_in_flight);
        let semaphore = Semaphore::new(workers);
        let seen: Mutex<HashSet<String>> = Mutex::new(HashSet::new());
        let mut outcomes: Vec<Option<FetchOutcome>> = vec![None; results.len()];

        let mut pending: FuturesUnordered<_> = results
            .iter()
            .enumerate()
            .map(|(index, ranked)| {
                let semaphore = &semaphore;
                let seen = &seen;
                async move {
                    let (outcome, budget_hit) = self
                        .resolve_one(
                            &ranked.hit.url,
                            semaphore,
                            seen,
                            deadline,
                            options.per_result_timeout,
                        )
                        .await;
                    (index, outcome, budget_hit)
                }
            })
            .collect();

        let mut budget_hit = false;
        let budget = tokio::time::sleep_until(deadline);
        tokio::pin!(budget);
        loop {
            tokio::select! {
                biased;
                next = pending.next() => match next {
                    Some((index, outcome, hit)) => {
                        budget_hit |= hit;
                        outcomes[index] = Some(outcome);
                    }
                    None => break,
                },
                () = &mut budget => break,
            }
        }
        // dropping the set cancels every fetch still in flight
        drop(pending);

        let outstanding = outcomes.iter().filter(|o| o.is_none()).count();
        let budget_expired = outstanding > 0 || budget_hit;
        if budget_expired {
            warn!(
                outstanding,
                budget_ms = options.total_budget.as_millis() as u64,
                "Fetch budget expired"
            );
            self.events.try_emit(
                names::FETCH_BUDGET_EXPIRED,
                Some(json!({
                    "outstanding": outstanding,
                    "budget_ms": options.total_budget.as_millis() as u64,
                })),
            );
        }
        debug!(
            results = results.len(),
            workers,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Resolved content"
        );

        let results = results
            .into_iter()
            .zip(outcomes)
            .map(|(ranked, outcome)| {
                let outcome = outcome.unwrap_or_else(|| {
                    FetchOutcome::failed(FetchStatus::Timeout, "total fetch budget expired")
                });
                self.merge(ranked, outcome)
            })
            .collect();

        Resolution {
            results,
            budget_expired,
        }
    }

    async fn resolve_one(
        &self,
        url: &str,
        semaphore: &Semaphore,
        seen: &Mutex<HashSet<String>>,
        deadline: Instant,
        per_result_timeout: Option<Duration>,
    ) -> (FetchOutcome, bool) {
        let Ok(_permit) = semaphore.acquire().await else {
            return (FetchOutcome::failed(FetchStatus::NetworkError, "fetch pool closed"), false);
        };
        let remaining = deadline.saturating_duration_since(Instant::now());
        // a timeout bounded by the remaining budget means the budget ran out
        let budget_bound = per_result_timeout.map_or(true, |t| t >= remaining);
        let timeout = per_result_timeout.map_or(remaining, |t| t.min(remaining));

        match self.fetch_and_extract(url, timeout).await {
            Ok(extracted) => {
                if self.options.deduplicate && !seen.lock().insert(extracted.markdown.clone()) {
                    let outcome = FetchOutcome::failed(
                        FetchStatus::ExtractFailed,
                        ExtractError::Duplicate.to_string(),
                    );
                    return (outcome, false);
                }
                (FetchOutcome::ok(extracted.markdown), false)
            }
            Err(e) => {
                let status = status_for(&e);
                (
                    FetchOutcome::failed(status, e.to_string()),
                    budget_bound && status == FetchStatus::Timeout,
                )
            }
        }
    }

    fn merge(&self, ranked: RankedResult, outcome: FetchOutcome) -> ResolvedResult {
        match outcome {
            FetchOutcome {
                status: FetchStatus::Ok,
                content: Some(content),
                ..
            } => ResolvedResult {
                ranked,
                content,
                source: ContentSource::Fetched,
                truncated: false,
                fetch_status: Some(FetchStatus::Ok),
                fetch_error: None,
            },
            FetchOutcome { status, detail, .. } => {
                self.events.try_emit(
                    names::FETCH_DEGRADED,
                    Some(json!({
                        "url": ranked.hit.url,
                        "status": status.as_str(),
                        "detail": detail,
                    })),
                );
                debug!(url = %ranked.hit.url, status = status.as_str(), "Falling back to snippet");
                let mut resolved = ResolvedResult::from_snippet(ranked);
                resolved.fetch_status = Some(status);
                resolved.fetch_error = detail;
                resolved
            }
        }
    }
}

impl std::fmt::Debug for FetchOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchOrchestrator")
            .field("options", &self.options)
            .field("max_in_flight", &self.max_in_flight)
            .finish_non_exhaustive()
    }
}

/// Maps a fetch/extract failure onto an outcome status.
fn status_for(error: &PowerSearchError) -> FetchStatus {
    match error {
        PowerSearchError::Fetch(FetchError::Timeout { .. }) => FetchStatus::Timeout,
        PowerSearchError::Fetch(FetchError::Blocked { .. }) => FetchStatus::Blocked,
        PowerSearchError::Extract(ExtractError::TooShort { .. }) => FetchStatus::TooShort,
        PowerSearchError::Extract(_) => FetchStatus::ExtractFailed,
        _ => FetchStatus::NetworkError,
    }
}
