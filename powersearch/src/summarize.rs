//! Search-then-summarize over a sequential sampling capability.
//!
//! A run searches, caps the results and either issues one sampling call or
//! map-reduces: one call per chunk of results, strictly one at a time, then
//! a reduce call over the chunk summaries. Runs are cancellable and report
//! progress over a channel.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cancellation::CancellationToken;
use crate::config::SummarySettings;
use crate::errors::{PowerSearchError, Result, SamplingError};
use crate::events::{names, NoOpEventSink, SharedEventSink};
use crate::models::{truncate_chars, SearchResultRecord};
use crate::pipeline::PowerSearch;

const SYSTEM_PROMPT: &str = "You summarize web search results for an AI agent. \
Stay factually accurate and cite sources as markdown links to the provided URLs. \
Be concise and actionable. Point out where sources disagree. \
Never invent facts or sources.";

const RESULTS_FORMAT: &str = "The search results are a JSON document under \"search-results\"; \
each item has a result number, url, title and markdown content.";

const SUMMARY_INSTRUCTION: &str = "Write one markdown summary covering all results, \
with inline markdown citations linking to the provided URLs.";

const CHUNK_INSTRUCTION: &str = "Summarize this subset of the search results as one markdown answer, \
with inline markdown citations linking to the provided URLs.";

const REDUCE_INSTRUCTION: &str = "Combine the partial summaries below into one concise markdown answer. \
Keep or restore the markdown citations linking to the search result URLs.";

/// One call to the sampling capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingRequest {
    /// System prompt.
    pub system_prompt: String,
    /// User prompt.
    pub prompt: String,
    /// Sampling temperature.
    pub temperature: f64,
    /// Token cap for the reply.
    pub max_tokens: Option<u32>,
}

/// Text generation capability used for summaries.
///
/// Implementations may assume at most one call is in flight per
/// orchestrator.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Sampler: Send + Sync {
    /// Generates text for `request`.
    async fn sample(&self, request: SamplingRequest) -> std::result::Result<String, SamplingError>;
}

/// Parameters of one summarization run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryRequest {
    /// Search query.
    pub query: String,
    /// What the caller wants to learn.
    pub intent: String,
    /// Optional recency restriction.
    pub time_range: Option<String>,
    /// Results to summarize; unset or 0 means the ranking top-K.
    pub max_results: Option<usize>,
    /// Summarize chunk by chunk, then reduce.
    pub map_reduce: bool,
    /// Results per map-reduce chunk; unset or 0 means the configured size.
    #[serde(default)]
    pub chunk_size: Option<usize>,
}

impl SummaryRequest {
    /// Creates a single-pass request.
    #[must_use]
    pub fn new(query: impl Into<String>, intent: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            intent: intent.into(),
            time_range: None,
            max_results: None,
            map_reduce: false,
            chunk_size: None,
        }
    }

    /// Sets the time range.
    #[must_use]
    pub fn with_time_range(mut self, time_range: impl Into<String>) -> Self {
        self.time_range = Some(time_range.into());
        self
    }

    /// Caps the summarized results.
    #[must_use]
    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = Some(max_results);
        self
    }

    /// Enables map-reduce.
    #[must_use]
    pub fn with_map_reduce(mut self, map_reduce: bool) -> Self {
        self.map_reduce = map_reduce;
        self
    }

    /// Overrides the chunk size for this run.
    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = Some(chunk_size);
        self
    }
}

/// Outcome of a summarization run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryResult {
    /// Markdown summary.
    pub summary: String,
    /// URLs of the summarized results.
    pub sources: Vec<String>,
    /// Set when the run was cancelled or the reduce pass failed.
    pub partial: bool,
    /// 1-based indexes of chunks whose summarization failed.
    pub failed_chunks: Vec<usize>,
}

/// Progress of a summarization run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum SummaryProgress {
    /// Running the search pipeline.
    Searching,
    /// Sampling; `chunks_done` of `chunks_total` finished.
    Summarizing {
        /// Completed chunk calls.
        chunks_done: usize,
        /// Total chunk calls.
        chunks_total: usize,
    },
    /// Running the reduce call.
    Reducing,
    /// Finished.
    Completed,
    /// Stopped by cancellation.
    Cancelled,
}

/// Handle to a spawned summarization run.
#[derive(Debug)]
pub struct SummaryTask {
    token: CancellationToken,
    progress: mpsc::UnboundedReceiver<SummaryProgress>,
    handle: JoinHandle<Result<SummaryResult>>,
}

impl SummaryTask {
    /// Requests cancellation; the run returns what it has so far.
    pub fn cancel(&self, reason: impl Into<String>) {
        self.token.cancel(reason);
    }

    /// The run's cancellation token.
    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Next progress event, or `None` once the run has finished.
    pub async fn next_progress(&mut self) -> Option<SummaryProgress> {
        self.progress.recv().await
    }

    /// Waits for the run to finish.
    pub async fn join(self) -> Result<SummaryResult> {
        self.handle
            .await
            .map_err(|e| PowerSearchError::Internal(format!("summary task failed: {e}")))?
    }
}

/// A capped record with its citation number.
#[derive(Debug, Clone)]
struct Numbered<'a> {
    ordinal: usize,
    record: &'a SearchResultRecord,
}

/// Runs searches and summarizes them.
pub struct SummarizationOrchestrator {
    search: Arc<PowerSearch>,
    sampler: Arc<dyn Sampler>,
    settings: SummarySettings,
    slot: Semaphore,
    events: SharedEventSink,
}

impl SummarizationOrchestrator {
    /// Creates an orchestrator using the pipeline's summary settings.
    #[must_use]
    pub fn new(search: Arc<PowerSearch>, sampler: Arc<dyn Sampler>) -> Self {
        let settings = search.config().summary.clone();
        Self {
            search,
            sampler,
            settings,
            slot: Semaphore::new(1),
            events: Arc::new(NoOpEventSink),
        }
    }

    /// Overrides the summary settings.
    #[must_use]
    pub fn with_settings(mut self, settings: SummarySettings) -> Self {
        self.settings = settings;
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, events: SharedEventSink) -> Self {
        self.events = events;
        self
    }

    /// Spawns a run on the current runtime.
    #[must_use]
    pub fn spawn(self: &Arc<Self>, request: SummaryRequest) -> SummaryTask {
        let token = CancellationToken::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let this = Arc::clone(self);
        let run_token = token.clone();
        let handle =
            tokio::spawn(async move { this.summarize(&request, &run_token, Some(&tx)).await });
        SummaryTask {
            token,
            progress: rx,
            handle,
        }
    }

    /// Runs a summarization to completion or cancellation.
    ///
    /// Search failures propagate. A failed chunk call is replaced by the
    /// chunk's raw content; cancellation returns a partial result.
    pub async fn summarize(
        &self,
        request: &SummaryRequest,
        token: &CancellationToken,
        progress: Option<&mpsc::UnboundedSender<SummaryProgress>>,
    ) -> Result<SummaryResult> {
        let report = |event: SummaryProgress| {
            if let Some(tx) = progress {
                // receiver may be gone; progress is best-effort
                let _ = tx.send(event);
            }
        };

        report(SummaryProgress::Searching);
        if token.is_cancelled() {
            return Ok(self.cancelled(token, &report, String::new(), Vec::new(), Vec::new()));
        }

        let pipeline = tokio::select! {
            biased;
            () = token.cancelled() => {
                return Ok(self.cancelled(token, &report, String::new(), Vec::new(), Vec::new()));
            }
            result = self.search.search(&request.query, request.time_range.as_deref()) => result?,
        };

        let records = pipeline.records();
        if records.is_empty() {
            warn!(query = %request.query, "Search returned no results, summary is empty");
            report(SummaryProgress::Completed);
            return Ok(SummaryResult::default());
        }

        let max_results = request
            .max_results
            .filter(|&n| n > 0)
            .unwrap_or(self.search.config().ranking.top_k);
        let capped = cap_records(&records, max_results, self.settings.content_limit);
        let sources: Vec<String> = capped.iter().map(|r| r.url.clone()).collect();
        let numbered = number(&capped);
        let chunk_size = request
            .chunk_size
            .filter(|&n| n > 0)
            .unwrap_or(self.settings.chunk_size)
            .max(1);

        let single_prompt = single_prompt(request, &numbered)?;
        let over_budget = single_prompt.chars().count() > self.settings.input_budget_chars;
        let use_map_reduce = capped.len() > chunk_size && (request.map_reduce || over_budget);
        debug!(results = capped.len(), use_map_reduce, over_budget, "Summarizing search results");

        if !use_map_reduce {
            report(SummaryProgress::Summarizing {
                chunks_done: 0,
                chunks_total: 1,
            });
            let Some(summary) = self.sample_or_cancel(single_prompt, token).await? else {
                return Ok(self.cancelled(token, &report, String::new(), sources, Vec::new()));
            };
            report(SummaryProgress::Summarizing {
                chunks_done: 1,
                chunks_total: 1,
            });
            report(SummaryProgress::Completed);
            return Ok(SummaryResult {
                summary: summary.trim().to_string(),
                sources,
                partial: false,
                failed_chunks: Vec::new(),
            });
        }

        let chunks: Vec<&[Numbered<'_>]> = numbered.chunks(chunk_size).collect();
        let chunks_total = chunks.len();
        let mut partials: Vec<String> = Vec::with_capacity(chunks_total);
        let mut failed_chunks = Vec::new();
        report(SummaryProgress::Summarizing {
            chunks_done: 0,
            chunks_total,
        });

        for (index, chunk) in chunks.iter().enumerate() {
            let chunk_number = index + 1;
            if token.is_cancelled() {
                break;
            }
            let prompt = chunk_prompt(request, chunk)?;
            match self.sample_or_cancel(prompt, token).await {
                Ok(Some(summary)) => partials.push(summary),
                Ok(None) => break,
                Err(e) => {
                    warn!(
                        chunk = chunk_number,
                        chunks_total,
                        error = %e,
                        "Chunk summary failed, using raw content"
                    );
                    self.events.try_emit(
                        names::SUMMARY_CHUNK_FAILED,
                        Some(json!({
                            "chunk": chunk_number,
                            "chunks_total": chunks_total,
                            "error": e.to_string(),
                        })),
                    );
                    failed_chunks.push(chunk_number);
                    partials.push(raw_chunk(chunk));
                }
            }
            report(SummaryProgress::Summarizing {
                chunks_done: chunk_number,
                chunks_total,
            });
        }

        if token.is_cancelled() {
            let summary = join_partials(&partials);
            return Ok(self.cancelled(token, &report, summary, sources, failed_chunks));
        }

        report(SummaryProgress::Reducing);
        let reduce_prompt = reduce_prompt(request, &partials);
        let summary = match self.sample_or_cancel(reduce_prompt, token).await {
            Ok(Some(summary)) => summary,
            Ok(None) => {
                let summary = join_partials(&partials);
                return Ok(self.cancelled(token, &report, summary, sources, failed_chunks));
            }
            Err(e) => {
                warn!(error = %e, "Reduce pass failed, returning chunk summaries");
                report(SummaryProgress::Completed);
                return Ok(SummaryResult {
                    summary: join_partials(&partials),
                    sources,
                    partial: true,
                    failed_chunks,
                });
            }
        };

        info!(chunks_total, failed = failed_chunks.len(), "Map-reduce summary completed");
        report(SummaryProgress::Completed);
        Ok(SummaryResult {
            summary: summary.trim().to_string(),
            sources,
            partial: false,
            failed_chunks,
        })
    }

    /// Samples while holding the single slot; `None` when cancelled first.
    async fn sample_or_cancel(
        &self,
        prompt: String,
        token: &CancellationToken,
    ) -> std::result::Result<Option<String>, SamplingError> {
        let request = SamplingRequest {
            system_prompt: SYSTEM_PROMPT.to_string(),
            prompt,
            temperature: self.settings.temperature,
            max_tokens: self.settings.max_tokens,
        };

        tokio::select! {
            biased;
            () = token.cancelled() => Ok(None),
            sampled = async {
                match self.slot.acquire().await {
                    Ok(_slot) => self.sampler.sample(request).await,
                    Err(_) => Err(SamplingError::Unavailable("sampling slot closed".to_string())),
                }
            } => sampled.map(Some),
        }
    }

    fn cancelled<F: Fn(SummaryProgress)>(
        &self,
        token: &CancellationToken,
        report: &F,
        summary: String,
        sources: Vec<String>,
        failed_chunks: Vec<usize>,
    ) -> SummaryResult {
        let reason = token.reason().unwrap_or_default();
        info!(reason = %reason, "Summary cancelled, returning partial result");
        self.events.try_emit(names::SUMMARY_CANCELLED, Some(json!({ "reason": reason })));
        report(SummaryProgress::Cancelled);
        SummaryResult {
            summary,
            sources,
            partial: true,
            failed_chunks,
        }
    }
}

impl std::fmt::Debug for SummarizationOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SummarizationOrchestrator")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

fn cap_records(
    records: &[SearchResultRecord],
    max_results: usize,
    content_limit: Option<usize>,
) -> Vec<SearchResultRecord> {
    records
        .iter()
        .take(max_results)
        .map(|record| SearchResultRecord {
            title: record.title.clone(),
            url: record.url.clone(),
            content: match content_limit {
                Some(limit) => truncate_chars(&record.content, limit).0,
                None => record.content.clone(),
            },
        })
        .collect()
}

/// Assigns 1-based ordinals that stay fixed across chunks.
fn number(records: &[SearchResultRecord]) -> Vec<Numbered<'_>> {
    records
        .iter()
        .enumerate()
        .map(|(i, record)| Numbered {
            ordinal: i + 1,
            record,
        })
        .collect()
}

fn render_results(results: &[Numbered<'_>]) -> Result<String> {
    let items: Vec<serde_json::Value> = results
        .iter()
        .map(|n| {
            json!({
                "result": n.ordinal,
                "url": n.record.url,
                "title": n.record.title,
                "content": n.record.content,
            })
        })
        .collect();
    Ok(serde_json::to_string_pretty(&json!({ "search-results": items }))?)
}

/// Stand-in for a failed chunk summary.
fn raw_chunk(chunk: &[Numbered<'_>]) -> String {
    chunk
        .iter()
        .map(|n| {
            format!(
                "[{}] [{}]({})\n{}",
                n.ordinal, n.record.title, n.record.url, n.record.content
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn join_partials(partials: &[String]) -> String {
    partials
        .iter()
        .enumerate()
        .map(|(i, summary)| format!("Chunk {}:\n{}", i + 1, summary.trim()))
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn single_prompt(request: &SummaryRequest, results: &[Numbered<'_>]) -> Result<String> {
    Ok(format!(
        "Query: {}\nIntent: {}\n{RESULTS_FORMAT}\n{SUMMARY_INSTRUCTION}\n\n{}",
        request.query,
        request.intent,
        render_results(results)?
    ))
}

fn chunk_prompt(request: &SummaryRequest, chunk: &[Numbered<'_>]) -> Result<String> {
    Ok(format!(
        "Query: {}\nIntent: {}\n{RESULTS_FORMAT}\n{CHUNK_INSTRUCTION}\n\n{}",
        request.query,
        request.intent,
        render_results(chunk)?
    ))
}

fn reduce_prompt(request: &SummaryRequest, partials: &[String]) -> String {
    format!(
        "Query: {}\nIntent: {}\n{SUMMARY_INSTRUCTION}\n{REDUCE_INSTRUCTION}\n\n{}",
        request.query,
        request.intent,
        join_partials(partials)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PowerSearchConfig;
    use crate::events::CollectingEventSink;
    use crate::models::ContentStrategy;
    use crate::testing::{
        hits, PassthroughExtractor, ScriptedBackend, ScriptedFetcher, ScriptedSampler,
    };
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn search(n: usize) -> Arc<PowerSearch> {
        let config = PowerSearchConfig::new()
            .with_percentile(None)
            .with_top_k(10)
            .with_strategy(ContentStrategy::Quick);
        Arc::new(
            PowerSearch::builder(config)
                .with_backend(Arc::new(ScriptedBackend::new(hits(n))))
                .with_fetcher(Arc::new(ScriptedFetcher::new()))
                .with_extractor(Arc::new(PassthroughExtractor))
                .with_cache(None)
                .build()
                .unwrap(),
        )
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<SummaryProgress>) -> Vec<SummaryProgress> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_single_pass_issues_one_call() {
        let mut sampler = MockSampler::new();
        sampler
            .expect_sample()
            .times(1)
            .withf(|req: &SamplingRequest| {
                req.system_prompt == SYSTEM_PROMPT
                    && req.temperature == 0.0
                    && req.max_tokens == Some(800)
                    && req.prompt.contains("\"search-results\"")
                    && req.prompt.contains("Intent: compare runtimes")
            })
            .returning(|_| Ok("  combined answer \n".to_string()));

        let orch = SummarizationOrchestrator::new(search(3), Arc::new(sampler));
        let result = orch
            .summarize(
                &SummaryRequest::new("rust async", "compare runtimes"),
                &CancellationToken::new(),
                None,
            )
            .await
            .unwrap();

        assert_eq!(result.summary, "combined answer");
        assert_eq!(result.sources.len(), 3);
        assert!(!result.partial);
    }

    #[tokio::test]
    async fn test_map_reduce_with_failed_chunk() {
        let sampler = Arc::new(ScriptedSampler::new().failing_calls(&[2]));
        let events = Arc::new(CollectingEventSink::new());
        let orch = SummarizationOrchestrator::new(search(9), sampler.clone())
            .with_event_sink(events.clone());
        let (tx, mut rx) = mpsc::unbounded_channel();

        let result = orch
            .summarize(
                &SummaryRequest::new("rust", "overview").with_map_reduce(true),
                &CancellationToken::new(),
                Some(&tx),
            )
            .await
            .unwrap();

        let requests = sampler.requests();
        assert_eq!(requests.len(), 4);
        assert!(requests[0].prompt.contains("\"result\": 1"));
        assert!(requests[1].prompt.contains("\"result\": 5"));
        assert!(requests[2].prompt.contains("\"result\": 9"));
        assert!(!requests[2].prompt.contains("\"result\": 8"));

        let reduce = &requests[3].prompt;
        assert!(reduce.contains("Chunk 1:\nsummary 1"));
        assert!(reduce.contains("Chunk 3:\nsummary 3"));
        assert!(reduce.contains("snippet 4"));
        assert!(reduce.contains("snippet 7"));
        assert!(reduce.contains("https://example.com/4"));

        assert_eq!(result.summary, "summary 4");
        assert_eq!(result.failed_chunks, vec![2]);
        assert!(!result.partial);
        assert_eq!(result.sources.len(), 9);
        assert_eq!(events.events_of_type(names::SUMMARY_CHUNK_FAILED).len(), 1);

        assert_eq!(
            drain(&mut rx),
            vec![
                SummaryProgress::Searching,
                SummaryProgress::Summarizing { chunks_done: 0, chunks_total: 3 },
                SummaryProgress::Summarizing { chunks_done: 1, chunks_total: 3 },
                SummaryProgress::Summarizing { chunks_done: 2, chunks_total: 3 },
                SummaryProgress::Summarizing { chunks_done: 3, chunks_total: 3 },
                SummaryProgress::Reducing,
                SummaryProgress::Completed,
            ]
        );
    }

    #[tokio::test]
    async fn test_map_reduce_skipped_when_results_fit_one_chunk() {
        let sampler = Arc::new(ScriptedSampler::new());
        let orch = SummarizationOrchestrator::new(search(3), sampler.clone());
        orch.summarize(
            &SummaryRequest::new("rust", "overview").with_map_reduce(true),
            &CancellationToken::new(),
            None,
        )
        .await
        .unwrap();
        assert_eq!(sampler.call_count(), 1);
    }

    #[tokio::test]
    async fn test_input_budget_forces_map_reduce() {
        let sampler = Arc::new(ScriptedSampler::new());
        let settings = SummarySettings {
            input_budget_chars: 200,
            ..SummarySettings::default()
        };
        let orch =
            SummarizationOrchestrator::new(search(6), sampler.clone()).with_settings(settings);
        orch.summarize(&SummaryRequest::new("rust", "overview"), &CancellationToken::new(), None)
            .await
            .unwrap();
        // two chunks plus the reduce call
        assert_eq!(sampler.call_count(), 3);
    }

    #[tokio::test]
    async fn test_max_results_and_content_limit() {
        let sampler = Arc::new(ScriptedSampler::new());
        let settings = SummarySettings {
            content_limit: Some(4),
            ..SummarySettings::default()
        };
        let orch =
            SummarizationOrchestrator::new(search(8), sampler.clone()).with_settings(settings);
        let result = orch
            .summarize(
                &SummaryRequest::new("rust", "overview").with_max_results(2),
                &CancellationToken::new(),
                None,
            )
            .await
            .unwrap();

        assert_eq!(result.sources, vec!["https://example.com/0", "https://example.com/1"]);
        let prompt = &sampler.requests()[0].prompt;
        assert!(prompt.contains("\"content\": \"snip\""));
        assert!(!prompt.contains("snippet 0"));
    }

    #[tokio::test]
    async fn test_zero_max_results_means_top_k() {
        let sampler = Arc::new(ScriptedSampler::new());
        let orch = SummarizationOrchestrator::new(search(8), sampler.clone());
        let result = orch
            .summarize(
                &SummaryRequest::new("rust", "overview").with_max_results(0),
                &CancellationToken::new(),
                None,
            )
            .await
            .unwrap();
        assert_eq!(result.sources.len(), 8);
    }

    #[tokio::test]
    async fn test_request_chunk_size_overrides_settings() {
        let sampler = Arc::new(ScriptedSampler::new());
        let orch = SummarizationOrchestrator::new(search(9), sampler.clone());
        let request = SummaryRequest::new("rust", "overview")
            .with_map_reduce(true)
            .with_chunk_size(5);
        let (tx, mut rx) = mpsc::unbounded_channel();
        orch.summarize(&request, &CancellationToken::new(), Some(&tx))
            .await
            .unwrap();

        // two chunks of 5 and 4 plus the reduce call; the default size of 4 would give three
        assert_eq!(sampler.call_count(), 3);
        assert!(drain(&mut rx).contains(&SummaryProgress::Summarizing {
            chunks_done: 2,
            chunks_total: 2,
        }));

        let sampler = Arc::new(ScriptedSampler::new());
        let orch = SummarizationOrchestrator::new(search(9), sampler.clone());
        let request = SummaryRequest::new("rust", "overview")
            .with_map_reduce(true)
            .with_chunk_size(0);
        orch.summarize(&request, &CancellationToken::new(), None)
            .await
            .unwrap();
        assert_eq!(sampler.call_count(), 4);
    }

    #[tokio::test]
    async fn test_empty_results_skip_sampling() {
        let sampler = Arc::new(ScriptedSampler::new());
        let orch = SummarizationOrchestrator::new(search(0), sampler.clone());
        let result = orch
            .summarize(&SummaryRequest::new("rust", "overview"), &CancellationToken::new(), None)
            .await
            .unwrap();
        assert_eq!(result, SummaryResult::default());
        assert_eq!(sampler.call_count(), 0);
    }

    #[tokio::test]
    async fn test_cancellation_returns_partial() {
        let sampler = Arc::new(ScriptedSampler::new().with_delay(Duration::from_millis(100)));
        let events = Arc::new(CollectingEventSink::new());
        let orch = Arc::new(
            SummarizationOrchestrator::new(search(9), sampler.clone())
                .with_event_sink(events.clone()),
        );
        let mut task = orch.spawn(SummaryRequest::new("rust", "overview").with_map_reduce(true));

        while let Some(event) = task.next_progress().await {
            if event
                == (SummaryProgress::Summarizing {
                    chunks_done: 1,
                    chunks_total: 3,
                })
            {
                task.cancel("caller went away");
                break;
            }
        }
        let result = task.join().await.unwrap();

        assert!(result.partial);
        assert!(result.summary.contains("summary 1"));
        assert!(sampler.call_count() <= 2);
        assert!(sampler
            .requests()
            .iter()
            .all(|r| !r.prompt.contains("Combine the partial summaries")));
        assert_eq!(events.events_of_type(names::SUMMARY_CANCELLED).len(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let sampler = Arc::new(ScriptedSampler::new());
        let orch = SummarizationOrchestrator::new(search(3), sampler.clone());
        let token = CancellationToken::new();
        token.cancel("not needed");

        let result = orch
            .summarize(&SummaryRequest::new("rust", "overview"), &token, None)
            .await
            .unwrap();
        assert!(result.partial);
        assert_eq!(sampler.call_count(), 0);
    }

    #[tokio::test]
    async fn test_sampling_is_sequential_across_runs() {
        let sampler = Arc::new(ScriptedSampler::new().with_delay(Duration::from_millis(20)));
        let orch = Arc::new(SummarizationOrchestrator::new(search(9), sampler.clone()));

        let first = orch.spawn(SummaryRequest::new("rust", "a").with_map_reduce(true));
        let second = orch.spawn(SummaryRequest::new("tokio", "b").with_map_reduce(true));
        first.join().await.unwrap();
        second.join().await.unwrap();

        assert_eq!(sampler.call_count(), 8);
        assert_eq!(sampler.max_in_flight(), 1);
    }

    #[tokio::test]
    async fn test_single_pass_failure_propagates() {
        let sampler = Arc::new(ScriptedSampler::new().failing_calls(&[1]));
        let orch = SummarizationOrchestrator::new(search(2), sampler);
        let err = orch
            .summarize(&SummaryRequest::new("rust", "overview"), &CancellationToken::new(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, PowerSearchError::Summarize(_)));
    }

    #[test]
    fn test_progress_serializes_with_stage_tag() {
        let value = serde_json::to_value(SummaryProgress::Summarizing {
            chunks_done: 1,
            chunks_total: 3,
        })
        .unwrap();
        assert_eq!(value, json!({ "stage": "summarizing", "chunks_done": 1, "chunks_total": 3 }));
    }
}
