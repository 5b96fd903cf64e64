//! # PowerSearch
//!
//! Turns a natural-language query into a bounded set of ranked, cleaned,
//! citation-ready passages for an automated agent.
//!
//! The pipeline:
//!
//! - **Search**: dispatches the query to a meta-search backend, with retry
//!   and exponential backoff on transient failures
//! - **Ranking**: drops hits below a score percentile and keeps the top-K
//! - **Fetch**: fetches and extracts each page under a total time budget,
//!   degrading to the snippet when a page fails
//! - **Cache**: memoizes complete runs in a pluggable store
//! - **Summarize**: optional chunked, sequential summarization with
//!   progress reporting and cancellation
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use powersearch::prelude::*;
//!
//! let config = PowerSearchConfig::from_env()?;
//! let search = PowerSearch::new(config)?;
//!
//! let result = search.search("rust async runtimes", Some("year")).await?;
//! for record in result.records() {
//!     println!("{} {}", record.title, record.url);
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]

pub mod cache;
pub mod cancellation;
pub mod config;
pub mod errors;
pub mod events;
pub mod fetch;
pub mod models;
pub mod observability;
pub mod pipeline;
pub mod ranking;
pub mod retry;
pub mod search;
pub mod summarize;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cache::{CacheKey, CacheSelector, CacheStore, ResponseCache};
    pub use crate::cancellation::CancellationToken;
    pub use crate::config::{ExtractionOptions, PowerSearchConfig};
    pub use crate::errors::{PowerSearchError, Result, Stage};
    pub use crate::events::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::fetch::{ContentExtractor, ContentFetcher, FetchOrchestrator};
    pub use crate::models::{
        ContentStrategy, FetchStatus, PipelineResult, Query, RawHit, ResolvedResult,
        SearchResultRecord, TimeRange,
    };
    pub use crate::observability::init_tracing;
    pub use crate::pipeline::PowerSearch;
    pub use crate::retry::RetryConfig;
    pub use crate::search::SearchBackend;
    pub use crate::summarize::{
        Sampler, SamplingRequest, SummarizationOrchestrator, SummaryProgress, SummaryRequest,
        SummaryResult, SummaryTask,
    };
}
