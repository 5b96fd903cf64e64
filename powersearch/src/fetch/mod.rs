//! Content resolution: fetching pages, extracting markdown and orchestrating
//! both across a ranked result set.

mod extractor;
mod fetcher;
mod orchestrator;

pub use extractor::{clean_markdown, ContentExtractor, Extracted, PageMetadata};
#[cfg(feature = "http")]
pub use extractor::HtmlExtractor;
pub use fetcher::{ContentFetcher, BLOCKED_STATUSES};
#[cfg(feature = "http")]
pub use fetcher::HttpFetcher;
pub use orchestrator::{FetchOrchestrator, Resolution, ResolveOptions};
