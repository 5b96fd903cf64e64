//! JSON client for a SearXNG-compatible meta-search backend.

use async_trait::async_trait;
use std::collections::HashSet;
use tracing::{debug, warn};
use url::Url;

use super::SearchBackend;
use crate::config::SearchSettings;
use crate::errors::{ConfigError, PowerSearchError, Result};
use crate::models::{Query, RawHit};

/// Derives the search endpoint from a base URL, appending `/search` when the
/// path does not already end with it.
pub fn search_endpoint(base_url: &str) -> std::result::Result<Url, ConfigError> {
    let trimmed = base_url.trim().trim_end_matches('/');
    let full = if trimmed.ends_with("/search") {
        trimmed.to_string()
    } else {
        format!("{trimmed}/search")
    };
    Url::parse(&full).map_err(|e| ConfigError::invalid("search.base_url", e.to_string()))
}

/// HTTP client for the upstream backend.
#[derive(Debug, Clone)]
pub struct SearxngClient {
    client: reqwest::Client,
    endpoint: Url,
}

impl SearxngClient {
    /// Builds a client from settings.
    pub fn new(settings: &SearchSettings) -> std::result::Result<Self, ConfigError> {
        let client = reqwest::Client::builder()
            .timeout(settings.request_timeout())
            .danger_accept_invalid_certs(!settings.verify_tls)
            .user_agent(concat!("powersearch/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| {
                ConfigError::invalid("search", format!("failed to build HTTP client: {e}"))
            })?;
        Ok(Self::with_client(client, search_endpoint(&settings.base_url)?))
    }

    /// Uses a caller-supplied `reqwest::Client`.
    #[must_use]
    pub fn with_client(client: reqwest::Client, endpoint: Url) -> Self {
        Self { client, endpoint }
    }

    /// The resolved endpoint.
    #[must_use]
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn params(query: &Query, page: u32) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("q", query.text.clone()),
            ("format", "json".to_string()),
            ("language", query.language.clone()),
            ("safesearch", query.safe_search.to_string()),
            ("pageno", page.to_string()),
        ];
        if !query.engines.is_empty() {
            params.push(("engines", query.engines.join(",")));
        }
        if let Some(range) = query.time_range {
            params.push(("time_range", range.as_str().to_string()));
        }
        params
    }

    async fn fetch_page(&self, query: &Query, page: u32) -> Result<Vec<serde_json::Value>> {
        let response = self
            .client
            .get(self.endpoint.clone())
            .query(&Self::params(query, page))
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        if !status.is_success() {
            let code = status.as_u16();
            let message = format!("search backend returned {status}");
            return Err(if code == 429 || status.is_server_error() {
                PowerSearchError::upstream_transient(message, Some(code))
            } else {
                PowerSearchError::upstream_permanent(message, Some(code))
            });
        }

        let body = response.text().await.map_err(classify_transport)?;
        let document: serde_json::Value = serde_json::from_str(&body).map_err(|e| {
            PowerSearchError::upstream_permanent(
                format!("invalid JSON from search backend: {e}"),
                None,
            )
        })?;

        match document.get("results") {
            Some(serde_json::Value::Array(results)) => Ok(results.clone()),
            _ => Err(PowerSearchError::upstream_permanent(
                "search backend response has no 'results' array",
                None,
            )),
        }
    }
}

fn classify_transport(e: reqwest::Error) -> PowerSearchError {
    if e.is_timeout() || e.is_connect() || e.is_request() {
        PowerSearchError::upstream_transient(e.to_string(), None)
    } else {
        PowerSearchError::upstream_permanent(e.to_string(), e.status().map(|s| s.as_u16()))
    }
}

/// Converts one JSON result into a hit; results without a URL are skipped.
fn parse_hit(value: &serde_json::Value) -> Option<RawHit> {
    let url = value.get("url")?.as_str()?.trim();
    if url.is_empty() {
        return None;
    }
    let text = |field: &str| {
        value
            .get(field)
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default()
            .trim()
            .to_string()
    };
    let score = value
        .get("score")
        .and_then(serde_json::Value::as_f64)
        .filter(|s| s.is_finite())
        .unwrap_or(0.0);

    let mut hit = RawHit::new(url, text("title"), score).with_snippet(text("content"));
    if let Some(engine) = value.get("engine").and_then(serde_json::Value::as_str) {
        hit = hit.with_engine(engine);
    }
    Some(hit)
}

#[async_trait]
impl SearchBackend for SearxngClient {
    async fn search(&self, query: &Query) -> Result<Vec<RawHit>> {
        let mut seen = HashSet::new();
        let mut hits = Vec::new();

        for page in 1..=query.page_count.max(1) {
            let results = self.fetch_page(query, page).await?;
            debug!(page, results = results.len(), "Fetched search page");
            for hit in results.iter().filter_map(parse_hit) {
                if seen.insert(hit.url.clone()) {
                    let position = hits.len();
                    hits.push(hit.with_position(position));
                }
            }
        }

        if hits.is_empty() {
            warn!(query = %query.text, "Search backend returned no results");
        }
        Ok(hits)
    }

    fn name(&self) -> &str {
        "searxng"
    }
}
