//! Page fetching.

use async_trait::async_trait;
use std::time::Duration;

use crate::errors::FetchError;

/// Fetches raw page HTML.
#[async_trait]
pub trait ContentFetcher: Send + Sync {
    /// Fetches `url`, giving up after `timeout`.
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<String, FetchError>;
}

/// Statuses a site uses to refuse automated clients.
pub const BLOCKED_STATUSES: &[u16] = &[401, 403, 429, 451];

#[cfg(feature = "http")]
pub use http::HttpFetcher;

#[cfg(feature = "http")]
mod http {
    use async_trait::async_trait;
    use rand::seq::SliceRandom;
    use std::time::Duration;
    use tracing::debug;

    use super::{ContentFetcher, BLOCKED_STATUSES};
    use crate::errors::{ConfigError, FetchError};

    const USER_AGENTS: &[&str] = &[
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
        "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:133.0) Gecko/20100101 Firefox/133.0",
    ];

    fn random_user_agent() -> &'static str {
        USER_AGENTS
            .choose(&mut rand::thread_rng())
            .copied()
            .unwrap_or(USER_AGENTS[0])
    }

    /// reqwest-backed fetcher with browser-like headers. Each request picks
    /// its own User-Agent.
    #[derive(Debug, Clone)]
    pub struct HttpFetcher {
        client: reqwest::Client,
    }

    impl HttpFetcher {
        /// Builds a fetcher; `verify_tls = false` accepts invalid certificates.
        pub fn new(verify_tls: bool) -> Result<Self, ConfigError> {
            let client = reqwest::Client::builder()
                .redirect(reqwest::redirect::Policy::limited(10))
                .danger_accept_invalid_certs(!verify_tls)
                .build()
                .map_err(|e| {
                    ConfigError::invalid("fetch", format!("failed to build HTTP client: {e}"))
                })?;
            Ok(Self { client })
        }

        /// Uses a caller-supplied client.
        #[must_use]
        pub fn with_client(client: reqwest::Client) -> Self {
            Self { client }
        }
    }

    #[async_trait]
    impl ContentFetcher for HttpFetcher {
        async fn fetch(&self, url: &str, timeout: Duration) -> Result<String, FetchError> {
            let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
            let transport = |e: reqwest::Error| {
                if e.is_timeout() {
                    FetchError::Timeout {
                        url: url.to_string(),
                        timeout_ms,
                    }
                } else {
                    FetchError::Network {
                        url: url.to_string(),
                        message: e.to_string(),
                    }
                }
            };

            let response = self
                .client
                .get(url)
                .header(reqwest::header::USER_AGENT, random_user_agent())
                .header(reqwest::header::ACCEPT, "text/html,application/xhtml+xml;q=0.9,*/*;q=0.8")
                .header(reqwest::header::ACCEPT_LANGUAGE, "en-US,en;q=0.7")
                .timeout(timeout)
                .send()
                .await
                .map_err(transport)?;

            let status = response.status().as_u16();
            debug!(url, status, "Fetched page");
            if BLOCKED_STATUSES.contains(&status) {
                return Err(FetchError::Blocked {
                    url: url.to_string(),
                    status,
                });
            }
            if !response.status().is_success() {
                return Err(FetchError::Network {
                    url: url.to_string(),
                    message: format!("unexpected status {status}"),
                });
            }
            response.text().await.map_err(transport)
        }
    }

}
