//! Remote Value Fetcher
//!
//! GET-style fetch of a user-configured endpoint whose body carries the
//! fresh header value. Failures never cross this boundary: any network,
//! status or body error is logged and collapses to `None`, and the caller
//! decides whether to retry on its next trigger.

use async_trait::async_trait;
use std::time::Duration;
use tracing::warn;

/// Fetches raw text from a URL, or a failure sentinel.
#[async_trait]
pub trait ValueFetcher: Send + Sync {
    async fn fetch_text(&self, url: &str) -> Option<String>;
}

/// HTTP implementation over a shared reqwest client.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self { client }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

#[async_trait]
impl ValueFetcher for HttpFetcher {
    async fn fetch_text(&self, url: &str) -> Option<String> {
        let response = match self.client.get(url).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!("Fetch of {} failed: {}", url, e);
                return None;
            }
        };

        if !response.status().is_success() {
            warn!("Fetch of {} returned status {}", url, response.status());
            return None;
        }

        match response.text().await {
            Ok(body) => Some(body),
            Err(e) => {
                warn!("Reading body from {} failed: {}", url, e);
                None
            }
        }
    }
}
