//! HTTP adapter backed by reqwest.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

use crate::domain::errors::{CacheError, CacheResult};
use crate::domain::ports::HttpFetcher;

/// Downloads image bodies with a shared reqwest client.
#[derive(Debug, Clone)]
pub struct ReqwestFetcher {
    client: reqwest::Client,
}

impl ReqwestFetcher {
    /// Creates a fetcher whose requests give up after `timeout`.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be created.
    pub fn new(timeout: Duration) -> CacheResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CacheError::fetch(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

/// Joins a base URL and a request path with exactly one slash.
#[must_use]
pub fn join_url(base_url: &str, path: &str) -> String {
    let base = base_url.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    if path.is_empty() {
        base.to_string()
    } else {
        format!("{base}/{path}")
    }
}

#[async_trait]
impl HttpFetcher for ReqwestFetcher {
    async fn fetch(&self, base_url: &str, path: &str) -> CacheResult<Bytes> {
        let url = join_url(base_url, path);
        debug!(url = %url, "Downloading image");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| CacheError::fetch(format!("Request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(CacheError::fetch(format!(
                "HTTP {}: {}",
                response.status(),
                response.status().canonical_reason().unwrap_or("Unknown")
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| CacheError::fetch(format!("Failed to read body: {e}")))?;

        if bytes.is_empty() {
            return Err(CacheError::fetch("Empty response body"));
        }
        Ok(bytes)
    }
}
