//! JSON fetch collaborator with bounded retry

use super::clob_errors;
use super::retry::{with_retry, RetryConfig};
use crate::error::Result;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

const FETCH_TIMEOUT: Duration = Duration::from_secs(15);

/// GET-and-decode with a fixed timeout and exponential retry.
/// Exhausted retries surface as `CopyError::Network` / `RateLimited`.
#[derive(Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    retry: RetryConfig,
}

impl HttpFetcher {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36")
            .timeout(FETCH_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            retry: RetryConfig::fetch(),
        })
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    pub async fn fetch_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        with_retry(&self.retry, url, || self.fetch_once(url)).await
    }

    async fn fetch_once<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        debug!("GET {}", url);
        let response = self.client.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(clob_errors::from_response(status.as_u16(), &body));
        }

        Ok(response.json::<T>().await?)
    }
}
