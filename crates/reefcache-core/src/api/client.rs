//! HTTP fetch capability backed by `reqwest`.
//!
//! `ApiClient` sends authenticated requests against the configured base URL
//! and retries transient failures with exponential backoff. Its futures plug
//! straight into `CacheSync::fetch_or_cache` with the [`JsonBody`] decoder.

use std::time::Duration;

use anyhow::{Context, Result};
use futures::future::{BoxFuture, FutureExt};
use reqwest::{header, Client, RequestBuilder, Response};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::ApiError;
use crate::auth::TokenStore;
use crate::config::Config;
use crate::sync::{unwrap_envelope, Decoder};

/// Accept header sent with every request
const ACCEPT_JSON: &str = "application/json";

/// API client for the configured backend.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    upload_timeout: Duration,
    retry_count: u32,
    retry_delay: Duration,
    tokens: Option<TokenStore>,
}

impl ApiClient {
    /// Create a new API client
    pub fn new(config: &Config) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            upload_timeout: config.upload_timeout(),
            retry_count: config.retry_count,
            retry_delay: config.retry_delay(),
            tokens: None,
        })
    }

    /// Attach bearer tokens from the session store to every request.
    pub fn with_tokens(mut self, tokens: TokenStore) -> Self {
        self.tokens = Some(tokens);
        self
    }

    /// Absolute URLs pass through; anything else is joined onto the base URL.
    pub fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!("{}/{}", self.base_url, path.trim_start_matches('/'))
        }
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let request = request.header(header::ACCEPT, ACCEPT_JSON);
        match self.tokens.as_ref().and_then(|t| t.access_token()) {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Delay before retry number `attempt` (1-based): doubles each time.
    fn backoff(&self, attempt: u32) -> Duration {
        self.retry_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }

    /// Send, retrying transient failures up to `retry_count` times.
    async fn send<F>(&self, url: &str, build: F) -> Result<Response>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut attempt = 0;
        loop {
            let outcome = match self.authorize(build()).send().await {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) => {
                    let status = response.status();
                    let body = response.text().await.unwrap_or_default();
                    ApiError::from_status(status, &body)
                }
                Err(e) => ApiError::Network(e),
            };

            if !outcome.is_transient() || attempt >= self.retry_count {
                return Err(anyhow::Error::new(outcome))
                    .with_context(|| format!("Request to {} failed", url));
            }

            attempt += 1;
            let delay = self.backoff(attempt);
            warn!(
                url = url,
                retry = attempt,
                backoff_ms = delay.as_millis() as u64,
                error = %outcome,
                "Transient failure, backing off"
            );
            tokio::time::sleep(delay).await;
        }
    }

    pub async fn get(&self, path: &str) -> Result<Response> {
        let url = self.url(path);
        debug!(url = %url, "GET");
        self.send(&url, || self.client.get(&url)).await
    }

    pub async fn post<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<Response> {
        let url = self.url(path);
        debug!(url = %url, "POST");
        self.send(&url, || self.client.post(&url).json(body)).await
    }

    pub async fn put<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<Response> {
        let url = self.url(path);
        debug!(url = %url, "PUT");
        self.send(&url, || self.client.put(&url).json(body)).await
    }

    pub async fn delete(&self, path: &str) -> Result<Response> {
        let url = self.url(path);
        debug!(url = %url, "DELETE");
        self.send(&url, || self.client.delete(&url)).await
    }

    /// POST raw bytes with the longer upload timeout.
    pub async fn upload(&self, path: &str, bytes: Vec<u8>, content_type: &str) -> Result<Response> {
        let url = self.url(path);
        debug!(url = %url, len = bytes.len(), "UPLOAD");
        self.send(&url, || {
            self.client
                .post(&url)
                .timeout(self.upload_timeout)
                .header(header::CONTENT_TYPE, content_type)
                .body(bytes.clone())
        })
        .await
    }
}

/// Decodes a response body as JSON, unwrapping one `data` envelope level
/// unless built with [`JsonBody::raw`].
#[derive(Debug, Clone, Copy)]
pub struct JsonBody {
    unwrap: bool,
}

impl JsonBody {
    pub fn enveloped() -> Self {
        Self { unwrap: true }
    }

    pub fn raw() -> Self {
        Self { unwrap: false }
    }
}

impl Default for JsonBody {
    fn default() -> Self {
        Self::enveloped()
    }
}

impl Decoder<Response> for JsonBody {
    fn decode(&self, raw: Response) -> BoxFuture<'_, Result<Value>> {
        let unwrap = self.unwrap;
        async move {
            let url = raw.url().to_string();
            let text = raw
                .text()
                .await
                .with_context(|| format!("Failed to read response body from {}", url))?;
            // No content decodes to null rather than failing
            if text.trim().is_empty() {
                return Ok(Value::Null);
            }
            let value: Value = serde_json::from_str(&text)
                .with_context(|| format!("Failed to parse JSON response from {}", url))?;
            Ok(if unwrap { unwrap_envelope(value) } else { value })
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(base: &str) -> ApiClient {
        let config = Config {
            api_base_url: base.to_string(),
            retry_delay_ms: 100,
            ..Config::default()
        };
        ApiClient::new(&config).unwrap()
    }

    #[test]
    fn test_url_joining() {
        let api = client("https://reef.example/api/");
        assert_eq!(api.url("fish"), "https://reef.example/api/fish");
        assert_eq!(api.url("/fish/1"), "https://reef.example/api/fish/1");
        assert_eq!(api.url("https://cdn.example/x"), "https://cdn.example/x");
    }

    #[test]
    fn test_backoff_doubles() {
        let api = client("https://reef.example");
        assert_eq!(api.backoff(1), Duration::from_millis(100));
        assert_eq!(api.backoff(2), Duration::from_millis(200));
        assert_eq!(api.backoff(4), Duration::from_millis(800));
    }

    #[tokio::test]
    async fn test_unreachable_host_fails_after_retries() {
        let config = Config {
            // Nothing listens on the discard port of the loopback interface
            api_base_url: "http://127.0.0.1:9".to_string(),
            retry_count: 1,
            retry_delay_ms: 1,
            request_timeout_ms: 2_000,
            ..Config::default()
        };
        let api = ApiClient::new(&config).unwrap();
        let err = api.get("fish").await.unwrap_err();
        assert!(format!("{:#}", err).contains("Request to http://127.0.0.1:9/fish failed"));
    }
}
