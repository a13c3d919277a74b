//! Process-wide upstream HTTP client.
//!
//! One pooled `reqwest` client serves every proxied call, wrapped in a
//! semaphore so a slow upstream cannot absorb the whole connection pool.
//! The proxy passes the method, the merged URL, the filtered header set and
//! the raw body through verbatim; the per-call deadline comes from the
//! interface record.

use super::UpstreamError;
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, ClientBuilder, Method};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

/// Concurrency and pool tuning for the upstream client.
#[derive(Debug, Clone)]
pub struct UpstreamHttpClientConfig {
    /// Maximum in-flight upstream calls.
    pub concurrent_limit: usize,
    /// How long a call may wait for a permit before giving up.
    pub permit_timeout_ms: u64,
}

impl Default for UpstreamHttpClientConfig {
    fn default() -> Self {
        Self { concurrent_limit: 1000, permit_timeout_ms: 500 }
    }
}

/// Semaphore-guarded reqwest wrapper for proxied calls.
pub struct UpstreamHttpClient {
    client: Client,
    permits: Arc<Semaphore>,
    permit_timeout: Duration,
}

impl UpstreamHttpClient {
    /// Creates the client with default tuning.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying reqwest client fails to build.
    pub fn new() -> Result<Self, UpstreamError> {
        Self::with_config(UpstreamHttpClientConfig::default())
    }

    /// Creates the client with explicit tuning.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying reqwest client fails to build.
    pub fn with_config(config: UpstreamHttpClientConfig) -> Result<Self, UpstreamError> {
        let client = ClientBuilder::new()
            .pool_idle_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(100)
            .connect_timeout(Duration::from_secs(5))
            .redirect(reqwest::redirect::Policy::none())
            .use_rustls_tls()
            .tcp_keepalive(Duration::from_secs(30))
            .tcp_nodelay(true)
            .build()
            .map_err(|e| {
                tracing::error!(error = %e, "failed to build upstream http client");
                UpstreamError::ConnectionFailed(format!("http client build failed: {e}"))
            })?;

        Ok(Self {
            client,
            permits: Arc::new(Semaphore::new(config.concurrent_limit)),
            permit_timeout: Duration::from_millis(config.permit_timeout_ms),
        })
    }

    /// Maps reqwest failures to sanitized errors so upstream addresses and
    /// internals never leak into client-visible messages.
    fn sanitize_network_error(error: &reqwest::Error) -> String {
        if error.is_connect() {
            "connection refused or unreachable".to_string()
        } else if error.is_timeout() {
            "connection timed out".to_string()
        } else if error.is_request() {
            "request failed".to_string()
        } else if error.is_body() || error.is_decode() {
            "response body error".to_string()
        } else if error.is_redirect() {
            "too many redirects".to_string()
        } else {
            "network error".to_string()
        }
    }

    /// Sends one proxied request and returns the raw response body.
    ///
    /// Non-2xx statuses are failures: the body snippet is truncated into
    /// the error for logging, and the caller records a breaker failure.
    ///
    /// # Errors
    ///
    /// - [`UpstreamError::InvalidRequest`] for an unusable method/URL
    /// - [`UpstreamError::ConcurrencyLimit`] when no permit frees up in time
    /// - [`UpstreamError::Timeout`] when the deadline elapses
    /// - [`UpstreamError::HttpError`] for non-success statuses
    /// - [`UpstreamError::ConnectionFailed`] for network-level failures
    pub async fn send(
        &self,
        method: &str,
        url: &str,
        headers: &[(String, String)],
        body: Bytes,
        timeout: Duration,
    ) -> Result<Bytes, UpstreamError> {
        let method = Method::from_bytes(method.as_bytes())
            .map_err(|_| UpstreamError::InvalidRequest(format!("bad method {method:?}")))?;

        let mut header_map = HeaderMap::with_capacity(headers.len());
        for (name, value) in headers {
            let Ok(name) = HeaderName::from_bytes(name.as_bytes()) else {
                tracing::debug!(header = name.as_str(), "skipping unrepresentable header name");
                continue;
            };
            let Ok(value) = HeaderValue::from_str(value) else {
                tracing::debug!(header = name.as_str(), "skipping unrepresentable header value");
                continue;
            };
            header_map.append(name, value);
        }

        let _permit = tokio::time::timeout(
            self.permit_timeout,
            Arc::clone(&self.permits).acquire_owned(),
        )
        .await
        .map_err(|_| {
            tracing::warn!(
                url,
                available_permits = self.permits.available_permits(),
                "upstream permit acquisition timed out"
            );
            UpstreamError::ConcurrencyLimit
        })?
        .map_err(|_| UpstreamError::ConcurrencyLimit)?;

        let result = self
            .client
            .request(method, url)
            .headers(header_map)
            .body(body)
            .timeout(timeout)
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => response
                .bytes()
                .await
                .map_err(|e| UpstreamError::ConnectionFailed(Self::sanitize_network_error(&e))),
            Ok(response) => {
                let status = response.status().as_u16();
                let raw = response.text().await.unwrap_or_default();
                let snippet = if raw.len() > 256 {
                    format!("{}... (truncated)", &raw[..256])
                } else {
                    raw
                };
                Err(UpstreamError::HttpError(status, snippet))
            }
            Err(e) if e.is_timeout() => Err(UpstreamError::Timeout),
            Err(e) => Err(UpstreamError::ConnectionFailed(Self::sanitize_network_error(&e))),
        }
    }

    #[cfg(test)]
    #[must_use]
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }
}
