//! Outbound upstream invocation.

pub mod http_client;

pub use http_client::{UpstreamHttpClient, UpstreamHttpClientConfig};

use thiserror::Error;

/// Errors from a proxied upstream call. Every variant counts as one
/// circuit-breaker failure and surfaces as the `upstream error: ...`
/// envelope.
#[derive(Error, Debug)]
pub enum UpstreamError {
    /// The call exceeded the interface (or default) deadline.
    #[error("request timeout")]
    Timeout,

    /// TCP/TLS-level failure reaching the upstream.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// The upstream answered with a non-success status.
    #[error("http status {0}")]
    HttpError(u16, String),

    /// The proxied request could not be constructed (bad method, header,
    /// URL, or missing credential material).
    #[error("invalid proxy request: {0}")]
    InvalidRequest(String),

    /// The process-wide concurrency cap was saturated.
    #[error("upstream concurrency limit reached")]
    ConcurrencyLimit,
}
