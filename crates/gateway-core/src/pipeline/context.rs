//! Per-request shared state.
//!
//! One [`RequestContext`] is created before the first filter runs and
//! dropped after the response is flushed. The pipeline coordinator owns it;
//! filters receive a mutable borrow for the duration of their stage, so no
//! locking is needed within a request.

use crate::types::{Consumer, InterfaceRecord};
use bytes::Bytes;
use chrono::Utc;
use std::net::IpAddr;
use uuid::Uuid;

/// Result of the proxy stage, consumed by the response wrapper.
#[derive(Debug, Clone)]
pub enum ProxyOutcome {
    /// Raw upstream body.
    Success(Bytes),
    /// Sanitized error description; rendered as `upstream error: ...`.
    Failed(String),
}

/// Mutable state threaded through the filter chain.
#[derive(Debug)]
pub struct RequestContext {
    /// Correlates logs, the `X-Request-ID` header, and upstream calls.
    pub request_id: String,
    /// Incoming HTTP method, uppercase.
    pub method: String,
    /// Incoming path, exclusive of the query string.
    pub platform_path: String,
    /// Raw query string without the leading `?`, when present.
    pub query: Option<String>,
    /// Incoming headers in arrival order. Lookups are case-insensitive.
    pub headers: Vec<(String, String)>,
    /// Raw request body.
    pub body: Bytes,
    /// Peer address of the TCP connection, when known.
    pub peer_addr: Option<IpAddr>,
    /// Derived client address; `"unknown"` until the logger stamps it.
    pub client_ip: String,
    /// Epoch milliseconds at context creation.
    pub start_ms: i64,
    /// Consumer resolved by the authenticator.
    pub consumer: Option<Consumer>,
    /// Interface resolved by the interface filter.
    pub interface: Option<InterfaceRecord>,
    /// Outcome written by the proxy stage.
    pub proxy: Option<ProxyOutcome>,
    /// Set when the quota gate degraded leniently and no unit was
    /// pre-consumed for this request.
    pub quota_bypassed: bool,
}

impl RequestContext {
    #[must_use]
    pub fn new(
        method: impl Into<String>,
        platform_path: impl Into<String>,
        query: Option<String>,
        headers: Vec<(String, String)>,
        body: Bytes,
        peer_addr: Option<IpAddr>,
    ) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            method: method.into().to_uppercase(),
            platform_path: platform_path.into(),
            query,
            headers,
            body,
            peer_addr,
            client_ip: "unknown".to_string(),
            start_ms: Utc::now().timestamp_millis(),
            consumer: None,
            interface: None,
            proxy: None,
            quota_bypassed: false,
        }
    }

    /// First header value matching `name`, case-insensitively.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(header, _)| header.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Milliseconds elapsed since context creation.
    #[must_use]
    pub fn elapsed_ms(&self) -> i64 {
        (Utc::now().timestamp_millis() - self.start_ms).max(0)
    }
}
