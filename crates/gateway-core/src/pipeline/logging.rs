//! Request logger: stamps request metadata and derives the client address.
//!
//! Never rejects a request. Client-IP precedence: first comma-separated
//! entry of `X-Forwarded-For`, then `X-Real-IP`, then the peer address of
//! the TCP connection, then the literal `"unknown"`. Forwarding headers are
//! spoofable; deployments are expected to terminate them at a trusted edge.

use super::{Filter, Rejection, RequestContext};
use crate::config::GatewayConfig;
use async_trait::async_trait;
use std::net::IpAddr;
use std::sync::Arc;

/// Resolves the client address from forwarding headers and the peer.
#[must_use]
pub fn extract_client_ip(
    forwarded_for: Option<&str>,
    real_ip: Option<&str>,
    peer: Option<IpAddr>,
) -> String {
    if let Some(value) = forwarded_for {
        let first = value.split(',').next().unwrap_or("").trim();
        if !first.is_empty() {
            return first.to_string();
        }
    }
    if let Some(value) = real_ip {
        let trimmed = value.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }
    if let Some(addr) = peer {
        return addr.to_string();
    }
    "unknown".to_string()
}

pub struct LoggingFilter {
    config: Arc<GatewayConfig>,
}

impl LoggingFilter {
    #[must_use]
    pub fn new(config: Arc<GatewayConfig>) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Filter for LoggingFilter {
    fn name(&self) -> &'static str {
        "logging"
    }

    fn enabled(&self) -> bool {
        self.config.filters.logging
    }

    async fn run(&self, ctx: &mut RequestContext) -> Result<(), Rejection> {
        ctx.client_ip = extract_client_ip(
            ctx.header("x-forwarded-for"),
            ctx.header("x-real-ip"),
            ctx.peer_addr,
        );

        tracing::info!(
            request_id = %ctx.request_id,
            method = %ctx.method,
            path = %ctx.platform_path,
            client_ip = %ctx.client_ip,
            query = ctx.query.as_deref().unwrap_or(""),
            "request received"
        );
        Ok(())
    }
}
