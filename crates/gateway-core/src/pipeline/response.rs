//! Response stage: the envelope and the header set.
//!
//! Always runs, whether the chain completed or a filter terminated it. Maps
//! the outcome onto the uniform envelope, stamps the response headers, and
//! records the request metrics. User-visible messages are generic; the
//! request id is echoed in `X-Request-ID` for correlation with server logs.

use super::context::{ProxyOutcome, RequestContext};
use super::Rejection;
use crate::config::GatewayConfig;
use crate::metrics;
use crate::types::Envelope;
use std::sync::Arc;

/// Final response handed back to the HTTP adapter.
#[derive(Debug, Clone)]
pub struct GatewayResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

pub struct ResponseStage {
    config: Arc<GatewayConfig>,
}

impl ResponseStage {
    #[must_use]
    pub fn new(config: Arc<GatewayConfig>) -> Self {
        Self { config }
    }

    fn headers(&self, ctx: &RequestContext) -> Vec<(String, String)> {
        let mut headers = vec![
            ("Content-Type".to_string(), "application/json;charset=UTF-8".to_string()),
            ("X-Request-ID".to_string(), ctx.request_id.clone()),
        ];

        if self.config.filters.response {
            headers.push((
                "Cache-Control".to_string(),
                "no-cache, no-store, must-revalidate".to_string(),
            ));
            headers.push(("Access-Control-Allow-Origin".to_string(), "*".to_string()));
            headers.push((
                "Access-Control-Allow-Methods".to_string(),
                "GET,POST,PUT,DELETE,OPTIONS".to_string(),
            ));
            headers.push((
                "Access-Control-Allow-Headers".to_string(),
                "Content-Type,Authorization,accessKey,sign,nonce,timestamp,x-content-sha256"
                    .to_string(),
            ));
            headers.push(("Access-Control-Max-Age".to_string(), "3600".to_string()));
            headers.push(("X-Content-Type-Options".to_string(), "nosniff".to_string()));
            headers.push(("X-Frame-Options".to_string(), "DENY".to_string()));
            headers.push(("X-XSS-Protection".to_string(), "1; mode=block".to_string()));
            headers.push(("X-Powered-By".to_string(), "XiaoXin-API-Gateway".to_string()));
        }
        headers
    }

    fn envelope_for(ctx: &RequestContext, rejection: Option<Rejection>) -> (u16, Option<Envelope>) {
        if let Some(rejection) = rejection {
            return match rejection {
                // No body on authentication-class rejections.
                Rejection::Forbidden => (403, None),
                Rejection::RateLimited => {
                    (429, Some(Envelope::failure(429, "rate-limited, retry later")))
                }
                Rejection::QuotaExhausted => {
                    (429, Some(Envelope::failure(429, "quota exhausted or not provisioned")))
                }
                Rejection::CircuitOpen { service } => (
                    503,
                    Some(Envelope::new(
                        503,
                        "service temporarily unavailable, retry later",
                        serde_json::json!({
                            "service": service,
                            "reason": "circuit open",
                            "suggestion": "the upstream is failing and has been isolated, retry later",
                        }),
                    )),
                ),
                Rejection::ServiceUnavailable { message } => {
                    (503, Some(Envelope::failure(503, message)))
                }
                Rejection::Internal { message } => {
                    tracing::error!(request_id = %ctx.request_id, detail = %message, "internal gateway error");
                    (500, Some(Envelope::failure(500, "internal gateway error")))
                }
            };
        }

        match &ctx.proxy {
            Some(ProxyOutcome::Success(body)) => {
                let data = serde_json::from_slice::<serde_json::Value>(body)
                    .unwrap_or_else(|_| {
                        serde_json::Value::String(String::from_utf8_lossy(body).into_owned())
                    });
                (200, Some(Envelope::success(data)))
            }
            Some(ProxyOutcome::Failed(error)) => {
                (500, Some(Envelope::failure(500, format!("upstream error: {error}"))))
            }
            // Chain completed without a proxy stage (e.g. proxy disabled).
            None => (200, Some(Envelope::new(200, "request processed", serde_json::Value::Null))),
        }
    }

    /// Builds the final response and records request metrics.
    #[must_use]
    pub fn finalize(&self, ctx: &RequestContext, rejection: Option<Rejection>) -> GatewayResponse {
        let (status, envelope) = Self::envelope_for(ctx, rejection);
        let body = envelope.as_ref().map(Envelope::to_body).unwrap_or_default();

        let total_ms = ctx.elapsed_ms();
        metrics::record_request(status, total_ms as f64);
        tracing::info!(
            request_id = %ctx.request_id,
            method = %ctx.method,
            path = %ctx.platform_path,
            client_ip = %ctx.client_ip,
            status,
            total_ms,
            bytes = body.len(),
            "request completed"
        );

        GatewayResponse { status, headers: self.headers(ctx), body }
    }
}
