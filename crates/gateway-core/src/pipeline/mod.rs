//! The request processing pipeline.
//!
//! Every inbound request runs through a fixed, ordered chain of filters
//! sharing one [`RequestContext`]:
//!
//! ```text
//!   Incoming Request
//!        │
//!        ▼
//!   ┌───────────────────┐
//!   │ 1. LOGGING        │  request id, client IP, start time
//!   ├───────────────────┤
//!   │ 2. IP GUARD       │  whitelist / CIDR ── miss ─► 403
//!   ├───────────────────┤
//!   │ 3. AUTHENTICATION │  headers, nonce, timestamp, consumer lookup,
//!   │                   │  HMAC verify, replay guard ── fail ─► 403
//!   ├───────────────────┤
//!   │ 4. INTERFACE      │  (path, method) lookup, enabled ── miss ─► 403
//!   ├───────────────────┤
//!   │ 5. RATE LIMIT     │  sliding window ── exceeded ─► 429
//!   ├───────────────────┤
//!   │ 6. QUOTA          │  atomic pre-consume ── exhausted ─► 429
//!   ├───────────────────┤
//!   │ 7. PROXY          │  breaker gate ∘ upstream call ── open ─► 503
//!   └───────────────────┘
//!        │
//!        ▼
//!   RESPONSE STAGE (always runs): envelope, headers, metrics
//! ```
//!
//! A filter terminates the chain by returning a [`Rejection`]; the response
//! stage still runs, mapping the rejection (or the proxy outcome) onto the
//! uniform envelope. Filters are stateless across requests — all shared
//! state lives in the coordination store or the platform backend.

pub mod auth;
pub mod context;
pub mod interface;
pub mod ip_guard;
pub mod logging;
pub mod proxy;
pub mod quota;
pub mod rate_limit;
pub mod response;

pub use context::{ProxyOutcome, RequestContext};
pub use response::GatewayResponse;

use crate::breaker::CircuitBreaker;
use crate::config::GatewayConfig;
use crate::metrics;
use crate::platform::PlatformClient;
use crate::store::SharedStore;
use crate::upstream::UpstreamHttpClient;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;

/// Terminal outcomes a filter can produce. The response stage maps each to
/// an HTTP status and envelope; no internal detail is exposed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// Authentication, IP, or interface resolution failed: 403, empty body.
    Forbidden,
    /// Sliding window exceeded: 429 envelope.
    RateLimited,
    /// Pre-consume found no remaining quota: 429 envelope.
    QuotaExhausted,
    /// Breaker open (or probe lottery lost without recovery): 503 envelope,
    /// upstream not called.
    CircuitOpen { service: String },
    /// A dependency the gateway will not degrade around is down: 503.
    ServiceUnavailable { message: String },
    /// A bug or unexpected dependency failure inside the gateway: 500.
    Internal { message: String },
}

/// One stage of the chain.
#[async_trait]
pub trait Filter: Send + Sync {
    /// Stable name used in logs and metric labels.
    fn name(&self) -> &'static str;

    /// Whether the stage runs; disabled stages are skipped.
    fn enabled(&self) -> bool {
        true
    }

    /// Executes the stage. `Err` terminates the chain.
    async fn run(&self, ctx: &mut RequestContext) -> Result<(), Rejection>;
}

/// Everything the pipeline needs to build its standard chain.
pub struct PipelineDeps {
    pub config: Arc<GatewayConfig>,
    pub store: Arc<dyn SharedStore>,
    pub platform: Arc<dyn PlatformClient>,
    pub upstream: Arc<UpstreamHttpClient>,
}

/// The pipeline coordinator: runs filters in declared order, then always
/// runs the response stage.
pub struct Pipeline {
    filters: Vec<Arc<dyn Filter>>,
    response: response::ResponseStage,
}

impl Pipeline {
    /// Builds the standard chain in the canonical order.
    #[must_use]
    pub fn new(deps: PipelineDeps) -> Self {
        let PipelineDeps { config, store, platform, upstream } = deps;
        let breaker = Arc::new(CircuitBreaker::new(
            store.clone(),
            config.circuit_breaker.clone(),
        ));

        let filters: Vec<Arc<dyn Filter>> = vec![
            Arc::new(logging::LoggingFilter::new(config.clone())),
            Arc::new(ip_guard::IpGuardFilter::new(config.clone())),
            Arc::new(auth::AuthenticationFilter::new(
                config.clone(),
                platform.clone(),
                store.clone(),
            )),
            Arc::new(interface::InterfaceFilter::new(config.clone(), platform.clone())),
            Arc::new(rate_limit::RateLimitFilter::new(config.clone(), store.clone())),
            Arc::new(quota::QuotaFilter::new(config.clone(), platform.clone())),
            Arc::new(proxy::ProxyFilter::new(
                config.clone(),
                platform,
                breaker,
                upstream,
            )),
        ];

        Self { filters, response: response::ResponseStage::new(config) }
    }

    /// Runs the request through the chain and produces the final response.
    /// The response stage runs unconditionally, on success and on every
    /// early termination.
    pub async fn handle(&self, ctx: &mut RequestContext) -> GatewayResponse {
        let mut rejection = None;

        for filter in &self.filters {
            if !filter.enabled() {
                tracing::debug!(filter = filter.name(), "filter disabled, skipping");
                continue;
            }

            let started = Instant::now();
            let result = filter.run(ctx).await;
            let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
            metrics::record_filter(filter.name(), elapsed_ms, result.is_err());

            if let Err(cause) = result {
                tracing::debug!(
                    filter = filter.name(),
                    request_id = %ctx.request_id,
                    rejection = ?cause,
                    "filter terminated chain"
                );
                rejection = Some(cause);
                break;
            }
        }

        self.response.finalize(ctx, rejection)
    }
}
