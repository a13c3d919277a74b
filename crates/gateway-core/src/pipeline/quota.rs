//! Quota gate: atomic pre-consumption of a call unit.
//!
//! The platform executes `UPDATE .. SET remaining = remaining - 1 WHERE ..
//! AND remaining > 0` and reports whether a row changed. Decrementing
//! before the upstream call closes the check-then-use race under load; the
//! trade-off — a failed upstream call still costs a unit — is deliberate
//! and is not compensated.
//!
//! Degradation is configurable: strict mode (default) answers 503 when the
//! quota service is unreachable, lenient mode admits the request and
//! records the bypass in the context. `InvokeCount` still runs on proxy
//! success either way.

use super::{Filter, Rejection, RequestContext};
use crate::config::GatewayConfig;
use crate::platform::PlatformClient;
use async_trait::async_trait;
use std::sync::Arc;

pub struct QuotaFilter {
    config: Arc<GatewayConfig>,
    platform: Arc<dyn PlatformClient>,
}

impl QuotaFilter {
    #[must_use]
    pub fn new(config: Arc<GatewayConfig>, platform: Arc<dyn PlatformClient>) -> Self {
        Self { config, platform }
    }
}

#[async_trait]
impl Filter for QuotaFilter {
    fn name(&self) -> &'static str {
        "quota"
    }

    fn enabled(&self) -> bool {
        self.config.filters.quota
    }

    async fn run(&self, ctx: &mut RequestContext) -> Result<(), Rejection> {
        let Some(consumer) = ctx.consumer.as_ref() else {
            tracing::error!(request_id = %ctx.request_id, "quota gate reached without consumer");
            return Err(Rejection::Forbidden);
        };
        let Some(interface) = ctx.interface.as_ref() else {
            tracing::error!(request_id = %ctx.request_id, "quota gate reached without interface");
            return Err(Rejection::Forbidden);
        };

        match self.platform.pre_consume(interface.id, consumer.id).await {
            Ok(true) => {
                tracing::debug!(
                    request_id = %ctx.request_id,
                    consumer_id = consumer.id,
                    interface_id = interface.id,
                    "quota unit pre-consumed"
                );
                Ok(())
            }
            Ok(false) => {
                tracing::warn!(
                    request_id = %ctx.request_id,
                    consumer_id = consumer.id,
                    interface_id = interface.id,
                    "quota exhausted or not provisioned"
                );
                Err(Rejection::QuotaExhausted)
            }
            Err(error) if self.config.quota.strict_mode => {
                tracing::error!(
                    request_id = %ctx.request_id,
                    error = %error,
                    "quota service failed, strict mode rejects"
                );
                Err(Rejection::ServiceUnavailable {
                    message: "quota service temporarily unavailable, retry later".to_string(),
                })
            }
            Err(error) => {
                tracing::warn!(
                    request_id = %ctx.request_id,
                    error = %error,
                    "quota service failed, lenient mode admits"
                );
                ctx.quota_bypassed = true;
                Ok(())
            }
        }
    }
}
