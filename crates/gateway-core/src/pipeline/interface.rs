//! Interface resolution.
//!
//! Looks up the record published at `(platform_path, method)` and checks it
//! is callable. Missing record, disabled record, and missing provider URL
//! all answer the same 403; a platform outage fails closed.

use super::{Filter, Rejection, RequestContext};
use crate::config::GatewayConfig;
use crate::platform::PlatformClient;
use async_trait::async_trait;
use std::sync::Arc;

pub struct InterfaceFilter {
    config: Arc<GatewayConfig>,
    platform: Arc<dyn PlatformClient>,
}

impl InterfaceFilter {
    #[must_use]
    pub fn new(config: Arc<GatewayConfig>, platform: Arc<dyn PlatformClient>) -> Self {
        Self { config, platform }
    }
}

#[async_trait]
impl Filter for InterfaceFilter {
    fn name(&self) -> &'static str {
        "interface_validation"
    }

    fn enabled(&self) -> bool {
        self.config.filters.interface_validation
    }

    async fn run(&self, ctx: &mut RequestContext) -> Result<(), Rejection> {
        let record = match self
            .platform
            .get_interface_info(&ctx.platform_path, &ctx.method)
            .await
        {
            Ok(Some(record)) => record,
            Ok(None) => {
                tracing::warn!(
                    request_id = %ctx.request_id,
                    path = %ctx.platform_path,
                    method = %ctx.method,
                    "no interface published at path"
                );
                return Err(Rejection::Forbidden);
            }
            Err(error) => {
                tracing::error!(request_id = %ctx.request_id, error = %error, "interface lookup failed");
                return Err(Rejection::Forbidden);
            }
        };

        if !record.is_enabled() {
            tracing::warn!(
                request_id = %ctx.request_id,
                interface_id = record.id,
                "interface is disabled"
            );
            return Err(Rejection::Forbidden);
        }

        if record.provider_url.as_deref().unwrap_or("").is_empty() {
            tracing::error!(
                request_id = %ctx.request_id,
                interface_id = record.id,
                "interface has no provider url"
            );
            return Err(Rejection::Forbidden);
        }

        tracing::debug!(
            request_id = %ctx.request_id,
            interface_id = record.id,
            interface = %record.name,
            "interface resolved"
        );
        ctx.interface = Some(record);
        Ok(())
    }
}
