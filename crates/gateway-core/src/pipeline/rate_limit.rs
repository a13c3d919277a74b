//! Sliding-window rate limiting per `(consumer, interface)`.
//!
//! The window is an ordered set in the shared store: members are
//! `{now_ms}:{uuid}` tags scored by their millisecond timestamp. Each
//! admission decision runs, in order:
//!
//! 1. evict members scored at or before `now - window`
//! 2. insert the current request
//! 3. refresh the key TTL (window + slack)
//! 4. count members inside `[now - window, now]`
//!
//! The current request is inserted before counting, so a request that lands
//! exactly on the limit is admitted (`count <= limit`) and a window holds at
//! most `limit + 1` admissions. The store's per-key serialization makes the
//! four steps a critical section across gateway instances; a store failure
//! admits the request.

use super::{Filter, Rejection, RequestContext};
use crate::config::{GatewayConfig, RateLimitConfig};
use crate::store::{SharedStore, StoreError};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Runs one sliding-window admission check against the store.
///
/// # Errors
///
/// Propagates the first failing store operation; callers decide the
/// degradation policy.
pub async fn check_window(
    store: &dyn SharedStore,
    key: &str,
    limit: i64,
    window: Duration,
    key_ttl: Duration,
) -> Result<bool, StoreError> {
    let now = Utc::now().timestamp_millis();
    let window_ms = window.as_millis() as i64;
    let window_start = (now - window_ms) as f64;

    store.zset_remove_range_by_score(key, 0.0, window_start).await?;

    let member = format!("{now}:{}", Uuid::new_v4());
    store.zset_add(key, &member, now as f64).await?;

    store.expire(key, key_ttl).await?;

    let count = store.zset_count(key, window_start, now as f64).await?;
    Ok(count as i64 <= limit)
}

/// Effective limit for an interface: its own positive `rate_limit`, else
/// the configured default; `None` skips limiting entirely.
#[must_use]
pub fn effective_limit(
    interface_limit: Option<i64>,
    config: &RateLimitConfig,
) -> Option<i64> {
    match interface_limit {
        Some(limit) if limit > 0 => Some(limit),
        _ if config.default_limit > 0 => Some(config.default_limit),
        _ => None,
    }
}

pub struct RateLimitFilter {
    config: Arc<GatewayConfig>,
    store: Arc<dyn SharedStore>,
}

impl RateLimitFilter {
    #[must_use]
    pub fn new(config: Arc<GatewayConfig>, store: Arc<dyn SharedStore>) -> Self {
        Self { config, store }
    }
}

#[async_trait]
impl Filter for RateLimitFilter {
    fn name(&self) -> &'static str {
        "rate_limit"
    }

    fn enabled(&self) -> bool {
        self.config.filters.rate_limit && self.config.rate_limit.enabled
    }

    async fn run(&self, ctx: &mut RequestContext) -> Result<(), Rejection> {
        let Some(consumer) = ctx.consumer.as_ref() else {
            tracing::error!(request_id = %ctx.request_id, "rate limit reached without consumer");
            return Err(Rejection::Forbidden);
        };
        let Some(interface) = ctx.interface.as_ref() else {
            tracing::error!(request_id = %ctx.request_id, "rate limit reached without interface");
            return Err(Rejection::Forbidden);
        };

        let rate_config = &self.config.rate_limit;
        let Some(limit) = effective_limit(interface.rate_limit, rate_config) else {
            tracing::debug!(
                request_id = %ctx.request_id,
                interface_id = interface.id,
                "no limit configured, skipping"
            );
            return Ok(());
        };

        let key = format!("{}:{}:{}", rate_config.key_prefix, consumer.id, interface.id);
        let window = Duration::from_secs(rate_config.window_seconds);
        let key_ttl = Duration::from_secs(rate_config.key_expire_seconds);

        match check_window(self.store.as_ref(), &key, limit, window, key_ttl).await {
            Ok(true) => Ok(()),
            Ok(false) => {
                tracing::warn!(
                    request_id = %ctx.request_id,
                    consumer_id = consumer.id,
                    interface_id = interface.id,
                    limit,
                    window_seconds = rate_config.window_seconds,
                    "rate limit exceeded"
                );
                Err(Rejection::RateLimited)
            }
            Err(error) => {
                // Fail open: a broken store must degrade limiting, not
                // availability.
                tracing::error!(
                    request_id = %ctx.request_id,
                    error = %error,
                    "rate limit check degraded, admitting request"
                );
                Ok(())
            }
        }
    }
}
