//! Reusable mocks for driving the gateway pipeline without external
//! services.
//!
//! [`MockPlatform`] is a stateful in-memory stand-in for the management
//! backend: it holds consumers, interface records, and quota rows, and
//! implements the same atomic pre-consume / invoke-count contract the real
//! service provides. Request construction helpers produce correctly signed
//! [`RequestContext`] values so scenarios read like client traffic.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use dashmap::DashMap;
use gateway_core::config::GatewayConfig;
use gateway_core::pipeline::{Pipeline, PipelineDeps, RequestContext};
use gateway_core::platform::{PlatformClient, PlatformError};
use gateway_core::sign;
use gateway_core::store::{MemoryStore, SharedStore};
use gateway_core::types::{AuthType, Consumer, InterfaceRecord, InterfaceStatus};
use gateway_core::upstream::UpstreamHttpClient;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Client address whitelisted by [`test_config`].
pub const CLIENT_IP: &str = "203.0.113.7";
/// Access key of the consumer seeded by [`seeded_platform`].
pub const ACCESS_KEY: &str = "ak_test";
/// Matching secret key.
pub const SECRET_KEY: &str = "sk_test";

/// One quota row: `(consumer, interface) -> {remaining, total_used}`.
#[derive(Debug, Clone, Copy)]
pub struct QuotaRow {
    pub remaining: i64,
    pub total_used: i64,
}

/// Stateful in-memory platform backend.
#[derive(Default)]
pub struct MockPlatform {
    consumers: Vec<Consumer>,
    interfaces: Vec<InterfaceRecord>,
    quotas: DashMap<(i64, i64), QuotaRow>,
    fail_lookups: AtomicBool,
    fail_quota: AtomicBool,
    fail_pre_consume: AtomicBool,
}

impl MockPlatform {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_consumer(mut self, consumer: Consumer) -> Self {
        self.consumers.push(consumer);
        self
    }

    #[must_use]
    pub fn with_interface(mut self, interface: InterfaceRecord) -> Self {
        self.interfaces.push(interface);
        self
    }

    pub fn set_quota(&self, interface_id: i64, consumer_id: i64, remaining: i64) {
        self.quotas
            .insert((interface_id, consumer_id), QuotaRow { remaining, total_used: 0 });
    }

    #[must_use]
    pub fn quota(&self, interface_id: i64, consumer_id: i64) -> Option<QuotaRow> {
        self.quotas.get(&(interface_id, consumer_id)).map(|row| *row)
    }

    pub fn fail_lookups(&self, fail: bool) {
        self.fail_lookups.store(fail, Ordering::SeqCst);
    }

    pub fn fail_quota(&self, fail: bool) {
        self.fail_quota.store(fail, Ordering::SeqCst);
    }

    /// Fails only `pre_consume`, leaving `invoke_count` healthy.
    pub fn fail_pre_consume(&self, fail: bool) {
        self.fail_pre_consume.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl PlatformClient for MockPlatform {
    async fn get_invoke_user(&self, access_key: &str) -> Result<Option<Consumer>, PlatformError> {
        if self.fail_lookups.load(Ordering::SeqCst) {
            return Err(PlatformError::Unreachable("injected failure".to_string()));
        }
        Ok(self.consumers.iter().find(|c| c.access_key == access_key).cloned())
    }

    async fn get_interface_info(
        &self,
        platform_path: &str,
        method: &str,
    ) -> Result<Option<InterfaceRecord>, PlatformError> {
        if self.fail_lookups.load(Ordering::SeqCst) {
            return Err(PlatformError::Unreachable("injected failure".to_string()));
        }
        Ok(self
            .interfaces
            .iter()
            .find(|i| i.platform_path == platform_path && i.method == method)
            .cloned())
    }

    async fn pre_consume(&self, interface_id: i64, consumer_id: i64) -> Result<bool, PlatformError> {
        if self.fail_quota.load(Ordering::SeqCst) || self.fail_pre_consume.load(Ordering::SeqCst) {
            return Err(PlatformError::Unreachable("injected failure".to_string()));
        }
        let Some(mut row) = self.quotas.get_mut(&(interface_id, consumer_id)) else {
            return Ok(false);
        };
        if row.remaining > 0 {
            row.remaining -= 1;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn invoke_count(&self, interface_id: i64, consumer_id: i64) -> Result<bool, PlatformError> {
        if self.fail_quota.load(Ordering::SeqCst) {
            return Err(PlatformError::Unreachable("injected failure".to_string()));
        }
        let Some(mut row) = self.quotas.get_mut(&(interface_id, consumer_id)) else {
            return Ok(false);
        };
        row.total_used += 1;
        Ok(true)
    }
}

/// Gateway configuration with the test client whitelisted and short
/// upstream deadlines.
#[must_use]
pub fn test_config() -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.security.ip_whitelist = vec![CLIENT_IP.to_string()];
    config.proxy.default_timeout_ms = 2000;
    config
}

/// The consumer every scenario signs as.
#[must_use]
pub fn test_consumer() -> Consumer {
    Consumer {
        id: 7,
        user_role: "user".to_string(),
        access_key: ACCESS_KEY.to_string(),
        secret_key: SECRET_KEY.to_string(),
    }
}

/// An enabled interface forwarding `GET /api/echo` to `provider_url`.
#[must_use]
pub fn echo_interface(provider_url: &str) -> InterfaceRecord {
    InterfaceRecord {
        id: 3,
        name: "echo".to_string(),
        platform_path: "/api/echo".to_string(),
        method: "GET".to_string(),
        provider_url: Some(provider_url.to_string()),
        status: InterfaceStatus::Enabled,
        auth_type: AuthType::None,
        auth_config: None,
        timeout_ms: Some(2000),
        rate_limit: None,
    }
}

/// Platform seeded with the test consumer, the echo interface, and a
/// generous quota row.
#[must_use]
pub fn seeded_platform(provider_url: &str) -> Arc<MockPlatform> {
    let platform = MockPlatform::new()
        .with_consumer(test_consumer())
        .with_interface(echo_interface(provider_url));
    platform.set_quota(3, 7, 100);
    Arc::new(platform)
}

/// Full pipeline over the given platform and store.
#[must_use]
pub fn gateway(
    config: GatewayConfig,
    platform: Arc<MockPlatform>,
    store: Arc<dyn SharedStore>,
) -> Pipeline {
    Pipeline::new(PipelineDeps {
        config: Arc::new(config),
        store,
        platform,
        upstream: Arc::new(UpstreamHttpClient::new().expect("upstream client")),
    })
}

/// Pipeline with a fresh in-process store.
#[must_use]
pub fn gateway_with_memory_store(
    config: GatewayConfig,
    platform: Arc<MockPlatform>,
) -> Pipeline {
    gateway(config, platform, Arc::new(MemoryStore::new()))
}

/// A fresh 16-character alphanumeric nonce.
#[must_use]
pub fn fresh_nonce() -> String {
    Uuid::new_v4().simple().to_string()[..16].to_string()
}

/// Options for [`signed_request`]; the defaults produce a valid request.
pub struct SignedRequest {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    pub body: Bytes,
    pub nonce: String,
    pub timestamp: i64,
    pub extra_headers: Vec<(String, String)>,
}

impl Default for SignedRequest {
    fn default() -> Self {
        Self {
            method: "GET".to_string(),
            path: "/api/echo".to_string(),
            query: None,
            body: Bytes::new(),
            nonce: fresh_nonce(),
            timestamp: Utc::now().timestamp(),
            extra_headers: Vec::new(),
        }
    }
}

/// Builds a correctly signed [`RequestContext`] from the whitelisted
/// client. The body digest is carried in `x-content-sha256` whenever the
/// body is non-empty.
#[must_use]
pub fn signed_request(req: SignedRequest) -> RequestContext {
    let timestamp = req.timestamp.to_string();
    let content_sha256 =
        if req.body.is_empty() { String::new() } else { sign::sha256_hex(&req.body) };

    let canonical =
        sign::canonical(&req.method, &req.path, &content_sha256, &timestamp, &req.nonce);
    let signature = sign::hmac_sha256_hex(&canonical, SECRET_KEY);

    let mut headers = vec![
        ("X-Forwarded-For".to_string(), CLIENT_IP.to_string()),
        ("accessKey".to_string(), ACCESS_KEY.to_string()),
        ("nonce".to_string(), req.nonce.clone()),
        ("timestamp".to_string(), timestamp),
        ("sign".to_string(), signature),
    ];
    if !content_sha256.is_empty() {
        headers.push(("x-content-sha256".to_string(), content_sha256));
    }
    headers.extend(req.extra_headers);

    RequestContext::new(req.method, req.path, req.query, headers, req.body, None)
}

/// Parses a gateway response body as the JSON envelope.
#[must_use]
pub fn envelope(body: &[u8]) -> serde_json::Value {
    serde_json::from_slice(body).expect("response body is a JSON envelope")
}
