//! Dynamic proxy: breaker gate composed with the upstream invocation.
//!
//! The breaker isolates upstreams per host: every interface whose
//! `provider_url` shares a host shares one breaker state. In the recovery
//! window a single probe is elected through the store's probe token; losers
//! wait briefly, re-read the state, and either proceed as a normal call or
//! answer the fallback envelope without touching the upstream.
//!
//! Upstream failures do not terminate the chain — the proxy records the
//! breaker failure and hands an error payload to the response stage, which
//! renders the `upstream error: ...` envelope. A pre-consumed quota unit is
//! not restored on failure.

use super::{Filter, ProxyOutcome, Rejection, RequestContext};
use crate::breaker::{CircuitBreaker, CircuitState};
use crate::config::GatewayConfig;
use crate::platform::PlatformClient;
use crate::types::{AuthType, Consumer, InterfaceRecord};
use crate::upstream::{UpstreamError, UpstreamHttpClient};
use crate::{crypto, metrics};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use std::sync::Arc;
use std::time::{Duration, Instant};
use url::Url;

/// Headers the gateway consumes itself and never forwards upstream.
const GATEWAY_HEADERS: [&str; 7] =
    ["accessKey", "sign", "nonce", "timestamp", "body", "x-content-sha256", "x-sign-version"];

/// How long a probe loser waits before re-reading the breaker state.
const PROBE_LOSER_WAIT: Duration = Duration::from_millis(100);

fn is_gateway_header(name: &str) -> bool {
    GATEWAY_HEADERS.iter().any(|header| header.eq_ignore_ascii_case(name))
}

/// Appends the incoming query string to the provider URL, respecting a
/// query the provider URL already carries.
#[must_use]
pub fn build_target_url(provider_url: &str, query: Option<&str>) -> String {
    match query {
        Some(query) if !query.is_empty() => {
            let separator = if provider_url.contains('?') { '&' } else { '?' };
            format!("{provider_url}{separator}{query}")
        }
        _ => provider_url.to_string(),
    }
}

/// Stable breaker identity for an upstream: the host of its provider URL,
/// falling back to the interface id when the URL is not http(s).
#[must_use]
pub fn service_key(interface: &InterfaceRecord) -> String {
    let provider_url = interface.provider_url.as_deref().unwrap_or("");
    if provider_url.starts_with("http") {
        if let Ok(parsed) = Url::parse(provider_url) {
            if let Some(host) = parsed.host_str() {
                return host.to_string();
            }
        }
    }
    format!("interface:{}", interface.id)
}

pub struct ProxyFilter {
    config: Arc<GatewayConfig>,
    platform: Arc<dyn PlatformClient>,
    breaker: Arc<CircuitBreaker>,
    client: Arc<UpstreamHttpClient>,
}

impl ProxyFilter {
    #[must_use]
    pub fn new(
        config: Arc<GatewayConfig>,
        platform: Arc<dyn PlatformClient>,
        breaker: Arc<CircuitBreaker>,
        client: Arc<UpstreamHttpClient>,
    ) -> Self {
        Self { config, platform, breaker, client }
    }

    /// Decrypts the auth config when it is envelope-encrypted, binding
    /// AAD = `provider_url|platform_path|method`.
    fn plaintext_auth_config(
        &self,
        interface: &InterfaceRecord,
        auth_config: &str,
    ) -> Result<String, UpstreamError> {
        if !crypto::is_encrypted(auth_config) {
            return Ok(auth_config.to_string());
        }
        let Some(master_key) = self.config.security.authcfg_master_key.as_ref() else {
            return Err(UpstreamError::InvalidRequest(
                "auth config is encrypted but no master key is configured".to_string(),
            ));
        };
        let aad = format!(
            "{}|{}|{}",
            interface.provider_url.as_deref().unwrap_or(""),
            interface.platform_path,
            interface.method
        );
        crypto::aes_gcm_decrypt(master_key.as_bytes(), aad.as_bytes(), auth_config).map_err(
            |error| {
                tracing::error!(
                    interface_id = interface.id,
                    error = %error,
                    "auth config decryption failed"
                );
                UpstreamError::InvalidRequest("auth config decryption failed".to_string())
            },
        )
    }

    /// Credential headers for the upstream, per the interface's auth type.
    fn auth_headers(
        &self,
        interface: &InterfaceRecord,
    ) -> Result<Vec<(String, String)>, UpstreamError> {
        let Some(auth_config) = interface.auth_config.as_deref() else {
            return Ok(Vec::new());
        };
        if interface.auth_type == AuthType::None {
            return Ok(Vec::new());
        }

        let plain = self.plaintext_auth_config(interface, auth_config)?;
        let parsed: serde_json::Value = serde_json::from_str(&plain).map_err(|_| {
            UpstreamError::InvalidRequest("auth config is not valid JSON".to_string())
        })?;
        let field = |name: &str| -> Result<String, UpstreamError> {
            parsed
                .get(name)
                .and_then(serde_json::Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| {
                    UpstreamError::InvalidRequest(format!("auth config missing field {name}"))
                })
        };

        match interface.auth_type {
            AuthType::None => Ok(Vec::new()),
            AuthType::ApiKey => {
                let key = field("key")?;
                let header = parsed
                    .get("header")
                    .and_then(serde_json::Value::as_str)
                    .unwrap_or("X-API-Key")
                    .to_string();
                Ok(vec![(header, key)])
            }
            AuthType::Basic => {
                let credentials =
                    BASE64.encode(format!("{}:{}", field("username")?, field("password")?));
                Ok(vec![("Authorization".to_string(), format!("Basic {credentials}"))])
            }
            AuthType::Bearer => {
                Ok(vec![("Authorization".to_string(), format!("Bearer {}", field("token")?))])
            }
        }
    }

    /// Headers forwarded upstream: incoming set minus the gateway headers,
    /// plus the gateway markers and the interface credentials.
    fn build_upstream_headers(
        &self,
        ctx: &RequestContext,
        interface: &InterfaceRecord,
    ) -> Result<Vec<(String, String)>, UpstreamError> {
        let mut headers: Vec<(String, String)> = ctx
            .headers
            .iter()
            .filter(|(name, _)| !is_gateway_header(name))
            .cloned()
            .collect();

        headers.extend(self.auth_headers(interface)?);
        headers.push(("X-Forwarded-By".to_string(), "XiaoXin-API-Gateway".to_string()));
        headers.push(("X-Request-ID".to_string(), ctx.request_id.clone()));
        Ok(headers)
    }

    /// One upstream invocation with the interface deadline.
    async fn call_upstream(
        &self,
        ctx: &RequestContext,
        interface: &InterfaceRecord,
    ) -> Result<bytes::Bytes, UpstreamError> {
        let provider_url = interface.provider_url.as_deref().unwrap_or_default();
        let target = build_target_url(provider_url, ctx.query.as_deref());
        let headers = self.build_upstream_headers(ctx, interface)?;
        let timeout = Duration::from_millis(
            interface.timeout_ms.unwrap_or(self.config.proxy.default_timeout_ms),
        );

        let started = Instant::now();
        let result =
            self.client.send(&ctx.method, &target, &headers, ctx.body.clone(), timeout).await;
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        metrics::record_upstream(elapsed_ms, result.is_ok());

        if self.config.proxy.enable_request_logging {
            match &result {
                Ok(body) => tracing::info!(
                    request_id = %ctx.request_id,
                    interface = %interface.name,
                    bytes = body.len(),
                    elapsed_ms,
                    "proxy call completed"
                ),
                Err(error) => tracing::warn!(
                    request_id = %ctx.request_id,
                    interface = %interface.name,
                    error = %error,
                    elapsed_ms,
                    "proxy call failed"
                ),
            }
        }
        result
    }

    /// Normal-path call with breaker accounting: success feeds
    /// `record_success`, failure feeds the window and trips when the
    /// threshold is reached.
    async fn call_with_accounting(
        &self,
        ctx: &RequestContext,
        interface: &InterfaceRecord,
        service: &str,
    ) -> Result<bytes::Bytes, UpstreamError> {
        match self.call_upstream(ctx, interface).await {
            Ok(body) => {
                self.breaker.record_success(service).await;
                Ok(body)
            }
            Err(error) => {
                self.breaker.record_failure(service).await;
                if self.breaker.should_trip(service).await {
                    self.breaker.trip(service).await;
                }
                Err(error)
            }
        }
    }

    /// HALF_OPEN handling: elect one probe, everyone else waits out the
    /// result or falls back.
    async fn probe_or_fallback(
        &self,
        ctx: &RequestContext,
        interface: &InterfaceRecord,
        service: &str,
    ) -> Result<Result<bytes::Bytes, UpstreamError>, Rejection> {
        if self.breaker.try_acquire_probe_token(service).await {
            tracing::info!(service, request_id = %ctx.request_id, "probe token won, testing upstream");
            let result = match self.call_upstream(ctx, interface).await {
                Ok(body) => {
                    self.breaker.record_success(service).await;
                    Ok(body)
                }
                Err(error) => {
                    self.breaker.record_failure(service).await;
                    self.breaker.trip(service).await;
                    Err(error)
                }
            };
            self.breaker.release_probe_token(service).await;
            return Ok(result);
        }

        tokio::time::sleep(PROBE_LOSER_WAIT).await;
        if self.breaker.current_state(service).await == CircuitState::Closed {
            tracing::debug!(service, "probe recovered the upstream, proceeding");
            return Ok(self.call_with_accounting(ctx, interface, service).await);
        }
        Err(Rejection::CircuitOpen { service: interface.name.clone() })
    }

    /// Fire-and-forget invocation count after a successful proxy call.
    fn record_invocation(&self, consumer: &Consumer, interface: &InterfaceRecord) {
        let platform = self.platform.clone();
        let consumer_id = consumer.id;
        let interface_id = interface.id;
        tokio::spawn(async move {
            if let Err(error) = platform.invoke_count(interface_id, consumer_id).await {
                tracing::error!(
                    consumer_id,
                    interface_id,
                    error = %error,
                    "invocation count failed"
                );
            }
        });
    }
}

#[async_trait]
impl Filter for ProxyFilter {
    fn name(&self) -> &'static str {
        "proxy"
    }

    fn enabled(&self) -> bool {
        self.config.filters.proxy
    }

    async fn run(&self, ctx: &mut RequestContext) -> Result<(), Rejection> {
        let Some(consumer) = ctx.consumer.clone() else {
            tracing::error!(request_id = %ctx.request_id, "proxy reached without consumer");
            return Err(Rejection::Forbidden);
        };
        let Some(interface) = ctx.interface.clone() else {
            tracing::error!(request_id = %ctx.request_id, "proxy reached without interface");
            return Err(Rejection::Forbidden);
        };

        let service = service_key(&interface);

        let result = if self.breaker.is_enabled() {
            let state = self.breaker.current_state(&service).await;
            metrics::record_circuit_state(&service, state);
            match state {
                CircuitState::Open => {
                    tracing::warn!(
                        request_id = %ctx.request_id,
                        service,
                        interface = %interface.name,
                        "circuit open, upstream not called"
                    );
                    return Err(Rejection::CircuitOpen { service: interface.name.clone() });
                }
                CircuitState::HalfOpen => {
                    self.probe_or_fallback(ctx, &interface, &service).await?
                }
                CircuitState::Closed => {
                    self.call_with_accounting(ctx, &interface, &service).await
                }
            }
        } else {
            self.call_upstream(ctx, &interface).await
        };

        match result {
            Ok(body) => {
                self.record_invocation(&consumer, &interface);
                ctx.proxy = Some(ProxyOutcome::Success(body));
            }
            Err(error) => {
                ctx.proxy = Some(ProxyOutcome::Failed(error.to_string()));
            }
        }
        Ok(())
    }
}
