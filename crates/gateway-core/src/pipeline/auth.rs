//! Consumer authentication: signature, freshness, and replay defense.
//!
//! The check order puts cheap shape validation before the platform RPC and
//! the HMAC, and the replay write last so only fully verified requests burn
//! a nonce:
//!
//! 1. required headers present and non-blank
//! 2. nonce is exactly `nonce_length` chars of `[A-Za-z0-9]`
//! 3. timestamp within `signature_timeout_seconds` of now (when enabled)
//! 4. consumer resolved by access key — a platform outage fails closed
//! 5. HMAC-SHA256 over the canonical string, constant-time compare
//! 6. atomic replay marker — a store outage fails open
//!
//! Every failure maps to the same 403 so probes learn nothing about which
//! step rejected them.

use super::{Filter, Rejection, RequestContext};
use crate::config::GatewayConfig;
use crate::platform::PlatformClient;
use crate::store::SharedStore;
use crate::{crypto, sign};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

pub struct AuthenticationFilter {
    config: Arc<GatewayConfig>,
    platform: Arc<dyn PlatformClient>,
    store: Arc<dyn SharedStore>,
}

impl AuthenticationFilter {
    #[must_use]
    pub fn new(
        config: Arc<GatewayConfig>,
        platform: Arc<dyn PlatformClient>,
        store: Arc<dyn SharedStore>,
    ) -> Self {
        Self { config, platform, store }
    }

    fn nonce_shape_ok(&self, nonce: &str) -> bool {
        nonce.len() == self.config.security.nonce_length &&
            nonce.chars().all(|c| c.is_ascii_alphanumeric())
    }

    fn timestamp_fresh(&self, timestamp: &str) -> bool {
        let Ok(request_time) = timestamp.parse::<i64>() else {
            return false;
        };
        let now = Utc::now().timestamp();
        let max_age = self.config.security.signature_timeout_seconds as i64;
        (now - request_time).abs() <= max_age
    }

    /// Returns the plaintext HMAC key. Envelope-encrypted secrets are
    /// decrypted with the master key (no AAD for user secrets); failures
    /// yield `None` and the request is rejected.
    fn plaintext_secret(&self, secret_key: &str) -> Option<String> {
        if !crypto::is_encrypted(secret_key) {
            return Some(secret_key.to_string());
        }
        let master_key = self.config.security.authcfg_master_key.as_ref()?;
        match crypto::aes_gcm_decrypt(master_key.as_bytes(), b"", secret_key) {
            Ok(plain) => Some(plain),
            Err(error) => {
                tracing::error!(error = %error, "secret key decryption failed");
                None
            }
        }
    }

    /// Atomic SET-IF-ABSENT on `replay:{access_key}:{nonce}`. A store
    /// failure admits the request: replay defense protects strictness, the
    /// gateway protects availability.
    async fn replay_check(&self, access_key: &str, nonce: &str) -> bool {
        let key = format!("replay:{access_key}:{nonce}");
        let ttl = Duration::from_secs(self.config.security.signature_timeout_seconds);
        match self.store.set_if_absent(&key, "1", ttl).await {
            Ok(fresh) => fresh,
            Err(error) => {
                tracing::error!(
                    access_key,
                    error = %error,
                    "replay check degraded, admitting request"
                );
                true
            }
        }
    }
}

#[async_trait]
impl Filter for AuthenticationFilter {
    fn name(&self) -> &'static str {
        "authentication"
    }

    fn enabled(&self) -> bool {
        self.config.filters.authentication
    }

    async fn run(&self, ctx: &mut RequestContext) -> Result<(), Rejection> {
        let access_key = ctx.header("accessKey").unwrap_or("").trim().to_string();
        let nonce = ctx.header("nonce").unwrap_or("").trim().to_string();
        let timestamp = ctx.header("timestamp").unwrap_or("").trim().to_string();
        let provided_sign = ctx.header("sign").unwrap_or("").trim().to_string();
        let content_sha256 = ctx.header("x-content-sha256").unwrap_or("").trim().to_string();

        if access_key.is_empty() ||
            nonce.is_empty() ||
            timestamp.is_empty() ||
            provided_sign.is_empty()
        {
            tracing::warn!(request_id = %ctx.request_id, "missing authentication headers");
            return Err(Rejection::Forbidden);
        }

        if !self.nonce_shape_ok(&nonce) {
            tracing::warn!(request_id = %ctx.request_id, "nonce failed shape check");
            return Err(Rejection::Forbidden);
        }

        if self.config.security.enable_timestamp_validation && !self.timestamp_fresh(&timestamp)
        {
            tracing::warn!(request_id = %ctx.request_id, timestamp, "stale or invalid timestamp");
            return Err(Rejection::Forbidden);
        }

        let consumer = match self.platform.get_invoke_user(&access_key).await {
            Ok(Some(consumer)) => consumer,
            Ok(None) => {
                tracing::warn!(request_id = %ctx.request_id, access_key, "unknown access key");
                return Err(Rejection::Forbidden);
            }
            Err(error) => {
                // Lookups fail closed: an unreachable platform must not
                // admit unverifiable requests.
                tracing::error!(request_id = %ctx.request_id, error = %error, "consumer lookup failed");
                return Err(Rejection::Forbidden);
            }
        };

        let Some(secret) = self.plaintext_secret(&consumer.secret_key) else {
            return Err(Rejection::Forbidden);
        };

        let canonical = sign::canonical(
            &ctx.method,
            &ctx.platform_path,
            &content_sha256,
            &timestamp,
            &nonce,
        );
        let expected = sign::hmac_sha256_hex(&canonical, &secret);
        if !sign::verify(&provided_sign, &expected) {
            tracing::warn!(request_id = %ctx.request_id, access_key, "signature mismatch");
            return Err(Rejection::Forbidden);
        }

        if self.config.security.enable_replay_protection &&
            !self.replay_check(&access_key, &nonce).await
        {
            tracing::warn!(request_id = %ctx.request_id, access_key, nonce, "replayed nonce");
            return Err(Rejection::Forbidden);
        }

        tracing::debug!(
            request_id = %ctx.request_id,
            consumer_id = consumer.id,
            "consumer authenticated"
        );
        ctx.consumer = Some(consumer);
        Ok(())
    }
}
