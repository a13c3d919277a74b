//! Distributed circuit breaker over the shared store.
//!
//! State is shared by every gateway instance, keyed per upstream service:
//!
//! - `{prefix}:failures:{service_key}` — ordered set of recent failure
//!   timestamps (member = uuid, score = epoch ms)
//! - `{prefix}:state:{service_key}` — `OPEN` / `HALF_OPEN` scalar; absent
//!   means CLOSED
//! - `{prefix}:open_time:{service_key}` — epoch ms of the OPEN transition
//! - `{prefix}:probe_token:{service_key}` — single-flight probe token
//!
//! The OPEN → HALF_OPEN transition is computed from `open_time`, never
//! written: once the open timeout elapses, readers observe HALF_OPEN while
//! the stored scalar still says OPEN. Store failures degrade to CLOSED so a
//! broken coordination store never blocks traffic.
//!
//! ```text
//! CLOSED  --(failures >= threshold in window)-->  OPEN
//! OPEN    --(open_timeout elapsed)-->             HALF_OPEN  (observed)
//! HALF_OPEN --(probe success)-->                  CLOSED
//! HALF_OPEN --(probe failure)-->                  OPEN
//! ```

use crate::config::CircuitBreakerConfig;
use crate::store::SharedStore;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// TTL on the single-flight probe token; guarantees liveness if the probe
/// winner crashes mid-call.
const PROBE_TOKEN_TTL: Duration = Duration::from_secs(30);

/// Observable breaker state for one service key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation, requests flow to the upstream.
    Closed,
    /// Tripped; requests are answered with the fallback envelope.
    Open,
    /// Recovery window; a single elected probe may reach the upstream.
    HalfOpen,
}

impl CircuitState {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

/// Circuit breaker facade over the shared store.
pub struct CircuitBreaker {
    store: Arc<dyn SharedStore>,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(store: Arc<dyn SharedStore>, config: CircuitBreakerConfig) -> Self {
        Self { store, config }
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    fn failures_key(&self, service_key: &str) -> String {
        format!("{}:failures:{service_key}", self.config.key_prefix)
    }

    fn state_key(&self, service_key: &str) -> String {
        format!("{}:state:{service_key}", self.config.key_prefix)
    }

    fn open_time_key(&self, service_key: &str) -> String {
        format!("{}:open_time:{service_key}", self.config.key_prefix)
    }

    fn probe_token_key(&self, service_key: &str) -> String {
        format!("{}:probe_token:{service_key}", self.config.key_prefix)
    }

    fn window_ms(&self) -> i64 {
        (self.config.window_minutes * 60 * 1000) as i64
    }

    fn open_timeout_ms(&self) -> i64 {
        (self.config.open_timeout_minutes * 60 * 1000) as i64
    }

    fn key_ttl(&self) -> Duration {
        Duration::from_secs(self.config.key_expire_minutes * 60)
    }

    /// Reads the current state for a service key. Absent state means
    /// CLOSED; an OPEN scalar past its timeout reads as HALF_OPEN without
    /// being rewritten; any store error reads as CLOSED.
    pub async fn current_state(&self, service_key: &str) -> CircuitState {
        if !self.config.enabled {
            return CircuitState::Closed;
        }

        let state = match self.store.get(&self.state_key(service_key)).await {
            Ok(value) => value,
            Err(error) => {
                tracing::error!(service = service_key, error = %error, "breaker state read failed, treating as closed");
                return CircuitState::Closed;
            }
        };

        match state.as_deref() {
            Some("OPEN") => {
                let open_time = match self.store.get(&self.open_time_key(service_key)).await {
                    Ok(value) => value,
                    Err(error) => {
                        tracing::error!(service = service_key, error = %error, "breaker open-time read failed, treating as closed");
                        return CircuitState::Closed;
                    }
                };
                match open_time.and_then(|raw| raw.parse::<i64>().ok()) {
                    Some(opened_at) => {
                        let now = Utc::now().timestamp_millis();
                        if now - opened_at >= self.open_timeout_ms() {
                            tracing::info!(service = service_key, "breaker entering probe window");
                            CircuitState::HalfOpen
                        } else {
                            CircuitState::Open
                        }
                    }
                    // Missing or unparseable open time: fail open.
                    None => CircuitState::Closed,
                }
            }
            Some("HALF_OPEN") => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }

    /// Appends a failure to the service's window and evicts entries older
    /// than the window. Store errors are logged and swallowed.
    pub async fn record_failure(&self, service_key: &str) {
        if !self.config.enabled {
            return;
        }

        let key = self.failures_key(service_key);
        let now = Utc::now().timestamp_millis();
        let member = Uuid::new_v4().to_string();

        if let Err(error) = self.store.zset_add(&key, &member, now as f64).await {
            tracing::error!(service = service_key, error = %error, "breaker failure record failed");
            return;
        }
        let cutoff = (now - self.window_ms()) as f64;
        if let Err(error) = self.store.zset_remove_range_by_score(&key, 0.0, cutoff).await {
            tracing::error!(service = service_key, error = %error, "breaker failure eviction failed");
        }
        if let Err(error) = self.store.expire(&key, self.key_ttl()).await {
            tracing::error!(service = service_key, error = %error, "breaker failure ttl failed");
        }
    }

    /// Whether failures within the window have reached the threshold.
    /// Store errors answer `false` (never trip on a broken store).
    pub async fn should_trip(&self, service_key: &str) -> bool {
        if !self.config.enabled {
            return false;
        }

        let now = Utc::now().timestamp_millis();
        let window_start = (now - self.window_ms()) as f64;
        match self
            .store
            .zset_count(&self.failures_key(service_key), window_start, now as f64)
            .await
        {
            Ok(count) => count >= self.config.failure_threshold,
            Err(error) => {
                tracing::error!(service = service_key, error = %error, "breaker trip check failed");
                false
            }
        }
    }

    /// Transitions the breaker to OPEN, stamping the transition time and
    /// TTLs so a dead service key self-cleans.
    pub async fn trip(&self, service_key: &str) {
        if !self.config.enabled {
            return;
        }

        let now = Utc::now().timestamp_millis();
        tracing::warn!(service = service_key, "circuit breaker opened");

        let state_key = self.state_key(service_key);
        let open_time_key = self.open_time_key(service_key);
        let ttl = self.key_ttl();

        if let Err(error) = self.store.set(&state_key, "OPEN").await {
            tracing::error!(service = service_key, error = %error, "breaker trip write failed");
            return;
        }
        if let Err(error) = self.store.set(&open_time_key, &now.to_string()).await {
            tracing::error!(service = service_key, error = %error, "breaker open-time write failed");
        }
        if let Err(error) = self.store.expire(&state_key, ttl).await {
            tracing::error!(service = service_key, error = %error, "breaker state ttl failed");
        }
        if let Err(error) = self.store.expire(&open_time_key, ttl).await {
            tracing::error!(service = service_key, error = %error, "breaker open-time ttl failed");
        }
    }

    /// Records a successful call. Recovering from the probe window deletes
    /// the state scalars (back to CLOSED); accumulated failures are kept as
    /// window statistics.
    pub async fn record_success(&self, service_key: &str) {
        if !self.config.enabled {
            return;
        }

        if self.current_state(service_key).await == CircuitState::HalfOpen {
            let _ = self.store.delete(&self.state_key(service_key)).await;
            let _ = self.store.delete(&self.open_time_key(service_key)).await;
            tracing::info!(service = service_key, "circuit breaker closed after probe success");
        }
    }

    /// Attempts to win the single-flight probe election. Exactly one caller
    /// per token TTL gets `true`; store errors answer `false` so the caller
    /// falls back instead of stampeding the upstream.
    pub async fn try_acquire_probe_token(&self, service_key: &str) -> bool {
        match self
            .store
            .set_if_absent(&self.probe_token_key(service_key), "1", PROBE_TOKEN_TTL)
            .await
        {
            Ok(acquired) => acquired,
            Err(error) => {
                tracing::warn!(service = service_key, error = %error, "probe token acquisition failed");
                false
            }
        }
    }

    /// Releases the probe token after the probe resolves. Failures are
    /// harmless; the token TTL reclaims it.
    pub async fn release_probe_token(&self, service_key: &str) {
        if let Err(error) = self.store.delete(&self.probe_token_key(service_key)).await {
            tracing::warn!(service = service_key, error = %error, "probe token release failed");
        }
    }
}
