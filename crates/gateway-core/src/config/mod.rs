//! Gateway configuration with layered loading.
//!
//! Configuration is loaded in this order (later overrides earlier):
//!
//! 1. **Compiled defaults**: hardcoded in the serde default functions
//! 2. **Config file**: TOML file named by the `GATEWAY_CONFIG` env var
//!    (falls back to `gateway.toml` when present)
//! 3. **Environment variables**: `GATEWAY_*` overrides, `__` as the
//!    section separator (e.g. `GATEWAY_SERVER__BIND_PORT=9000`)
//!
//! Configuration is validated at load time; nonsense values (zero windows,
//! a short master key, an empty platform URL) are errors rather than
//! latent misbehaviour.
//!
//! # Example
//!
//! ```toml
//! [server]
//! bind_address = "0.0.0.0"
//! bind_port = 8090
//!
//! [platform]
//! base_url = "http://platform.internal:8080"
//!
//! [store]
//! redis_url = "redis://127.0.0.1:6379/0"
//!
//! [security]
//! ip_whitelist = ["10.0.0.0/8", "127.0.0.1"]
//!
//! [rate_limit]
//! default_limit = 1000
//! ```

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

/// HTTP listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind the gateway listener to.
    pub bind_address: String,
    /// Port to listen on.
    pub bind_port: u16,
    /// Cap on concurrently processed requests.
    pub max_concurrent_requests: usize,
    /// Maximum accepted request body, in bytes.
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            bind_port: 8090,
            max_concurrent_requests: 1024,
            max_body_bytes: 1024 * 1024,
        }
    }
}

/// Inner platform service endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformConfig {
    /// Base URL of the platform's inner API.
    pub base_url: String,
    /// Service-default deadline for platform RPC calls, in milliseconds.
    pub timeout_ms: u64,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self { base_url: "http://127.0.0.1:8080".to_string(), timeout_ms: 3000 }
    }
}

/// Shared coordination store settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct StoreConfig {
    /// Redis connection URL. When absent the gateway runs on the
    /// in-process store (single-node deployments, tests).
    pub redis_url: Option<String>,
    /// Per-operation deadline for store calls, in milliseconds.
    pub op_timeout_ms: Option<u64>,
}

impl StoreConfig {
    #[must_use]
    pub fn op_timeout_ms(&self) -> u64 {
        self.op_timeout_ms.unwrap_or(1000)
    }
}

/// Security settings: IP whitelist and the signature/replay protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Literal addresses or IPv4 CIDR entries. An empty list rejects all
    /// traffic.
    pub ip_whitelist: Vec<String>,
    /// Freshness window for the `timestamp` header, in seconds.
    pub signature_timeout_seconds: u64,
    /// Exact required length of the `nonce` header.
    pub nonce_length: usize,
    pub enable_timestamp_validation: bool,
    pub enable_replay_protection: bool,
    /// 32-byte master key for auth-config / secret-key envelope decryption.
    pub authcfg_master_key: Option<String>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            ip_whitelist: vec!["127.0.0.1".to_string(), "::1".to_string()],
            signature_timeout_seconds: 300,
            nonce_length: 16,
            enable_timestamp_validation: true,
            enable_replay_protection: true,
            authcfg_master_key: None,
        }
    }
}

/// Sliding-window rate limiter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub enabled: bool,
    /// Window size in seconds.
    pub window_seconds: u64,
    /// Limit applied when an interface carries no `rate_limit` of its own.
    /// Zero or negative skips limiting for such interfaces.
    pub default_limit: i64,
    /// Store key prefix; keys are `{prefix}:{consumer_id}:{interface_id}`.
    pub key_prefix: String,
    /// TTL stamped on window keys; window plus slack so an idle key
    /// self-cleans.
    pub key_expire_seconds: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window_seconds: 60,
            default_limit: 1000,
            key_prefix: "xiaoxin:rate_limit".to_string(),
            key_expire_seconds: 75,
        }
    }
}

/// Quota gate degradation policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaConfig {
    /// Strict: a failed `PreConsume` RPC rejects the request with 503.
    /// Lenient: the request is admitted and the bypass recorded in the
    /// context.
    pub strict_mode: bool,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self { strict_mode: true }
    }
}

/// Proxy execution settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Upstream deadline when the interface record has none, in
    /// milliseconds.
    pub default_timeout_ms: u64,
    /// Reserved; the proxy currently performs no retries.
    pub default_retry_count: u32,
    /// Emit a latency log line per proxied call.
    pub enable_request_logging: bool,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self { default_timeout_ms: 30_000, default_retry_count: 3, enable_request_logging: true }
    }
}

/// Per-upstream circuit breaker settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    pub enabled: bool,
    /// Failures within the window that trip the breaker.
    pub failure_threshold: u64,
    /// Failure statistics window, in minutes.
    pub window_minutes: u64,
    /// How long the breaker stays OPEN before a probe is permitted, in
    /// minutes.
    pub open_timeout_minutes: u64,
    /// Store key prefix for failures/state/open-time/probe-token keys.
    pub key_prefix: String,
    /// TTL stamped on breaker keys, in minutes.
    pub key_expire_minutes: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: 5,
            window_minutes: 5,
            open_timeout_minutes: 1,
            key_prefix: "xiaoxin:circuit".to_string(),
            key_expire_minutes: 15,
        }
    }
}

/// Per-filter enable switches.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterSwitches {
    pub logging: bool,
    pub ip_guard: bool,
    pub authentication: bool,
    pub interface_validation: bool,
    pub rate_limit: bool,
    pub quota: bool,
    pub proxy: bool,
    /// Controls the extended header set (CORS + security headers) stamped
    /// by the response stage; the envelope itself is always written.
    pub response: bool,
}

impl Default for FilterSwitches {
    fn default() -> Self {
        Self {
            logging: true,
            ip_guard: true,
            authentication: true,
            interface_validation: true,
            rate_limit: true,
            quota: true,
            proxy: true,
            response: true,
        }
    }
}

/// Log level and format.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `trace` / `debug` / `info` / `warn` / `error`.
    pub level: String,
    /// `"json"` or `"pretty"`.
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), format: "pretty".to_string() }
    }
}

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    pub server: ServerConfig,
    pub platform: PlatformConfig,
    pub store: StoreConfig,
    pub security: SecurityConfig,
    pub rate_limit: RateLimitConfig,
    pub quota: QuotaConfig,
    pub proxy: ProxyConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub filters: FilterSwitches,
    pub logging: LoggingConfig,
}

impl GatewayConfig {
    /// Loads configuration from defaults, the optional config file, and
    /// `GATEWAY_*` environment overrides, then validates it.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] for unreadable files, type mismatches, or
    /// validation failures.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            std::env::var("GATEWAY_CONFIG").unwrap_or_else(|_| "gateway.toml".to_string());

        let config: Self = Config::builder()
            .add_source(File::with_name(&config_path).required(false))
            .add_source(Environment::with_prefix("GATEWAY").separator("__"))
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Rejects configurations that would misbehave silently at runtime.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Message`] naming the offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.bind_port == 0 {
            return Err(ConfigError::Message("server.bind_port must be non-zero".into()));
        }
        if self.platform.base_url.is_empty() || !self.platform.base_url.starts_with("http") {
            return Err(ConfigError::Message(
                "platform.base_url must be an http(s) URL".into(),
            ));
        }
        if self.security.nonce_length == 0 {
            return Err(ConfigError::Message("security.nonce_length must be positive".into()));
        }
        if self.security.signature_timeout_seconds == 0 {
            return Err(ConfigError::Message(
                "security.signature_timeout_seconds must be positive".into(),
            ));
        }
        if let Some(key) = &self.security.authcfg_master_key {
            if key.len() != 32 {
                return Err(ConfigError::Message(
                    "security.authcfg_master_key must be exactly 32 bytes".into(),
                ));
            }
        }
        if self.rate_limit.window_seconds == 0 {
            return Err(ConfigError::Message(
                "rate_limit.window_seconds must be positive".into(),
            ));
        }
        if self.rate_limit.key_expire_seconds < self.rate_limit.window_seconds {
            return Err(ConfigError::Message(
                "rate_limit.key_expire_seconds must cover the window".into(),
            ));
        }
        if self.proxy.default_timeout_ms == 0 {
            return Err(ConfigError::Message(
                "proxy.default_timeout_ms must be positive".into(),
            ));
        }
        if self.circuit_breaker.failure_threshold == 0 {
            return Err(ConfigError::Message(
                "circuit_breaker.failure_threshold must be positive".into(),
            ));
        }
        if self.circuit_breaker.window_minutes == 0 ||
            self.circuit_breaker.open_timeout_minutes == 0
        {
            return Err(ConfigError::Message(
                "circuit_breaker windows must be positive".into(),
            ));
        }
        Ok(())
    }
}
