use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;

/// An API consumer resolved from the platform backend.
///
/// The `secret_key` held here is plaintext after resolution; it is used as
/// the HMAC key for signature verification and must never be logged. The
/// custom [`fmt::Debug`] implementation redacts it.
#[derive(Clone, Serialize, Deserialize)]
pub struct Consumer {
    /// Stable numeric identifier.
    pub id: i64,
    /// Role tag assigned by the platform (e.g. "user", "admin").
    #[serde(default)]
    pub user_role: String,
    /// Public handle carried in the `accessKey` header. Unique per consumer.
    pub access_key: String,
    /// Shared symmetric secret used as the HMAC-SHA256 key.
    pub secret_key: String,
}

impl fmt::Debug for Consumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Consumer")
            .field("id", &self.id)
            .field("user_role", &self.user_role)
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

/// Lifecycle status of an interface record.
///
/// Stored as `0` (disabled) / `1` (enabled) by the platform backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(from = "u8", into = "u8")]
pub enum InterfaceStatus {
    #[default]
    Disabled,
    Enabled,
}

impl From<u8> for InterfaceStatus {
    fn from(value: u8) -> Self {
        match value {
            1 => Self::Enabled,
            _ => Self::Disabled,
        }
    }
}

impl From<InterfaceStatus> for u8 {
    fn from(value: InterfaceStatus) -> Self {
        match value {
            InterfaceStatus::Disabled => 0,
            InterfaceStatus::Enabled => 1,
        }
    }
}

/// Upstream authentication scheme for a proxied interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthType {
    /// No upstream credentials are injected.
    #[default]
    None,
    /// A single API-key header, name taken from the auth config
    /// (`X-API-Key` when unspecified).
    ApiKey,
    /// HTTP Basic from `username` / `password` in the auth config.
    Basic,
    /// `Authorization: Bearer <token>` from the auth config.
    Bearer,
}

impl AuthType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::ApiKey => "API_KEY",
            Self::Basic => "BASIC",
            Self::Bearer => "BEARER",
        }
    }
}

impl fmt::Display for AuthType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A published interface resolved by `(platform_path, method)`.
///
/// `platform_path` is the path clients call on the gateway; `provider_url`
/// is the absolute upstream address the request is forwarded to. The pair
/// `(platform_path, method)` is unique among enabled records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterfaceRecord {
    pub id: i64,
    pub name: String,
    /// Incoming path on the gateway, e.g. `/api/geo/query`.
    pub platform_path: String,
    /// HTTP verb the record is published for.
    pub method: String,
    /// Absolute upstream URL, e.g. `http://ip-api.com/json`.
    #[serde(default)]
    pub provider_url: Option<String>,
    #[serde(default)]
    pub status: InterfaceStatus,
    #[serde(default)]
    pub auth_type: AuthType,
    /// Upstream credential material, possibly envelope-encrypted. Decrypted
    /// on demand with AAD = `provider_url|platform_path|method`.
    #[serde(default)]
    pub auth_config: Option<String>,
    /// Per-interface upstream deadline; the proxy default applies when absent.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Requests admitted per rate-limit window; non-positive or absent means
    /// the configured default applies.
    #[serde(default)]
    pub rate_limit: Option<i64>,
}

impl InterfaceRecord {
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.status == InterfaceStatus::Enabled
    }
}

/// The uniform JSON response body every gateway reply is wrapped in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub code: u16,
    pub message: String,
    pub data: serde_json::Value,
    /// Epoch milliseconds at envelope construction.
    pub timestamp: i64,
}

impl Envelope {
    #[must_use]
    pub fn new(code: u16, message: impl Into<String>, data: serde_json::Value) -> Self {
        Self { code, message: message.into(), data, timestamp: Utc::now().timestamp_millis() }
    }

    /// Successful proxy result: `data` is the parsed upstream body, or the
    /// raw body as a string when it is not valid JSON.
    #[must_use]
    pub fn success(data: serde_json::Value) -> Self {
        Self::new(200, "ok", data)
    }

    #[must_use]
    pub fn failure(code: u16, message: impl Into<String>) -> Self {
        Self::new(code, message, serde_json::Value::Null)
    }

    /// Serializes the envelope, falling back to a hand-built body if
    /// serialization itself fails.
    #[must_use]
    pub fn to_body(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_else(|_| {
            format!(
                "{{\"code\":500,\"message\":\"internal gateway error\",\"data\":null,\"timestamp\":{}}}",
                Utc::now().timestamp_millis()
            )
            .into_bytes()
        })
    }
}
