//! Inner platform service interface.
//!
//! The relational state — consumers, interface records, quota rows — is
//! owned by the management backend and reached through [`PlatformClient`].
//! The gateway treats it as an RPC boundary: lookups fail closed (a
//! transport error still yields a 403 upstream of the proxy), quota
//! mutation failures follow the configured strict/lenient policy, and
//! invocation counting is fire-and-forget.

pub mod http;

pub use http::HttpPlatformClient;

use crate::types::{Consumer, InterfaceRecord};
use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlatformError {
    /// The platform service could not be reached or timed out.
    #[error("platform service unreachable: {0}")]
    Unreachable(String),

    /// The platform answered with an unexpected status or body.
    #[error("platform service error: {0}")]
    Service(String),
}

/// RPC operations the pipeline consumes.
#[async_trait]
pub trait PlatformClient: Send + Sync {
    /// Resolves a consumer by access key. `Ok(None)` means the key is
    /// unknown. The returned `secret_key` may still be envelope-encrypted;
    /// the authenticator decrypts it transparently.
    async fn get_invoke_user(&self, access_key: &str) -> Result<Option<Consumer>, PlatformError>;

    /// Looks up the interface record published at `(platform_path, method)`.
    async fn get_interface_info(
        &self,
        platform_path: &str,
        method: &str,
    ) -> Result<Option<InterfaceRecord>, PlatformError>;

    /// Atomically decrements the consumer's remaining quota for the
    /// interface, conditional on `remaining > 0`. Returns whether a unit
    /// was consumed.
    async fn pre_consume(&self, interface_id: i64, consumer_id: i64)
        -> Result<bool, PlatformError>;

    /// Atomically increments `total_used` after a successful proxy call.
    /// Never rolls back a pre-consumed unit.
    async fn invoke_count(
        &self,
        interface_id: i64,
        consumer_id: i64,
    ) -> Result<bool, PlatformError>;
}
