//! JSON-over-HTTP implementation of [`PlatformClient`].
//!
//! Endpoints exposed by the platform's inner API:
//!
//! | Operation | Route |
//! |---|---|
//! | `get_invoke_user` | `GET {base}/inner/users/by-access-key?access_key=..` |
//! | `get_interface_info` | `GET {base}/inner/interfaces/lookup?path=..&method=..` |
//! | `pre_consume` | `POST {base}/inner/quota/pre-consume` |
//! | `invoke_count` | `POST {base}/inner/quota/invoke-count` |
//!
//! Lookups translate HTTP 404 into `Ok(None)`; the quota mutations return
//! `{"affected": bool}`.

use super::{PlatformClient, PlatformError};
use crate::types::{Consumer, InterfaceRecord};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Serialize)]
struct QuotaRequest {
    interface_id: i64,
    consumer_id: i64,
}

#[derive(Deserialize)]
struct QuotaReply {
    affected: bool,
}

/// Reqwest-backed client for the inner platform API.
pub struct HttpPlatformClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpPlatformClient {
    /// Builds a client with its own pooled connection set and a
    /// service-default deadline applied to every call.
    ///
    /// # Errors
    ///
    /// Returns [`PlatformError::Service`] if the underlying HTTP client
    /// cannot be constructed.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, PlatformError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(2))
            .pool_idle_timeout(Duration::from_secs(30))
            .tcp_nodelay(true)
            .build()
            .map_err(|e| PlatformError::Service(format!("http client build failed: {e}")))?;
        Ok(Self { client, base_url: base_url.trim_end_matches('/').to_string() })
    }

    fn transport_error(e: &reqwest::Error) -> PlatformError {
        if e.is_timeout() {
            PlatformError::Unreachable("deadline exceeded".to_string())
        } else if e.is_connect() {
            PlatformError::Unreachable("connection refused or unreachable".to_string())
        } else {
            PlatformError::Service(e.to_string())
        }
    }

    async fn lookup<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<Option<T>, PlatformError> {
        let response = self
            .client
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|e| Self::transport_error(&e))?;

        match response.status() {
            status if status.is_success() => {
                let value =
                    response.json::<T>().await.map_err(|e| Self::transport_error(&e))?;
                Ok(Some(value))
            }
            reqwest::StatusCode::NOT_FOUND => Ok(None),
            status => Err(PlatformError::Service(format!("unexpected status {status}"))),
        }
    }

    async fn quota_call(
        &self,
        route: &str,
        interface_id: i64,
        consumer_id: i64,
    ) -> Result<bool, PlatformError> {
        let response = self
            .client
            .post(format!("{}{route}", self.base_url))
            .json(&QuotaRequest { interface_id, consumer_id })
            .send()
            .await
            .map_err(|e| Self::transport_error(&e))?;

        if !response.status().is_success() {
            return Err(PlatformError::Service(format!(
                "unexpected status {}",
                response.status()
            )));
        }
        let reply =
            response.json::<QuotaReply>().await.map_err(|e| Self::transport_error(&e))?;
        Ok(reply.affected)
    }
}

#[async_trait]
impl PlatformClient for HttpPlatformClient {
    async fn get_invoke_user(&self, access_key: &str) -> Result<Option<Consumer>, PlatformError> {
        let url = format!("{}/inner/users/by-access-key", self.base_url);
        self.lookup(&url, &[("access_key", access_key)]).await
    }

    async fn get_interface_info(
        &self,
        platform_path: &str,
        method: &str,
    ) -> Result<Option<InterfaceRecord>, PlatformError> {
        let url = format!("{}/inner/interfaces/lookup", self.base_url);
        self.lookup(&url, &[("path", platform_path), ("method", method)]).await
    }

    async fn pre_consume(
        &self,
        interface_id: i64,
        consumer_id: i64,
    ) -> Result<bool, PlatformError> {
        self.quota_call("/inner/quota/pre-consume", interface_id, consumer_id).await
    }

    async fn invoke_count(
        &self,
        interface_id: i64,
        consumer_id: i64,
    ) -> Result<bool, PlatformError> {
        self.quota_call("/inner/quota/invoke-count", interface_id, consumer_id).await
    }
}
