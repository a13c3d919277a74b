//! # Gateway Core
//!
//! Core library for the XiaoXin API gateway: an authenticating,
//! quota-enforcing, circuit-breaking reverse proxy for third-party API
//! consumers.
//!
//! This crate provides the foundational components for:
//!
//! - **[`pipeline`]**: The ordered filter chain — logging, IP guard,
//!   authentication, interface resolution, rate limiting, quota gating,
//!   proxying — plus the response stage that wraps every outcome in the
//!   uniform envelope.
//!
//! - **[`sign`]** / **[`crypto`]**: HMAC-SHA256 request signing with a
//!   canonical string shared with the client SDK, and AES-256-GCM envelope
//!   decryption for secrets at rest.
//!
//! - **[`store`]**: The shared coordination store (replay markers, sliding
//!   windows, breaker state) with in-memory and Redis backends.
//!
//! - **[`platform`]**: The RPC boundary to the management backend owning
//!   consumers, interface records, and quotas.
//!
//! - **[`breaker`]**: Per-upstream distributed circuit breaker with a
//!   single-flight probe election.
//!
//! - **[`upstream`]**: The pooled, concurrency-capped HTTP client used for
//!   proxied calls.
//!
//! - **[`metrics`]**: Prometheus metrics for requests, filters, upstream
//!   calls, and breaker states.
//!
//! ## Request Flow
//!
//! ```text
//! Client Request
//!       │
//!       ▼
//! ┌────────────┐   miss   ┌──────────────┐
//! │  IP Guard  ├─────────►│ 403 (empty)  │
//! └─────┬──────┘          └──────────────┘
//!       ▼
//! ┌────────────┐  invalid signature / nonce replay / stale timestamp
//! │    Auth    ├─────────► 403
//! └─────┬──────┘
//!       ▼
//! ┌────────────┐  unknown or disabled
//! │ Interface  ├─────────► 403
//! └─────┬──────┘
//!       ▼
//! ┌────────────┐  window exceeded        ┌────────────┐  exhausted
//! │ Rate Limit ├─────────► 429           │   Quota    ├─────────► 429
//! └─────┬──────┘                         └─────┬──────┘
//!       └────────────────────────────────────►─┘
//!       ▼
//! ┌────────────┐  breaker open
//! │   Proxy    ├─────────► 503 fallback envelope
//! └─────┬──────┘
//!       ▼
//! Response Stage: envelope + CORS/security headers + metrics
//! ```
//!
//! The binary crate (`crates/server`) provides the axum HTTP adapter; this
//! crate stays framework-free so the pipeline can be driven directly in
//! tests.

pub mod breaker;
pub mod config;
pub mod crypto;
pub mod metrics;
pub mod pipeline;
pub mod platform;
pub mod sign;
pub mod store;
pub mod types;
pub mod upstream;
