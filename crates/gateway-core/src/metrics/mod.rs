//! Gateway metrics.
//!
//! Hot-path recording goes through the lock-free `metrics` macros; the
//! Prometheus recorder is installed once per process and rendered by the
//! server's `/metrics` endpoint.
//!
//! Exported series:
//!
//! - `gateway_requests_total{status}` — finished requests by HTTP status
//! - `gateway_request_duration_ms` — end-to-end latency histogram
//! - `gateway_filter_duration_ms{filter}` — per-filter latency
//! - `gateway_filter_rejections_total{filter}` — chain terminations by filter
//! - `gateway_upstream_duration_ms{outcome}` — proxied call latency
//! - `gateway_circuit_state{service}` — 0 closed, 0.5 half-open, 1 open

use crate::breaker::CircuitState;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Installs the process-wide Prometheus recorder. Idempotent: later calls
/// are no-ops once a handle exists.
///
/// # Errors
///
/// Returns an error string when the recorder cannot be installed (another
/// recorder already claimed the global slot).
pub fn install_recorder() -> Result<(), String> {
    if PROMETHEUS_HANDLE.get().is_some() {
        return Ok(());
    }
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| format!("failed to install metrics recorder: {e}"))?;
    let _ = PROMETHEUS_HANDLE.set(handle);
    Ok(())
}

/// Renders the current metric registry in Prometheus exposition format.
/// Empty when no recorder is installed.
#[must_use]
pub fn render() -> String {
    PROMETHEUS_HANDLE.get().map(PrometheusHandle::render).unwrap_or_default()
}

/// Records one finished request.
pub fn record_request(status: u16, duration_ms: f64) {
    counter!("gateway_requests_total", "status" => status.to_string()).increment(1);
    histogram!("gateway_request_duration_ms").record(duration_ms);
}

/// Records one filter execution.
pub fn record_filter(filter: &'static str, duration_ms: f64, rejected: bool) {
    histogram!("gateway_filter_duration_ms", "filter" => filter).record(duration_ms);
    if rejected {
        counter!("gateway_filter_rejections_total", "filter" => filter).increment(1);
    }
}

/// Records one proxied upstream call.
pub fn record_upstream(duration_ms: f64, success: bool) {
    let outcome = if success { "success" } else { "failure" };
    histogram!("gateway_upstream_duration_ms", "outcome" => outcome).record(duration_ms);
}

/// Publishes the observed breaker state for a service key.
pub fn record_circuit_state(service: &str, state: CircuitState) {
    let value = match state {
        CircuitState::Closed => 0.0,
        CircuitState::HalfOpen => 0.5,
        CircuitState::Open => 1.0,
    };
    gauge!("gateway_circuit_state", "service" => service.to_string()).set(value);
}
