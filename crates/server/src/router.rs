//! Axum adapter: bridges HTTP requests into the framework-free pipeline.
//!
//! The gateway route is a fallback handler — every path and method that is
//! not `/health` or `/metrics` goes through the filter chain. The handler
//! converts the axum request into a [`RequestContext`], runs the pipeline,
//! and converts the resulting [`GatewayResponse`] back.

use axum::body::{to_bytes, Body};
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{header::HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use gateway_core::pipeline::{Pipeline, RequestContext};
use std::net::SocketAddr;
use std::sync::Arc;

/// Shared server state handed to every handler.
pub struct AppState {
    pub pipeline: Pipeline,
    pub max_body_bytes: usize,
}

/// Liveness endpoint, outside the authenticated pipeline.
pub async fn handle_health() -> impl IntoResponse {
    (StatusCode::OK, axum::Json(serde_json::json!({"status": "ok"})))
}

/// Prometheus exposition endpoint.
pub async fn handle_metrics() -> impl IntoResponse {
    (StatusCode::OK, gateway_core::metrics::render())
}

/// The gateway fallback: any path, any method.
pub async fn handle_gateway(State(state): State<Arc<AppState>>, request: Request) -> Response {
    // ConnectInfo is absent when the router is driven without a TCP
    // listener (tests); the pipeline treats a missing peer as "unknown".
    let peer_addr = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());

    let (parts, body) = request.into_parts();

    let method = parts.method.as_str().to_string();
    let path = parts.uri.path().to_string();
    let query = parts.uri.query().map(str::to_string);
    let headers: Vec<(String, String)> = parts
        .headers
        .iter()
        .filter_map(|(name, value)| {
            value.to_str().ok().map(|value| (name.as_str().to_string(), value.to_string()))
        })
        .collect();

    let body = match to_bytes(body, state.max_body_bytes).await {
        Ok(bytes) => bytes,
        Err(error) => {
            tracing::warn!(error = %error, "failed to read request body");
            return StatusCode::PAYLOAD_TOO_LARGE.into_response();
        }
    };

    let mut ctx = RequestContext::new(method, path, query, headers, body, peer_addr);
    let gateway_response = state.pipeline.handle(&mut ctx).await;

    let mut response = Response::builder().status(gateway_response.status);
    if let Some(headers) = response.headers_mut() {
        for (name, value) in &gateway_response.headers {
            let Ok(name) = HeaderName::from_bytes(name.as_bytes()) else {
                continue;
            };
            let Ok(value) = HeaderValue::from_str(value) else {
                continue;
            };
            headers.append(name, value);
        }
    }
    response
        .body(Body::from(gateway_response.body))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}
