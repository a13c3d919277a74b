//! Circuit breaker behaviour observed through the full pipeline.

use crate::mock_infrastructure::{
    envelope, gateway, seeded_platform, signed_request, test_config, SignedRequest,
};
use chrono::Utc;
use gateway_core::store::{MemoryStore, SharedStore};
use std::sync::Arc;

/// Mockito binds the loopback address, so that is the breaker's service key
/// for every test upstream.
const SERVICE_HOST: &str = "127.0.0.1";

fn open_time_key(prefix: &str) -> String {
    format!("{prefix}:open_time:{SERVICE_HOST}")
}

fn state_key(prefix: &str) -> String {
    format!("{prefix}:state:{SERVICE_HOST}")
}

/// Rewinds the stored open-transition time so the open timeout reads as
/// elapsed without sleeping through it.
async fn rewind_open_time(store: &dyn SharedStore, prefix: &str, minutes: u64) {
    let rewound = Utc::now().timestamp_millis() - (minutes * 60 * 1000) as i64 - 1;
    store.set(&open_time_key(prefix), &rewound.to_string()).await.unwrap();
}

#[tokio::test]
async fn test_breaker_trips_after_threshold_and_blocks_upstream() {
    let mut server = mockito::Server::new_async().await;
    let failing = server
        .mock("GET", "/echo")
        .with_status(500)
        .with_body("boom")
        .expect(5)
        .create_async()
        .await;

    let platform = seeded_platform(&format!("{}/echo", server.url()));
    let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());
    let config = test_config();
    let prefix = config.circuit_breaker.key_prefix.clone();
    let pipeline = gateway(config, platform, store.clone());

    // Five failures: each reaches the upstream and returns the 500
    // envelope; the fifth trips the breaker.
    for _ in 0..5 {
        let mut ctx = signed_request(SignedRequest::default());
        let response = pipeline.handle(&mut ctx).await;
        assert_eq!(response.status, 500);
    }

    // Sixth request: answered from the breaker, upstream untouched.
    let mut ctx = signed_request(SignedRequest::default());
    let response = pipeline.handle(&mut ctx).await;
    assert_eq!(response.status, 503);
    let body = envelope(&response.body);
    assert_eq!(body["data"]["reason"], "circuit open");
    assert_eq!(body["data"]["service"], "echo");

    failing.assert_async().await;
    assert_eq!(
        store.get(&state_key(&prefix)).await.unwrap().as_deref(),
        Some("OPEN"),
        "breaker state persisted in the shared store"
    );
}

#[tokio::test]
async fn test_breaker_stays_open_until_timeout() {
    let mut server = mockito::Server::new_async().await;
    let _failing =
        server.mock("GET", "/echo").with_status(500).expect(5).create_async().await;

    let platform = seeded_platform(&format!("{}/echo", server.url()));
    let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());
    let pipeline = gateway(test_config(), platform, store.clone());

    for _ in 0..5 {
        let mut ctx = signed_request(SignedRequest::default());
        pipeline.handle(&mut ctx).await;
    }

    // Repeated requests inside the open timeout all short-circuit.
    for _ in 0..3 {
        let mut ctx = signed_request(SignedRequest::default());
        assert_eq!(pipeline.handle(&mut ctx).await.status, 503);
    }
}

#[tokio::test]
async fn test_probe_success_closes_breaker() {
    let mut server = mockito::Server::new_async().await;
    let failing =
        server.mock("GET", "/echo").with_status(500).expect(5).create_async().await;

    let platform = seeded_platform(&format!("{}/echo", server.url()));
    let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());
    let config = test_config();
    let prefix = config.circuit_breaker.key_prefix.clone();
    let open_timeout_minutes = config.circuit_breaker.open_timeout_minutes;
    let pipeline = gateway(config, platform, store.clone());

    for _ in 0..5 {
        let mut ctx = signed_request(SignedRequest::default());
        pipeline.handle(&mut ctx).await;
    }
    failing.assert_async().await;

    // The upstream recovers; the open timeout elapses.
    let recovered = server
        .mock("GET", "/echo")
        .with_status(200)
        .with_body(r#"{"recovered":true}"#)
        .create_async()
        .await;
    rewind_open_time(store.as_ref(), &prefix, open_timeout_minutes).await;

    // Exactly one probe is elected, succeeds, and closes the breaker.
    let mut probe = signed_request(SignedRequest::default());
    let response = pipeline.handle(&mut probe).await;
    assert_eq!(response.status, 200);
    assert_eq!(envelope(&response.body)["data"]["recovered"], true);
    recovered.assert_async().await;

    assert_eq!(
        store.get(&state_key(&prefix)).await.unwrap(),
        None,
        "probe success clears the state scalar"
    );

    // Traffic flows normally afterwards.
    let mut follow_up = signed_request(SignedRequest::default());
    assert_eq!(pipeline.handle(&mut follow_up).await.status, 200);
}

#[tokio::test]
async fn test_probe_failure_reopens_breaker() {
    let mut server = mockito::Server::new_async().await;
    let _failing = server.mock("GET", "/echo").with_status(500).create_async().await;

    let platform = seeded_platform(&format!("{}/echo", server.url()));
    let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());
    let config = test_config();
    let prefix = config.circuit_breaker.key_prefix.clone();
    let open_timeout_minutes = config.circuit_breaker.open_timeout_minutes;
    let pipeline = gateway(config, platform, store.clone());

    for _ in 0..5 {
        let mut ctx = signed_request(SignedRequest::default());
        pipeline.handle(&mut ctx).await;
    }
    rewind_open_time(store.as_ref(), &prefix, open_timeout_minutes).await;

    // Probe runs against the still-broken upstream and re-opens the
    // breaker with a fresh open time.
    let mut probe = signed_request(SignedRequest::default());
    assert_eq!(pipeline.handle(&mut probe).await.status, 500);

    let mut blocked = signed_request(SignedRequest::default());
    assert_eq!(pipeline.handle(&mut blocked).await.status, 503);
    assert_eq!(store.get(&state_key(&prefix)).await.unwrap().as_deref(), Some("OPEN"));
}

#[tokio::test]
async fn test_disabled_breaker_never_blocks() {
    let mut server = mockito::Server::new_async().await;
    let failing =
        server.mock("GET", "/echo").with_status(500).expect(8).create_async().await;

    let platform = seeded_platform(&format!("{}/echo", server.url()));
    let mut config = test_config();
    config.circuit_breaker.enabled = false;
    let pipeline = gateway(config, platform, Arc::new(MemoryStore::new()));

    // Well past the threshold, every request still reaches the upstream.
    for _ in 0..8 {
        let mut ctx = signed_request(SignedRequest::default());
        assert_eq!(pipeline.handle(&mut ctx).await.status, 500);
    }
    failing.assert_async().await;
}
