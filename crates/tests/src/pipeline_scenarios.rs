//! End-to-end scenarios through the full filter chain.
//!
//! Each test drives the pipeline exactly as the HTTP adapter would, with a
//! mockito upstream, the stateful mock platform, and the in-process store.

use crate::mock_infrastructure::{
    envelope, gateway_with_memory_store, seeded_platform, signed_request, test_config,
    SignedRequest,
};
use bytes::Bytes;
use chrono::Utc;
use gateway_core::crypto;
use gateway_core::types::AuthType;
use std::time::Duration;

/// Waits out the fire-and-forget invocation count.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}

#[tokio::test]
async fn test_happy_path_proxies_and_counts() {
    let mut server = mockito::Server::new_async().await;
    let upstream = server
        .mock("GET", "/echo")
        .match_query(mockito::Matcher::UrlEncoded("x".into(), "1".into()))
        .match_header("x-forwarded-by", "XiaoXin-API-Gateway")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"echo":true,"x":"1"}"#)
        .create_async()
        .await;

    let platform = seeded_platform(&format!("{}/echo", server.url()));
    let pipeline = gateway_with_memory_store(test_config(), platform.clone());

    let mut ctx = signed_request(SignedRequest {
        query: Some("x=1".to_string()),
        ..SignedRequest::default()
    });
    let response = pipeline.handle(&mut ctx).await;

    assert_eq!(response.status, 200);
    let body = envelope(&response.body);
    assert_eq!(body["code"], 200);
    assert_eq!(body["message"], "ok");
    assert_eq!(body["data"]["echo"], true);
    assert!(body["timestamp"].as_i64().unwrap() > 0);

    upstream.assert_async().await;

    settle().await;
    let quota = platform.quota(3, 7).unwrap();
    assert_eq!(quota.remaining, 99, "one unit pre-consumed");
    assert_eq!(quota.total_used, 1, "successful call counted");
}

#[tokio::test]
async fn test_stale_timestamp_rejected_without_quota_change() {
    let mut server = mockito::Server::new_async().await;
    let upstream = server.mock("GET", "/echo").expect(0).create_async().await;

    let platform = seeded_platform(&format!("{}/echo", server.url()));
    let pipeline = gateway_with_memory_store(test_config(), platform.clone());

    let mut ctx = signed_request(SignedRequest {
        timestamp: Utc::now().timestamp() - 3600,
        ..SignedRequest::default()
    });
    let response = pipeline.handle(&mut ctx).await;

    assert_eq!(response.status, 403);
    assert!(response.body.is_empty(), "auth rejections carry no body");

    upstream.assert_async().await;
    let quota = platform.quota(3, 7).unwrap();
    assert_eq!(quota.remaining, 100);
    assert_eq!(quota.total_used, 0);
}

#[tokio::test]
async fn test_replayed_request_rejected_second_time() {
    let mut server = mockito::Server::new_async().await;
    let _upstream = server
        .mock("GET", "/echo")
        .with_status(200)
        .with_body("{}")
        .expect(1)
        .create_async()
        .await;

    let platform = seeded_platform(&format!("{}/echo", server.url()));
    let pipeline = gateway_with_memory_store(test_config(), platform);

    let replay = SignedRequest::default();
    let nonce = replay.nonce.clone();
    let timestamp = replay.timestamp;

    let mut first = signed_request(replay);
    assert_eq!(pipeline.handle(&mut first).await.status, 200);

    // Byte-identical second request inside the validity window.
    let mut second = signed_request(SignedRequest {
        nonce,
        timestamp,
        ..SignedRequest::default()
    });
    assert_eq!(pipeline.handle(&mut second).await.status, 403);
}

#[tokio::test]
async fn test_rate_limit_admits_limit_then_rejects() {
    let mut server = mockito::Server::new_async().await;
    let _upstream = server
        .mock("GET", "/echo")
        .with_status(200)
        .with_body("{}")
        .expect(2)
        .create_async()
        .await;

    let platform = seeded_platform(&format!("{}/echo", server.url()));
    let mut config = test_config();
    config.rate_limit.default_limit = 2;
    let pipeline = gateway_with_memory_store(config, platform.clone());

    for _ in 0..2 {
        let mut ctx = signed_request(SignedRequest::default());
        assert_eq!(pipeline.handle(&mut ctx).await.status, 200);
    }

    let mut third = signed_request(SignedRequest::default());
    let response = pipeline.handle(&mut third).await;
    assert_eq!(response.status, 429);
    let body = envelope(&response.body);
    assert_eq!(body["message"], "rate-limited, retry later");

    settle().await;
    assert_eq!(platform.quota(3, 7).unwrap().total_used, 2, "limited request is not counted");
}

#[tokio::test]
async fn test_exhausted_quota_rejected_before_upstream() {
    let mut server = mockito::Server::new_async().await;
    let upstream = server.mock("GET", "/echo").expect(0).create_async().await;

    let platform = seeded_platform(&format!("{}/echo", server.url()));
    platform.set_quota(3, 7, 0);
    let pipeline = gateway_with_memory_store(test_config(), platform.clone());

    let mut ctx = signed_request(SignedRequest::default());
    let response = pipeline.handle(&mut ctx).await;

    assert_eq!(response.status, 429);
    let body = envelope(&response.body);
    assert_eq!(body["message"], "quota exhausted or not provisioned");

    upstream.assert_async().await;
    settle().await;
    let quota = platform.quota(3, 7).unwrap();
    assert_eq!(quota.remaining, 0);
    assert_eq!(quota.total_used, 0);
}

#[tokio::test]
async fn test_failed_upstream_consumes_quota_unit_without_count() {
    let mut server = mockito::Server::new_async().await;
    let _upstream = server
        .mock("GET", "/echo")
        .with_status(500)
        .with_body("boom")
        .create_async()
        .await;

    let platform = seeded_platform(&format!("{}/echo", server.url()));
    let pipeline = gateway_with_memory_store(test_config(), platform.clone());

    let mut ctx = signed_request(SignedRequest::default());
    let response = pipeline.handle(&mut ctx).await;

    assert_eq!(response.status, 500);
    let body = envelope(&response.body);
    assert!(body["message"].as_str().unwrap().starts_with("upstream error: "));
    assert_eq!(body["data"], serde_json::Value::Null);

    settle().await;
    let quota = platform.quota(3, 7).unwrap();
    assert_eq!(quota.remaining, 99, "pre-consumed unit is not restored on failure");
    assert_eq!(quota.total_used, 0, "failed call is not counted");
}

#[tokio::test]
async fn test_unknown_access_key_rejected() {
    let platform = seeded_platform("http://127.0.0.1:1/echo");
    let pipeline = gateway_with_memory_store(test_config(), platform);

    let mut ctx = signed_request(SignedRequest::default());
    // Swap the access key after signing; the consumer lookup fails first.
    for (name, value) in &mut ctx.headers {
        if name == "accessKey" {
            *value = "ak_unknown".to_string();
        }
    }
    assert_eq!(pipeline.handle(&mut ctx).await.status, 403);
}

#[tokio::test]
async fn test_quota_service_outage_strict_mode_returns_503() {
    let mut server = mockito::Server::new_async().await;
    let upstream = server.mock("GET", "/echo").expect(0).create_async().await;

    let platform = seeded_platform(&format!("{}/echo", server.url()));
    let pipeline = gateway_with_memory_store(test_config(), platform.clone());

    platform.fail_quota(true);
    let mut ctx = signed_request(SignedRequest::default());
    let response = pipeline.handle(&mut ctx).await;

    assert_eq!(response.status, 503);
    upstream.assert_async().await;
}

#[tokio::test]
async fn test_lenient_quota_bypass_still_counts_successful_call() {
    let mut server = mockito::Server::new_async().await;
    let _upstream = server
        .mock("GET", "/echo")
        .with_status(200)
        .with_body("{}")
        .create_async()
        .await;

    let platform = seeded_platform(&format!("{}/echo", server.url()));
    platform.fail_pre_consume(true);
    let mut config = test_config();
    config.quota.strict_mode = false;
    let pipeline = gateway_with_memory_store(config, platform.clone());

    let mut ctx = signed_request(SignedRequest::default());
    let response = pipeline.handle(&mut ctx).await;
    assert_eq!(response.status, 200);

    settle().await;
    let quota = platform.quota(3, 7).unwrap();
    assert_eq!(quota.remaining, 100, "no unit was pre-consumed during the outage");
    assert_eq!(quota.total_used, 1, "invocation count runs unconditionally on success");
}

#[tokio::test]
async fn test_gateway_headers_stripped_and_markers_added() {
    let mut server = mockito::Server::new_async().await;
    let upstream = server
        .mock("GET", "/echo")
        .match_header("x-forwarded-by", "XiaoXin-API-Gateway")
        .match_header("x-request-id", mockito::Matcher::Regex(".+".to_string()))
        .match_header("accesskey", mockito::Matcher::Missing)
        .match_header("sign", mockito::Matcher::Missing)
        .match_header("nonce", mockito::Matcher::Missing)
        .match_header("timestamp", mockito::Matcher::Missing)
        .match_header("x-passthrough", "kept")
        .with_status(200)
        .with_body("{}")
        .create_async()
        .await;

    let platform = seeded_platform(&format!("{}/echo", server.url()));
    let pipeline = gateway_with_memory_store(test_config(), platform);

    let mut ctx = signed_request(SignedRequest {
        extra_headers: vec![("x-passthrough".to_string(), "kept".to_string())],
        ..SignedRequest::default()
    });
    assert_eq!(pipeline.handle(&mut ctx).await.status, 200);
    upstream.assert_async().await;
}

#[tokio::test]
async fn test_api_key_auth_injected_from_encrypted_config() {
    let master_key = "0123456789abcdef0123456789abcdef";
    let mut server = mockito::Server::new_async().await;
    let upstream = server
        .mock("GET", "/echo")
        .match_header("x-api-key", "k-123")
        .with_status(200)
        .with_body("{}")
        .create_async()
        .await;

    let provider_url = format!("{}/echo", server.url());
    let aad = format!("{provider_url}|/api/echo|GET");
    let encrypted = crypto::aes_gcm_encrypt(
        master_key.as_bytes(),
        aad.as_bytes(),
        r#"{"key":"k-123"}"#,
    )
    .unwrap();

    let mut interface = crate::mock_infrastructure::echo_interface(&provider_url);
    interface.auth_type = AuthType::ApiKey;
    interface.auth_config = Some(encrypted);
    let platform = std::sync::Arc::new(
        crate::mock_infrastructure::MockPlatform::new()
            .with_consumer(crate::mock_infrastructure::test_consumer())
            .with_interface(interface),
    );
    platform.set_quota(3, 7, 100);

    let mut config = test_config();
    config.security.authcfg_master_key = Some(master_key.to_string());
    let pipeline = gateway_with_memory_store(config, platform);

    let mut ctx = signed_request(SignedRequest::default());
    assert_eq!(pipeline.handle(&mut ctx).await.status, 200);
    upstream.assert_async().await;
}

#[tokio::test]
async fn test_basic_and_bearer_auth_injection() {
    let mut server = mockito::Server::new_async().await;
    // base64("user:pass") == dXNlcjpwYXNz
    let basic_upstream = server
        .mock("GET", "/basic")
        .match_header("authorization", "Basic dXNlcjpwYXNz")
        .with_status(200)
        .with_body("{}")
        .create_async()
        .await;
    let bearer_upstream = server
        .mock("GET", "/bearer")
        .match_header("authorization", "Bearer tok-9")
        .with_status(200)
        .with_body("{}")
        .create_async()
        .await;

    let mut basic = crate::mock_infrastructure::echo_interface(&format!("{}/basic", server.url()));
    basic.id = 10;
    basic.platform_path = "/api/basic".to_string();
    basic.auth_type = AuthType::Basic;
    basic.auth_config = Some(r#"{"username":"user","password":"pass"}"#.to_string());

    let mut bearer =
        crate::mock_infrastructure::echo_interface(&format!("{}/bearer", server.url()));
    bearer.id = 11;
    bearer.platform_path = "/api/bearer".to_string();
    bearer.auth_type = AuthType::Bearer;
    bearer.auth_config = Some(r#"{"token":"tok-9"}"#.to_string());

    let platform = std::sync::Arc::new(
        crate::mock_infrastructure::MockPlatform::new()
            .with_consumer(crate::mock_infrastructure::test_consumer())
            .with_interface(basic)
            .with_interface(bearer),
    );
    platform.set_quota(10, 7, 100);
    platform.set_quota(11, 7, 100);

    let pipeline = gateway_with_memory_store(test_config(), platform);

    let mut basic_ctx = signed_request(SignedRequest {
        path: "/api/basic".to_string(),
        ..SignedRequest::default()
    });
    assert_eq!(pipeline.handle(&mut basic_ctx).await.status, 200);

    let mut bearer_ctx = signed_request(SignedRequest {
        path: "/api/bearer".to_string(),
        ..SignedRequest::default()
    });
    assert_eq!(pipeline.handle(&mut bearer_ctx).await.status, 200);

    basic_upstream.assert_async().await;
    bearer_upstream.assert_async().await;
}

#[tokio::test]
async fn test_post_body_forwarded_verbatim() {
    let mut server = mockito::Server::new_async().await;
    let upstream = server
        .mock("POST", "/echo")
        .match_body(r#"{"payload":42}"#)
        .with_status(200)
        .with_body(r#"{"accepted":true}"#)
        .create_async()
        .await;

    let mut interface = crate::mock_infrastructure::echo_interface(&format!(
        "{}/echo",
        server.url()
    ));
    interface.method = "POST".to_string();
    let platform = std::sync::Arc::new(
        crate::mock_infrastructure::MockPlatform::new()
            .with_consumer(crate::mock_infrastructure::test_consumer())
            .with_interface(interface),
    );
    platform.set_quota(3, 7, 100);

    let pipeline = gateway_with_memory_store(test_config(), platform);

    let mut ctx = signed_request(SignedRequest {
        method: "POST".to_string(),
        body: Bytes::from_static(br#"{"payload":42}"#),
        ..SignedRequest::default()
    });
    let response = pipeline.handle(&mut ctx).await;
    assert_eq!(response.status, 200);
    assert_eq!(envelope(&response.body)["data"]["accepted"], true);
    upstream.assert_async().await;
}
