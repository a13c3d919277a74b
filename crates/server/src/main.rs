//! XiaoXin API gateway server.
//!
//! Wires the core pipeline to an axum listener: `/health` and `/metrics`
//! are public; every other path and method runs the filter chain.

mod router;

use anyhow::{Context, Result};
use axum::routing::get;
use axum::Router;
use gateway_core::config::GatewayConfig;
use gateway_core::pipeline::{Pipeline, PipelineDeps};
use gateway_core::platform::HttpPlatformClient;
use gateway_core::store::{MemoryStore, RedisStore, SharedStore};
use gateway_core::upstream::{UpstreamHttpClient, UpstreamHttpClientConfig};
use router::AppState;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use axum::extract::DefaultBodyLimit;
use tokio::signal;
use tower::limit::ConcurrencyLimitLayer;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn init_logging(config: &GatewayConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "warn,gateway_core={level},gateway_server={level}",
            level = config.logging.level
        ))
    });

    let registry = tracing_subscriber::registry().with(filter);
    if config.logging.format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().pretty().with_target(false))
            .init();
    }
}

/// Builds the shared store: Redis when configured, the in-process store
/// otherwise.
async fn init_store(config: &GatewayConfig) -> Result<Arc<dyn SharedStore>> {
    match &config.store.redis_url {
        Some(url) => {
            let store = RedisStore::connect(
                url,
                Duration::from_millis(config.store.op_timeout_ms()),
            )
            .await
            .context("redis store initialization failed")?;
            info!("shared store: redis");
            Ok(Arc::new(store))
        }
        None => {
            info!("shared store: in-process (single-node mode)");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

fn build_app(state: Arc<AppState>, config: &GatewayConfig) -> Router {
    Router::new()
        .route("/health", get(router::handle_health))
        .route("/metrics", get(router::handle_metrics))
        .fallback(router::handle_gateway)
        .layer(ConcurrencyLimitLayer::new(config.server.max_concurrent_requests))
        .layer(DefaultBodyLimit::max(config.server.max_body_bytes))
        .with_state(state)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install ctrl-c handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install signal handler");
                () = std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!("shutdown signal received, draining connections");
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = GatewayConfig::load().context("configuration validation failed")?;
    init_logging(&config);
    info!("starting xiaoxin api gateway");

    if let Err(e) = gateway_core::metrics::install_recorder() {
        error!(error = %e, "metrics recorder unavailable, continuing without exporter");
    }

    let store = init_store(&config).await?;
    let platform = Arc::new(
        HttpPlatformClient::new(
            &config.platform.base_url,
            Duration::from_millis(config.platform.timeout_ms),
        )
        .context("platform client initialization failed")?,
    );
    let upstream = Arc::new(
        UpstreamHttpClient::with_config(UpstreamHttpClientConfig {
            concurrent_limit: config.server.max_concurrent_requests,
            ..UpstreamHttpClientConfig::default()
        })
        .context("upstream client initialization failed")?,
    );

    let config = Arc::new(config);
    let pipeline = Pipeline::new(PipelineDeps {
        config: config.clone(),
        store,
        platform,
        upstream,
    });
    let state = Arc::new(AppState { pipeline, max_body_bytes: config.server.max_body_bytes });

    let app = build_app(state, config.as_ref());
    let addr: SocketAddr = format!("{}:{}", config.server.bind_address, config.server.bind_port)
        .parse()
        .context("invalid bind address")?;
    info!(address = %addr, "gateway listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("server shutdown complete");
    Ok(())
}
