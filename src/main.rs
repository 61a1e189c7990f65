use anyhow::Result;
use axum::{
    extract::State,
    http::StatusCode,
    middleware,
    response::Json,
    routing::{any, get},
    Router,
};
use prometheus::TextEncoder;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::{net::TcpListener, signal};
use tower::ServiceBuilder;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sliding_ratelimit::{
    config::Settings, gate::rate_limit_middleware, metrics::Metrics, redis::RedisConnector, Gate,
    RateLimiter,
};

#[derive(Clone)]
struct AppState {
    limiter: Arc<RateLimiter>,
    metrics: Arc<Metrics>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sliding_ratelimit=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting sliding window rate limiter");

    let config_path = std::env::var("CONFIG_PATH").ok();
    if let Some(path) = &config_path {
        info!("Loading configuration from: {}", path);
    }
    let settings = Settings::load(config_path.as_deref())?;

    let metrics = Arc::new(Metrics::new()?);
    let connector = Arc::new(RedisConnector::new(settings.redis.redis_config()));
    let limiter = Arc::new(
        RateLimiter::connect_or_degrade(connector, settings.limiter.clone(), metrics.clone())
            .await,
    );
    let gate = Gate::new(limiter.clone(), &settings.gate)?;

    let state = AppState {
        limiter: limiter.clone(),
        metrics,
    };
    let app = router(state, gate);

    let listener = TcpListener::bind(settings.server.http_addr).await?;
    info!("HTTP server listening on {}", settings.server.http_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    limiter.shutdown().await;
    info!("Service stopped");
    Ok(())
}

fn router(state: AppState, gate: Gate) -> Router {
    Router::new()
        .route("/check", any(check_handler))
        .route_layer(
            ServiceBuilder::new()
                .layer(middleware::from_fn_with_state(gate, rate_limit_middleware)),
        )
        .route("/healthcheck", get(health_check))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

async fn shutdown_signal() {
    if signal::ctrl_c().await.is_ok() {
        info!("Received Ctrl+C, shutting down");
    }
}

/// Reached only when the gate admitted the request
async fn check_handler() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn health_check(State(state): State<AppState>) -> Json<Value> {
    let status = match state.limiter.health_check().await {
        Ok(()) => "healthy",
        Err(_) => "degraded",
    };
    Json(json!({
        "status": status,
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn metrics_handler(State(state): State<AppState>) -> Result<String, StatusCode> {
    let encoder = TextEncoder::new();
    let metric_families = state.metrics.registry().gather();

    encoder
        .encode_to_string(&metric_families)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}
