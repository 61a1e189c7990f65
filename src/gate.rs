//! Request admission in front of protected handlers.
//!
//! The gate derives a caller identifier from a forwarded-address header,
//! asks the limiter whether that caller is over budget and either rejects
//! with 429 or hands the untouched request to the wrapped handler.

use axum::{
    extract::{Request, State},
    http::{HeaderMap, HeaderName, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::{future::Future, sync::Arc};
use tracing::debug;

use crate::{config::GateSettings, error::Result, limiter::RateLimiter};

/// Body message of a rejected request
pub const RATE_LIMIT_MESSAGE: &str = "Too many requests. Please try again later.";

#[derive(Clone)]
pub struct Gate {
    limiter: Arc<RateLimiter>,
    identifier_header: HeaderName,
    fallback_identifier: Arc<str>,
}

impl Gate {
    pub fn new(limiter: Arc<RateLimiter>, settings: &GateSettings) -> Result<Self> {
        Ok(Self {
            limiter,
            identifier_header: settings.header_name()?,
            fallback_identifier: Arc::from(settings.fallback_identifier.as_str()),
        })
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Caller identifier for a request.
    ///
    /// Uses the first entry of the identifier header (the originating client
    /// in `X-Forwarded-For`). Requests without a usable value all share the
    /// fallback identifier and therefore one budget.
    pub fn identifier(&self, headers: &HeaderMap) -> String {
        headers
            .get(&self.identifier_header)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(',').next())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| self.fallback_identifier.to_string())
    }

    /// Admit `request` to `handler`, or reject it with 429 if the caller is
    /// over budget. The handler's response is returned unchanged.
    pub async fn with_rate_limit<F, Fut, R>(&self, request: Request, handler: F) -> Response
    where
        F: FnOnce(Request) -> Fut,
        Fut: Future<Output = R>,
        R: IntoResponse,
    {
        let identifier = self.identifier(request.headers());

        if self.limiter.is_rate_limited(&identifier).await {
            debug!(identifier = %identifier, "Rejecting request");
            self.limiter.metrics().record_gate_request("rejected");
            return too_many_requests();
        }

        self.limiter.metrics().record_gate_request("forwarded");
        handler(request).await.into_response()
    }
}

/// Rejection returned to callers over their budget
pub fn too_many_requests() -> Response {
    (
        StatusCode::TOO_MANY_REQUESTS,
        Json(json!({ "error": RATE_LIMIT_MESSAGE })),
    )
        .into_response()
}

/// Axum middleware wrapping the remaining stack with the gate.
///
/// Install with `axum::middleware::from_fn_with_state(gate, rate_limit_middleware)`.
pub async fn rate_limit_middleware(
    State(gate): State<Gate>,
    request: Request,
    next: Next,
) -> Response {
    gate.with_rate_limit(request, |request| next.run(request)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::LimiterSettings, metrics::Metrics, store::MemoryWindowStore, utils::TimeSource,
    };
    use axum::body::{to_bytes, Body};
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn gate(max_requests: u64, settings: GateSettings) -> Gate {
        let store = Arc::new(MemoryWindowStore::new());
        let limiter = RateLimiter::connect(
            Arc::new(store),
            LimiterSettings {
                max_requests,
                ..Default::default()
            },
            Arc::new(Metrics::new().unwrap()),
        )
        .await
        .unwrap()
        .with_time_source(TimeSource::manual(1_700_000_000));

        Gate::new(Arc::new(limiter), &settings).unwrap()
    }

    fn request_from(forwarded_for: Option<&str>) -> Request {
        let mut builder = axum::http::Request::builder().uri("/api/videos");
        if let Some(value) = forwarded_for {
            builder = builder.header("x-forwarded-for", value);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_identifier_extraction() {
        let gate = gate(1, GateSettings::default()).await;

        let headers = request_from(Some("1.2.3.4")).headers().clone();
        assert_eq!(gate.identifier(&headers), "1.2.3.4");

        let headers = request_from(Some(" 1.2.3.4 , 10.0.0.1")).headers().clone();
        assert_eq!(gate.identifier(&headers), "1.2.3.4");

        let headers = request_from(Some("")).headers().clone();
        assert_eq!(gate.identifier(&headers), "unknown");

        let headers = request_from(None).headers().clone();
        assert_eq!(gate.identifier(&headers), "unknown");
    }

    #[tokio::test]
    async fn test_custom_header_and_fallback() {
        let settings = GateSettings {
            identifier_header: "x-real-ip".to_string(),
            fallback_identifier: "anonymous".to_string(),
        };
        let gate = gate(1, settings).await;

        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "1.2.3.4".parse().unwrap());
        assert_eq!(gate.identifier(&headers), "anonymous");

        headers.insert("x-real-ip", "5.6.7.8".parse().unwrap());
        assert_eq!(gate.identifier(&headers), "5.6.7.8");
    }

    #[tokio::test]
    async fn test_invalid_header_setting() {
        let store = Arc::new(MemoryWindowStore::new());
        let limiter = RateLimiter::connect(
            Arc::new(store),
            LimiterSettings::default(),
            Arc::new(Metrics::new().unwrap()),
        )
        .await
        .unwrap();

        let settings = GateSettings {
            identifier_header: "bad header".to_string(),
            ..Default::default()
        };
        assert!(Gate::new(Arc::new(limiter), &settings).is_err());
    }

    #[tokio::test]
    async fn test_forwards_then_rejects() {
        let gate = gate(1, GateSettings::default()).await;
        let calls = AtomicUsize::new(0);

        let response = gate
            .with_rate_limit(request_from(Some("1.2.3.4")), |_| async {
                calls.fetch_add(1, Ordering::SeqCst);
                (StatusCode::CREATED, "saved")
            })
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"saved");

        let response = gate
            .with_rate_limit(request_from(Some("1.2.3.4")), |_| async {
                calls.fetch_add(1, Ordering::SeqCst);
                StatusCode::CREATED
            })
            .await;
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json, json!({ "error": RATE_LIMIT_MESSAGE }));

        let metrics = gate.limiter().metrics();
        assert_eq!(metrics.gate_request_total("forwarded"), 1);
        assert_eq!(metrics.gate_request_total("rejected"), 1);
    }

    #[tokio::test]
    async fn test_handler_errors_pass_through() {
        let gate = gate(5, GateSettings::default()).await;

        let response = gate
            .with_rate_limit(request_from(Some("1.2.3.4")), |_| async {
                (
                    StatusCode::UNAUTHORIZED,
                    Json(json!({ "error": "Please sign in to continue" })),
                )
            })
            .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_missing_header_shares_fallback_budget() {
        let gate = gate(2, GateSettings::default()).await;

        for _ in 0..2 {
            let response = gate
                .with_rate_limit(request_from(None), |_| async { StatusCode::OK })
                .await;
            assert_eq!(response.status(), StatusCode::OK);
        }

        let response = gate
            .with_rate_limit(request_from(Some("")), |_| async { StatusCode::OK })
            .await;
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }
}
