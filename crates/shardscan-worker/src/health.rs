//! Health and metrics HTTP endpoints (Axum).

use axum::{extract::State, http::StatusCode, routing::get, Router};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use shardscan_connectors::ReaderMetrics;

pub struct HealthState {
    pub metrics: ReaderMetrics,
    /// Set while shard scans are running.
    pub ready: Arc<AtomicBool>,
}

pub fn health_router(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/metrics", get(metrics))
        .with_state(state)
}

async fn health() -> &'static str {
    "OK"
}

async fn ready(State(state): State<Arc<HealthState>>) -> Result<&'static str, StatusCode> {
    if state.ready.load(Ordering::Relaxed) {
        Ok("OK")
    } else {
        Err(StatusCode::SERVICE_UNAVAILABLE)
    }
}

async fn metrics(State(state): State<Arc<HealthState>>) -> Result<String, StatusCode> {
    state
        .metrics
        .encode()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn test_state(ready: bool) -> Arc<HealthState> {
        Arc::new(HealthState {
            metrics: ReaderMetrics::new(),
            ready: Arc::new(AtomicBool::new(ready)),
        })
    }

    async fn get_path(state: Arc<HealthState>, path: &str) -> (StatusCode, String) {
        let resp = health_router(state)
            .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn health_is_always_ok() {
        let (status, body) = get_path(test_state(false), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "OK");
    }

    #[tokio::test]
    async fn ready_follows_flag() {
        let state = test_state(false);
        let (status, _) = get_path(Arc::clone(&state), "/ready").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        state.ready.store(true, Ordering::Relaxed);
        let (status, _) = get_path(state, "/ready").await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn metrics_exposes_reader_counters() {
        let state = test_state(true);
        state.metrics.stream_failed("zone1-101");
        state.metrics.retries.inc();

        let (status, body) = get_path(state, "/metrics").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("shardscan_streaming_query_errors_total{tablet=\"zone1-101\"} 1"));
        assert!(body.contains("shardscan_reader_retries_total 1"));
    }
}
