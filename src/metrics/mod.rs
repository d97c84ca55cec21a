// src/metrics/mod.rs
// Prometheus metrics for the relational memory engine.

use axum::{http::StatusCode, response::IntoResponse};
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::Instant;
use tracing::info;

/// Global Prometheus handle for metrics rendering
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Active WebSocket connections counter
static ACTIVE_CONNECTIONS: AtomicU64 = AtomicU64::new(0);

/// Initialize the Prometheus metrics exporter
pub fn init_metrics() {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus recorder");

    PROMETHEUS_HANDLE
        .set(handle)
        .expect("Prometheus handle already initialized");

    info!("Prometheus metrics initialized");
}

/// GET /metrics - Prometheus metrics endpoint
pub async fn metrics_handler() -> impl IntoResponse {
    match PROMETHEUS_HANDLE.get() {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            "Metrics not initialized".to_string(),
        ),
    }
}

/// Record a request (counter)
pub fn record_request(endpoint: &str) {
    counter!("relmem_requests_total", "endpoint" => endpoint.to_string()).increment(1);
}

/// Record request duration (histogram)
pub fn record_request_duration(endpoint: &str, duration_seconds: f64) {
    histogram!("relmem_request_duration_seconds", "endpoint" => endpoint.to_string())
        .record(duration_seconds);
}

/// Record an LLM call by tier
pub fn record_llm_call(tier: u8, success: bool) {
    let status = if success { "success" } else { "error" };
    counter!("relmem_llm_calls_total", "tier" => tier.to_string(), "status" => status)
        .increment(1);
}

/// Track active SSE streams
pub fn connection_opened() {
    let count = ACTIVE_CONNECTIONS.fetch_add(1, Ordering::SeqCst) + 1;
    gauge!("relmem_active_sse_streams").set(count as f64);
}

/// Track closed SSE streams
pub fn connection_closed() {
    let count = ACTIVE_CONNECTIONS.fetch_sub(1, Ordering::SeqCst) - 1;
    gauge!("relmem_active_sse_streams").set(count as f64);
}

/// Record outbox lag (time between event creation and processing completion)
pub fn record_outbox_lag(seconds: f64) {
    histogram!("relmem_outbox_lag_seconds").record(seconds);
}

/// Update the DLQ depth gauge
pub fn set_dlq_depth(depth: f64) {
    gauge!("relmem_outbox_dlq_depth").set(depth);
}

/// Record an affinity update
pub fn record_affinity_update(trigger: &str) {
    counter!("relmem_affinity_updates_total", "trigger" => trigger.to_string()).increment(1);
}

/// Record a conflict detection
pub fn record_conflict_detected() {
    counter!("relmem_conflicts_detected_total").increment(1);
}

/// Helper for timing operations
pub struct RequestTimer {
    start: Instant,
    request_type: String,
}

impl RequestTimer {
    pub fn new(request_type: &str) -> Self {
        record_request(request_type);
        Self {
            start: Instant::now(),
            request_type: request_type.to_string(),
        }
    }
}

impl Drop for RequestTimer {
    fn drop(&mut self) {
        let duration = self.start.elapsed().as_secs_f64();
        record_request_duration(&self.request_type, duration);
    }
}
