use axum::{extract::State, http::Uri, response::IntoResponse, Json};

use crate::middleware::AdmissionState;
use crate::response::{EchoResponse, HealthResponse, MetricsResponse};

/// Health check endpoint
pub async fn health_check(State(state): State<AdmissionState>) -> impl IntoResponse {
    Json(HealthResponse::healthy(
        state.limiter.name(),
        state.limiter.tracked_identities(),
    ))
}

/// Admission counters since start or last reset
pub async fn metrics(State(state): State<AdmissionState>) -> impl IntoResponse {
    Json(MetricsResponse {
        limiter: state.limiter.name().to_string(),
        tracked_identities: state.limiter.tracked_identities(),
        metrics: state.metrics.snapshot(),
    })
}

/// Zero the admission counters, returning the counts they held
pub async fn reset_metrics(State(state): State<AdmissionState>) -> impl IntoResponse {
    let metrics = state.metrics.snapshot();
    state.metrics.reset();
    tracing::info!(total = metrics.total_requests, "Admission metrics reset");

    Json(MetricsResponse {
        limiter: state.limiter.name().to_string(),
        tracked_identities: state.limiter.tracked_identities(),
        metrics,
    })
}

/// Only reached when the admission middleware let the request through
pub async fn echo(uri: Uri) -> impl IntoResponse {
    Json(EchoResponse {
        path: uri.path().to_string(),
        allowed: true,
    })
}
