use crate::algorithms::{Decision, RateLimiter};
use crate::error::ThrottlerError;
use crate::key_generator::KeyGenerator;
use crate::metrics::MetricsCollector;
use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header, HeaderMap, HeaderName, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};

pub const RATE_LIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const RATE_LIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");

/// Everything the admission middleware needs per request
#[derive(Clone)]
pub struct AdmissionState {
    pub limiter: Arc<dyn RateLimiter>,
    pub keys: KeyGenerator,
    pub metrics: MetricsCollector,
}

impl AdmissionState {
    pub fn new(limiter: Arc<dyn RateLimiter>, keys: KeyGenerator) -> Self {
        Self {
            limiter,
            keys,
            metrics: MetricsCollector::new(),
        }
    }
}

/// Admission control: forwards the request unchanged when the limiter admits
/// its identity, otherwise answers 429 without calling the inner service.
pub async fn admission_middleware(
    State(state): State<AdmissionState>,
    request: Request,
    next: Next,
) -> Response {
    let identity = match state.keys.identity(&request) {
        Ok(identity) => identity,
        Err(err) => {
            state.metrics.record_rejection();
            warn!(
                target: "throttlekeeper::middleware",
                uri = %request.uri(),
                error = %err,
                "Rejecting request without identity"
            );
            return err.into_response();
        }
    };

    let decision = state.limiter.check(&identity);
    state.metrics.record_decision(decision.allowed);

    if !decision.allowed {
        warn!(
            target: "throttlekeeper::middleware",
            identity = %identity,
            limiter = %state.limiter.name(),
            retry_after_ms = decision.retry_after.as_millis() as u64,
            "Rate limit exceeded"
        );
        let mut response = ThrottlerError::RateLimitExceeded(identity).into_response();
        insert_rate_limit_headers(response.headers_mut(), &decision);
        return response;
    }

    let mut response = next.run(request).await;
    insert_rate_limit_headers(response.headers_mut(), &decision);
    response
}

fn insert_rate_limit_headers(headers: &mut HeaderMap, decision: &Decision) {
    headers.insert(RATE_LIMIT_LIMIT, HeaderValue::from(decision.limit));
    headers.insert(RATE_LIMIT_REMAINING, HeaderValue::from(decision.remaining));
    if !decision.allowed {
        // Whole seconds, rounded up
        let retry_after = decision.retry_after;
        let secs = retry_after
            .as_secs()
            .saturating_add(u64::from(retry_after.subsec_nanos() > 0));
        headers.insert(header::RETRY_AFTER, HeaderValue::from(secs));
    }
}

/// Logging middleware for request/response tracking
pub async fn logging_middleware(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    let client_ip = KeyGenerator::extract_client_ip(request.headers(), peer)
        .unwrap_or_else(|| "unknown".to_string());

    info!(
        target: "throttlekeeper::middleware",
        method = %method,
        uri = %uri,
        client_ip = %client_ip,
        "Incoming request"
    );

    let response = next.run(request).await;

    let status = response.status();
    info!(
        target: "throttlekeeper::middleware",
        method = %method,
        uri = %uri,
        status = %status,
        "Request completed"
    );

    response
}
