use crate::metrics::ThrottleMetrics;
use serde::Serialize;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: u64,
    pub version: String,
    pub limiter: String,
    pub tracked_identities: usize,
}

impl HealthResponse {
    pub fn healthy(limiter: &str, tracked_identities: usize) -> Self {
        Self {
            status: "healthy".to_string(),
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            limiter: limiter.to_string(),
            tracked_identities,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MetricsResponse {
    pub limiter: String,
    pub tracked_identities: usize,
    pub metrics: ThrottleMetrics,
}

/// Body returned by the rate limited demo route.
#[derive(Debug, Serialize)]
pub struct EchoResponse {
    pub path: String,
    pub allowed: bool,
}
