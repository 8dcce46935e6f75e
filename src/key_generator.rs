//! Identity extraction for the admission middleware.

use crate::error::{ThrottlerError, ThrottlerResult};
use axum::extract::{ConnectInfo, Request};
use axum::http::HeaderMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::sync::LazyLock;

/// Header carrying an authenticated user id, set by an upstream auth layer.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Proxy headers consulted, in order, after `x-forwarded-for`.
const CLIENT_IP_HEADERS: [&str; 13] = [
    "cf-connecting-ip",
    "x-client-ip",
    "x-real-ip",
    "x-forwarded",
    "forwarded-for",
    "true-client-ip",
    "x-cluster-client-ip",
    "fastly-client-ip",
    "x-forwarded-host",
    "x-original-forwarded-for",
    "x-coming-from",
    "via",
    "x-real-forwarded-for",
];

static FORWARDED_FOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|[;,]\s*)for=([^;,\s]+)").expect("valid regex"));

/// What a request is rate limited by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum KeyStrategy {
    /// Request path
    Path,
    /// Client IP address
    IpAddress,
    /// User id from the `x-user-id` header
    UserId,
}

/// Derives the identity string a limiter partitions its state by
#[derive(Debug, Clone)]
pub struct KeyGenerator {
    strategy: KeyStrategy,
}

impl KeyGenerator {
    pub fn new(strategy: KeyStrategy) -> Self {
        Self { strategy }
    }

    pub fn strategy(&self) -> KeyStrategy {
        self.strategy
    }

    pub fn identity(&self, request: &Request) -> ThrottlerResult<String> {
        match self.strategy {
            KeyStrategy::Path => Ok(request.uri().path().to_string()),
            KeyStrategy::IpAddress => {
                let peer = request
                    .extensions()
                    .get::<ConnectInfo<SocketAddr>>()
                    .map(|ConnectInfo(addr)| addr.ip());
                Self::extract_client_ip(request.headers(), peer).ok_or_else(|| {
                    ThrottlerError::MissingIdentity("No IP address found".to_string())
                })
            }
            KeyStrategy::UserId => request
                .headers()
                .get(USER_ID_HEADER)
                .and_then(|value| value.to_str().ok())
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(str::to_string)
                .ok_or_else(|| {
                    ThrottlerError::MissingIdentity(format!("Missing {} header", USER_ID_HEADER))
                }),
        }
    }

    /// Resolve the client IP from proxy headers, falling back to the socket peer
    pub fn extract_client_ip(headers: &HeaderMap, peer: Option<IpAddr>) -> Option<String> {
        std::iter::once("x-forwarded-for")
            .chain(CLIENT_IP_HEADERS)
            .filter_map(|name| header_value(headers, name))
            .find_map(first_ip)
            .or_else(|| header_value(headers, "forwarded").and_then(forwarded_for))
            .or_else(|| peer.map(|ip| ip.to_string()))
    }
}

impl Default for KeyGenerator {
    fn default() -> Self {
        Self::new(KeyStrategy::Path)
    }
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

fn first_ip(value: &str) -> Option<String> {
    value.split(',').next().and_then(normalize_ip)
}

/// RFC 7239 `Forwarded: for=...`
fn forwarded_for(value: &str) -> Option<String> {
    FORWARDED_FOR
        .captures(value)
        .and_then(|caps| caps.get(1))
        .and_then(|m| normalize_ip(m.as_str()))
}

fn normalize_ip(raw: &str) -> Option<String> {
    let cleaned = raw.trim().trim_matches('"').trim_start_matches('[').trim_end_matches(']');
    cleaned.parse::<IpAddr>().ok().map(|ip| ip.to_string())
}
