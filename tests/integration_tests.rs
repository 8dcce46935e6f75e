use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use std::sync::{Arc, Barrier};
use std::time::Duration;
use throttlekeeper::{
    create_app,
    key_generator::{KeyGenerator, KeyStrategy},
    middleware::AdmissionState,
    Cache, CacheOptions, FixedWindowLimiter, LeakyBucketLimiter, RateLimitStrategy, RateLimiter,
    TokenBucketLimiter, TtlCache,
};
use tokio::time::sleep;
use tower::ServiceExt;

#[tokio::test(start_paused = true)]
async fn test_cache_entry_expires_after_idle_duration() {
    let cache: TtlCache<String> =
        TtlCache::new(CacheOptions::new("integration", Duration::from_secs(2))).unwrap();
    cache.put("k", "v".to_string());
    assert_eq!(cache.get("k").as_deref(), Some("v"));

    sleep(Duration::from_secs(4)).await;
    assert_eq!(cache.get("k"), None);
}

#[tokio::test(start_paused = true)]
async fn test_token_bucket_burst_then_refill() {
    let limiter = TokenBucketLimiter::new(5, 1.0).unwrap();
    let burst: Vec<bool> = (0..5).map(|_| limiter.is_allowed("k")).collect();
    assert_eq!(burst, vec![true; 5]);
    assert!(!limiter.is_allowed("k"));

    sleep(Duration::from_millis(1000)).await;
    assert!(limiter.is_allowed("k"));
}

#[tokio::test(start_paused = true)]
async fn test_leaky_bucket_saturation() {
    let limiter = LeakyBucketLimiter::new(5, 1.0).unwrap();
    for _ in 0..5 {
        assert!(limiter.is_allowed("k"));
    }
    assert!(!limiter.is_allowed("k"));

    sleep(Duration::from_millis(1000)).await;
    assert!(limiter.is_allowed("k"));
    assert!(!limiter.is_allowed("k"));
}

#[tokio::test(start_paused = true)]
async fn test_fixed_window_idle_reset() {
    let limiter = FixedWindowLimiter::new(3, Duration::from_secs(10)).unwrap();
    for _ in 0..3 {
        assert!(limiter.is_allowed("k"));
    }
    assert!(!limiter.is_allowed("k"));

    sleep(Duration::from_secs(12)).await;
    assert!(limiter.is_allowed("k"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_probes_never_exceed_capacity() {
    const CAPACITY: u64 = 16;
    const CALLERS: usize = 64;

    let limiters: Vec<Arc<dyn RateLimiter>> = vec![
        Arc::new(TokenBucketLimiter::new(CAPACITY, 0.001).unwrap()),
        Arc::new(LeakyBucketLimiter::new(CAPACITY, 0.001).unwrap()),
        Arc::new(FixedWindowLimiter::new(CAPACITY, Duration::from_secs(3600)).unwrap()),
    ];

    for limiter in limiters {
        let barrier = Barrier::new(CALLERS);
        let admitted = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..CALLERS)
                .map(|_| {
                    scope.spawn(|| {
                        barrier.wait();
                        limiter.is_allowed("shared")
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .filter(|allowed| *allowed)
                .count()
        });

        assert_eq!(admitted as u64, CAPACITY, "limiter {}", limiter.name());
        limiter.shutdown();
    }
}

#[tokio::test]
async fn test_identities_do_not_share_state() {
    let limiter = TokenBucketLimiter::new(2, 0.001).unwrap();
    assert!(limiter.is_allowed("k1"));
    assert!(limiter.is_allowed("k1"));
    assert!(!limiter.is_allowed("k1"));

    assert!(limiter.is_allowed("k2"));
    assert!(limiter.is_allowed("k2"));
    assert!(!limiter.is_allowed("k2"));
}

fn app_with(strategy: RateLimitStrategy, keys: KeyStrategy) -> axum::Router {
    let limiter: Arc<dyn RateLimiter> = Arc::from(strategy.build().unwrap());
    create_app(AdmissionState::new(limiter, KeyGenerator::new(keys)))
}

fn request(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("x-forwarded-for", "198.51.100.7")
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn test_adapter_forwards_then_rejects_with_429() {
    let app = app_with(RateLimitStrategy::token_bucket(2, 0.001), KeyStrategy::IpAddress);

    for _ in 0..2 {
        let response = app.clone().oneshot(request("/api/orders")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["path"], "/api/orders");
    }

    let response = app.clone().oneshot(request("/api/orders")).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.headers()["x-ratelimit-limit"], "2");
    assert_eq!(response.headers()["x-ratelimit-remaining"], "0");
    assert!(response.headers().contains_key("retry-after"));
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["error"], "rate_limit_exceeded");
    assert_eq!(json["code"], 429);

    let metrics = app.oneshot(request("/metrics")).await.unwrap();
    let body = metrics.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["metrics"]["allowed_requests"], 2);
    assert_eq!(json["metrics"]["throttled_requests"], 1);
    assert_eq!(json["tracked_identities"], 1);
}

#[tokio::test]
async fn test_health_endpoint_is_not_rate_limited() {
    let app = app_with(
        RateLimitStrategy::fixed_window(1, Duration::from_secs(60)),
        KeyStrategy::Path,
    );

    for _ in 0..3 {
        let response = app.clone().oneshot(request("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "healthy");
    }
}

#[tokio::test]
async fn test_path_strategy_limits_each_path_separately() {
    let app = app_with(
        RateLimitStrategy::fixed_window(1, Duration::from_secs(60)).with_key_prefix("paths"),
        KeyStrategy::Path,
    );

    let a = app.clone().oneshot(request("/api/a")).await.unwrap();
    let b = app.clone().oneshot(request("/api/b")).await.unwrap();
    let a_again = app.oneshot(request("/api/a")).await.unwrap();

    assert_eq!(a.status(), StatusCode::OK);
    assert_eq!(b.status(), StatusCode::OK);
    assert_eq!(a_again.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_metrics_reset_returns_and_clears_counts() {
    let app = app_with(RateLimitStrategy::token_bucket(1, 0.001), KeyStrategy::IpAddress);
    app.clone().oneshot(request("/api/a")).await.unwrap();
    app.clone().oneshot(request("/api/a")).await.unwrap();

    let reset = Request::builder()
        .method("POST")
        .uri("/metrics/reset")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(reset).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["metrics"]["total_requests"], 2);

    let metrics = app.oneshot(request("/metrics")).await.unwrap();
    let body = metrics.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["metrics"]["total_requests"], 0);
    assert_eq!(json["tracked_identities"], 1);
}
