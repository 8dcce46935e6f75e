use crate::algorithms::RateLimiter;
use crate::config::Config;
use crate::error::ThrottlerResult;
use crate::handlers::{echo, health_check, metrics, reset_metrics};
use crate::key_generator::KeyGenerator;
use crate::middleware::{admission_middleware, logging_middleware, AdmissionState};
use axum::routing::{get, post};
use axum::{middleware, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Builds the router: `/health`, `/metrics` and `/metrics/reset` are open,
/// `/api/*` goes through admission control.
pub fn create_app(state: AdmissionState) -> Router {
    let limited = Router::new()
        .route("/api/*path", get(echo).post(echo))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            admission_middleware,
        ));

    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics))
        .route("/metrics/reset", post(reset_metrics))
        .merge(limited)
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .layer(middleware::from_fn(logging_middleware)),
        )
}

pub struct Server {
    app: Router,
    bind_addr: SocketAddr,
    limiter: Arc<dyn RateLimiter>,
}

impl Server {
    /// Must be called inside the tokio runtime that will serve requests.
    pub fn new(config: &Config) -> ThrottlerResult<Self> {
        let limiter: Arc<dyn RateLimiter> = Arc::from(config.strategy()?.build()?);
        let state = AdmissionState::new(
            Arc::clone(&limiter),
            KeyGenerator::new(config.key_strategy),
        );

        Ok(Self {
            app: create_app(state),
            bind_addr: config.bind_addr,
            limiter,
        })
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.bind_addr).await?;

        tracing::info!("Throttlekeeper listening on {}", self.bind_addr);
        tracing::info!("Health check available at /health");
        tracing::info!("Rate limited routes under /api/");

        axum::serve(
            listener,
            self.app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await?;

        self.limiter.shutdown();
        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                tracing::error!("Failed to install SIGTERM handler: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        },
    }
}
