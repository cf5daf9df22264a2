//! HTTP surface.
//!
//! Thin axum layer over the job store and download runner. Handlers
//! validate, delegate, and translate [`Error`] variants into status codes;
//! no orchestration logic lives here.

use crate::config::Config;
use crate::download::DownloadRunner;
use crate::error::Error;
use crate::extract::MediaExtractor;
use crate::state::JobStore;
use anyhow::{Context, Result};
use axum::http::{header, Method, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub mod rate_limit;
pub mod routes_api;
pub mod routes_sse;

use rate_limit::AdmissionLimiter;

/// Shared application context
#[derive(Clone)]
pub struct AppContext {
    pub store: Arc<JobStore>,
    pub runner: Arc<DownloadRunner>,
    pub extractor: Arc<dyn MediaExtractor>,
    pub config: Arc<Config>,
    pub limiter: Arc<AdmissionLimiter>,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match &self {
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::NotReady(_) => StatusCode::CONFLICT,
            Error::Extraction(_) => StatusCode::BAD_GATEWAY,
            Error::SizeLimitExceeded { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Error::PostProcess(_) | Error::Config(_) | Error::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        if status.is_server_error() {
            tracing::error!("request failed: {self}");
        }
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

/// Create the axum router with all routes.
pub fn create_router(ctx: AppContext) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/health", get(health_check))
        .nest(
            "/api",
            routes_api::api_routes().merge(routes_sse::sse_routes()),
        )
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Start the HTTP server and run it until a shutdown signal arrives.
pub async fn start_server(
    config: Arc<Config>,
    store: Arc<JobStore>,
    runner: Arc<DownloadRunner>,
    extractor: Arc<dyn MediaExtractor>,
) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("invalid server address")?;

    let limiter = Arc::new(AdmissionLimiter::new(config.limits.rate_limit_per_minute));
    let ctx = AppContext {
        store,
        runner,
        extractor,
        config,
        limiter,
    };
    let app = create_router(ctx);

    tracing::info!("listening on {addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => {}
            Err(e) => {
                tracing::error!("failed to install Ctrl+C handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received");
}
