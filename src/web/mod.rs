pub mod error;
pub mod extractors;
pub mod handlers;
pub mod middleware;

use crate::detection::Predictor;
use crate::utils::error::DetectorError;
use crate::{Config, Result};
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, timeout::TimeoutLayer};

pub use error::ApiError;

/// Shared by every handler
#[derive(Clone)]
pub struct AppState {
    pub predictor: Arc<dyn Predictor>,
    pub upload_dir: PathBuf,
}

pub async fn serve(config: Config, predictor: Arc<dyn Predictor>) -> Result<()> {
    let app = create_app(&config, predictor);

    let addr: SocketAddr = config.bind_addr.parse().map_err(|e| {
        DetectorError::Config(format!("Invalid bind address {}: {}", config.bind_addr, e))
    })?;

    tracing::info!("Server starting on http://{}", addr);
    tracing::info!("API endpoints:");
    tracing::info!("  POST /api/predict - Multipart image upload");
    tracing::info!("  GET  /api/health  - Health check");
    tracing::info!("  GET  /            - Welcome message");

    let listener = TcpListener::bind(&addr).await.map_err(|e| {
        DetectorError::Internal(format!("Failed to bind to address {}: {}", addr, e))
    })?;

    axum::serve(listener, app)
        .await
        .map_err(|e| DetectorError::Internal(format!("Server failed to start: {}", e)))?;

    Ok(())
}

pub fn create_app(config: &Config, predictor: Arc<dyn Predictor>) -> Router {
    let state = AppState {
        predictor,
        upload_dir: config.upload_dir.clone(),
    };

    Router::new()
        .route("/api/predict", post(handlers::predict_handler))
        .route("/api/health", get(handlers::health_handler))
        .route("/health", get(handlers::health_handler))
        .route("/", get(handlers::root_handler))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(config.server_config.max_request_size))
        .layer(TimeoutLayer::new(Duration::from_secs(
            config.server_config.request_timeout,
        )))
        .layer(CorsLayer::permissive())
        .layer(axum::middleware::from_fn(middleware::request_logging))
        .with_state(state)
}
