//! ClawEvolve: fitness evaluation and policy-adaptation harness for
//! autonomous-agent operating policies, served over HTTP.
//!
//! The core scores recorded trajectories against a multi-objective fitness
//! function and drives a pluggable pareto-guided search engine over policy
//! candidates. See `orchestrator` for the run flow, `fitness` for the
//! objective function, and `optimizer` for the engine boundary.

pub mod codec;
pub mod config;
pub mod fitness;
pub mod handlers;
pub mod optimizer;
pub mod orchestrator;
pub mod reflect;
pub mod test_utils;

use std::sync::Arc;

use clawevolve_shared::ClawError;
use optimizer::PolicyOptimizer;

pub struct AppState {
    pub config: config::AppConfig,
    pub optimizer: Arc<dyn PolicyOptimizer>,
}

pub enum AppError {
    Claw(ClawError),
    Internal(anyhow::Error),
    Unauthorized,
    Validation(String),
}

impl axum::response::IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        use axum::http::StatusCode;

        let (status, err_type, message) = match self {
            AppError::Claw(e) => {
                let status = match &e {
                    ClawError::Validation(_) => StatusCode::BAD_REQUEST,
                    ClawError::Optimizer(_) | ClawError::Config(_) | ClawError::Internal(_) => {
                        StatusCode::INTERNAL_SERVER_ERROR
                    }
                };
                if status == StatusCode::INTERNAL_SERVER_ERROR {
                    tracing::error!("Run failed: {}", e);
                }
                (status, format!("{e:?}"), e.to_string())
            }
            AppError::Internal(e) => {
                // Log full error server-side only; return generic message to client
                tracing::error!("Internal error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "InternalError".to_string(),
                    "An internal error occurred".to_string(),
                )
            }
            AppError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "Unauthorized".to_string(),
                "Unauthorized sidecar token".to_string(),
            ),
            AppError::Validation(m) => (
                StatusCode::BAD_REQUEST,
                "ValidationError".to_string(),
                m,
            ),
        };

        let body = axum::Json(serde_json::json!({
            "status": "error",
            "error": {
                "type": err_type,
                "message": message
            }
        }));

        (status, body).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err)
    }
}

impl From<ClawError> for AppError {
    fn from(err: ClawError) -> Self {
        AppError::Claw(err)
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[must_use]
pub fn build_router(state: Arc<AppState>) -> axum::Router {
    use axum::routing::{get, post};
    use tower_http::cors::CorsLayer;

    let mut router = axum::Router::new()
        .route("/healthz", get(handlers::healthz))
        .route("/v1/evolve", post(handlers::evolve))
        .with_state(state.clone());

    if !state.config.cors_origins.is_empty() {
        router = router.layer(
            CorsLayer::new()
                .allow_origin(state.config.cors_origins.clone())
                .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
                .allow_headers([
                    axum::http::header::CONTENT_TYPE,
                    axum::http::header::AUTHORIZATION,
                ]),
        );
    }
    router
}

/// Server entry point: binds the listener and serves until ctrl-c.
pub async fn run_server() -> anyhow::Result<()> {
    use tracing::info;

    let config = config::AppConfig::load()?;
    if config.api_key.is_none() && !cfg!(debug_assertions) {
        tracing::warn!("⚠️  CLAWEVOLVE_API_KEY is not set. /v1 endpoints accept unauthenticated requests.");
    }

    let state = Arc::new(AppState {
        config: config.clone(),
        optimizer: Arc::new(optimizer::LocalSearchOptimizer),
    });
    let app = build_router(state);

    let listener =
        tokio::net::TcpListener::bind(format!("{}:{}", config.bind_address, config.port)).await?;
    info!(
        "🚀 ClawEvolve engine is listening on http://{}:{}",
        config.bind_address, config.port
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("🛑 Shutdown signal received. Stopping server...");
        })
        .await?;
    Ok(())
}
