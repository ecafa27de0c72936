//! HTTP handlers for the evolution service.

use axum::{extract::State, http::HeaderMap, Json};
use std::sync::Arc;
use tracing::info;

use crate::orchestrator::{self, EvolveRequest};
use crate::{AppError, AppResult, AppState};

pub(crate) fn check_auth(state: &AppState, headers: &HeaderMap) -> AppResult<()> {
    use subtle::ConstantTimeEq;
    let Some(ref required_key) = state.config.api_key else {
        return Ok(());
    };
    let expected = format!("Bearer {required_key}");
    let auth_header = headers.get("Authorization").and_then(|h| h.to_str().ok());

    let matches: bool = match auth_header {
        Some(provided) => provided.as_bytes().ct_eq(expected.as_bytes()).into(),
        None => false,
    };
    if !matches {
        return Err(AppError::Unauthorized);
    }
    Ok(())
}

/// GET /healthz — liveness probe
pub async fn healthz() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// POST /v1/evolve — run a pareto-guided search over policy variants (auth required)
pub async fn evolve(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<EvolveRequest>,
) -> AppResult<Json<orchestrator::EvolveResponse>> {
    check_auth(&state, &headers)?;

    if request.trajectories.is_empty() {
        return Err(AppError::Validation(
            "At least one trajectory is required".to_string(),
        ));
    }
    if !(1..=200).contains(&request.generations) {
        return Err(AppError::Validation(format!(
            "generations must be in [1, 200], got {}",
            request.generations
        )));
    }
    if !(4..=500).contains(&request.population_size) {
        return Err(AppError::Validation(format!(
            "populationSize must be in [4, 500], got {}",
            request.population_size
        )));
    }

    info!(
        trajectory_count = request.trajectories.len(),
        generations = request.generations,
        population_size = request.population_size,
        "Evolve request accepted"
    );

    // The search can run for a long time; keep it off the async workers.
    let optimizer = state.optimizer.clone();
    let response = tokio::task::spawn_blocking(move || {
        orchestrator::run_evolution(&request, optimizer.as_ref())
    })
    .await
    .map_err(|e| AppError::Internal(anyhow::anyhow!("evolution task panicked: {e}")))??;

    Ok(Json(response))
}
