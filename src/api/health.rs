use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use tracing::{error, info};

use super::AppState;
use crate::health::HealthState;
use crate::middleware::error::success_response;

/// GET /health
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    info!("🏥 Health check requested");
    let health_status = state.health_checker.check_health().await;

    let status = if matches!(health_status.status, HealthState::Unhealthy) {
        error!("❌ Health check failed - no payment provider reachable");
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    (status, Json(health_status))
}

/// GET /health/providers
pub async fn provider_health(State(state): State<AppState>) -> impl IntoResponse {
    let health = state.orchestrator.provider_health().await;
    let metrics = state.orchestrator.provider_metrics().await;
    success_response(serde_json::json!({
        "providers": health,
        "metrics": metrics,
    }))
}
