use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;

use super::AppState;
use crate::error::AppError;
use crate::middleware::error::{success_response, RequestId};
use crate::payments::error::PaymentError;
use crate::services::ussd::UssdSessionRequest;

#[derive(Debug, Deserialize)]
pub struct UssdInput {
    pub input: String,
}

/// POST /api/ussd/sessions
pub async fn start_session(
    State(state): State<AppState>,
    request_id: RequestId,
    Json(request): Json<UssdSessionRequest>,
) -> Result<impl IntoResponse, AppError> {
    let started = state
        .ussd
        .start_session(request)
        .await
        .map_err(|e| request_id.error(e))?;
    Ok((StatusCode::CREATED, success_response(started)))
}

/// POST /api/ussd/sessions/{id}/input
pub async fn process_input(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(body): Json<UssdInput>,
) -> impl IntoResponse {
    success_response(state.ussd.process_input(&session_id, &body.input).await)
}

/// DELETE /api/ussd/sessions/{id}
pub async fn cancel_session(
    State(state): State<AppState>,
    request_id: RequestId,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    if !state.ussd.cancel_session(&session_id).await {
        return Err(request_id.error(PaymentError::NotFound {
            resource: "USSD session".to_string(),
            id: session_id,
        }));
    }
    Ok(success_response(serde_json::json!({ "sessionId": session_id, "cancelled": true })))
}
