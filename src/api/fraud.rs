use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use tracing::info;

use super::AppState;
use crate::error::AppError;
use crate::fraud::stats::StatisticsPeriod;
use crate::helpers::crypto::mask_phone;
use crate::middleware::error::{success_response, RequestId};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhoneListRequest {
    pub phone_number: String,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct StatisticsQuery {
    pub period: Option<String>,
}

/// POST /api/fraud/blacklist
pub async fn blacklist(
    State(state): State<AppState>,
    request_id: RequestId,
    Json(body): Json<PhoneListRequest>,
) -> Result<impl IntoResponse, AppError> {
    let reason = non_empty_reason(&request_id, &body.reason)?;
    let entry = state
        .orchestrator
        .fraud_engine()
        .blacklist_phone_number(&body.phone_number, reason)
        .await
        .map_err(|e| request_id.error(e))?;
    Ok((StatusCode::CREATED, success_response(entry)))
}

/// POST /api/fraud/whitelist
pub async fn whitelist(
    State(state): State<AppState>,
    request_id: RequestId,
    Json(body): Json<PhoneListRequest>,
) -> Result<impl IntoResponse, AppError> {
    let reason = non_empty_reason(&request_id, &body.reason)?;
    let entry = state
        .orchestrator
        .fraud_engine()
        .whitelist_phone_number(&body.phone_number, reason)
        .await
        .map_err(|e| request_id.error(e))?;
    info!(phone = %mask_phone(&entry.phone_number), "phone number whitelisted");
    Ok((StatusCode::CREATED, success_response(entry)))
}

/// GET /api/fraud/statistics?period=day|week|month
pub async fn statistics(
    State(state): State<AppState>,
    request_id: RequestId,
    Query(query): Query<StatisticsQuery>,
) -> Result<impl IntoResponse, AppError> {
    let period = match query.period.as_deref() {
        Some(raw) => raw
            .parse::<StatisticsPeriod>()
            .map_err(|e| request_id.error(e))?,
        None => StatisticsPeriod::Day,
    };
    let stats = state.orchestrator.fraud_engine().fraud_statistics(period).await;
    Ok(success_response(stats))
}

fn non_empty_reason<'a>(request_id: &RequestId, reason: &'a str) -> Result<&'a str, AppError> {
    let reason = reason.trim();
    if reason.is_empty() {
        return Err(request_id.invalid("reason is required", "reason"));
    }
    Ok(reason)
}
