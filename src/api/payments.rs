//! Payment endpoints: initiation, status, refunds, cancellation, cash
//! confirmation and method discovery.

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use tracing::info;

use super::AppState;
use crate::error::AppError;
use crate::fraud::RequestContext;
use crate::middleware::error::{success_response, RequestId};
use crate::payments::types::{PaymentRequest, RefundRequest};

pub const DEVICE_PLATFORM_HEADER: &str = "x-device-platform";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundBody {
    pub amount: Option<i64>,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmCashBody {
    pub confirmed_by: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MethodsQuery {
    pub phone: Option<String>,
    pub amount: Option<i64>,
}

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Client address as seen behind a proxy: first `X-Forwarded-For` hop, then `X-Real-IP`.
pub fn client_ip(headers: &HeaderMap) -> Option<String> {
    header(headers, "x-forwarded-for")
        .and_then(|v| v.split(',').next().map(|ip| ip.trim().to_string()))
        .filter(|ip| !ip.is_empty())
        .or_else(|| header(headers, "x-real-ip"))
}

/// Fraud context from the request headers. History and velocity are filled
/// in by the orchestrator.
pub fn request_context(headers: &HeaderMap) -> RequestContext {
    RequestContext {
        user_agent: header(headers, "user-agent"),
        ip_address: client_ip(headers),
        device_platform: header(headers, DEVICE_PLATFORM_HEADER),
        ..RequestContext::default()
    }
}

/// POST /api/payments/initiate
pub async fn initiate_payment(
    State(state): State<AppState>,
    request_id: RequestId,
    headers: HeaderMap,
    Json(request): Json<PaymentRequest>,
) -> Result<impl IntoResponse, AppError> {
    info!(
        order_id = %request.order_id,
        provider = %request.provider,
        amount = request.amount,
        "💳 Payment initiation requested"
    );
    let context = RequestContext {
        correlation_id: request_id.0.clone(),
        ..request_context(&headers)
    };
    let response = state
        .orchestrator
        .initiate_payment(request, context)
        .await
        .map_err(|e| request_id.error(e))?;

    Ok((StatusCode::CREATED, success_response(response)))
}

/// GET /api/payments/{reference}/status
pub async fn payment_status(
    State(state): State<AppState>,
    request_id: RequestId,
    Path(reference): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let transaction = state
        .orchestrator
        .get_transaction_status(&reference)
        .await
        .map_err(|e| request_id.error(e))?;
    Ok(success_response(transaction))
}

/// POST /api/payments/{reference}/refund
pub async fn refund(
    State(state): State<AppState>,
    request_id: RequestId,
    Path(reference): Path<String>,
    Json(body): Json<RefundBody>,
) -> Result<impl IntoResponse, AppError> {
    if body.reason.trim().is_empty() {
        return Err(request_id.invalid("reason is required", "reason"));
    }
    let response = state
        .orchestrator
        .refund(RefundRequest {
            transaction_reference: reference,
            amount: body.amount,
            reason: body.reason,
        })
        .await
        .map_err(|e| request_id.error(e))?;
    Ok((StatusCode::CREATED, success_response(response)))
}

/// POST /api/payments/{reference}/cancel
pub async fn cancel_payment(
    State(state): State<AppState>,
    request_id: RequestId,
    Path(reference): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let transaction = state
        .orchestrator
        .cancel_payment(&reference)
        .await
        .map_err(|e| request_id.error(e))?;
    Ok(success_response(transaction))
}

/// POST /api/payments/{reference}/confirm-cash
///
/// The body is optional; `{ "confirmedBy": "..." }` records who took the cash.
pub async fn confirm_cash_payment(
    State(state): State<AppState>,
    request_id: RequestId,
    Path(reference): Path<String>,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let body: ConfirmCashBody = if body.is_empty() {
        ConfirmCashBody::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| request_id.invalid(format!("invalid request body: {}", e), "body"))?
    };
    let transaction = state
        .orchestrator
        .confirm_cash_payment(&reference, body.confirmed_by.as_deref())
        .await
        .map_err(|e| request_id.error(e))?;
    Ok(success_response(transaction))
}

/// GET /api/payments/methods?phone=&amount=
pub async fn payment_methods(
    State(state): State<AppState>,
    request_id: RequestId,
    Query(query): Query<MethodsQuery>,
) -> Result<impl IntoResponse, AppError> {
    let methods = state
        .orchestrator
        .available_payment_methods(query.phone.as_deref(), query.amount)
        .map_err(|e| request_id.error(e))?;
    Ok(success_response(methods))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_client_ip_prefers_first_forwarded_hop() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("10.0.0.1, 172.16.0.2"));
        headers.insert("x-real-ip", HeaderValue::from_static("192.168.1.9"));
        assert_eq!(client_ip(&headers).as_deref(), Some("10.0.0.1"));

        headers.remove("x-forwarded-for");
        assert_eq!(client_ip(&headers).as_deref(), Some("192.168.1.9"));
    }

    #[test]
    fn test_request_context_from_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("user-agent", HeaderValue::from_static("curl/8.0"));
        headers.insert(DEVICE_PLATFORM_HEADER, HeaderValue::from_static("android"));

        let context = request_context(&headers);
        assert_eq!(context.user_agent.as_deref(), Some("curl/8.0"));
        assert_eq!(context.device_platform.as_deref(), Some("android"));
        assert!(context.ip_address.is_none());
        assert_eq!(context.recent_activity.transactions_last_24h, 0);
    }
}
