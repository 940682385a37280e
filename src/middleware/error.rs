//! Error response formatting
//!
//! Every failure leaves the service in the same envelope:
//! `{ success: false, error: { code, message, details? }, meta: { timestamp, requestId, correlationId } }`.
//! Provider payloads and internal detail never reach the caller.

use crate::error::AppError;
use crate::payments::error::PaymentError;
use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Machine-readable error code
    pub code: String,
    /// Human-readable error message
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMeta {
    pub timestamp: String,
    pub request_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

/// Standardized error response structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: ErrorBody,
    pub meta: ResponseMeta,
}

impl ErrorResponse {
    pub fn from_app_error(error: &AppError) -> Self {
        Self {
            success: false,
            error: ErrorBody {
                code: error.error_code().to_string(),
                message: error.user_message(),
                details: error.error.details(),
            },
            meta: ResponseMeta {
                timestamp: Utc::now().to_rfc3339(),
                request_id: error.request_id.clone(),
                correlation_id: Some(error.correlation_id.clone()),
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status_code =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status_code.is_server_error() {
            tracing::error!(
                error = %self.error,
                code = self.error_code(),
                correlation_id = %self.correlation_id,
                request_id = ?self.request_id,
                status = status_code.as_u16(),
                "Server error occurred"
            );
        } else {
            tracing::warn!(
                error = %self.error,
                code = self.error_code(),
                correlation_id = %self.correlation_id,
                request_id = ?self.request_id,
                status = status_code.as_u16(),
                "Client error occurred"
            );
        }

        let error_response = ErrorResponse::from_app_error(&self);
        (status_code, Json(error_response)).into_response()
    }
}

/// Request id assigned by `SetRequestIdLayer`, available to handlers so
/// failures can echo it in the envelope.
#[derive(Debug, Clone, Default)]
pub struct RequestId(pub Option<String>);

impl RequestId {
    /// Convert any payment-level failure into an `AppError` tagged with this
    /// request id. The request id doubles as the correlation id so the
    /// envelope points at the same trail the service logged.
    pub fn error(&self, error: impl Into<AppError>) -> AppError {
        let error = error.into();
        match &self.0 {
            Some(id) => error.with_request_id(id.clone()).with_correlation_id(id.clone()),
            None => error,
        }
    }

    pub fn invalid(&self, message: impl Into<String>, field: &str) -> AppError {
        self.error(PaymentError::validation(message, field))
    }
}

impl<S: Send + Sync> FromRequestParts<S> for RequestId {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(RequestId(
            parts
                .headers
                .get(REQUEST_ID_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
        ))
    }
}

/// Create a standardized success response
pub fn success_response<T: Serialize>(data: T) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "success": true,
        "data": data,
        "meta": { "timestamp": Utc::now().to_rfc3339() },
    }))
}
