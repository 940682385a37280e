//! Application-level error handling
//!
//! Wraps the payment error taxonomy with the identifiers a caller needs to
//! report a problem: a correlation id for audit reconstruction and the
//! request id assigned at the edge.

use std::fmt;

use crate::helpers::crypto::generate_correlation_id;
use crate::payments::error::PaymentError;
use crate::services::webhook_processor::WebhookProcessorError;

/// Unified application error type
#[derive(Debug, Clone)]
pub struct AppError {
    pub error: PaymentError,
    pub correlation_id: String,
    pub request_id: Option<String>,
}

impl AppError {
    pub fn new(error: PaymentError) -> Self {
        Self {
            error,
            correlation_id: generate_correlation_id(),
            request_id: None,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = correlation_id.into();
        self
    }

    /// Map error to HTTP status code
    pub fn status_code(&self) -> u16 {
        self.error.http_status_code()
    }

    /// Stable code for client handling
    pub fn error_code(&self) -> &'static str {
        self.error.code()
    }

    pub fn user_message(&self) -> String {
        self.error.user_message()
    }

    pub fn is_retryable(&self) -> bool {
        self.error.is_retryable()
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (correlation_id={})", self.error, self.correlation_id)
    }
}

impl std::error::Error for AppError {}

impl From<PaymentError> for AppError {
    fn from(error: PaymentError) -> Self {
        AppError::new(error)
    }
}

impl From<WebhookProcessorError> for AppError {
    fn from(err: WebhookProcessorError) -> Self {
        let error = match err {
            WebhookProcessorError::MissingSignature => PaymentError::SignatureError {
                provider: "unknown".to_string(),
                message: "missing signature header".to_string(),
            },
            WebhookProcessorError::InvalidSignature(message) => PaymentError::SignatureError {
                provider: "unknown".to_string(),
                message,
            },
            WebhookProcessorError::UnknownProvider(name) => PaymentError::NotFound {
                resource: "Provider".to_string(),
                id: name,
            },
            WebhookProcessorError::InvalidPayload(message) => PaymentError::ValidationError {
                message,
                field: Some("payload".to_string()),
            },
            WebhookProcessorError::Processing(error) => error,
        };
        AppError::new(error)
    }
}

/// Result type for operations that can fail with AppError
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::types::ProviderName;

    #[test]
    fn test_correlation_id_format() {
        let error = AppError::new(PaymentError::validation("bad amount", "amount"));
        let parts: Vec<&str> = error.correlation_id.splitn(3, '-').collect();
        assert_eq!(parts[0], "okd");
        assert!(parts[1].parse::<i64>().is_ok());
        assert_eq!(parts[2].len(), 16);
    }

    #[test]
    fn test_network_error_is_retryable() {
        let error = AppError::from(PaymentError::NetworkError {
            provider: ProviderName::Mtn,
            message: "connection refused".to_string(),
        });
        assert_eq!(error.status_code(), 503);
        assert_eq!(error.error_code(), "NETWORK_ERROR");
        assert!(error.is_retryable());
    }

    #[test]
    fn test_signature_failures_map_to_unauthorized() {
        let error = AppError::from(WebhookProcessorError::InvalidSignature(
            "signature mismatch".to_string(),
        ));
        assert_eq!(error.status_code(), 401);
        assert_eq!(error.error_code(), "INVALID_SIGNATURE");
    }
}
