use crate::fraud::RiskLevel;
use crate::payments::types::ProviderName;
use thiserror::Error;

pub type PaymentResult<T> = Result<T, PaymentError>;

#[derive(Debug, Clone, Error)]
pub enum PaymentError {
    #[error("Validation error: {message}")]
    ValidationError {
        message: String,
        field: Option<String>,
    },

    /// Well-formed rejection from a payment network.
    #[error("Provider error: provider={provider}, code={code}, message={message}")]
    ProviderError {
        provider: ProviderName,
        code: String,
        message: String,
        http_status: Option<u16>,
    },

    /// Connection-level failure (refused, DNS, reset).
    #[error("Network error: provider={provider}, message={message}")]
    NetworkError {
        provider: ProviderName,
        message: String,
    },

    #[error("Timeout error: provider={provider} did not answer within {timeout_secs}s")]
    TimeoutError {
        provider: ProviderName,
        message: String,
        timeout_secs: u64,
    },

    #[error("Fraud detected: score={score}, level={risk_level}")]
    FraudError {
        score: u8,
        risk_level: RiskLevel,
        reasons: Vec<String>,
    },

    #[error("Webhook signature rejected: provider={provider}, message={message}")]
    SignatureError { provider: String, message: String },

    #[error("{resource} not found: {id}")]
    NotFound { resource: String, id: String },

    #[error("Invalid state: {message}")]
    InvalidState { message: String },

    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    #[error("Storage error: {message}")]
    StorageError { message: String },
}

impl PaymentError {
    pub fn validation(message: impl Into<String>, field: &str) -> Self {
        PaymentError::ValidationError {
            message: message.into(),
            field: Some(field.to_string()),
        }
    }

    pub fn provider(
        provider: ProviderName,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        PaymentError::ProviderError {
            provider,
            code: code.into(),
            message: message.into(),
            http_status: None,
        }
    }

    /// Network and timeout failures are transient; everything else is a definitive outcome.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PaymentError::NetworkError { .. } | PaymentError::TimeoutError { .. }
        )
    }

    pub fn code(&self) -> &'static str {
        match self {
            PaymentError::ValidationError { .. } => "VALIDATION_ERROR",
            PaymentError::ProviderError { .. } => "PROVIDER_ERROR",
            PaymentError::NetworkError { .. } => "NETWORK_ERROR",
            PaymentError::TimeoutError { .. } => "TIMEOUT_ERROR",
            PaymentError::FraudError { .. } => "FRAUD_DETECTED",
            PaymentError::SignatureError { .. } => "INVALID_SIGNATURE",
            PaymentError::NotFound { .. } => "NOT_FOUND",
            PaymentError::InvalidState { .. } => "INVALID_STATE",
            PaymentError::ConfigurationError { .. } => "CONFIGURATION_ERROR",
            PaymentError::StorageError { .. } => "INTERNAL_ERROR",
        }
    }

    pub fn http_status_code(&self) -> u16 {
        match self {
            PaymentError::ValidationError { .. } => 400,
            PaymentError::ProviderError { .. } => 502,
            PaymentError::NetworkError { .. } => 503,
            PaymentError::TimeoutError { .. } => 408,
            PaymentError::FraudError { .. } => 403,
            PaymentError::SignatureError { .. } => 401,
            PaymentError::NotFound { .. } => 404,
            PaymentError::InvalidState { .. } => 409,
            PaymentError::ConfigurationError { .. } => 500,
            PaymentError::StorageError { .. } => 500,
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            PaymentError::ValidationError { message, .. } => message.clone(),
            PaymentError::ProviderError { provider, .. } => {
                format!("{} rejected the payment request", provider.display_name())
            }
            PaymentError::NetworkError { provider, .. } => format!(
                "{} is temporarily unreachable. Please try again",
                provider.display_name()
            ),
            PaymentError::TimeoutError { provider, .. } => format!(
                "{} did not respond in time. Please try again",
                provider.display_name()
            ),
            PaymentError::FraudError { .. } => {
                "Transaction blocked due to high fraud risk".to_string()
            }
            PaymentError::SignatureError { .. } => "Invalid webhook signature".to_string(),
            PaymentError::NotFound { resource, id } => format!("{} '{}' not found", resource, id),
            PaymentError::InvalidState { message } => message.clone(),
            PaymentError::ConfigurationError { .. } | PaymentError::StorageError { .. } => {
                "An internal error occurred. Please try again later".to_string()
            }
        }
    }

    /// Structured details that are safe to return to a caller.
    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            PaymentError::ValidationError {
                field: Some(field), ..
            } => Some(serde_json::json!({ "field": field })),
            PaymentError::FraudError {
                score,
                risk_level,
                reasons,
            } => Some(serde_json::json!({
                "riskScore": score,
                "riskLevel": risk_level,
                "reasons": reasons,
            })),
            PaymentError::ProviderError { provider, code, .. } => Some(serde_json::json!({
                "provider": provider,
                "providerCode": code,
            })),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_http_status_mapping_is_correct() {
        assert_eq!(PaymentError::validation("bad", "amount").http_status_code(), 400);
        assert_eq!(
            PaymentError::provider(ProviderName::Mtn, "AUTH_FAILED", "denied").http_status_code(),
            502
        );
        assert_eq!(
            PaymentError::TimeoutError {
                provider: ProviderName::Orange,
                message: "slow".to_string(),
                timeout_secs: 30,
            }
            .http_status_code(),
            408
        );
        assert_eq!(
            PaymentError::FraudError {
                score: 90,
                risk_level: RiskLevel::Critical,
                reasons: vec![],
            }
            .http_status_code(),
            403
        );
    }

    #[test]
    fn only_transient_errors_are_retryable() {
        assert!(PaymentError::NetworkError {
            provider: ProviderName::Mtn,
            message: "connection refused".to_string()
        }
        .is_retryable());
        assert!(PaymentError::TimeoutError {
            provider: ProviderName::Mtn,
            message: "timed out".to_string(),
            timeout_secs: 30,
        }
        .is_retryable());
        assert!(!PaymentError::provider(ProviderName::Mtn, "INVALID_REQUEST", "bad").is_retryable());
    }

    #[test]
    fn codes_are_stable() {
        assert_eq!(PaymentError::validation("x", "y").code(), "VALIDATION_ERROR");
        assert_eq!(
            PaymentError::FraudError {
                score: 80,
                risk_level: RiskLevel::Critical,
                reasons: vec!["blacklisted".to_string()],
            }
            .code(),
            "FRAUD_DETECTED"
        );
    }

    #[test]
    fn fraud_details_expose_reasons_but_provider_details_hide_messages() {
        let fraud = PaymentError::FraudError {
            score: 85,
            risk_level: RiskLevel::Critical,
            reasons: vec!["blacklisted".to_string()],
        };
        let details = fraud.details().expect("fraud errors carry details");
        assert_eq!(details["reasons"][0], "blacklisted");

        let provider = PaymentError::provider(ProviderName::Mtn, "SERVER_ERROR", "raw body");
        let details = provider.details().expect("provider errors carry details");
        assert!(details.get("message").is_none());
        assert_eq!(details["providerCode"], "SERVER_ERROR");
    }
}
