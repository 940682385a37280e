use crate::payments::error::PaymentError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::str::FromStr;

pub const DEFAULT_CURRENCY: &str = "XAF";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ProviderName {
    Mtn,
    Orange,
    Cash,
}

impl ProviderName {
    pub const ALL: [ProviderName; 3] = [ProviderName::Mtn, ProviderName::Orange, ProviderName::Cash];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderName::Mtn => "mtn",
            ProviderName::Orange => "orange",
            ProviderName::Cash => "cash",
        }
    }

    /// Three-letter tag embedded in transaction references.
    pub fn reference_tag(&self) -> &'static str {
        match self {
            ProviderName::Mtn => "MTN",
            ProviderName::Orange => "ORG",
            ProviderName::Cash => "CSH",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            ProviderName::Mtn => "MTN Mobile Money",
            ProviderName::Orange => "Orange Money",
            ProviderName::Cash => "Cash Payment",
        }
    }

    pub fn is_mobile_money(&self) -> bool {
        !matches!(self, ProviderName::Cash)
    }

    pub fn supported_methods(&self) -> &'static [PaymentMethod] {
        match self {
            ProviderName::Mtn | ProviderName::Orange => {
                &[PaymentMethod::MobileMoney, PaymentMethod::Ussd]
            }
            ProviderName::Cash => &[PaymentMethod::CashOnDelivery, PaymentMethod::CashPickup],
        }
    }
}

impl std::fmt::Display for ProviderName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ProviderName {
    type Err = PaymentError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "mtn" | "mtn_mobile_money" | "mtn-momo" | "momo" => Ok(ProviderName::Mtn),
            "orange" | "orange_money" | "orange-money" => Ok(ProviderName::Orange),
            "cash" => Ok(ProviderName::Cash),
            _ => Err(PaymentError::ValidationError {
                message: format!("unsupported provider: {}", value),
                field: Some("provider".to_string()),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    MobileMoney,
    Ussd,
    CashOnDelivery,
    CashPickup,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::MobileMoney => "mobile_money",
            PaymentMethod::Ussd => "ussd",
            PaymentMethod::CashOnDelivery => "cash_on_delivery",
            PaymentMethod::CashPickup => "cash_pickup",
        }
    }
}

impl std::fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Canonical lifecycle shared by every provider.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "PENDING",
            TransactionStatus::Processing => "PROCESSING",
            TransactionStatus::Completed => "COMPLETED",
            TransactionStatus::Failed => "FAILED",
            TransactionStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionStatus::Completed | TransactionStatus::Failed | TransactionStatus::Cancelled
        )
    }

    /// Position in the lifecycle; terminal states share the highest rank.
    pub fn rank(&self) -> u8 {
        match self {
            TransactionStatus::Pending => 0,
            TransactionStatus::Processing => 1,
            TransactionStatus::Completed
            | TransactionStatus::Failed
            | TransactionStatus::Cancelled => 2,
        }
    }

    pub fn valid_transitions(&self) -> &'static [TransactionStatus] {
        match self {
            TransactionStatus::Pending => &[
                TransactionStatus::Processing,
                TransactionStatus::Completed,
                TransactionStatus::Failed,
                TransactionStatus::Cancelled,
            ],
            TransactionStatus::Processing => &[
                TransactionStatus::Completed,
                TransactionStatus::Failed,
                TransactionStatus::Cancelled,
            ],
            TransactionStatus::Completed
            | TransactionStatus::Failed
            | TransactionStatus::Cancelled => &[],
        }
    }

    pub fn can_transition_to(&self, next: TransactionStatus) -> bool {
        self.valid_transitions().contains(&next)
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequest {
    pub order_id: String,
    pub customer_id: String,
    /// Integer minor units; XAF has no decimals so this is whole francs.
    pub amount: i64,
    #[serde(default = "default_currency")]
    pub currency: String,
    pub provider: ProviderName,
    pub method: PaymentMethod,
    pub phone_number: Option<String>,
    pub merchant_id: Option<String>,
    #[serde(default)]
    pub description: String,
    pub metadata: Option<JsonValue>,
}

fn default_currency() -> String {
    DEFAULT_CURRENCY.to_string()
}

impl PaymentRequest {
    /// Shape checks only; business limits live in `helpers::fees::validate_amount`.
    pub fn validate_shape(&self) -> Result<(), PaymentError> {
        if self.order_id.trim().is_empty() {
            return Err(PaymentError::validation("orderId is required", "orderId"));
        }
        if self.customer_id.trim().is_empty() {
            return Err(PaymentError::validation("customerId is required", "customerId"));
        }
        if self.amount <= 0 {
            return Err(PaymentError::validation(
                "amount must be greater than zero",
                "amount",
            ));
        }
        if self.currency.trim().to_uppercase() != DEFAULT_CURRENCY {
            return Err(PaymentError::validation(
                format!("unsupported currency: {}", self.currency),
                "currency",
            ));
        }
        if self.description.len() > 255 {
            return Err(PaymentError::validation(
                "description must be at most 255 characters",
                "description",
            ));
        }
        if !self.provider.supported_methods().contains(&self.method) {
            return Err(PaymentError::validation(
                format!(
                    "payment method {} is not supported by {}",
                    self.method,
                    self.provider.display_name()
                ),
                "method",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentResponse {
    pub reference: String,
    pub external_transaction_id: Option<String>,
    pub status: TransactionStatus,
    pub amount: i64,
    pub currency: String,
    pub provider: ProviderName,
    pub method: PaymentMethod,
    pub ussd_code: Option<String>,
    pub payment_url: Option<String>,
    pub payment_code: Option<String>,
    pub message: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub provider_data: Option<JsonValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub external_transaction_id: String,
    pub status: TransactionStatus,
    /// Status string exactly as the provider reported it.
    pub provider_status: String,
    pub amount: Option<i64>,
    pub currency: Option<String>,
    pub reason: Option<String>,
    pub provider_data: Option<JsonValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AccountBalance {
    pub available_balance: String,
    pub currency: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundRequest {
    pub transaction_reference: String,
    pub amount: Option<i64>,
    pub reason: String,
}

/// Refund instruction handed to a provider client once the orchestrator has
/// resolved the original transaction.
#[derive(Debug, Clone)]
pub struct ProviderRefundRequest {
    pub refund_id: String,
    pub external_transaction_id: String,
    pub order_id: String,
    pub amount: i64,
    pub currency: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundResponse {
    pub refund_id: String,
    pub transaction_reference: String,
    pub external_refund_id: Option<String>,
    pub status: TransactionStatus,
    pub amount: i64,
    pub currency: String,
    pub provider: ProviderName,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheck {
    pub status: HealthState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<JsonValue>,
}

impl HealthCheck {
    pub fn healthy(details: Option<JsonValue>) -> Self {
        Self {
            status: HealthState::Healthy,
            details,
        }
    }

    pub fn unhealthy(error: impl std::fmt::Display) -> Self {
        Self {
            status: HealthState::Unhealthy,
            details: Some(serde_json::json!({
                "error": error.to_string(),
                "timestamp": Utc::now().to_rfc3339(),
            })),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HealthState::Healthy
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookVerificationResult {
    pub valid: bool,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEvent {
    pub provider: ProviderName,
    pub event_type: String,
    pub reference: Option<String>,
    pub external_transaction_id: Option<String>,
    pub status: Option<TransactionStatus>,
    pub reason: Option<String>,
    pub payload: JsonValue,
    pub received_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> PaymentRequest {
        PaymentRequest {
            order_id: "ORD-1".to_string(),
            customer_id: "cust-1".to_string(),
            amount: 10_000,
            currency: "XAF".to_string(),
            provider: ProviderName::Mtn,
            method: PaymentMethod::MobileMoney,
            phone_number: Some("677123456".to_string()),
            merchant_id: None,
            description: "Order #1".to_string(),
            metadata: None,
        }
    }

    #[test]
    fn payment_request_deserializes_from_camel_case_json() {
        let payload = serde_json::json!({
            "orderId": "ORD-9",
            "customerId": "c-9",
            "amount": 2500,
            "provider": "orange",
            "method": "mobile_money",
            "phoneNumber": "+237699000111"
        });
        let parsed: PaymentRequest =
            serde_json::from_value(payload).expect("deserialization should succeed");
        assert_eq!(parsed.currency, "XAF");
        assert_eq!(parsed.provider, ProviderName::Orange);
        assert!(parsed.validate_shape().is_ok());
    }

    #[test]
    fn shape_validation_rejects_unsupported_method_combination() {
        let mut req = request();
        req.method = PaymentMethod::CashPickup;
        let err = req.validate_shape().expect_err("mtn cannot do cash pickup");
        assert!(matches!(err, PaymentError::ValidationError { field: Some(f), .. } if f == "method"));
    }

    #[test]
    fn shape_validation_rejects_non_positive_amount() {
        let mut req = request();
        req.amount = 0;
        assert!(req.validate_shape().is_err());
    }

    #[test]
    fn terminal_states_have_no_transitions() {
        for status in [
            TransactionStatus::Completed,
            TransactionStatus::Failed,
            TransactionStatus::Cancelled,
        ] {
            assert!(status.is_terminal());
            assert!(status.valid_transitions().is_empty());
        }
        assert!(TransactionStatus::Pending.can_transition_to(TransactionStatus::Processing));
        assert!(!TransactionStatus::Processing.can_transition_to(TransactionStatus::Pending));
    }

    #[test]
    fn status_serializes_screaming_case() {
        let json = serde_json::to_value(TransactionStatus::Completed).expect("serialize");
        assert_eq!(json, "COMPLETED");
    }

    #[test]
    fn provider_name_parsing_accepts_aliases() {
        assert_eq!(
            ProviderName::from_str("MTN_MOBILE_MONEY").expect("alias"),
            ProviderName::Mtn
        );
        assert_eq!(
            ProviderName::from_str("orange_money").expect("alias"),
            ProviderName::Orange
        );
        assert!(ProviderName::from_str("paypal").is_err());
    }
}
