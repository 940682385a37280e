use crate::helpers::fees::format_currency;
use crate::helpers::ids::generate_payment_code;
use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::PaymentProvider;
use crate::payments::types::{
    AccountBalance, HealthCheck, PaymentMethod, PaymentRequest, PaymentResponse, ProviderName,
    ProviderRefundRequest, RefundResponse, StatusResponse, TransactionStatus, WebhookEvent,
    WebhookVerificationResult,
};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use serde_json::Value as JsonValue;
use tracing::info;

const PICKUP_EXPIRY_DAYS: i64 = 7;

#[derive(Debug, Clone)]
pub struct CashConfig {
    pub enabled: bool,
}

impl Default for CashConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl CashConfig {
    pub fn from_env() -> Self {
        Self {
            enabled: std::env::var("CASH_PAYMENTS_ENABLED")
                .map(|v| v != "false")
                .unwrap_or(true),
        }
    }
}

/// Cash never touches a network: payments stay pending until an operator
/// confirms collection through the orchestrator.
#[derive(Debug, Clone, Default)]
pub struct CashProvider {
    config: CashConfig,
}

impl CashProvider {
    pub fn new(config: CashConfig) -> Self {
        Self { config }
    }

    pub fn from_env() -> Self {
        Self::new(CashConfig::from_env())
    }

    fn ensure_enabled(&self) -> PaymentResult<()> {
        if self.config.enabled {
            Ok(())
        } else {
            Err(PaymentError::ConfigurationError {
                message: "cash payments are disabled".to_string(),
            })
        }
    }
}

#[async_trait]
impl PaymentProvider for CashProvider {
    fn name(&self) -> ProviderName {
        ProviderName::Cash
    }

    async fn authenticate(&self) -> PaymentResult<()> {
        self.ensure_enabled()
    }

    async fn request_to_pay(
        &self,
        request: &PaymentRequest,
        reference: &str,
    ) -> PaymentResult<PaymentResponse> {
        self.ensure_enabled()?;
        let amount = format_currency(request.amount);

        let (external_id, payment_code, message, expires_at) = match request.method {
            PaymentMethod::CashOnDelivery => (
                format!("COD-{}", request.order_id),
                None,
                format!(
                    "Pay {} in cash to the rider on delivery. Reference: {}",
                    amount, reference
                ),
                None,
            ),
            PaymentMethod::CashPickup => {
                let code = generate_payment_code();
                (
                    format!("PICKUP-{}", code),
                    Some(code.clone()),
                    format!(
                        "Present code {} and pay {} at the pickup point within {} days",
                        code, amount, PICKUP_EXPIRY_DAYS
                    ),
                    Some(Utc::now() + ChronoDuration::days(PICKUP_EXPIRY_DAYS)),
                )
            }
            other => {
                return Err(PaymentError::validation(
                    format!("payment method {} is not a cash method", other),
                    "method",
                ))
            }
        };

        info!(
            reference = %reference,
            external_id = %external_id,
            method = %request.method,
            "cash payment registered"
        );

        Ok(PaymentResponse {
            reference: reference.to_string(),
            external_transaction_id: Some(external_id),
            status: TransactionStatus::Pending,
            amount: request.amount,
            currency: request.currency.clone(),
            provider: ProviderName::Cash,
            method: request.method,
            ussd_code: None,
            payment_url: None,
            payment_code,
            message: Some(message),
            expires_at,
            provider_data: None,
        })
    }

    async fn get_transaction_status(&self, external_id: &str) -> PaymentResult<StatusResponse> {
        Ok(StatusResponse {
            external_transaction_id: external_id.to_string(),
            status: TransactionStatus::Pending,
            provider_status: "AWAITING_CONFIRMATION".to_string(),
            amount: None,
            currency: None,
            reason: None,
            provider_data: None,
        })
    }

    async fn get_transaction_details(&self, external_id: &str) -> PaymentResult<JsonValue> {
        Ok(serde_json::json!({
            "externalId": external_id,
            "provider": "cash",
            "status": "AWAITING_CONFIRMATION",
        }))
    }

    async fn get_account_balance(&self) -> PaymentResult<AccountBalance> {
        Ok(AccountBalance {
            available_balance: "N/A".to_string(),
            currency: "XAF".to_string(),
        })
    }

    async fn process_refund(
        &self,
        request: &ProviderRefundRequest,
    ) -> PaymentResult<RefundResponse> {
        self.ensure_enabled()?;
        Ok(RefundResponse {
            refund_id: request.refund_id.clone(),
            transaction_reference: request.external_transaction_id.clone(),
            external_refund_id: Some(format!("CASH-REFUND-{}", request.refund_id)),
            status: TransactionStatus::Pending,
            amount: request.amount,
            currency: request.currency.clone(),
            provider: ProviderName::Cash,
            reason: request.reason.clone(),
            created_at: Utc::now(),
        })
    }

    async fn cancel_payment(&self, _external_id: &str) -> PaymentResult<bool> {
        Ok(true)
    }

    fn validate_webhook_signature(
        &self,
        _payload: &[u8],
        _signature: &str,
    ) -> WebhookVerificationResult {
        WebhookVerificationResult {
            valid: false,
            reason: Some("cash payments do not accept webhooks".to_string()),
        }
    }

    fn parse_webhook_event(&self, _payload: &[u8]) -> PaymentResult<WebhookEvent> {
        Err(PaymentError::validation(
            "cash payments do not accept webhooks",
            "provider",
        ))
    }

    async fn health_check(&self) -> HealthCheck {
        HealthCheck::healthy(Some(serde_json::json!({
            "enabled": self.config.enabled,
            "lastCheck": Utc::now().to_rfc3339(),
        })))
    }
}
