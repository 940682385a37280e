use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::types::{
    AccountBalance, HealthCheck, PaymentMethod, PaymentRequest, PaymentResponse,
    ProviderName, ProviderRefundRequest, RefundResponse, StatusResponse, WebhookEvent,
    WebhookVerificationResult,
};
use async_trait::async_trait;
use serde_json::Value as JsonValue;

/// Capability set every payment network converges on.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    fn name(&self) -> ProviderName;

    fn supported_methods(&self) -> &'static [PaymentMethod] {
        self.name().supported_methods()
    }

    /// Obtain (or reuse) a bearer token.
    async fn authenticate(&self) -> PaymentResult<()>;

    /// Submit a charge; `reference` is the internal transaction reference.
    async fn request_to_pay(
        &self,
        request: &PaymentRequest,
        reference: &str,
    ) -> PaymentResult<PaymentResponse>;

    /// A provider-side 404 is reported as `FAILED`, not as an error.
    async fn get_transaction_status(&self, external_id: &str) -> PaymentResult<StatusResponse>;

    async fn get_transaction_details(&self, external_id: &str) -> PaymentResult<JsonValue>;

    async fn get_account_balance(&self) -> PaymentResult<AccountBalance>;

    async fn process_refund(&self, request: &ProviderRefundRequest)
        -> PaymentResult<RefundResponse>;

    async fn cancel_payment(&self, external_id: &str) -> PaymentResult<bool> {
        Err(PaymentError::InvalidState {
            message: format!(
                "{} does not support cancelling payment {}",
                self.name().display_name(),
                external_id
            ),
        })
    }

    fn validate_webhook_signature(
        &self,
        payload: &[u8],
        signature: &str,
    ) -> WebhookVerificationResult;

    fn parse_webhook_event(&self, payload: &[u8]) -> PaymentResult<WebhookEvent>;

    /// Liveness only; never consulted on the request path.
    async fn health_check(&self) -> HealthCheck;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::types::{HealthState, TransactionStatus};
    use chrono::Utc;

    struct MockProvider;

    #[async_trait]
    impl PaymentProvider for MockProvider {
        fn name(&self) -> ProviderName {
            ProviderName::Mtn
        }

        async fn authenticate(&self) -> PaymentResult<()> {
            Ok(())
        }

        async fn request_to_pay(
            &self,
            request: &PaymentRequest,
            reference: &str,
        ) -> PaymentResult<PaymentResponse> {
            Ok(PaymentResponse {
                reference: reference.to_string(),
                external_transaction_id: Some("mock-ext".to_string()),
                status: TransactionStatus::Pending,
                amount: request.amount,
                currency: request.currency.clone(),
                provider: ProviderName::Mtn,
                method: request.method,
                ussd_code: Some("*126#".to_string()),
                payment_url: None,
                payment_code: None,
                message: None,
                expires_at: None,
                provider_data: None,
            })
        }

        async fn get_transaction_status(
            &self,
            external_id: &str,
        ) -> PaymentResult<StatusResponse> {
            Ok(StatusResponse {
                external_transaction_id: external_id.to_string(),
                status: TransactionStatus::Completed,
                provider_status: "SUCCESSFUL".to_string(),
                amount: None,
                currency: None,
                reason: None,
                provider_data: None,
            })
        }

        async fn get_transaction_details(&self, _external_id: &str) -> PaymentResult<JsonValue> {
            Ok(serde_json::json!({}))
        }

        async fn get_account_balance(&self) -> PaymentResult<AccountBalance> {
            Ok(AccountBalance {
                available_balance: "0".to_string(),
                currency: "XAF".to_string(),
            })
        }

        async fn process_refund(
            &self,
            request: &ProviderRefundRequest,
        ) -> PaymentResult<RefundResponse> {
            Ok(RefundResponse {
                refund_id: request.refund_id.clone(),
                transaction_reference: request.external_transaction_id.clone(),
                external_refund_id: None,
                status: TransactionStatus::Pending,
                amount: request.amount,
                currency: request.currency.clone(),
                provider: ProviderName::Mtn,
                reason: request.reason.clone(),
                created_at: Utc::now(),
            })
        }

        fn validate_webhook_signature(
            &self,
            _payload: &[u8],
            _signature: &str,
        ) -> WebhookVerificationResult {
            WebhookVerificationResult {
                valid: true,
                reason: None,
            }
        }

        fn parse_webhook_event(&self, payload: &[u8]) -> PaymentResult<WebhookEvent> {
            Ok(WebhookEvent {
                provider: ProviderName::Mtn,
                event_type: "mock".to_string(),
                reference: None,
                external_transaction_id: None,
                status: None,
                reason: None,
                payload: serde_json::from_slice(payload).unwrap_or_default(),
                received_at: Utc::now(),
            })
        }

        async fn health_check(&self) -> HealthCheck {
            HealthCheck::healthy(None)
        }
    }

    #[tokio::test]
    async fn trait_can_be_implemented_by_mock_provider() {
        let provider: Box<dyn PaymentProvider> = Box::new(MockProvider);
        assert_eq!(
            provider.supported_methods(),
            &[PaymentMethod::MobileMoney, PaymentMethod::Ussd]
        );

        let cancel = provider.cancel_payment("x").await;
        assert!(matches!(cancel, Err(PaymentError::InvalidState { .. })));

        let health = provider.health_check().await;
        assert_eq!(health.status, HealthState::Healthy);
    }
}
