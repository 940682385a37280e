use crate::helpers::crypto::{mask_phone, verify_webhook_signature};
use crate::helpers::fees::format_currency;
use crate::helpers::phone::{validate_and_format_phone_number, Operator};
use crate::payments::auth::{AccessToken, TokenCache};
use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::PaymentProvider;
use crate::payments::types::{
    AccountBalance, HealthCheck, PaymentRequest, PaymentResponse, ProviderName,
    ProviderRefundRequest, RefundResponse, StatusResponse, TransactionStatus, WebhookEvent,
    WebhookVerificationResult,
};
use crate::payments::utils::ProviderHttpClient;
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

pub const MTN_USSD_CODE: &str = "*126#";
const PAYMENT_EXPIRY_MINUTES: i64 = 5;
const SUBSCRIPTION_HEADER: &str = "Ocp-Apim-Subscription-Key";

#[derive(Debug, Clone)]
pub struct MtnConfig {
    pub base_url: String,
    pub api_user_id: String,
    pub api_key: String,
    pub collection_subscription_key: String,
    pub disbursement_subscription_key: String,
    pub target_environment: String,
    /// Sandbox only accepts EUR; production uses XAF.
    pub currency: String,
    pub callback_url: Option<String>,
    pub webhook_secret: String,
    pub timeout_secs: u64,
}

impl Default for MtnConfig {
    fn default() -> Self {
        Self {
            base_url: "https://sandbox.momodeveloper.mtn.com".to_string(),
            api_user_id: String::new(),
            api_key: String::new(),
            collection_subscription_key: String::new(),
            disbursement_subscription_key: String::new(),
            target_environment: "sandbox".to_string(),
            currency: "XAF".to_string(),
            callback_url: None,
            webhook_secret: String::new(),
            timeout_secs: 30,
        }
    }
}

fn required(name: &str) -> PaymentResult<String> {
    std::env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| PaymentError::ConfigurationError {
            message: format!("{} environment variable is required", name),
        })
}

impl MtnConfig {
    pub fn from_env() -> PaymentResult<Self> {
        Ok(Self {
            base_url: std::env::var("MTN_API_BASE_URL")
                .unwrap_or_else(|_| "https://sandbox.momodeveloper.mtn.com".to_string()),
            api_user_id: required("MTN_API_USER_ID")?,
            api_key: required("MTN_API_KEY")?,
            collection_subscription_key: required("MTN_COLLECTION_SUBSCRIPTION_KEY")?,
            disbursement_subscription_key: std::env::var("MTN_DISBURSEMENT_SUBSCRIPTION_KEY")
                .unwrap_or_default(),
            target_environment: std::env::var("MTN_TARGET_ENVIRONMENT")
                .unwrap_or_else(|_| "sandbox".to_string()),
            currency: std::env::var("MTN_CURRENCY").unwrap_or_else(|_| "XAF".to_string()),
            callback_url: std::env::var("MTN_CALLBACK_URL").ok(),
            webhook_secret: required("MTN_WEBHOOK_SECRET")?,
            timeout_secs: std::env::var("MTN_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(30),
        })
    }
}

pub struct MtnProvider {
    config: MtnConfig,
    http: ProviderHttpClient,
    collection_tokens: TokenCache,
    disbursement_tokens: TokenCache,
}

impl MtnProvider {
    pub fn new(config: MtnConfig) -> PaymentResult<Self> {
        let http = ProviderHttpClient::new(
            ProviderName::Mtn,
            config.base_url.clone(),
            Duration::from_secs(config.timeout_secs),
        )?;
        Ok(Self {
            config,
            http,
            collection_tokens: TokenCache::default(),
            disbursement_tokens: TokenCache::default(),
        })
    }

    pub fn from_env() -> PaymentResult<Self> {
        Self::new(MtnConfig::from_env()?)
    }

    async fn fetch_token(&self, path: &str, subscription_key: &str) -> PaymentResult<AccessToken> {
        let request = self
            .http
            .request(Method::POST, path)
            .basic_auth(&self.config.api_user_id, Some(&self.config.api_key))
            .header(SUBSCRIPTION_HEADER, subscription_key)
            .header(reqwest::header::CONTENT_LENGTH, "0");
        let response = self.http.send(request).await?;
        if !response.status().is_success() {
            return Err(self.http.status_error(response).await);
        }
        let token: MtnTokenResponse = self.http.read_json(response).await?;
        info!(
            token_type = %token.token_type,
            expires_in = token.expires_in,
            "mtn authentication successful"
        );
        Ok(AccessToken::new(
            token.access_token,
            Duration::from_secs(token.expires_in),
        ))
    }

    async fn collection_token(&self) -> PaymentResult<String> {
        self.collection_tokens
            .get_or_refresh(|| {
                self.fetch_token(
                    "/collection/token/",
                    &self.config.collection_subscription_key,
                )
            })
            .await
    }

    async fn disbursement_token(&self) -> PaymentResult<String> {
        self.disbursement_tokens
            .get_or_refresh(|| {
                self.fetch_token(
                    "/disbursement/token/",
                    &self.config.disbursement_subscription_key,
                )
            })
            .await
    }

    async fn collection_get(&self, path: &str) -> PaymentResult<reqwest::Response> {
        let token = self.collection_token().await?;
        let request = self
            .http
            .request(Method::GET, path)
            .bearer_auth(token)
            .header("X-Target-Environment", &self.config.target_environment)
            .header(SUBSCRIPTION_HEADER, &self.config.collection_subscription_key);
        let response = self.http.send(request).await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            self.collection_tokens.invalidate().await;
        }
        Ok(response)
    }

    fn expect_accepted(&self, status: StatusCode) -> PaymentResult<()> {
        if status == StatusCode::ACCEPTED {
            return Ok(());
        }
        Err(PaymentError::ProviderError {
            provider: ProviderName::Mtn,
            code: "UNEXPECTED_STATUS".to_string(),
            message: format!("expected HTTP 202, got {}", status.as_u16()),
            http_status: Some(status.as_u16()),
        })
    }
}

pub fn map_mtn_status(status: &str) -> TransactionStatus {
    match status.trim().to_uppercase().as_str() {
        "SUCCESSFUL" => TransactionStatus::Completed,
        "FAILED" | "REJECTED" | "TIMEOUT" | "EXPIRED" => TransactionStatus::Failed,
        "ONGOING" => TransactionStatus::Processing,
        _ => TransactionStatus::Pending,
    }
}

fn reason_text(reason: &Option<JsonValue>) -> Option<String> {
    match reason {
        Some(JsonValue::String(s)) => Some(s.clone()),
        Some(JsonValue::Object(map)) => map
            .get("message")
            .or_else(|| map.get("code"))
            .and_then(|v| v.as_str())
            .map(str::to_string),
        _ => None,
    }
}

#[async_trait]
impl PaymentProvider for MtnProvider {
    fn name(&self) -> ProviderName {
        ProviderName::Mtn
    }

    async fn authenticate(&self) -> PaymentResult<()> {
        self.collection_token().await.map(|_| ())
    }

    async fn request_to_pay(
        &self,
        request: &PaymentRequest,
        reference: &str,
    ) -> PaymentResult<PaymentResponse> {
        let phone = request
            .phone_number
            .as_deref()
            .and_then(validate_and_format_phone_number)
            .ok_or_else(|| PaymentError::validation("invalid phone number", "phoneNumber"))?;
        if phone.operator != Operator::Mtn {
            return Err(PaymentError::validation(
                format!("phone number operator {} is not MTN", phone.operator),
                "phoneNumber",
            ));
        }

        let token = self.collection_token().await?;
        let reference_id = Uuid::new_v4().to_string();
        let payer_message = if request.description.is_empty() {
            format!("Payment for order {}", request.order_id)
        } else {
            request.description.clone()
        };
        let payload = serde_json::json!({
            "amount": request.amount.to_string(),
            "currency": self.config.currency,
            "externalId": reference,
            "payer": {
                "partyIdType": "MSISDN",
                "partyId": phone.msisdn(),
            },
            "payerMessage": payer_message,
            "payeeNote": format!("Order {}", request.order_id),
        });

        let mut builder = self
            .http
            .request(Method::POST, "/collection/v1_0/requesttopay")
            .bearer_auth(token)
            .header("X-Reference-Id", &reference_id)
            .header("X-Target-Environment", &self.config.target_environment)
            .header(SUBSCRIPTION_HEADER, &self.config.collection_subscription_key)
            .json(&payload);
        if let Some(callback) = &self.config.callback_url {
            builder = builder.header("X-Callback-Url", callback);
        }

        let response = self.http.send(builder).await?;
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            self.collection_tokens.invalidate().await;
        }
        if !status.is_success() {
            return Err(self.http.status_error(response).await);
        }
        self.expect_accepted(status)?;

        info!(
            reference = %reference,
            external_id = %reference_id,
            phone = %mask_phone(&phone.formatted),
            amount = request.amount,
            "mtn request to pay accepted"
        );

        Ok(PaymentResponse {
            reference: reference.to_string(),
            external_transaction_id: Some(reference_id.clone()),
            status: TransactionStatus::Pending,
            amount: request.amount,
            currency: request.currency.clone(),
            provider: ProviderName::Mtn,
            method: request.method,
            ussd_code: Some(MTN_USSD_CODE.to_string()),
            payment_url: None,
            payment_code: None,
            message: Some(format!(
                "Please dial {} and confirm the payment of {}",
                MTN_USSD_CODE,
                format_currency(request.amount)
            )),
            expires_at: Some(Utc::now() + ChronoDuration::minutes(PAYMENT_EXPIRY_MINUTES)),
            provider_data: Some(serde_json::json!({ "referenceId": reference_id })),
        })
    }

    async fn get_transaction_status(&self, external_id: &str) -> PaymentResult<StatusResponse> {
        let response = self
            .collection_get(&format!("/collection/v1_0/requesttopay/{}", external_id))
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            warn!(external_id = %external_id, "mtn transaction not found, treating as failed");
            return Ok(StatusResponse {
                external_transaction_id: external_id.to_string(),
                status: TransactionStatus::Failed,
                provider_status: "NOT_FOUND".to_string(),
                amount: None,
                currency: None,
                reason: Some("Transaction not found at provider".to_string()),
                provider_data: None,
            });
        }
        if !response.status().is_success() {
            return Err(self.http.status_error(response).await);
        }

        let raw: JsonValue = self.http.read_json(response).await?;
        let parsed: MtnStatusResponse = serde_json::from_value(raw.clone()).map_err(|e| {
            PaymentError::provider(
                ProviderName::Mtn,
                "INVALID_RESPONSE",
                format!("unexpected status payload: {}", e),
            )
        })?;

        Ok(StatusResponse {
            external_transaction_id: external_id.to_string(),
            status: map_mtn_status(&parsed.status),
            provider_status: parsed.status.clone(),
            amount: parsed.amount.as_deref().and_then(|a| a.parse().ok()),
            currency: parsed.currency.clone(),
            reason: reason_text(&parsed.reason),
            provider_data: Some(raw),
        })
    }

    async fn get_transaction_details(&self, external_id: &str) -> PaymentResult<JsonValue> {
        let response = self
            .collection_get(&format!("/collection/v1_0/requesttopay/{}", external_id))
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(PaymentError::NotFound {
                resource: "MTN transaction".to_string(),
                id: external_id.to_string(),
            });
        }
        if !response.status().is_success() {
            return Err(self.http.status_error(response).await);
        }
        self.http.read_json(response).await
    }

    async fn get_account_balance(&self) -> PaymentResult<AccountBalance> {
        let response = self
            .collection_get("/collection/v1_0/account/balance")
            .await?;
        if !response.status().is_success() {
            return Err(self.http.status_error(response).await);
        }
        let balance: MtnBalanceResponse = self.http.read_json(response).await?;
        Ok(AccountBalance {
            available_balance: balance.available_balance,
            currency: balance.currency,
        })
    }

    async fn process_refund(
        &self,
        request: &ProviderRefundRequest,
    ) -> PaymentResult<RefundResponse> {
        let details = self
            .get_transaction_details(&request.external_transaction_id)
            .await?;
        let payee = details
            .pointer("/payer/partyId")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                PaymentError::provider(
                    ProviderName::Mtn,
                    "INVALID_RESPONSE",
                    "original transaction has no payer",
                )
            })?
            .to_string();
        let currency = details
            .get("currency")
            .and_then(|v| v.as_str())
            .unwrap_or(&request.currency)
            .to_string();

        let token = self.disbursement_token().await?;
        let transfer_id = Uuid::new_v4().to_string();
        let payload = serde_json::json!({
            "amount": request.amount.to_string(),
            "currency": currency,
            "externalId": format!("refund-{}", request.refund_id),
            "payee": { "partyIdType": "MSISDN", "partyId": payee },
            "payerMessage": request.reason,
            "payeeNote": format!("Refund for transaction {}", request.external_transaction_id),
        });
        let builder = self
            .http
            .request(Method::POST, "/disbursement/v1_0/transfer")
            .bearer_auth(token)
            .header("X-Reference-Id", &transfer_id)
            .header("X-Target-Environment", &self.config.target_environment)
            .header(SUBSCRIPTION_HEADER, &self.config.disbursement_subscription_key)
            .json(&payload);

        let response = self.http.send(builder).await?;
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            self.disbursement_tokens.invalidate().await;
        }
        if !status.is_success() {
            return Err(self.http.status_error(response).await);
        }
        self.expect_accepted(status)?;

        info!(
            refund_id = %request.refund_id,
            transfer_id = %transfer_id,
            amount = request.amount,
            "mtn refund transfer accepted"
        );

        Ok(RefundResponse {
            refund_id: request.refund_id.clone(),
            transaction_reference: request.external_transaction_id.clone(),
            external_refund_id: Some(transfer_id),
            status: TransactionStatus::Pending,
            amount: request.amount,
            currency,
            provider: ProviderName::Mtn,
            reason: request.reason.clone(),
            created_at: Utc::now(),
        })
    }

    fn validate_webhook_signature(
        &self,
        payload: &[u8],
        signature: &str,
    ) -> WebhookVerificationResult {
        if verify_webhook_signature(payload, signature, &self.config.webhook_secret) {
            WebhookVerificationResult {
                valid: true,
                reason: None,
            }
        } else {
            WebhookVerificationResult {
                valid: false,
                reason: Some("signature mismatch".to_string()),
            }
        }
    }

    fn parse_webhook_event(&self, payload: &[u8]) -> PaymentResult<WebhookEvent> {
        let raw: JsonValue = serde_json::from_slice(payload)
            .map_err(|e| PaymentError::validation(format!("invalid JSON: {}", e), "body"))?;
        let callback: MtnCallback = serde_json::from_value(raw.clone())
            .map_err(|e| PaymentError::validation(format!("invalid MTN callback: {}", e), "body"))?;

        Ok(WebhookEvent {
            provider: ProviderName::Mtn,
            event_type: "requesttopay.callback".to_string(),
            reference: callback.external_id,
            external_transaction_id: callback.reference_id,
            status: Some(map_mtn_status(&callback.status)),
            reason: reason_text(&callback.reason),
            payload: raw,
            received_at: Utc::now(),
        })
    }

    async fn health_check(&self) -> HealthCheck {
        if let Err(e) = self.authenticate().await {
            return HealthCheck::unhealthy(e);
        }
        match self.get_account_balance().await {
            Ok(balance) => HealthCheck::healthy(Some(serde_json::json!({
                "balance": balance.available_balance,
                "currency": balance.currency,
                "lastCheck": Utc::now().to_rfc3339(),
            }))),
            Err(e) => HealthCheck::unhealthy(e),
        }
    }
}

#[derive(Debug, Deserialize)]
struct MtnTokenResponse {
    access_token: String,
    #[serde(default = "default_token_type")]
    token_type: String,
    expires_in: u64,
}

fn default_token_type() -> String {
    "access_token".to_string()
}

#[derive(Debug, Deserialize)]
struct MtnStatusResponse {
    status: String,
    amount: Option<String>,
    currency: Option<String>,
    reason: Option<JsonValue>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MtnBalanceResponse {
    available_balance: String,
    currency: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MtnCallback {
    reference_id: Option<String>,
    external_id: Option<String>,
    status: String,
    reason: Option<JsonValue>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::helpers::crypto::generate_webhook_signature;

    fn provider() -> MtnProvider {
        MtnProvider::new(MtnConfig {
            api_user_id: "user".to_string(),
            api_key: "key".to_string(),
            collection_subscription_key: "sub".to_string(),
            webhook_secret: "mtn-secret".to_string(),
            ..MtnConfig::default()
        })
        .expect("provider should initialize")
    }

    #[test]
    fn status_vocabulary_maps_to_canonical_states() {
        assert_eq!(map_mtn_status("SUCCESSFUL"), TransactionStatus::Completed);
        assert_eq!(map_mtn_status("PENDING"), TransactionStatus::Pending);
        assert_eq!(map_mtn_status("FAILED"), TransactionStatus::Failed);
        assert_eq!(map_mtn_status("TIMEOUT"), TransactionStatus::Failed);
        assert_eq!(map_mtn_status("ONGOING"), TransactionStatus::Processing);
        assert_eq!(map_mtn_status("something-new"), TransactionStatus::Pending);
    }

    #[test]
    fn webhook_signature_is_checked_against_secret() {
        let provider = provider();
        let payload = br#"{"referenceId":"r1","status":"SUCCESSFUL"}"#;
        assert!(!provider.validate_webhook_signature(payload, "bogus").valid);
        let signature = generate_webhook_signature(payload, "mtn-secret");
        assert!(provider.validate_webhook_signature(payload, &signature).valid);
    }

    #[test]
    fn callback_parsing_extracts_identifiers() {
        let provider = provider();
        let payload = br#"{
            "referenceId": "0b7a-ext",
            "externalId": "OKD-MTN-1-ABC-XYZ",
            "status": "FAILED",
            "reason": {"code": "PAYER_NOT_FOUND", "message": "Payer not found"}
        }"#;
        let event = provider.parse_webhook_event(payload).expect("valid callback");
        assert_eq!(event.external_transaction_id.as_deref(), Some("0b7a-ext"));
        assert_eq!(event.reference.as_deref(), Some("OKD-MTN-1-ABC-XYZ"));
        assert_eq!(event.status, Some(TransactionStatus::Failed));
        assert_eq!(event.reason.as_deref(), Some("Payer not found"));
    }

    #[test]
    fn malformed_callback_is_a_validation_error() {
        let provider = provider();
        assert!(matches!(
            provider.parse_webhook_event(b"not json"),
            Err(PaymentError::ValidationError { .. })
        ));
    }
}
