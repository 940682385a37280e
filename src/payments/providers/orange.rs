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
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::{info, warn};

pub const ORANGE_USSD_CODE: &str = "*150#";
const PAYMENT_EXPIRY_MINUTES: i64 = 15;

#[derive(Debug, Clone)]
pub struct OrangeConfig {
    pub base_url: String,
    pub merchant_key: String,
    pub client_id: String,
    pub client_secret: String,
    pub return_url: String,
    pub cancel_url: String,
    pub notif_url: String,
    pub webhook_secret: String,
    pub lang: String,
    pub timeout_secs: u64,
}

impl Default for OrangeConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.orange.com/orange-money-webpay/cm/v1".to_string(),
            merchant_key: String::new(),
            client_id: String::new(),
            client_secret: String::new(),
            return_url: String::new(),
            cancel_url: String::new(),
            notif_url: String::new(),
            webhook_secret: String::new(),
            lang: "fr".to_string(),
            timeout_secs: 30,
        }
    }
}

impl OrangeConfig {
    pub fn from_env() -> PaymentResult<Self> {
        let required = |name: &str| {
            std::env::var(name)
                .ok()
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| PaymentError::ConfigurationError {
                    message: format!("{} environment variable is required", name),
                })
        };

        Ok(Self {
            base_url: std::env::var("ORANGE_API_BASE_URL").unwrap_or_else(|_| {
                "https://api.orange.com/orange-money-webpay/cm/v1".to_string()
            }),
            merchant_key: required("ORANGE_MERCHANT_KEY")?,
            client_id: required("ORANGE_CLIENT_ID")?,
            client_secret: required("ORANGE_CLIENT_SECRET")?,
            return_url: std::env::var("ORANGE_RETURN_URL").unwrap_or_default(),
            cancel_url: std::env::var("ORANGE_CANCEL_URL").unwrap_or_default(),
            notif_url: std::env::var("ORANGE_NOTIF_URL").unwrap_or_default(),
            webhook_secret: required("ORANGE_WEBHOOK_SECRET")?,
            lang: std::env::var("ORANGE_LANG").unwrap_or_else(|_| "fr".to_string()),
            timeout_secs: std::env::var("ORANGE_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(30),
        })
    }
}

pub struct OrangeProvider {
    config: OrangeConfig,
    http: ProviderHttpClient,
    tokens: TokenCache,
}

impl OrangeProvider {
    pub fn new(config: OrangeConfig) -> PaymentResult<Self> {
        let http = ProviderHttpClient::new(
            ProviderName::Orange,
            config.base_url.clone(),
            Duration::from_secs(config.timeout_secs),
        )?;
        Ok(Self {
            config,
            http,
            tokens: TokenCache::default(),
        })
    }

    pub fn from_env() -> PaymentResult<Self> {
        Self::new(OrangeConfig::from_env()?)
    }

    async fn fetch_token(&self) -> PaymentResult<AccessToken> {
        let request = self
            .http
            .request(Method::POST, "/token")
            .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
            .form(&[("grant_type", "client_credentials")]);
        let response = self.http.send(request).await?;
        if !response.status().is_success() {
            return Err(self.http.status_error(response).await);
        }
        let token: OrangeTokenResponse = self.http.read_json(response).await?;
        info!(expires_in = token.expires_in, "orange authentication successful");
        Ok(AccessToken::new(
            token.access_token,
            Duration::from_secs(token.expires_in),
        ))
    }

    async fn token(&self) -> PaymentResult<String> {
        self.tokens.get_or_refresh(|| self.fetch_token()).await
    }

    async fn post_form(
        &self,
        path: &str,
        form: &[(&str, String)],
    ) -> PaymentResult<reqwest::Response> {
        let token = self.token().await?;
        let request = self
            .http
            .request(Method::POST, path)
            .bearer_auth(token)
            .header(reqwest::header::ACCEPT, "application/json")
            .form(form);
        let response = self.http.send(request).await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            self.tokens.invalidate().await;
        }
        Ok(response)
    }

    async fn fetch_payment(&self, pay_token: &str) -> PaymentResult<reqwest::Response> {
        let token = self.token().await?;
        let request = self
            .http
            .request(Method::GET, &format!("/payment/{}", pay_token))
            .bearer_auth(token)
            .header(reqwest::header::ACCEPT, "application/json");
        let response = self.http.send(request).await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            self.tokens.invalidate().await;
        }
        Ok(response)
    }
}

pub fn map_orange_status(status: &str) -> TransactionStatus {
    match status.trim().to_uppercase().as_str() {
        "SUCCESS" | "SUCCESSFUL" | "COMPLETED" => TransactionStatus::Completed,
        "FAILED" | "FAILURE" | "EXPIRED" | "TIMEOUT" => TransactionStatus::Failed,
        "CANCELLED" | "CANCELED" => TransactionStatus::Cancelled,
        "PROCESSING" => TransactionStatus::Processing,
        _ => TransactionStatus::Pending,
    }
}

#[async_trait]
impl PaymentProvider for OrangeProvider {
    fn name(&self) -> ProviderName {
        ProviderName::Orange
    }

    async fn authenticate(&self) -> PaymentResult<()> {
        self.token().await.map(|_| ())
    }

    async fn request_to_pay(
        &self,
        request: &PaymentRequest,
        reference: &str,
    ) -> PaymentResult<PaymentResponse> {
        if let Some(raw) = request.phone_number.as_deref() {
            let phone = validate_and_format_phone_number(raw)
                .ok_or_else(|| PaymentError::validation("invalid phone number", "phoneNumber"))?;
            if phone.operator != Operator::Orange {
                return Err(PaymentError::validation(
                    format!("phone number operator {} is not Orange", phone.operator),
                    "phoneNumber",
                ));
            }
        }

        let form = [
            ("merchant_key", self.config.merchant_key.clone()),
            ("currency", request.currency.clone()),
            ("order_id", request.order_id.clone()),
            ("amount", request.amount.to_string()),
            ("return_url", self.config.return_url.clone()),
            ("cancel_url", self.config.cancel_url.clone()),
            ("notif_url", self.config.notif_url.clone()),
            ("lang", self.config.lang.clone()),
            ("reference", reference.to_string()),
        ];
        let response = self.post_form("/webpayment", &form).await?;
        if !response.status().is_success() {
            return Err(self.http.status_error(response).await);
        }

        let raw: JsonValue = self.http.read_json(response).await?;
        let parsed: OrangeWebPaymentResponse =
            serde_json::from_value(raw.clone()).map_err(|e| {
                PaymentError::provider(
                    ProviderName::Orange,
                    "INVALID_RESPONSE",
                    format!("unexpected webpayment payload: {}", e),
                )
            })?;
        let (payment_url, pay_token) = match (parsed.payment_url, parsed.pay_token) {
            (Some(url), Some(token)) if !url.is_empty() && !token.is_empty() => (url, token),
            _ => {
                return Err(PaymentError::provider(
                    ProviderName::Orange,
                    "INVALID_RESPONSE",
                    "webpayment response is missing payment_url or pay_token",
                ))
            }
        };

        info!(
            reference = %reference,
            external_id = %pay_token,
            phone = %request.phone_number.as_deref().map(mask_phone).unwrap_or_default(),
            amount = request.amount,
            "orange webpayment created"
        );

        Ok(PaymentResponse {
            reference: reference.to_string(),
            external_transaction_id: Some(pay_token.clone()),
            status: TransactionStatus::Pending,
            amount: request.amount,
            currency: request.currency.clone(),
            provider: ProviderName::Orange,
            method: request.method,
            ussd_code: Some(ORANGE_USSD_CODE.to_string()),
            payment_url: Some(payment_url),
            payment_code: None,
            message: Some(format!(
                "Composez {} pour confirmer le paiement de {}",
                ORANGE_USSD_CODE,
                format_currency(request.amount)
            )),
            expires_at: Some(Utc::now() + ChronoDuration::minutes(PAYMENT_EXPIRY_MINUTES)),
            provider_data: Some(serde_json::json!({
                "payToken": pay_token,
                "paymentToken": parsed.payment_token,
                "notifToken": parsed.notif_token,
            })),
        })
    }

    async fn get_transaction_status(&self, external_id: &str) -> PaymentResult<StatusResponse> {
        let response = self.fetch_payment(external_id).await?;
        if response.status() == StatusCode::NOT_FOUND {
            warn!(external_id = %external_id, "orange payment not found, treating as failed");
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
        let parsed: OrangeStatusResponse = serde_json::from_value(raw.clone()).map_err(|e| {
            PaymentError::provider(
                ProviderName::Orange,
                "INVALID_RESPONSE",
                format!("unexpected status payload: {}", e),
            )
        })?;

        Ok(StatusResponse {
            external_transaction_id: external_id.to_string(),
            status: map_orange_status(&parsed.status),
            provider_status: parsed.status.clone(),
            amount: parsed.amount.as_ref().and_then(json_amount),
            currency: parsed.currency.clone(),
            reason: parsed.message.clone(),
            provider_data: Some(raw),
        })
    }

    async fn get_transaction_details(&self, external_id: &str) -> PaymentResult<JsonValue> {
        let response = self.fetch_payment(external_id).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(PaymentError::NotFound {
                resource: "Orange payment".to_string(),
                id: external_id.to_string(),
            });
        }
        if !response.status().is_success() {
            return Err(self.http.status_error(response).await);
        }
        self.http.read_json(response).await
    }

    /// WebPay exposes no balance endpoint; a valid token is the best signal available.
    async fn get_account_balance(&self) -> PaymentResult<AccountBalance> {
        self.authenticate().await?;
        Ok(AccountBalance {
            available_balance: "N/A".to_string(),
            currency: "XAF".to_string(),
        })
    }

    async fn process_refund(
        &self,
        request: &ProviderRefundRequest,
    ) -> PaymentResult<RefundResponse> {
        let details = self
            .get_transaction_details(&request.external_transaction_id)
            .await?;
        let currency = details
            .get("currency")
            .and_then(|v| v.as_str())
            .unwrap_or(&request.currency)
            .to_string();

        let form = [
            ("merchant_key", self.config.merchant_key.clone()),
            ("order_id", request.order_id.clone()),
            ("amount", request.amount.to_string()),
            ("currency", currency.clone()),
            ("reason", request.reason.clone()),
            ("refund_reference", request.refund_id.clone()),
        ];
        let response = self.post_form("/refund", &form).await?;
        if !response.status().is_success() {
            return Err(self.http.status_error(response).await);
        }
        let parsed: OrangeRefundResponse = self.http.read_json(response).await?;

        info!(
            refund_id = %request.refund_id,
            external_refund_id = ?parsed.refund_id,
            amount = request.amount,
            "orange refund submitted"
        );

        Ok(RefundResponse {
            refund_id: request.refund_id.clone(),
            transaction_reference: request.external_transaction_id.clone(),
            external_refund_id: parsed.refund_id,
            status: parsed
                .status
                .as_deref()
                .map(map_orange_status)
                .unwrap_or(TransactionStatus::Pending),
            amount: parsed.amount.as_ref().and_then(json_amount).unwrap_or(request.amount),
            currency: parsed.currency.unwrap_or(currency),
            provider: ProviderName::Orange,
            reason: request.reason.clone(),
            created_at: parsed.create_time.unwrap_or_else(Utc::now),
        })
    }

    async fn cancel_payment(&self, external_id: &str) -> PaymentResult<bool> {
        let form = [
            ("merchant_key", self.config.merchant_key.clone()),
            ("pay_token", external_id.to_string()),
        ];
        let response = self.post_form("/cancel", &form).await?;
        if response.status() == StatusCode::OK {
            info!(external_id = %external_id, "orange payment cancelled");
            return Ok(true);
        }
        Err(self.http.status_error(response).await)
    }

    fn validate_webhook_signature(
        &self,
        payload: &[u8],
        signature: &str,
    ) -> WebhookVerificationResult {
        let valid = verify_webhook_signature(payload, signature, &self.config.webhook_secret);
        WebhookVerificationResult {
            valid,
            reason: (!valid).then(|| "signature mismatch".to_string()),
        }
    }

    fn parse_webhook_event(&self, payload: &[u8]) -> PaymentResult<WebhookEvent> {
        let raw: JsonValue = serde_json::from_slice(payload)
            .map_err(|e| PaymentError::validation(format!("invalid JSON: {}", e), "body"))?;
        let notification: OrangeNotification =
            serde_json::from_value(raw.clone()).map_err(|e| {
                PaymentError::validation(format!("invalid Orange notification: {}", e), "body")
            })?;

        Ok(WebhookEvent {
            provider: ProviderName::Orange,
            event_type: "webpayment.notification".to_string(),
            reference: notification.reference,
            external_transaction_id: notification.pay_token,
            status: Some(map_orange_status(&notification.status)),
            reason: notification.message,
            payload: raw,
            received_at: Utc::now(),
        })
    }

    async fn health_check(&self) -> HealthCheck {
        match self.authenticate().await {
            Ok(()) => HealthCheck::healthy(Some(serde_json::json!({
                "tokenValid": self.tokens.is_valid().await,
                "lastCheck": Utc::now().to_rfc3339(),
            }))),
            Err(e) => HealthCheck::unhealthy(e),
        }
    }
}

/// Orange sends amounts as either numbers or numeric strings.
fn json_amount(value: &JsonValue) -> Option<i64> {
    match value {
        JsonValue::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.round() as i64)),
        JsonValue::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[derive(Debug, Deserialize)]
struct OrangeTokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Deserialize)]
struct OrangeWebPaymentResponse {
    payment_url: Option<String>,
    pay_token: Option<String>,
    payment_token: Option<String>,
    notif_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OrangeStatusResponse {
    status: String,
    amount: Option<JsonValue>,
    currency: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OrangeRefundResponse {
    refund_id: Option<String>,
    status: Option<String>,
    amount: Option<JsonValue>,
    currency: Option<String>,
    create_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct OrangeNotification {
    status: String,
    pay_token: Option<String>,
    reference: Option<String>,
    message: Option<String>,
}
