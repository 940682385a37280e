use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::types::ProviderName;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::warn;

/// Thin reqwest wrapper that classifies every failure into the payment error taxonomy.
/// Retries are the orchestrator's job, not the transport's.
#[derive(Clone)]
pub struct ProviderHttpClient {
    client: Client,
    provider: ProviderName,
    base_url: String,
    timeout: Duration,
}

impl ProviderHttpClient {
    pub fn new(
        provider: ProviderName,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> PaymentResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PaymentError::ConfigurationError {
                message: format!("failed to initialize HTTP client for {}: {}", provider, e),
            })?;

        Ok(Self {
            client,
            provider,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
        })
    }

    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, self.endpoint(path))
            .timeout(self.timeout)
    }

    pub async fn send(&self, request: RequestBuilder) -> PaymentResult<Response> {
        request.send().await.map_err(|e| self.transport_error(e))
    }

    pub fn transport_error(&self, err: reqwest::Error) -> PaymentError {
        if err.is_timeout() {
            PaymentError::TimeoutError {
                provider: self.provider,
                message: format!("request timed out: {}", err),
                timeout_secs: self.timeout.as_secs().max(1),
            }
        } else if err.is_decode() {
            PaymentError::provider(
                self.provider,
                "INVALID_RESPONSE",
                format!("undecodable response: {}", err),
            )
        } else {
            // Connect, request-build and body errors all mean the exchange never completed.
            PaymentError::NetworkError {
                provider: self.provider,
                message: format!("request failed: {}", err),
            }
        }
    }

    pub async fn read_json<T: DeserializeOwned>(&self, response: Response) -> PaymentResult<T> {
        let text = response.text().await.map_err(|e| self.transport_error(e))?;
        serde_json::from_str::<T>(&text).map_err(|e| {
            PaymentError::provider(
                self.provider,
                "INVALID_RESPONSE",
                format!("invalid provider JSON response: {}", e),
            )
        })
    }

    /// Consume a non-success response and turn it into a typed error.
    pub async fn status_error(&self, response: Response) -> PaymentError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        warn!(
            provider = %self.provider,
            status = %status,
            "provider returned an error status"
        );
        classify_status(self.provider, status, &body)
    }
}

pub fn provider_error_code(status: StatusCode) -> &'static str {
    match status.as_u16() {
        400 => "INVALID_REQUEST",
        401 => "AUTH_FAILED",
        403 => "ACCESS_FORBIDDEN",
        404 => "NOT_FOUND",
        409 => "DUPLICATE_TRANSACTION",
        500..=599 => "SERVER_ERROR",
        _ => "UNEXPECTED_STATUS",
    }
}

/// Gateway-level 502/503/504 mean the provider was unreachable; other statuses
/// are a well-formed answer from the provider.
pub fn classify_status(provider: ProviderName, status: StatusCode, body: &str) -> PaymentError {
    match status.as_u16() {
        502..=504 => PaymentError::NetworkError {
            provider,
            message: format!("upstream unavailable (HTTP {})", status.as_u16()),
        },
        _ => PaymentError::ProviderError {
            provider,
            code: provider_error_code(status).to_string(),
            message: format!("HTTP {}: {}", status.as_u16(), truncate(body, 200)),
            http_status: Some(status.as_u16()),
        },
    }
}

fn truncate(body: &str, max: usize) -> &str {
    match body.char_indices().nth(max) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_map_to_stable_provider_codes() {
        assert_eq!(provider_error_code(StatusCode::BAD_REQUEST), "INVALID_REQUEST");
        assert_eq!(provider_error_code(StatusCode::UNAUTHORIZED), "AUTH_FAILED");
        assert_eq!(provider_error_code(StatusCode::CONFLICT), "DUPLICATE_TRANSACTION");
        assert_eq!(provider_error_code(StatusCode::OK), "UNEXPECTED_STATUS");
    }

    #[test]
    fn gateway_errors_are_transient() {
        let err = classify_status(ProviderName::Mtn, StatusCode::SERVICE_UNAVAILABLE, "");
        assert!(err.is_retryable());

        let err = classify_status(ProviderName::Mtn, StatusCode::INTERNAL_SERVER_ERROR, "boom");
        assert!(!err.is_retryable());
        assert!(matches!(
            err,
            PaymentError::ProviderError { ref code, http_status: Some(500), .. } if code == "SERVER_ERROR"
        ));
    }

    #[test]
    fn long_bodies_are_truncated() {
        let body = "x".repeat(1_000);
        let err = classify_status(ProviderName::Orange, StatusCode::BAD_REQUEST, &body);
        let PaymentError::ProviderError { message, .. } = err else {
            panic!("expected provider error");
        };
        assert!(message.len() < 300);
    }

    #[test]
    fn endpoint_joins_without_double_slash() {
        let client = ProviderHttpClient::new(
            ProviderName::Mtn,
            "https://sandbox.momodeveloper.mtn.com/",
            Duration::from_secs(5),
        )
        .expect("client builds");
        assert_eq!(
            client.endpoint("/collection/token/"),
            "https://sandbox.momodeveloper.mtn.com/collection/token/"
        );
    }
}
