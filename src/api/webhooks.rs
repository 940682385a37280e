use axum::{
    body::Bytes,
    extract::{Path, State},
    http::HeaderMap,
    response::IntoResponse,
};
use tracing::{error, info, warn};

use super::AppState;
use crate::error::AppError;
use crate::middleware::error::{success_response, RequestId};
use crate::payments::error::PaymentError;
use crate::services::webhook_processor::{WebhookProcessorError, SIGNATURE_HEADERS};

/// First signature header present, in order of preference.
pub fn extract_signature(headers: &HeaderMap) -> Option<String> {
    SIGNATURE_HEADERS.iter().find_map(|name| {
        headers
            .get(*name)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
    })
}

/// POST /webhooks/{provider}
///
/// The body is taken raw so the signature is verified over the exact bytes
/// the provider signed.
pub async fn handle_webhook(
    State(state): State<AppState>,
    request_id: RequestId,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    info!(provider = %provider, bytes = body.len(), "Received webhook");

    let signature = extract_signature(&headers);
    match state
        .webhooks
        .process_webhook(&provider, signature.as_deref(), &body)
        .await
    {
        Ok(outcome) => {
            info!(provider = %provider, outcome = ?outcome, "Webhook processed");
            Ok(success_response(outcome))
        }
        Err(e) if e.is_signature_failure() => {
            warn!(provider = %provider, error = %e, "Webhook signature rejected");
            let message = e.to_string();
            Err(request_id.error(PaymentError::SignatureError { provider, message }))
        }
        Err(WebhookProcessorError::Processing(e)) => {
            error!(provider = %provider, error = %e, "Webhook processing failed");
            Err(request_id.error(e))
        }
        Err(e) => Err(request_id.error(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_signature_header_preference() {
        let mut headers = HeaderMap::new();
        headers.insert("x-mtn-signature", HeaderValue::from_static("mtn-sig"));
        assert_eq!(extract_signature(&headers).as_deref(), Some("mtn-sig"));

        headers.insert("x-signature", HeaderValue::from_static("generic"));
        assert_eq!(extract_signature(&headers).as_deref(), Some("generic"));

        assert!(extract_signature(&HeaderMap::new()).is_none());
    }
}
