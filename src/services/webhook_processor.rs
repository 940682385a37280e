use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::payments::error::PaymentError;
use crate::payments::types::ProviderName;
use crate::services::activity_log::{ActivityAction, ActivityEntry};
use crate::services::payment_orchestrator::{PaymentOrchestrator, WebhookOutcome};

/// Header names checked, in order, for a callback signature.
pub const SIGNATURE_HEADERS: [&str; 3] = ["x-signature", "x-mtn-signature", "x-orange-signature"];

#[derive(Debug, Error)]
pub enum WebhookProcessorError {
    #[error("Missing signature")]
    MissingSignature,
    #[error("Invalid signature: {0}")]
    InvalidSignature(String),
    #[error("Unknown provider: {0}")]
    UnknownProvider(String),
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),
    #[error("Processing error: {0}")]
    Processing(#[from] PaymentError),
}

impl WebhookProcessorError {
    /// True for rejections that must be treated as security events.
    pub fn is_signature_failure(&self) -> bool {
        matches!(
            self,
            WebhookProcessorError::MissingSignature | WebhookProcessorError::InvalidSignature(_)
        )
    }
}

pub struct WebhookProcessor {
    orchestrator: Arc<PaymentOrchestrator>,
}

impl WebhookProcessor {
    pub fn new(orchestrator: Arc<PaymentOrchestrator>) -> Self {
        Self { orchestrator }
    }

    /// Verify the signature over the raw body, then hand the parsed event to
    /// the orchestrator. Nothing is parsed or written before verification.
    pub async fn process_webhook(
        &self,
        provider_name: &str,
        signature: Option<&str>,
        payload: &[u8],
    ) -> Result<WebhookOutcome, WebhookProcessorError> {
        let provider = self.parse_provider(provider_name)?;
        let provider_impl = self
            .orchestrator
            .providers()
            .get(provider)
            .map_err(|_| WebhookProcessorError::UnknownProvider(provider_name.to_string()))?;

        let signature = match signature.map(str::trim).filter(|s| !s.is_empty()) {
            Some(signature) => signature,
            None => {
                self.reject(provider, "missing signature").await;
                return Err(WebhookProcessorError::MissingSignature);
            }
        };

        let verification = provider_impl.validate_webhook_signature(payload, signature);
        if !verification.valid {
            let reason = verification
                .reason
                .unwrap_or_else(|| "signature mismatch".to_string());
            self.reject(provider, &reason).await;
            return Err(WebhookProcessorError::InvalidSignature(reason));
        }

        let event = provider_impl
            .parse_webhook_event(payload)
            .map_err(|e| WebhookProcessorError::InvalidPayload(e.to_string()))?;

        info!(
            provider = %provider,
            event_type = %event.event_type,
            reference = ?event.reference,
            external_id = ?event.external_transaction_id,
            status = ?event.status,
            "processing verified webhook"
        );

        Ok(self.orchestrator.apply_webhook_event(&event).await?)
    }

    fn parse_provider(&self, name: &str) -> Result<ProviderName, WebhookProcessorError> {
        name.parse::<ProviderName>()
            .map_err(|_| WebhookProcessorError::UnknownProvider(name.to_string()))
    }

    async fn reject(&self, provider: ProviderName, reason: &str) {
        warn!(
            security_event = true,
            provider = %provider,
            reason = %reason,
            "webhook rejected"
        );
        self.orchestrator
            .activity_log()
            .record(ActivityEntry::new(
                ActivityAction::WebhookRejected,
                None,
                serde_json::json!({ "provider": provider, "reason": reason }),
            ))
            .await;
    }
}
