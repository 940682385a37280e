use crate::database::transaction_repository::Transaction;
use crate::helpers::fees::format_currency;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    PaymentCompleted,
    PaymentFailed,
    PaymentCancelled,
    RefundInitiated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub recipient: String,
    pub notification_type: NotificationType,
    pub reference: String,
    pub message: String,
}

/// Delivery channel (SMS, email, push). Implementations report success but
/// must never fail the payment flow.
#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send(&self, notification: &Notification) -> bool;
}

/// Default sender that only emits a structured log line.
pub struct LogNotificationSender;

#[async_trait]
impl NotificationSender for LogNotificationSender {
    async fn send(&self, notification: &Notification) -> bool {
        info!(
            recipient = %notification.recipient,
            reference = %notification.reference,
            kind = ?notification.notification_type,
            "notification: {}", notification.message
        );
        true
    }
}

#[derive(Clone)]
pub struct NotificationService {
    sender: Arc<dyn NotificationSender>,
}

impl Default for NotificationService {
    fn default() -> Self {
        Self::new(Arc::new(LogNotificationSender))
    }
}

impl NotificationService {
    pub fn new(sender: Arc<dyn NotificationSender>) -> Self {
        Self { sender }
    }

    pub fn build(tx: &Transaction, notification_type: NotificationType) -> Notification {
        let amount = format_currency(tx.amount);
        let message = match notification_type {
            NotificationType::PaymentCompleted => {
                format!("Payment of {} received. Reference: {}", amount, tx.reference)
            }
            NotificationType::PaymentFailed => format!(
                "Payment of {} failed{}. Reference: {}",
                amount,
                tx.failure_reason
                    .as_deref()
                    .map(|r| format!(": {}", r))
                    .unwrap_or_default(),
                tx.reference
            ),
            NotificationType::PaymentCancelled => {
                format!("Payment of {} was cancelled. Reference: {}", amount, tx.reference)
            }
            NotificationType::RefundInitiated => {
                format!("Refund of {} initiated. Reference: {}", amount, tx.reference)
            }
        };
        Notification {
            recipient: tx.customer_id.clone(),
            notification_type,
            reference: tx.reference.clone(),
            message,
        }
    }

    /// Fire-and-forget: delivery runs on its own task and failures are only logged.
    pub fn notify(&self, tx: &Transaction, notification_type: NotificationType) {
        let notification = Self::build(tx, notification_type);
        let sender = self.sender.clone();
        tokio::spawn(async move {
            if !sender.send(&notification).await {
                warn!(
                    reference = %notification.reference,
                    kind = ?notification.notification_type,
                    "notification delivery failed"
                );
            }
        });
    }
}
