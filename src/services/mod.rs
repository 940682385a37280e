//! Services module for business logic and integrations

pub mod activity_log;
pub mod notification;
pub mod payment_orchestrator;
pub mod retry;
pub mod ussd;
pub mod webhook_processor;

pub use activity_log::{
    ActivityAction, ActivityEntry, ActivityLog, InMemoryActivityLog, TracingActivityLog,
};
pub use notification::{
    LogNotificationSender, Notification, NotificationSender, NotificationService,
    NotificationType,
};
pub use payment_orchestrator::{
    OrchestratorConfig, PaymentMethodOption, PaymentOrchestrator, ProviderMetrics,
    WebhookOutcome,
};
pub use retry::{Backoff, RetryPolicy};
pub use ussd::{UssdReply, UssdService, UssdSession, UssdSessionRequest};
pub use webhook_processor::{WebhookProcessor, WebhookProcessorError};
