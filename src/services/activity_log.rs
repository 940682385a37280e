//! Audit trail sink for payment lifecycle events.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActivityAction {
    PaymentCreated,
    StatusChanged,
    RefundRequested,
    WebhookRejected,
    WebhookIgnored,
    FraudBlocked,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEntry {
    pub action: ActivityAction,
    pub reference: Option<String>,
    pub correlation_id: Option<String>,
    pub details: serde_json::Value,
    pub at: DateTime<Utc>,
}

impl ActivityEntry {
    pub fn new(action: ActivityAction, reference: Option<&str>, details: serde_json::Value) -> Self {
        Self {
            action,
            reference: reference.map(str::to_string),
            correlation_id: None,
            details,
            at: Utc::now(),
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: &str) -> Self {
        self.correlation_id = Some(correlation_id.to_string());
        self
    }
}

#[async_trait]
pub trait ActivityLog: Send + Sync {
    async fn record(&self, entry: ActivityEntry);
}

/// Writes entries to the tracing pipeline under the `audit` target.
pub struct TracingActivityLog;

#[async_trait]
impl ActivityLog for TracingActivityLog {
    async fn record(&self, entry: ActivityEntry) {
        let details = entry.details.to_string();
        match entry.action {
            ActivityAction::WebhookRejected | ActivityAction::FraudBlocked => warn!(
                target: "audit",
                security_event = true,
                action = ?entry.action,
                reference = ?entry.reference,
                correlation_id = ?entry.correlation_id,
                details = %details,
                "activity recorded"
            ),
            _ => info!(
                target: "audit",
                action = ?entry.action,
                reference = ?entry.reference,
                correlation_id = ?entry.correlation_id,
                details = %details,
                "activity recorded"
            ),
        }
    }
}

#[derive(Debug, Default)]
pub struct InMemoryActivityLog {
    entries: RwLock<Vec<ActivityEntry>>,
}

impl InMemoryActivityLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn entries(&self) -> Vec<ActivityEntry> {
        self.entries.read().await.clone()
    }

    pub async fn count(&self, action: ActivityAction) -> usize {
        self.entries
            .read()
            .await
            .iter()
            .filter(|e| e.action == action)
            .count()
    }
}

#[async_trait]
impl ActivityLog for InMemoryActivityLog {
    async fn record(&self, entry: ActivityEntry) {
        self.entries.write().await.push(entry);
    }
}
