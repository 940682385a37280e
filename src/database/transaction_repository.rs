use crate::fraud::{CustomerHistory, RecentActivity};
use crate::helpers::fees::format_currency;
use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::types::{PaymentMethod, ProviderName, TransactionStatus};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Payment,
    Refund,
}

/// Transaction entity
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: Uuid,
    pub reference: String,
    pub external_transaction_id: Option<String>,
    pub kind: TransactionKind,
    /// Reference of the original payment for refund records.
    pub parent_reference: Option<String>,
    pub order_id: String,
    pub customer_id: String,
    pub merchant_id: Option<String>,
    pub status: TransactionStatus,
    pub amount: i64,
    pub fees: i64,
    pub taxes: i64,
    pub net_amount: i64,
    pub commission: i64,
    /// Sum of refunds issued against this payment.
    pub refunded_amount: i64,
    pub currency: String,
    pub provider: ProviderName,
    pub method: PaymentMethod,
    /// AES-GCM ciphertext; never serialized.
    #[serde(skip)]
    pub phone_number_encrypted: Option<String>,
    pub phone_number: Option<String>,
    #[serde(skip)]
    pub phone_hash: Option<String>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub webhook_attempts: u32,
    pub description: String,
    pub metadata: serde_json::Value,
    pub ussd_code: Option<String>,
    pub payment_url: Option<String>,
    pub payment_code: Option<String>,
    pub failure_reason: Option<String>,
    pub correlation_id: String,
    pub settlement_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Transaction {
    /// Apply a status change and stamp the matching timestamp. Callers are
    /// responsible for checking the transition is legal.
    pub fn set_status(&mut self, status: TransactionStatus, reason: Option<String>) {
        let now = Utc::now();
        self.status = status;
        self.updated_at = now;
        match status {
            TransactionStatus::Completed => self.completed_at = Some(now),
            TransactionStatus::Failed => {
                self.failed_at = Some(now);
                if reason.is_some() {
                    self.failure_reason = reason;
                }
            }
            TransactionStatus::Cancelled => {
                self.cancelled_at = Some(now);
                if reason.is_some() {
                    self.failure_reason = reason;
                }
            }
            TransactionStatus::Pending | TransactionStatus::Processing => {}
        }
    }

    pub fn refundable_amount(&self) -> i64 {
        self.amount.saturating_sub(self.refunded_amount).max(0)
    }

    /// Money that is still owed or already moved. Failed and cancelled
    /// attempts never count against a customer's limits.
    pub fn counts_toward_volume(&self) -> bool {
        matches!(
            self.status,
            TransactionStatus::Pending | TransactionStatus::Processing | TransactionStatus::Completed
        )
    }
}

/// Persistence boundary for transactions. `save` is an upsert keyed on `id`.
#[async_trait]
pub trait TransactionRepository: Send + Sync {
    async fn save(&self, transaction: &Transaction) -> PaymentResult<()>;

    async fn find_by_id(&self, id: Uuid) -> PaymentResult<Option<Transaction>>;

    async fn find_by_reference(&self, reference: &str) -> PaymentResult<Option<Transaction>>;

    async fn find_by_external_id(&self, external_id: &str)
        -> PaymentResult<Option<Transaction>>;

    async fn find_refunds(&self, parent_reference: &str) -> PaymentResult<Vec<Transaction>>;

    /// Atomically add `amount` to the payment's refunded total, failing if it
    /// would exceed the original amount. Returns the updated payment.
    async fn reserve_refund(&self, reference: &str, amount: i64) -> PaymentResult<Transaction>;

    /// Give back a reservation whose provider refund did not go through.
    async fn release_refund(&self, reference: &str, amount: i64) -> PaymentResult<()>;

    async fn recent_activity(
        &self,
        customer_id: &str,
        now: DateTime<Utc>,
    ) -> PaymentResult<RecentActivity>;

    async fn customer_history(&self, customer_id: &str) -> PaymentResult<CustomerHistory>;
}

#[derive(Debug, Default)]
struct Store {
    by_id: HashMap<Uuid, Transaction>,
    by_reference: HashMap<String, Uuid>,
    by_external_id: HashMap<String, Uuid>,
}

/// Process-local repository used by the service binary and tests.
#[derive(Debug, Default)]
pub struct InMemoryTransactionRepository {
    store: RwLock<Store>,
}

impl InMemoryTransactionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.store.read().await.by_id.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl TransactionRepository for InMemoryTransactionRepository {
    async fn save(&self, transaction: &Transaction) -> PaymentResult<()> {
        let mut store = self.store.write().await;
        if let Some(existing) = store.by_reference.get(&transaction.reference) {
            if *existing != transaction.id {
                return Err(PaymentError::StorageError {
                    message: format!("duplicate transaction reference {}", transaction.reference),
                });
            }
        }

        store
            .by_reference
            .insert(transaction.reference.clone(), transaction.id);
        if let Some(external_id) = &transaction.external_transaction_id {
            store.by_external_id.insert(external_id.clone(), transaction.id);
        }
        store.by_id.insert(transaction.id, transaction.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> PaymentResult<Option<Transaction>> {
        Ok(self.store.read().await.by_id.get(&id).cloned())
    }

    async fn find_by_reference(&self, reference: &str) -> PaymentResult<Option<Transaction>> {
        let store = self.store.read().await;
        Ok(store
            .by_reference
            .get(reference)
            .and_then(|id| store.by_id.get(id))
            .cloned())
    }

    async fn find_by_external_id(
        &self,
        external_id: &str,
    ) -> PaymentResult<Option<Transaction>> {
        let store = self.store.read().await;
        Ok(store
            .by_external_id
            .get(external_id)
            .and_then(|id| store.by_id.get(id))
            .cloned())
    }

    async fn find_refunds(&self, parent_reference: &str) -> PaymentResult<Vec<Transaction>> {
        let store = self.store.read().await;
        let mut refunds: Vec<Transaction> = store
            .by_id
            .values()
            .filter(|t| t.parent_reference.as_deref() == Some(parent_reference))
            .cloned()
            .collect();
        refunds.sort_by_key(|t| t.created_at);
        Ok(refunds)
    }

    async fn reserve_refund(&self, reference: &str, amount: i64) -> PaymentResult<Transaction> {
        let mut store = self.store.write().await;
        let id = *store.by_reference.get(reference).ok_or_else(|| PaymentError::NotFound {
            resource: "Transaction".to_string(),
            id: reference.to_string(),
        })?;
        let payment = store
            .by_id
            .get_mut(&id)
            .ok_or_else(|| PaymentError::StorageError {
                message: format!("reference index points at a missing row for {}", reference),
            })?;

        if payment.kind != TransactionKind::Payment {
            return Err(PaymentError::InvalidState {
                message: "refunds can only be issued against payments".to_string(),
            });
        }
        let refundable = payment.refundable_amount();
        if amount <= 0 || amount > refundable {
            return Err(PaymentError::validation(
                format!(
                    "Refund amount exceeds refundable balance of {}",
                    format_currency(refundable)
                ),
                "amount",
            ));
        }

        payment.refunded_amount += amount;
        payment.updated_at = Utc::now();
        Ok(payment.clone())
    }

    async fn release_refund(&self, reference: &str, amount: i64) -> PaymentResult<()> {
        let mut store = self.store.write().await;
        let Some(id) = store.by_reference.get(reference).copied() else {
            return Err(PaymentError::NotFound {
                resource: "Transaction".to_string(),
                id: reference.to_string(),
            });
        };
        if let Some(payment) = store.by_id.get_mut(&id) {
            payment.refunded_amount = payment.refunded_amount.saturating_sub(amount).max(0);
            payment.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn recent_activity(
        &self,
        customer_id: &str,
        now: DateTime<Utc>,
    ) -> PaymentResult<RecentActivity> {
        let day_ago = now - Duration::hours(24);
        let hour_ago = now - Duration::hours(1);
        let store = self.store.read().await;

        let mut activity = RecentActivity::default();
        for tx in store.by_id.values().filter(|t| {
            t.kind == TransactionKind::Payment
                && t.customer_id == customer_id
                && t.created_at >= day_ago
        }) {
            activity.transactions_last_24h += 1;
            if tx.counts_toward_volume() {
                activity.amount_last_24h = activity.amount_last_24h.saturating_add(tx.amount);
            }
            if tx.created_at >= hour_ago {
                activity.transactions_last_hour += 1;
            }
            if tx.status == TransactionStatus::Failed {
                activity.failed_attempts_last_24h += 1;
            }
        }
        Ok(activity)
    }

    async fn customer_history(&self, customer_id: &str) -> PaymentResult<CustomerHistory> {
        let store = self.store.read().await;
        let payments: Vec<&Transaction> = store
            .by_id
            .values()
            .filter(|t| t.kind == TransactionKind::Payment && t.customer_id == customer_id)
            .collect();

        let total = payments.len() as u32;
        let failed = payments
            .iter()
            .filter(|t| t.status == TransactionStatus::Failed)
            .count() as u32;
        let average_amount = if payments.is_empty() {
            0
        } else {
            payments.iter().map(|t| t.amount).sum::<i64>() / payments.len() as i64
        };

        Ok(CustomerHistory {
            total_transactions: total,
            failed_transactions: failed,
            average_amount,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn sample(reference: &str, customer_id: &str, amount: i64) -> Transaction {
        let now = Utc::now();
        Transaction {
            id: Uuid::new_v4(),
            reference: reference.to_string(),
            external_transaction_id: None,
            kind: TransactionKind::Payment,
            parent_reference: None,
            order_id: "ORD-1".to_string(),
            customer_id: customer_id.to_string(),
            merchant_id: None,
            status: TransactionStatus::Pending,
            amount,
            fees: 0,
            taxes: 0,
            net_amount: amount,
            commission: 0,
            refunded_amount: 0,
            currency: "XAF".to_string(),
            provider: ProviderName::Mtn,
            method: PaymentMethod::MobileMoney,
            phone_number_encrypted: None,
            phone_number: None,
            phone_hash: None,
            retry_count: 0,
            max_retries: 3,
            webhook_attempts: 0,
            description: String::new(),
            metadata: serde_json::json!({}),
            ussd_code: None,
            payment_url: None,
            payment_code: None,
            failure_reason: None,
            correlation_id: "okd-test".to_string(),
            settlement_date: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
            failed_at: None,
            cancelled_at: None,
            expires_at: None,
        }
    }

    #[tokio::test]
    async fn lookups_by_reference_and_external_id() {
        let repo = InMemoryTransactionRepository::new();
        let mut tx = sample("OKD-MTN-1", "cust-1", 5_000);
        repo.save(&tx).await.expect("saved");
        assert!(repo.find_by_external_id("ext-1").await.expect("lookup").is_none());

        tx.external_transaction_id = Some("ext-1".to_string());
        repo.save(&tx).await.expect("updated");
        let found = repo
            .find_by_external_id("ext-1")
            .await
            .expect("lookup")
            .expect("indexed");
        assert_eq!(found.reference, "OKD-MTN-1");
        assert_eq!(repo.len().await, 1);
    }

    #[tokio::test]
    async fn duplicate_references_are_rejected() {
        let repo = InMemoryTransactionRepository::new();
        repo.save(&sample("OKD-MTN-1", "cust-1", 5_000)).await.expect("saved");
        let err = repo
            .save(&sample("OKD-MTN-1", "cust-2", 7_000))
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::StorageError { .. }));
    }

    #[tokio::test]
    async fn activity_and_history_aggregate_per_customer() {
        let repo = InMemoryTransactionRepository::new();
        let mut failed = sample("R1", "cust-1", 4_000);
        failed.status = TransactionStatus::Failed;
        repo.save(&failed).await.expect("saved");
        repo.save(&sample("R2", "cust-1", 8_000)).await.expect("saved");
        repo.save(&sample("R3", "cust-2", 1_000)).await.expect("saved");

        let activity = repo.recent_activity("cust-1", Utc::now()).await.expect("activity");
        assert_eq!(activity.transactions_last_24h, 2);
        assert_eq!(activity.failed_attempts_last_24h, 1);
        assert_eq!(activity.amount_last_24h, 8_000);

        let history = repo.customer_history("cust-1").await.expect("history");
        assert_eq!(history.total_transactions, 2);
        assert_eq!(history.average_amount, 6_000);
    }

    #[tokio::test]
    async fn failed_and_cancelled_payments_do_not_use_up_volume() {
        let repo = InMemoryTransactionRepository::new();
        for (reference, status) in [
            ("R1", TransactionStatus::Failed),
            ("R2", TransactionStatus::Cancelled),
            ("R3", TransactionStatus::Processing),
            ("R4", TransactionStatus::Completed),
        ] {
            let mut tx = sample(reference, "cust-1", 900_000);
            tx.status = status;
            repo.save(&tx).await.expect("saved");
        }

        let activity = repo.recent_activity("cust-1", Utc::now()).await.expect("activity");
        assert_eq!(activity.transactions_last_24h, 4);
        assert_eq!(activity.amount_last_24h, 1_800_000);
    }

    #[tokio::test]
    async fn refund_reservations_never_exceed_the_payment() {
        let repo = std::sync::Arc::new(InMemoryTransactionRepository::new());
        let mut payment = sample("OKD-MTN-9", "cust-1", 10_000);
        payment.status = TransactionStatus::Completed;
        repo.save(&payment).await.expect("saved");

        let attempts = (0..4).map(|_| {
            let repo = repo.clone();
            tokio::spawn(async move { repo.reserve_refund("OKD-MTN-9", 10_000).await })
        });
        let granted = futures::future::join_all(attempts)
            .await
            .into_iter()
            .filter(|r| matches!(r, Ok(Ok(_))))
            .count();
        assert_eq!(granted, 1);

        let stored = repo.find_by_reference("OKD-MTN-9").await.expect("lookup").expect("row");
        assert_eq!(stored.refunded_amount, 10_000);

        repo.release_refund("OKD-MTN-9", 10_000).await.expect("released");
        let reserved = repo.reserve_refund("OKD-MTN-9", 4_000).await.expect("reserved");
        assert_eq!(reserved.refundable_amount(), 6_000);
    }
}
