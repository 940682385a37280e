//! Payment Orchestrator Service
//!
//! Drives a transaction from validation through fraud screening, provider
//! submission and persistence, then owns every later status change: polls,
//! webhooks, cash confirmations, cancellations and refunds.

use crate::database::transaction_repository::{
    Transaction, TransactionKind, TransactionRepository,
};
use crate::fraud::{FraudEngine, RequestContext};
use crate::helpers::cipher::DataCipher;
use crate::helpers::crypto::{generate_correlation_id, hash_data, mask_phone};
use crate::helpers::fees::{
    calculate_fees_with, format_currency, round_half_up, validate_amount_with, CemacLimits,
    FeeBreakdown, ProviderSchedule,
};
use crate::helpers::ids::generate_transaction_reference;
use crate::helpers::phone::{
    operator_for_provider, validate_and_format_phone_number, PhoneNumberInfo,
};
use crate::helpers::settlement::SettlementCalendar;
use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::factory::ProviderRegistry;
use crate::payments::provider::PaymentProvider;
use crate::payments::types::{
    HealthCheck, PaymentMethod, PaymentRequest, PaymentResponse, ProviderName,
    ProviderRefundRequest, RefundRequest, RefundResponse, TransactionStatus, WebhookEvent,
};
use crate::services::activity_log::{ActivityAction, ActivityEntry, ActivityLog, TracingActivityLog};
use crate::services::notification::{NotificationService, NotificationType};
use crate::services::retry::RetryPolicy;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{error, info, warn};
use uuid::Uuid;

// ============================================================================
// Configuration Types
// ============================================================================

/// Configuration for the payment orchestrator
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Retry policy for `request_to_pay` and refunds
    pub retry: RetryPolicy,
    pub cemac: CemacLimits,
    pub settlement: SettlementCalendar,
    /// Upper bound for a single provider health probe
    pub health_check_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            cemac: CemacLimits::default(),
            settlement: SettlementCalendar::default(),
            health_check_timeout: Duration::from_secs(10),
        }
    }
}

impl OrchestratorConfig {
    pub fn from_env() -> Self {
        Self {
            retry: RetryPolicy::from_env(),
            cemac: CemacLimits::default(),
            settlement: SettlementCalendar::from_env(),
            health_check_timeout: std::env::var("PROVIDER_HEALTH_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(Duration::from_secs(10)),
        }
    }
}

// ============================================================================
// Provider Metrics
// ============================================================================

/// Rolling submission counters per provider.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderMetrics {
    pub provider: ProviderName,
    pub success_count: u64,
    pub failure_count: u64,
    pub total_requests: u64,
    pub last_request_at: Option<DateTime<Utc>>,
    pub last_failure_at: Option<DateTime<Utc>>,
}

impl ProviderMetrics {
    pub fn new(provider: ProviderName) -> Self {
        Self {
            provider,
            success_count: 0,
            failure_count: 0,
            total_requests: 0,
            last_request_at: None,
            last_failure_at: None,
        }
    }

    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            return 1.0;
        }
        self.success_count as f64 / self.total_requests as f64
    }

    pub fn record_success(&mut self) {
        self.success_count += 1;
        self.total_requests += 1;
        self.last_request_at = Some(Utc::now());
    }

    pub fn record_failure(&mut self) {
        let now = Utc::now();
        self.failure_count += 1;
        self.total_requests += 1;
        self.last_request_at = Some(now);
        self.last_failure_at = Some(now);
    }
}

// ============================================================================
// Result Types
// ============================================================================

/// Result of applying a provider callback.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum WebhookOutcome {
    Applied {
        reference: String,
        from: TransactionStatus,
        to: TransactionStatus,
    },
    Ignored {
        reference: String,
        reason: String,
    },
}

/// One provider/method pair offered to a payer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentMethodOption {
    pub provider: ProviderName,
    pub method: PaymentMethod,
    pub display_name: String,
    pub available: bool,
    pub reason: Option<String>,
    pub fees: Option<FeeBreakdown>,
}

// ============================================================================
// Payment Orchestrator
// ============================================================================

pub struct PaymentOrchestrator {
    providers: ProviderRegistry,
    repository: Arc<dyn TransactionRepository>,
    fraud: Arc<FraudEngine>,
    cipher: DataCipher,
    notifications: NotificationService,
    activity: Arc<dyn ActivityLog>,
    config: OrchestratorConfig,
    /// Per-reference locks serializing status writes.
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    metrics: RwLock<HashMap<ProviderName, ProviderMetrics>>,
}

impl PaymentOrchestrator {
    pub fn new(
        providers: ProviderRegistry,
        repository: Arc<dyn TransactionRepository>,
        fraud: Arc<FraudEngine>,
        cipher: DataCipher,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            providers,
            repository,
            fraud,
            cipher,
            notifications: NotificationService::default(),
            activity: Arc::new(TracingActivityLog),
            config,
            locks: Mutex::new(HashMap::new()),
            metrics: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_notifications(mut self, notifications: NotificationService) -> Self {
        self.notifications = notifications;
        self
    }

    pub fn with_activity_log(mut self, activity: Arc<dyn ActivityLog>) -> Self {
        self.activity = activity;
        self
    }

    pub fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }

    pub fn fraud_engine(&self) -> &Arc<FraudEngine> {
        &self.fraud
    }

    pub fn activity_log(&self) -> &Arc<dyn ActivityLog> {
        &self.activity
    }

    // ------------------------------------------------------------------------
    // Initiation
    // ------------------------------------------------------------------------

    /// Validate, screen and submit a payment. Nothing is persisted unless the
    /// provider accepts the charge.
    pub async fn initiate_payment(
        &self,
        request: PaymentRequest,
        context: RequestContext,
    ) -> PaymentResult<PaymentResponse> {
        let correlation_id = context
            .correlation_id
            .clone()
            .unwrap_or_else(generate_correlation_id);

        request.validate_shape()?;

        let now = Utc::now();
        let mut context = context;
        context.correlation_id = Some(correlation_id.clone());
        context.recent_activity = self
            .repository
            .recent_activity(&request.customer_id, now)
            .await?;
        context.customer_history = self.repository.customer_history(&request.customer_id).await?;

        // Screening sees the raw request so limit breaches and operator
        // mismatches count as risk signals before they become validation errors.
        let assessment = match self.fraud.screen(&request, &context).await {
            Ok(assessment) => assessment,
            Err(e) => {
                error!(
                    correlation_id = %correlation_id,
                    order_id = %request.order_id,
                    provider = %request.provider,
                    error = %e,
                    "payment rejected by fraud screening"
                );
                self.activity
                    .record(
                        ActivityEntry::new(
                            ActivityAction::FraudBlocked,
                            None,
                            serde_json::json!({
                                "orderId": request.order_id,
                                "customerId": request.customer_id,
                                "amount": request.amount,
                                "provider": request.provider,
                                "details": e.details(),
                            }),
                        )
                        .with_correlation_id(&correlation_id),
                    )
                    .await;
                return Err(e);
            }
        };

        let schedule = ProviderSchedule::for_provider(request.provider);
        let amount_check =
            validate_amount_with(request.amount, &schedule, &self.config.cemac, false);
        if !amount_check.valid {
            return Err(PaymentError::validation(
                amount_check
                    .reason
                    .unwrap_or_else(|| "Invalid amount".to_string()),
                "amount",
            ));
        }

        let phone = resolve_phone(&request)?;

        if self.config.cemac.enabled
            && context
                .recent_activity
                .amount_last_24h
                .saturating_add(request.amount)
                > self.config.cemac.daily_limit
        {
            return Err(PaymentError::validation(
                format!(
                    "Amount exceeds CEMAC daily limit of {}",
                    format_currency(self.config.cemac.daily_limit)
                ),
                "amount",
            ));
        }

        let provider = self.providers.get(request.provider)?;
        let reference = generate_transaction_reference(request.provider, &request.order_id);

        info!(
            correlation_id = %correlation_id,
            reference = %reference,
            provider = %request.provider,
            amount = request.amount,
            risk_score = assessment.score,
            phone = %phone.as_ref().map(|p| mask_phone(&p.formatted)).unwrap_or_default(),
            "submitting payment to provider"
        );

        let (submission, reference_str) = (&request, reference.as_str());
        let outcome = self
            .config
            .retry
            .run("request_to_pay", move |_| {
                let provider = provider.clone();
                async move {
                    provider.authenticate().await?;
                    provider.request_to_pay(submission, reference_str).await
                }
            })
            .await;

        let response = match outcome.result {
            Ok(response) => {
                self.record_metric(request.provider, true).await;
                response
            }
            Err(e) => {
                self.record_metric(request.provider, false).await;
                error!(
                    correlation_id = %correlation_id,
                    reference = %reference,
                    provider = %request.provider,
                    attempts = outcome.attempts,
                    error = %e,
                    "payment submission failed"
                );
                return Err(e);
            }
        };

        let transaction = self.build_transaction(
            &request,
            &response,
            phone.as_ref(),
            &correlation_id,
            outcome.attempts,
            now,
        )?;
        self.repository.save(&transaction).await?;

        self.activity
            .record(
                ActivityEntry::new(
                    ActivityAction::PaymentCreated,
                    Some(&transaction.reference),
                    serde_json::json!({
                        "provider": transaction.provider,
                        "method": transaction.method,
                        "amount": transaction.amount,
                        "fees": transaction.fees,
                        "riskScore": assessment.score,
                        "riskLevel": assessment.risk_level,
                    }),
                )
                .with_correlation_id(&correlation_id),
            )
            .await;

        info!(
            correlation_id = %correlation_id,
            reference = %transaction.reference,
            external_id = ?transaction.external_transaction_id,
            status = %transaction.status,
            "payment accepted by provider"
        );

        Ok(response)
    }

    fn build_transaction(
        &self,
        request: &PaymentRequest,
        response: &PaymentResponse,
        phone: Option<&PhoneNumberInfo>,
        correlation_id: &str,
        attempts: u32,
        now: DateTime<Utc>,
    ) -> PaymentResult<Transaction> {
        let fees = calculate_fees_with(
            request.amount,
            &ProviderSchedule::for_provider(request.provider),
            &self.config.cemac,
        );
        let commission =
            round_half_up(Decimal::from(request.amount) * self.config.cemac.commission_rate);

        let (phone_number_encrypted, phone_number, phone_hash) = match phone {
            Some(phone) => (
                Some(self.cipher.encrypt(&phone.formatted)?),
                Some(mask_phone(&phone.formatted)),
                Some(hash_data(&phone.formatted)),
            ),
            None => (None, None, None),
        };

        Ok(Transaction {
            id: Uuid::new_v4(),
            reference: response.reference.clone(),
            external_transaction_id: response.external_transaction_id.clone(),
            kind: TransactionKind::Payment,
            parent_reference: None,
            order_id: request.order_id.clone(),
            customer_id: request.customer_id.clone(),
            merchant_id: request.merchant_id.clone(),
            status: response.status,
            amount: request.amount,
            fees: fees.fees,
            taxes: fees.taxes,
            net_amount: fees.net_amount,
            commission,
            refunded_amount: 0,
            currency: request.currency.to_uppercase(),
            provider: request.provider,
            method: request.method,
            phone_number_encrypted,
            phone_number,
            phone_hash,
            retry_count: attempts.saturating_sub(1),
            max_retries: self.config.retry.max_attempts,
            webhook_attempts: 0,
            description: request.description.clone(),
            metadata: request.metadata.clone().unwrap_or_else(|| serde_json::json!({})),
            ussd_code: response.ussd_code.clone(),
            payment_url: response.payment_url.clone(),
            payment_code: response.payment_code.clone(),
            failure_reason: None,
            correlation_id: correlation_id.to_string(),
            settlement_date: Some(self.config.settlement.settlement_date(now)),
            created_at: now,
            updated_at: now,
            completed_at: None,
            failed_at: None,
            cancelled_at: None,
            expires_at: response.expires_at,
        })
    }

    // ------------------------------------------------------------------------
    // Queries and status refresh
    // ------------------------------------------------------------------------

    pub async fn get_transaction(&self, reference: &str) -> PaymentResult<Transaction> {
        self.repository
            .find_by_reference(reference)
            .await?
            .ok_or_else(|| not_found(reference))
    }

    /// Poll the provider. Only terminal answers are written back.
    pub async fn get_transaction_status(&self, reference: &str) -> PaymentResult<Transaction> {
        let transaction = self.get_transaction(reference).await?;
        if transaction.status.is_terminal() {
            return Ok(transaction);
        }
        let Some(external_id) = transaction.external_transaction_id.clone() else {
            return Ok(transaction);
        };

        let provider = self.providers.get(transaction.provider)?;
        let status = provider.get_transaction_status(&external_id).await?;
        if !status.status.is_terminal() {
            return Ok(transaction);
        }

        let lock = self.transaction_lock(reference).await;
        let result = {
            let _guard = lock.lock().await;
            self.apply_polled_status(reference, status.status, status.reason)
                .await
        };
        self.release_lock(reference, lock).await;
        result
    }

    async fn apply_polled_status(
        &self,
        reference: &str,
        next: TransactionStatus,
        reason: Option<String>,
    ) -> PaymentResult<Transaction> {
        let mut current = self.get_transaction(reference).await?;
        if !current.status.can_transition_to(next) {
            return Ok(current);
        }
        let previous = current.status;
        current.set_status(next, reason);
        self.repository.save(&current).await?;
        self.after_transition(&current, previous, "status_poll").await;
        Ok(current)
    }

    // ------------------------------------------------------------------------
    // Webhooks
    // ------------------------------------------------------------------------

    /// Apply an already-verified provider callback. Statuses only move forward
    /// and a terminal transaction is never touched again.
    pub async fn apply_webhook_event(&self, event: &WebhookEvent) -> PaymentResult<WebhookOutcome> {
        let found = match &event.external_transaction_id {
            Some(external_id) => self.repository.find_by_external_id(external_id).await?,
            None => None,
        };
        let found = match (found, &event.reference) {
            (Some(tx), _) => Some(tx),
            (None, Some(reference)) => self.repository.find_by_reference(reference).await?,
            (None, None) => None,
        };
        let reference = match found {
            Some(tx) => tx.reference,
            None => {
                return Err(not_found(
                    event
                        .external_transaction_id
                        .as_deref()
                        .or(event.reference.as_deref())
                        .unwrap_or("unknown"),
                ))
            }
        };

        let lock = self.transaction_lock(&reference).await;
        let result = {
            let _guard = lock.lock().await;
            self.apply_webhook_locked(reference.clone(), event).await
        };
        self.release_lock(&reference, lock).await;
        result
    }

    async fn apply_webhook_locked(
        &self,
        reference: String,
        event: &WebhookEvent,
    ) -> PaymentResult<WebhookOutcome> {
        let mut current = self.get_transaction(&reference).await?;
        current.webhook_attempts += 1;
        let previous = current.status;

        let ignored = match event.status {
            _ if event.provider != current.provider => Some(format!(
                "callback from {} for a {} transaction",
                event.provider, current.provider
            )),
            _ if previous.is_terminal() => Some(format!(
                "transaction already {}",
                previous.as_str().to_lowercase()
            )),
            None => Some("callback carries no status".to_string()),
            Some(next) if next.rank() <= previous.rank() || !previous.can_transition_to(next) => {
                Some(format!("stale transition {} -> {}", previous, next))
            }
            Some(_) => None,
        };

        if let Some(reason) = ignored {
            current.updated_at = Utc::now();
            self.repository.save(&current).await?;
            if event.provider != current.provider {
                warn!(
                    reference = %reference,
                    provider = %event.provider,
                    expected_provider = %current.provider,
                    "webhook provider does not own the transaction"
                );
            }
            info!(
                reference = %reference,
                provider = %event.provider,
                event_type = %event.event_type,
                webhook_attempts = current.webhook_attempts,
                reason = %reason,
                "webhook ignored"
            );
            self.activity
                .record(
                    ActivityEntry::new(
                        ActivityAction::WebhookIgnored,
                        Some(&reference),
                        serde_json::json!({
                            "provider": event.provider,
                            "eventType": event.event_type,
                            "reason": reason,
                        }),
                    )
                    .with_correlation_id(&current.correlation_id),
                )
                .await;
            return Ok(WebhookOutcome::Ignored { reference, reason });
        }

        let next = event.status.unwrap_or(previous);
        current.set_status(next, event.reason.clone());
        self.repository.save(&current).await?;
        self.after_transition(&current, previous, "webhook").await;

        Ok(WebhookOutcome::Applied {
            reference,
            from: previous,
            to: next,
        })
    }

    // ------------------------------------------------------------------------
    // Manual transitions
    // ------------------------------------------------------------------------

    /// The payer authorized the charge on-device; the final outcome still
    /// comes from the provider.
    pub async fn mark_processing(&self, reference: &str) -> PaymentResult<Transaction> {
        self.transition(reference, TransactionStatus::Processing, None, "ussd_pin")
            .await
    }

    pub async fn cancel_payment(&self, reference: &str) -> PaymentResult<Transaction> {
        let transaction = self.get_transaction(reference).await?;
        ensure_open(&transaction)?;

        if let Some(external_id) = &transaction.external_transaction_id {
            let provider = self.providers.get(transaction.provider)?;
            match provider.cancel_payment(external_id).await {
                Ok(true) => {}
                Ok(false) => {
                    return Err(PaymentError::provider(
                        transaction.provider,
                        "CANCEL_REJECTED",
                        "Provider refused to cancel the payment",
                    ))
                }
                Err(PaymentError::InvalidState { message }) => {
                    warn!(
                        reference = %reference,
                        provider = %transaction.provider,
                        reason = %message,
                        "provider cannot cancel, cancelling locally"
                    );
                }
                Err(e) => return Err(e),
            }
        }

        self.transition(
            reference,
            TransactionStatus::Cancelled,
            Some("Cancelled by merchant".to_string()),
            "cancel",
        )
        .await
    }

    /// Cash is only settled when a person confirms the hand-over.
    pub async fn confirm_cash_payment(
        &self,
        reference: &str,
        confirmed_by: Option<&str>,
    ) -> PaymentResult<Transaction> {
        let transaction = self.get_transaction(reference).await?;
        if transaction.provider != ProviderName::Cash {
            return Err(PaymentError::InvalidState {
                message: format!("{} is not a cash payment", reference),
            });
        }
        let confirmed = self
            .transition(reference, TransactionStatus::Completed, None, "cash_confirmation")
            .await?;

        let Some(agent) = confirmed_by else {
            return Ok(confirmed);
        };
        let lock = self.transaction_lock(reference).await;
        let result = {
            let _guard = lock.lock().await;
            self.annotate(reference, "confirmedBy", serde_json::json!(agent))
                .await
        };
        self.release_lock(reference, lock).await;
        result
    }

    async fn transition(
        &self,
        reference: &str,
        next: TransactionStatus,
        reason: Option<String>,
        source: &str,
    ) -> PaymentResult<Transaction> {
        let lock = self.transaction_lock(reference).await;
        let result = {
            let _guard = lock.lock().await;
            self.transition_locked(reference, next, reason, source).await
        };
        self.release_lock(reference, lock).await;
        result
    }

    async fn transition_locked(
        &self,
        reference: &str,
        next: TransactionStatus,
        reason: Option<String>,
        source: &str,
    ) -> PaymentResult<Transaction> {
        let mut current = self.get_transaction(reference).await?;
        if !current.status.can_transition_to(next) {
            return Err(PaymentError::InvalidState {
                message: format!(
                    "cannot move {} from {} to {}",
                    reference, current.status, next
                ),
            });
        }
        let previous = current.status;
        current.set_status(next, reason);
        self.repository.save(&current).await?;
        self.after_transition(&current, previous, source).await;
        Ok(current)
    }

    // ------------------------------------------------------------------------
    // Refunds
    // ------------------------------------------------------------------------

    /// Refund part or all of a completed payment. The refundable balance is
    /// reserved in the repository before the provider is called and handed
    /// back if the provider rejects the refund.
    pub async fn refund(&self, request: RefundRequest) -> PaymentResult<RefundResponse> {
        let reference = request.transaction_reference.clone();
        let lock = self.transaction_lock(&reference).await;
        let result = {
            let _guard = lock.lock().await;
            self.refund_locked(request).await
        };
        self.release_lock(&reference, lock).await;
        result
    }

    async fn refund_locked(&self, request: RefundRequest) -> PaymentResult<RefundResponse> {
        let reference = request.transaction_reference.clone();
        let original = self.get_transaction(&reference).await?;
        if original.kind != TransactionKind::Payment {
            return Err(PaymentError::InvalidState {
                message: "refunds can only be issued against payments".to_string(),
            });
        }
        if original.status != TransactionStatus::Completed {
            return Err(PaymentError::InvalidState {
                message: format!(
                    "only completed payments can be refunded, {} is {}",
                    reference, original.status
                ),
            });
        }

        let refundable = original.refundable_amount();
        let amount = request.amount.unwrap_or(refundable);
        if amount <= 0 {
            return Err(PaymentError::validation(
                "refund amount must be greater than zero",
                "amount",
            ));
        }
        if amount > refundable {
            return Err(PaymentError::validation(
                format!(
                    "Refund amount exceeds refundable balance of {}",
                    format_currency(refundable)
                ),
                "amount",
            ));
        }

        let external_id =
            original
                .external_transaction_id
                .clone()
                .ok_or_else(|| PaymentError::InvalidState {
                    message: format!("{} has no provider transaction id", reference),
                })?;

        let provider = self.providers.get(original.provider)?;
        let original = self.repository.reserve_refund(&reference, amount).await?;
        let refund_id = format!("RFD-{}", Uuid::new_v4().simple()).to_uppercase();
        let provider_request = ProviderRefundRequest {
            refund_id: refund_id.clone(),
            external_transaction_id: external_id,
            order_id: original.order_id.clone(),
            amount,
            currency: original.currency.clone(),
            reason: request.reason.clone(),
        };

        let instruction = &provider_request;
        let outcome = self
            .config
            .retry
            .run("process_refund", move |_| {
                let provider = provider.clone();
                async move { provider.process_refund(instruction).await }
            })
            .await;
        let mut response = match outcome.result {
            Ok(response) => response,
            Err(e) => {
                error!(
                    correlation_id = %original.correlation_id,
                    reference = %reference,
                    refund_id = %refund_id,
                    attempts = outcome.attempts,
                    error = %e,
                    "refund submission failed"
                );
                if let Err(release) = self.repository.release_refund(&reference, amount).await {
                    error!(
                        reference = %reference,
                        amount = amount,
                        error = %release,
                        "failed to hand back reserved refund balance"
                    );
                }
                return Err(e);
            }
        };
        response.transaction_reference = reference.clone();

        let now = Utc::now();
        let refund = Transaction {
            id: Uuid::new_v4(),
            reference: refund_id.clone(),
            external_transaction_id: response.external_refund_id.clone(),
            kind: TransactionKind::Refund,
            parent_reference: Some(reference.clone()),
            order_id: original.order_id.clone(),
            customer_id: original.customer_id.clone(),
            merchant_id: original.merchant_id.clone(),
            status: response.status,
            amount,
            fees: 0,
            taxes: 0,
            net_amount: amount,
            commission: 0,
            refunded_amount: 0,
            currency: original.currency.clone(),
            provider: original.provider,
            method: original.method,
            phone_number_encrypted: original.phone_number_encrypted.clone(),
            phone_number: original.phone_number.clone(),
            phone_hash: original.phone_hash.clone(),
            retry_count: outcome.attempts.saturating_sub(1),
            max_retries: self.config.retry.max_attempts,
            webhook_attempts: 0,
            description: request.reason.clone(),
            metadata: serde_json::json!({}),
            ussd_code: None,
            payment_url: None,
            payment_code: None,
            failure_reason: None,
            correlation_id: original.correlation_id.clone(),
            settlement_date: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
            failed_at: None,
            cancelled_at: None,
            expires_at: None,
        };
        self.repository.save(&refund).await?;

        self.activity
            .record(
                ActivityEntry::new(
                    ActivityAction::RefundRequested,
                    Some(&reference),
                    serde_json::json!({
                        "refundId": refund_id,
                        "amount": amount,
                        "reason": request.reason,
                    }),
                )
                .with_correlation_id(&original.correlation_id),
            )
            .await;
        self.notifications
            .notify(&refund, NotificationType::RefundInitiated);

        info!(
            correlation_id = %original.correlation_id,
            reference = %reference,
            refund_id = %refund_id,
            amount = amount,
            "refund initiated"
        );
        Ok(response)
    }

    // ------------------------------------------------------------------------
    // Discovery and health
    // ------------------------------------------------------------------------

    /// Every enabled provider/method pair, marked unavailable when the phone
    /// or amount rules it out.
    pub fn available_payment_methods(
        &self,
        phone: Option<&str>,
        amount: Option<i64>,
    ) -> PaymentResult<Vec<PaymentMethodOption>> {
        let phone = match phone {
            Some(raw) => Some(
                validate_and_format_phone_number(raw)
                    .ok_or_else(|| PaymentError::validation("Invalid phone number format", "phone"))?,
            ),
            None => None,
        };

        let mut options = Vec::new();
        for provider in self.providers.enabled() {
            let schedule = ProviderSchedule::for_provider(provider);
            for method in provider.supported_methods() {
                let mut reason = None;
                if let (Some(phone), Some(operator)) =
                    (&phone, operator_for_provider(provider))
                {
                    if phone.operator != operator {
                        reason = Some(format!(
                            "Phone number is not a {} number",
                            provider.display_name()
                        ));
                    }
                }
                if reason.is_none() {
                    if let Some(amount) = amount {
                        let check =
                            validate_amount_with(amount, &schedule, &self.config.cemac, false);
                        if !check.valid {
                            reason = check.reason;
                        }
                    }
                }
                options.push(PaymentMethodOption {
                    provider,
                    method: *method,
                    display_name: provider.display_name().to_string(),
                    available: reason.is_none(),
                    reason,
                    fees: amount
                        .filter(|a| *a > 0)
                        .map(|a| calculate_fees_with(a, &schedule, &self.config.cemac)),
                });
            }
        }
        Ok(options)
    }

    /// Probe every enabled provider concurrently, each bounded by the configured timeout.
    pub async fn provider_health(&self) -> HashMap<ProviderName, HealthCheck> {
        let timeout = self.config.health_check_timeout;
        let probes = self.providers.enabled().into_iter().filter_map(|name| {
            let provider = self.providers.get(name).ok()?;
            Some(async move { (name, probe(provider, timeout).await) })
        });
        futures::future::join_all(probes).await.into_iter().collect()
    }

    pub async fn provider_metrics(&self) -> Vec<ProviderMetrics> {
        let metrics = self.metrics.read().await;
        ProviderName::ALL
            .iter()
            .filter_map(|p| metrics.get(p).cloned())
            .collect()
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    async fn transaction_lock(&self, reference: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(reference.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop the map entry once the caller is done with it, unless another
    /// task still holds or waits on the same mutex.
    async fn release_lock(&self, reference: &str, lock: Arc<Mutex<()>>) {
        let mut locks = self.locks.lock().await;
        let idle = locks
            .get(reference)
            .is_some_and(|held| Arc::ptr_eq(held, &lock) && Arc::strong_count(&lock) == 2);
        if idle {
            locks.remove(reference);
        }
    }

    async fn annotate(
        &self,
        reference: &str,
        key: &str,
        value: serde_json::Value,
    ) -> PaymentResult<Transaction> {
        let mut current = self.get_transaction(reference).await?;
        if let Some(map) = current.metadata.as_object_mut() {
            map.insert(key.to_string(), value);
        }
        self.repository.save(&current).await?;
        Ok(current)
    }

    async fn record_metric(&self, provider: ProviderName, success: bool) {
        let mut metrics = self.metrics.write().await;
        let entry = metrics
            .entry(provider)
            .or_insert_with(|| ProviderMetrics::new(provider));
        if success {
            entry.record_success();
        } else {
            entry.record_failure();
        }
    }

    async fn after_transition(&self, tx: &Transaction, previous: TransactionStatus, source: &str) {
        info!(
            correlation_id = %tx.correlation_id,
            reference = %tx.reference,
            provider = %tx.provider,
            from = %previous,
            to = %tx.status,
            source = source,
            "transaction status changed"
        );
        self.activity
            .record(
                ActivityEntry::new(
                    ActivityAction::StatusChanged,
                    Some(&tx.reference),
                    serde_json::json!({
                        "from": previous,
                        "to": tx.status,
                        "source": source,
                        "reason": tx.failure_reason,
                    }),
                )
                .with_correlation_id(&tx.correlation_id),
            )
            .await;

        let notification = match tx.status {
            TransactionStatus::Completed => Some(NotificationType::PaymentCompleted),
            TransactionStatus::Failed => Some(NotificationType::PaymentFailed),
            TransactionStatus::Cancelled => Some(NotificationType::PaymentCancelled),
            TransactionStatus::Pending | TransactionStatus::Processing => None,
        };
        if let Some(kind) = notification {
            if tx.kind == TransactionKind::Payment {
                self.notifications.notify(tx, kind);
            }
        }
    }
}

async fn probe(provider: Arc<dyn PaymentProvider>, timeout: Duration) -> HealthCheck {
    match tokio::time::timeout(timeout, provider.health_check()).await {
        Ok(check) => check,
        Err(_) => HealthCheck::unhealthy(format!(
            "health check timed out after {}s",
            timeout.as_secs()
        )),
    }
}

/// Mobile money needs a payer number on the provider's own network; cash
/// accepts an optional contact number.
fn resolve_phone(request: &PaymentRequest) -> PaymentResult<Option<PhoneNumberInfo>> {
    let raw = request
        .phone_number
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty());

    let Some(raw) = raw else {
        if request.provider.is_mobile_money() {
            return Err(PaymentError::validation(
                "phoneNumber is required for mobile money payments",
                "phoneNumber",
            ));
        }
        return Ok(None);
    };

    let info = validate_and_format_phone_number(raw)
        .ok_or_else(|| PaymentError::validation("Invalid phone number format", "phoneNumber"))?;

    if let Some(operator) = operator_for_provider(request.provider) {
        if info.operator != operator {
            return Err(PaymentError::validation(
                format!(
                    "Phone number is not a {} number",
                    request.provider.display_name()
                ),
                "phoneNumber",
            ));
        }
    }
    Ok(Some(info))
}

fn ensure_open(transaction: &Transaction) -> PaymentResult<()> {
    if transaction.status.is_terminal() {
        return Err(PaymentError::InvalidState {
            message: format!(
                "transaction {} is already {}",
                transaction.reference, transaction.status
            ),
        });
    }
    Ok(())
}

fn not_found(reference: &str) -> PaymentError {
    PaymentError::NotFound {
        resource: "Transaction".to_string(),
        id: reference.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::transaction_repository::InMemoryTransactionRepository;
    use crate::fraud::FraudConfig;
    use crate::payments::providers::CashProvider;

    const KEY: &str = "0123456789abcdef0123456789abcdef";

    fn orchestrator(repo: Arc<InMemoryTransactionRepository>) -> PaymentOrchestrator {
        let registry = ProviderRegistry::new().with(Arc::new(CashProvider::default()));
        PaymentOrchestrator::new(
            registry,
            repo,
            Arc::new(FraudEngine::new(FraudConfig {
                local_environment: true,
                ..FraudConfig::default()
            })),
            DataCipher::new(KEY).expect("cipher"),
            OrchestratorConfig {
                retry: RetryPolicy::immediate(3),
                ..OrchestratorConfig::default()
            },
        )
    }

    fn cash_request(method: PaymentMethod) -> PaymentRequest {
        PaymentRequest {
            order_id: "ORD-77".to_string(),
            customer_id: "cust-77".to_string(),
            amount: 15_000,
            currency: "XAF".to_string(),
            provider: ProviderName::Cash,
            method,
            phone_number: Some("677123456".to_string()),
            merchant_id: None,
            description: "Delivery".to_string(),
            metadata: None,
        }
    }

    fn context() -> RequestContext {
        RequestContext {
            user_agent: Some("Mozilla/5.0 (Linux; Android 13)".to_string()),
            ..RequestContext::default()
        }
    }

    #[tokio::test]
    async fn cash_payment_is_persisted_with_fee_breakdown() {
        let repo = Arc::new(InMemoryTransactionRepository::new());
        let orch = orchestrator(repo.clone());

        let response = orch
            .initiate_payment(cash_request(PaymentMethod::CashOnDelivery), context())
            .await
            .expect("accepted");
        let stored = orch.get_transaction(&response.reference).await.expect("stored");

        assert_eq!(stored.status, TransactionStatus::Pending);
        assert_eq!(stored.fees, 100);
        assert_eq!(stored.taxes, 19);
        assert_eq!(stored.commission, 375);
        assert_eq!(stored.retry_count, 0);
        assert_eq!(stored.phone_number.as_deref(), Some("*********3456"));
        assert!(stored.settlement_date.is_some());
        let encrypted = stored.phone_number_encrypted.expect("encrypted phone");
        assert_eq!(
            DataCipher::new(KEY).expect("cipher").decrypt(&encrypted).expect("decrypt"),
            "+237677123456"
        );
    }

    #[tokio::test]
    async fn cash_confirmation_completes_and_blocks_further_changes() {
        let repo = Arc::new(InMemoryTransactionRepository::new());
        let orch = orchestrator(repo);
        let response = orch
            .initiate_payment(cash_request(PaymentMethod::CashPickup), context())
            .await
            .expect("accepted");

        let confirmed = orch
            .confirm_cash_payment(&response.reference, Some("agent-4"))
            .await
            .expect("confirmed");
        assert_eq!(confirmed.status, TransactionStatus::Completed);
        assert_eq!(confirmed.metadata["confirmedBy"], "agent-4");

        let err = orch.cancel_payment(&response.reference).await.unwrap_err();
        assert!(matches!(err, PaymentError::InvalidState { .. }));
    }

    #[tokio::test]
    async fn refunds_cannot_exceed_the_original_amount() {
        let repo = Arc::new(InMemoryTransactionRepository::new());
        let orch = orchestrator(repo.clone());
        let response = orch
            .initiate_payment(cash_request(PaymentMethod::CashOnDelivery), context())
            .await
            .expect("accepted");

        let early = orch
            .refund(RefundRequest {
                transaction_reference: response.reference.clone(),
                amount: None,
                reason: "changed mind".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(early, PaymentError::InvalidState { .. }));

        orch.confirm_cash_payment(&response.reference, None)
            .await
            .expect("confirmed");

        let partial = orch
            .refund(RefundRequest {
                transaction_reference: response.reference.clone(),
                amount: Some(5_000),
                reason: "damaged item".to_string(),
            })
            .await
            .expect("refunded");
        assert_eq!(partial.amount, 5_000);
        assert_eq!(partial.transaction_reference, response.reference);

        let too_much = orch
            .refund(RefundRequest {
                transaction_reference: response.reference.clone(),
                amount: Some(10_001),
                reason: "again".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(too_much, PaymentError::ValidationError { .. }));

        let refunds = repo.find_refunds(&response.reference).await.expect("refunds");
        assert_eq!(refunds.len(), 1);
        assert_eq!(refunds[0].kind, TransactionKind::Refund);
        assert_eq!(
            orch.get_transaction(&response.reference)
                .await
                .expect("original")
                .refunded_amount,
            5_000
        );
    }

    #[tokio::test]
    async fn mobile_money_without_phone_is_rejected() {
        let repo = Arc::new(InMemoryTransactionRepository::new());
        let orch = orchestrator(repo.clone());
        let mut request = cash_request(PaymentMethod::MobileMoney);
        request.provider = ProviderName::Mtn;
        request.phone_number = None;

        let err = orch.initiate_payment(request, context()).await.unwrap_err();
        assert!(matches!(err, PaymentError::ValidationError { .. }));
        assert!(repo.is_empty().await);
    }

    #[test]
    fn method_listing_flags_incompatible_amounts() {
        let repo = Arc::new(InMemoryTransactionRepository::new());
        let orch = orchestrator(repo);
        let options = orch
            .available_payment_methods(None, Some(600_000))
            .expect("options");
        assert_eq!(options.len(), 2);
        assert!(options.iter().all(|o| !o.available));
        assert_eq!(
            options[0].reason.as_deref(),
            Some("Amount exceeds maximum limit of 500,000 XAF")
        );
    }

    #[test]
    fn metrics_success_rate_defaults_to_one() {
        let mut metrics = ProviderMetrics::new(ProviderName::Mtn);
        assert_eq!(metrics.success_rate(), 1.0);
        metrics.record_success();
        metrics.record_failure();
        assert_eq!(metrics.success_rate(), 0.5);
    }
}
