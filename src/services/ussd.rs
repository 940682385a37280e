//! USSD fallback sessions for MTN and Orange payers.
//!
//! A session walks the payer through a short menu on their handset. Entering
//! a well-formed PIN only authorizes the charge: the linked transaction moves
//! to `PROCESSING` and its final status still comes from the provider.

use crate::helpers::crypto::{generate_secure_random_string, mask_phone};
use crate::helpers::fees::format_currency;
use crate::helpers::phone::{operator_for_provider, validate_and_format_phone_number};
use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::providers::{MTN_USSD_CODE, ORANGE_USSD_CODE};
use crate::payments::types::ProviderName;
use crate::services::payment_orchestrator::PaymentOrchestrator;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

const SESSION_TIMEOUT_SECS: i64 = 180;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UssdStep {
    Welcome,
    MainMenu,
    ConfirmAmount,
    EnterPin,
    Help,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UssdSession {
    pub session_id: String,
    /// Masked; the full number is never kept on the session.
    pub phone_number: String,
    pub provider: ProviderName,
    pub transaction_reference: Option<String>,
    pub amount: i64,
    pub current_step: UssdStep,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UssdSessionRequest {
    pub phone_number: String,
    pub provider: ProviderName,
    pub amount: Option<i64>,
    /// Existing transaction the session authorizes.
    pub reference: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UssdReply {
    pub message: String,
    pub end_session: bool,
}

impl UssdReply {
    fn next(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            end_session: false,
        }
    }

    fn end(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            end_session: true,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UssdSessionStarted {
    pub session: UssdSession,
    pub ussd_code: String,
    pub instructions: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UssdStatistics {
    pub active_sessions: usize,
    pub provider_breakdown: HashMap<ProviderName, usize>,
}

/// Localized menu texts; MTN sessions run in English, Orange in French.
struct Menu {
    welcome: &'static str,
    invalid_main: &'static str,
    help_main: &'static str,
    help: &'static str,
    cancelled: &'static str,
    enter_pin: &'static str,
    invalid_pin: &'static str,
    confirm_amount: fn(&str) -> String,
    invalid_confirm: fn(&str) -> String,
    authorized: fn(&str, &str) -> String,
    failed: &'static str,
}

static MTN_MENU: Menu = Menu {
    welcome: "Welcome to MTN Mobile Money Payment\n1. Continue Payment\n2. Help\n3. Cancel",
    invalid_main: "Invalid option. Please try again.\n1. Continue Payment\n2. Help\n3. Cancel",
    help_main: "For assistance:\n- Call 8080\n- Visit nearest MTN office\n- SMS HELP to 8080",
    help: "MTN Mobile Money Help:\n- Balance inquiry: *126*1#\n- Customer care: 8080\n- Nearest agent: *126*4#\n\n0. Back to main menu",
    cancelled: "Payment cancelled.",
    enter_pin: "Enter your MTN Mobile Money PIN:",
    invalid_pin: "Invalid PIN format. Please enter 4-digit PIN:",
    confirm_amount: |amount| format!("Confirm payment amount: {}\n1. Confirm\n2. Cancel", amount),
    invalid_confirm: |amount| {
        format!(
            "Invalid option. Confirm payment amount: {}\n1. Confirm\n2. Cancel",
            amount
        )
    },
    authorized: |amount, reference| {
        format!(
            "Payment authorized.\nAmount: {}\nReference: {}\nYou will receive a confirmation SMS.",
            amount, reference
        )
    },
    failed: "Payment failed. Please check your balance and try again.",
};

static ORANGE_MENU: Menu = Menu {
    welcome: "Bienvenue sur Orange Money\n1. Continuer le paiement\n2. Aide\n3. Annuler",
    invalid_main: "Option invalide. Réessayez.\n1. Continuer le paiement\n2. Aide\n3. Annuler",
    help_main: "Pour assistance:\n- Appelez #144#\n- Visitez une agence Orange\n- SMS AIDE au 8100",
    help: "Aide Orange Money:\n- Solde: #144*4#\n- Service client: #144#\n- Agent proche: #144*5#\n\n0. Retour au menu principal",
    cancelled: "Paiement annulé.",
    enter_pin: "Entrez votre code PIN Orange Money:",
    invalid_pin: "Format PIN invalide. Entrez un PIN à 4 chiffres:",
    confirm_amount: |amount| format!("Confirmer le montant: {}\n1. Confirmer\n2. Annuler", amount),
    invalid_confirm: |amount| {
        format!(
            "Option invalide. Confirmer le montant: {}\n1. Confirmer\n2. Annuler",
            amount
        )
    },
    authorized: |amount, reference| {
        format!(
            "Paiement autorisé.\nMontant: {}\nRéférence: {}\nVous recevrez un SMS de confirmation.",
            amount, reference
        )
    },
    failed: "Échec du paiement. Vérifiez votre solde et réessayez.",
};

fn menu_for(provider: ProviderName) -> &'static Menu {
    match provider {
        ProviderName::Orange => &ORANGE_MENU,
        ProviderName::Mtn | ProviderName::Cash => &MTN_MENU,
    }
}

pub fn ussd_code(provider: ProviderName) -> Option<&'static str> {
    match provider {
        ProviderName::Mtn => Some(MTN_USSD_CODE),
        ProviderName::Orange => Some(ORANGE_USSD_CODE),
        ProviderName::Cash => None,
    }
}

fn is_valid_pin(input: &str) -> bool {
    input.len() == 4 && input.chars().all(|c| c.is_ascii_digit())
}

pub struct UssdService {
    sessions: RwLock<HashMap<String, UssdSession>>,
    orchestrator: Arc<PaymentOrchestrator>,
    timeout: Duration,
}

impl UssdService {
    pub fn new(orchestrator: Arc<PaymentOrchestrator>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            orchestrator,
            timeout: Duration::seconds(SESSION_TIMEOUT_SECS),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn start_session(
        &self,
        request: UssdSessionRequest,
    ) -> PaymentResult<UssdSessionStarted> {
        let code = ussd_code(request.provider).ok_or_else(|| {
            PaymentError::validation("USSD is only available for mobile money", "provider")
        })?;

        let phone = validate_and_format_phone_number(&request.phone_number)
            .ok_or_else(|| PaymentError::validation("Invalid phone number format", "phoneNumber"))?;
        if operator_for_provider(request.provider) != Some(phone.operator) {
            return Err(PaymentError::validation(
                format!(
                    "Phone number operator {} not compatible with {}",
                    phone.operator,
                    request.provider.display_name()
                ),
                "phoneNumber",
            ));
        }

        let amount = match &request.reference {
            Some(reference) => {
                let transaction = self.orchestrator.get_transaction(reference).await?;
                if transaction.provider != request.provider || transaction.status.is_terminal() {
                    return Err(PaymentError::InvalidState {
                        message: format!("{} cannot be authorized over USSD", reference),
                    });
                }
                transaction.amount
            }
            None => request
                .amount
                .filter(|a| *a > 0)
                .ok_or_else(|| PaymentError::validation("amount is required", "amount"))?,
        };

        let now = Utc::now();
        let session = UssdSession {
            session_id: format!(
                "USSD-{}-{}",
                now.timestamp_millis(),
                generate_secure_random_string(8)
            ),
            phone_number: mask_phone(&phone.formatted),
            provider: request.provider,
            transaction_reference: request.reference,
            amount,
            current_step: UssdStep::Welcome,
            expires_at: now + self.timeout,
            created_at: now,
            updated_at: now,
        };

        self.sessions
            .write()
            .await
            .insert(session.session_id.clone(), session.clone());

        info!(
            session_id = %session.session_id,
            phone = %session.phone_number,
            provider = %session.provider,
            step = ?session.current_step,
            "ussd session started"
        );

        Ok(UssdSessionStarted {
            instructions: instructions(request.provider, code, amount, &session.session_id),
            ussd_code: code.to_string(),
            session,
        })
    }

    pub async fn process_input(&self, session_id: &str, input: &str) -> UssdReply {
        let mut sessions = self.sessions.write().await;
        let Some(session) = sessions.get_mut(session_id) else {
            return UssdReply::end("Session expired or invalid. Please start a new payment.");
        };
        if Utc::now() > session.expires_at {
            sessions.remove(session_id);
            return UssdReply::end("Session expired. Please start a new payment.");
        }

        let input = input.trim();
        if session.current_step == UssdStep::EnterPin && is_valid_pin(input) {
            // The session ends here either way; authorize without holding the map.
            let Some(session) = sessions.remove(session_id) else {
                return UssdReply::end("Session expired or invalid. Please start a new payment.");
            };
            drop(sessions);
            return self.authorize(session).await;
        }

        let menu = menu_for(session.provider);
        let amount = format_currency(session.amount);

        let (next, reply) = match session.current_step {
            UssdStep::Welcome => (Some(UssdStep::MainMenu), UssdReply::next(menu.welcome)),
            UssdStep::MainMenu => match input {
                "1" => (
                    Some(UssdStep::ConfirmAmount),
                    UssdReply::next((menu.confirm_amount)(&amount)),
                ),
                "2" => (Some(UssdStep::Help), UssdReply::next(menu.help_main)),
                "3" => (None, UssdReply::end(menu.cancelled)),
                _ => (None, UssdReply::next(menu.invalid_main)),
            },
            UssdStep::ConfirmAmount => match input {
                "1" => (Some(UssdStep::EnterPin), UssdReply::next(menu.enter_pin)),
                "2" => (None, UssdReply::end(menu.cancelled)),
                _ => (None, UssdReply::next((menu.invalid_confirm)(&amount))),
            },
            UssdStep::EnterPin => (None, UssdReply::next(menu.invalid_pin)),
            UssdStep::Help => match input {
                "0" => (Some(UssdStep::MainMenu), UssdReply::next(menu.welcome)),
                _ => (None, UssdReply::next(menu.help)),
            },
        };

        if let Some(step) = next {
            session.current_step = step;
        }
        session.updated_at = Utc::now();

        debug!(
            session_id = %session_id,
            phone = %session.phone_number,
            provider = %session.provider,
            step = ?session.current_step,
            "ussd input processed"
        );

        if reply.end_session {
            sessions.remove(session_id);
        }
        reply
    }

    async fn authorize(&self, session: UssdSession) -> UssdReply {
        let menu = menu_for(session.provider);
        let amount = format_currency(session.amount);
        let Some(linked) = &session.transaction_reference else {
            return UssdReply::end((menu.authorized)(&amount, &session.session_id));
        };

        match self.orchestrator.mark_processing(linked).await {
            Ok(_) => {
                info!(
                    session_id = %session.session_id,
                    reference = %linked,
                    provider = %session.provider,
                    "ussd payment authorized"
                );
                UssdReply::end((menu.authorized)(&amount, linked))
            }
            Err(e) => {
                warn!(
                    session_id = %session.session_id,
                    reference = %linked,
                    error = %e,
                    "ussd authorization could not be applied"
                );
                UssdReply::end(menu.failed)
            }
        }
    }

    pub async fn get_session(&self, session_id: &str) -> Option<UssdSession> {
        self.sessions.read().await.get(session_id).cloned()
    }

    pub async fn cancel_session(&self, session_id: &str) -> bool {
        match self.sessions.write().await.remove(session_id) {
            Some(session) => {
                info!(
                    session_id = %session_id,
                    phone = %session.phone_number,
                    provider = %session.provider,
                    step = ?session.current_step,
                    "ussd session cancelled"
                );
                true
            }
            None => false,
        }
    }

    /// Drop every session past its expiry; returns how many were removed.
    pub async fn cleanup_expired(&self, now: DateTime<Utc>) -> usize {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, s| s.expires_at >= now);
        let removed = before - sessions.len();
        if removed > 0 {
            info!(
                expired_count = removed,
                active_count = sessions.len(),
                "ussd session cleanup completed"
            );
        }
        removed
    }

    pub async fn statistics(&self) -> UssdStatistics {
        let sessions = self.sessions.read().await;
        let mut provider_breakdown = HashMap::new();
        for session in sessions.values() {
            *provider_breakdown.entry(session.provider).or_insert(0) += 1;
        }
        UssdStatistics {
            active_sessions: sessions.len(),
            provider_breakdown,
        }
    }
}

fn instructions(provider: ProviderName, code: &str, amount: i64, session_id: &str) -> String {
    let name = provider.display_name();
    let network = match provider {
        ProviderName::Orange => "Orange",
        _ => "MTN",
    };
    format!(
        "{name} USSD Payment Instructions:\n\n\
         1. Dial {code} from your {network} phone\n\
         2. Select \"Merchant Payment\" or \"Pay Bills\"\n\
         3. Enter merchant code when prompted\n\
         4. Enter amount: {amount}\n\
         5. Enter payment reference: {session_id}\n\
         6. Confirm with your {name} PIN\n\n\
         Session expires in 3 minutes.",
        amount = format_currency(amount),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::transaction_repository::tests::sample;
    use crate::database::transaction_repository::{
        InMemoryTransactionRepository, Transaction, TransactionRepository,
    };
    use crate::fraud::{CustomerHistory, FraudConfig, FraudEngine, RecentActivity};
    use crate::helpers::cipher::DataCipher;
    use crate::payments::factory::ProviderRegistry;
    use crate::payments::types::TransactionStatus;
    use crate::services::payment_orchestrator::OrchestratorConfig;
    use async_trait::async_trait;
    use uuid::Uuid;

    #[test]
    fn pins_must_be_four_digits() {
        assert!(is_valid_pin("1234"));
        assert!(!is_valid_pin("123"));
        assert!(!is_valid_pin("12a4"));
        assert!(!is_valid_pin("12345"));
    }

    #[test]
    fn menus_are_localized_per_provider() {
        assert!(menu_for(ProviderName::Mtn).welcome.starts_with("Welcome"));
        assert!(menu_for(ProviderName::Orange).welcome.starts_with("Bienvenue"));
        assert_eq!(
            (menu_for(ProviderName::Orange).confirm_amount)("5,000 XAF"),
            "Confirmer le montant: 5,000 XAF\n1. Confirmer\n2. Annuler"
        );
    }

    /// Delays every write so an in-flight authorization is observable.
    struct SlowWrites {
        inner: InMemoryTransactionRepository,
        delay: std::time::Duration,
    }

    #[async_trait]
    impl TransactionRepository for SlowWrites {
        async fn save(&self, transaction: &Transaction) -> PaymentResult<()> {
            tokio::time::sleep(self.delay).await;
            self.inner.save(transaction).await
        }
        async fn find_by_id(&self, id: Uuid) -> PaymentResult<Option<Transaction>> {
            self.inner.find_by_id(id).await
        }
        async fn find_by_reference(&self, reference: &str) -> PaymentResult<Option<Transaction>> {
            self.inner.find_by_reference(reference).await
        }
        async fn find_by_external_id(
            &self,
            external_id: &str,
        ) -> PaymentResult<Option<Transaction>> {
            self.inner.find_by_external_id(external_id).await
        }
        async fn find_refunds(&self, parent_reference: &str) -> PaymentResult<Vec<Transaction>> {
            self.inner.find_refunds(parent_reference).await
        }
        async fn reserve_refund(&self, reference: &str, amount: i64) -> PaymentResult<Transaction> {
            self.inner.reserve_refund(reference, amount).await
        }
        async fn release_refund(&self, reference: &str, amount: i64) -> PaymentResult<()> {
            self.inner.release_refund(reference, amount).await
        }
        async fn recent_activity(
            &self,
            customer_id: &str,
            now: DateTime<Utc>,
        ) -> PaymentResult<RecentActivity> {
            self.inner.recent_activity(customer_id, now).await
        }
        async fn customer_history(&self, customer_id: &str) -> PaymentResult<CustomerHistory> {
            self.inner.customer_history(customer_id).await
        }
    }

    async fn service_with_pending_payment(reference: &str) -> (Arc<UssdService>, Arc<PaymentOrchestrator>) {
        let inner = InMemoryTransactionRepository::new();
        inner
            .save(&sample(reference, "cust-1", 5_000))
            .await
            .expect("seeded");
        let repo = Arc::new(SlowWrites {
            inner,
            delay: std::time::Duration::from_millis(400),
        });
        let orchestrator = Arc::new(PaymentOrchestrator::new(
            ProviderRegistry::new(),
            repo,
            Arc::new(FraudEngine::new(FraudConfig::default())),
            DataCipher::new("0123456789abcdef0123456789abcdef").expect("cipher"),
            OrchestratorConfig::default(),
        ));
        (Arc::new(UssdService::new(orchestrator.clone())), orchestrator)
    }

    async fn start(ussd: &UssdService, reference: Option<&str>) -> String {
        ussd.start_session(UssdSessionRequest {
            phone_number: "677123456".to_string(),
            provider: ProviderName::Mtn,
            amount: Some(5_000),
            reference: reference.map(str::to_string),
        })
        .await
        .expect("session starts")
        .session
        .session_id
    }

    #[tokio::test]
    async fn authorization_does_not_stall_other_sessions() {
        let (ussd, orchestrator) = service_with_pending_payment("OKD-MTN-USSD-1").await;
        let linked = start(&ussd, Some("OKD-MTN-USSD-1")).await;
        let other = start(&ussd, None).await;
        for input in ["", "1", "1"] {
            assert!(!ussd.process_input(&linked, input).await.end_session);
        }

        let pin = tokio::spawn({
            let ussd = ussd.clone();
            let linked = linked.clone();
            async move { ussd.process_input(&linked, "1234").await }
        });
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let reply = tokio::time::timeout(
            std::time::Duration::from_millis(200),
            ussd.process_input(&other, ""),
        )
        .await
        .expect("other sessions are served while a PIN is being applied");
        assert!(reply.message.starts_with("Welcome"));
        assert!(ussd.get_session(&linked).await.is_none());

        let authorized = pin.await.expect("task joins");
        assert!(authorized.end_session);
        assert!(authorized.message.starts_with("Payment authorized."));
        assert_eq!(
            orchestrator
                .get_transaction("OKD-MTN-USSD-1")
                .await
                .expect("stored")
                .status,
            TransactionStatus::Processing
        );
    }

    #[test]
    fn instructions_mention_code_and_amount() {
        let text = instructions(ProviderName::Mtn, "*126#", 5_000, "USSD-1-ab");
        assert!(text.contains("Dial *126# from your MTN phone"));
        assert!(text.contains("Enter amount: 5,000 XAF"));
        assert!(text.contains("USSD-1-ab"));
    }
}
