//! Rule-based fraud scoring that runs before any money moves.
//!
//! The engine consults the phone lists, then evaluates each rule in
//! [`rules::default_rules`] independently and sums their capped scores. Blocking
//! has three independent triggers: the score threshold, a CRITICAL level, and
//! explicit blacklist/bot reasons.

pub mod lists;
pub mod rules;
pub mod stats;

use crate::helpers::crypto::mask_phone;
use crate::helpers::phone::validate_and_format_phone_number;
use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::types::PaymentRequest;
use chrono::{DateTime, Utc};
use lists::{ListEntry, PhoneLists};
use rules::{Rule, RuleInput, MAX_RULE_SCORE};
use serde::{Deserialize, Serialize};
use stats::{AssessmentAudit, FraudStatistics, StatisticsPeriod};
use tracing::{debug, error, warn};

pub const DEGRADED_REASON: &str = "Fraud detection service temporarily unavailable";
pub const BLACKLISTED_REASON: &str = "blacklisted";

#[derive(Debug, Clone)]
pub struct FraudConfig {
    pub enabled: bool,
    pub risk_score_threshold: u8,
    pub max_single_transaction_amount: i64,
    pub velocity_check_threshold: u32,
    pub max_daily_amount: i64,
    pub blocked_ips: Vec<String>,
    /// Private and loopback addresses are expected in local environments.
    pub local_environment: bool,
}

impl Default for FraudConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            risk_score_threshold: 75,
            max_single_transaction_amount: 1_000_000,
            velocity_check_threshold: 10,
            max_daily_amount: 5_000_000,
            blocked_ips: Vec::new(),
            local_environment: false,
        }
    }
}

impl FraudConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let parse = |name: &str| std::env::var(name).ok().map(|v| v.trim().to_string());

        Self {
            enabled: parse("FRAUD_DETECTION_ENABLED")
                .map(|v| v != "false")
                .unwrap_or(defaults.enabled),
            risk_score_threshold: parse("RISK_SCORE_THRESHOLD")
                .and_then(|v| v.parse::<u8>().ok())
                .map(|v| v.min(100))
                .unwrap_or(defaults.risk_score_threshold),
            max_single_transaction_amount: parse("MAX_SINGLE_TRANSACTION_AMOUNT")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_single_transaction_amount),
            velocity_check_threshold: parse("VELOCITY_CHECK_THRESHOLD")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.velocity_check_threshold),
            max_daily_amount: parse("MAX_DAILY_AMOUNT")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_daily_amount),
            blocked_ips: parse("BLOCKED_IP_ADDRESSES")
                .map(|v| {
                    v.split(',')
                        .map(|ip| ip.trim().to_string())
                        .filter(|ip| !ip.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
            local_environment: matches!(
                parse("APP_ENV").as_deref(),
                Some("local") | Some("development") | Some("test")
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn from_score(score: u8) -> Self {
        match score {
            80..=u8::MAX => RiskLevel::Critical,
            60..=79 => RiskLevel::High,
            30..=59 => RiskLevel::Medium,
            _ => RiskLevel::Low,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "LOW",
            RiskLevel::Medium => "MEDIUM",
            RiskLevel::High => "HIGH",
            RiskLevel::Critical => "CRITICAL",
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FraudAssessment {
    pub score: u8,
    pub risk_level: RiskLevel,
    pub blocked: bool,
    pub reasons: Vec<String>,
    pub recommendations: Vec<String>,
    pub assessed_at: DateTime<Utc>,
}

impl FraudAssessment {
    fn scored(score: u8, reasons: Vec<String>, threshold: u8) -> Self {
        let risk_level = RiskLevel::from_score(score);
        let flagged = reasons.iter().any(|r| {
            let r = r.to_lowercase();
            r.contains("blacklist") || r.contains("bot") || r.contains("crawler")
        });
        let blocked = score >= threshold || risk_level == RiskLevel::Critical || flagged;
        Self {
            score,
            risk_level,
            blocked,
            recommendations: recommendations(risk_level, &reasons),
            reasons,
            assessed_at: Utc::now(),
        }
    }

    fn pass_through() -> Self {
        Self {
            score: 0,
            risk_level: RiskLevel::Low,
            blocked: false,
            reasons: Vec::new(),
            recommendations: Vec::new(),
            assessed_at: Utc::now(),
        }
    }

    fn degraded() -> Self {
        Self {
            score: 50,
            risk_level: RiskLevel::Medium,
            blocked: false,
            reasons: vec![DEGRADED_REASON.to_string()],
            recommendations: vec!["Manual review recommended".to_string()],
            assessed_at: Utc::now(),
        }
    }
}

fn recommendations(level: RiskLevel, reasons: &[String]) -> Vec<String> {
    let base: &[&str] = match level {
        RiskLevel::Critical => &[
            "Block transaction immediately",
            "Investigate customer account",
            "Contact customer for verification",
        ],
        RiskLevel::High => &[
            "Require additional verification",
            "Manual review required",
            "Consider temporary account restrictions",
        ],
        RiskLevel::Medium => &[
            "Enhanced monitoring",
            "Consider SMS verification",
            "Review customer history",
        ],
        RiskLevel::Low => &["Standard processing", "Continue monitoring"],
    };
    let mut out: Vec<String> = base.iter().map(|s| s.to_string()).collect();

    let mentions = |needle: &str| reasons.iter().any(|r| r.to_lowercase().contains(needle));
    if mentions("blacklisted") {
        out.push("Verify customer identity immediately".to_string());
    }
    if mentions("velocity") {
        out.push("Implement cooling-off period".to_string());
    }
    if mentions("amount") {
        out.push("Verify transaction legitimacy".to_string());
    }
    out
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CustomerHistory {
    pub total_transactions: u32,
    pub failed_transactions: u32,
    pub average_amount: i64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RecentActivity {
    pub transactions_last_24h: u32,
    pub transactions_last_hour: u32,
    pub failed_attempts_last_24h: u32,
    pub amount_last_24h: i64,
}

/// Everything the rules know about a request beyond the payment itself.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestContext {
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
    /// Platform reported by the client's device fingerprint, e.g. `desktop`.
    pub device_platform: Option<String>,
    #[serde(default)]
    pub recent_activity: RecentActivity,
    #[serde(default)]
    pub customer_history: CustomerHistory,
    /// Evaluation time override; defaults to now.
    pub timestamp: Option<DateTime<Utc>>,
    /// Edge request id; becomes the transaction's correlation id when present.
    #[serde(default)]
    pub correlation_id: Option<String>,
}

pub struct FraudEngine {
    config: FraudConfig,
    rules: Vec<(&'static str, Rule)>,
    lists: PhoneLists,
    audit: AssessmentAudit,
}

impl FraudEngine {
    pub fn new(config: FraudConfig) -> Self {
        Self::with_rules(config, rules::default_rules())
    }

    pub fn with_rules(config: FraudConfig, rules: Vec<(&'static str, Rule)>) -> Self {
        Self {
            config,
            rules,
            lists: PhoneLists::new(),
            audit: AssessmentAudit::default(),
        }
    }

    pub fn config(&self) -> &FraudConfig {
        &self.config
    }

    pub async fn analyze_payment_risk(
        &self,
        request: &PaymentRequest,
        context: &RequestContext,
    ) -> FraudAssessment {
        if !self.config.enabled {
            return FraudAssessment::pass_through();
        }

        let phone = request
            .phone_number
            .as_deref()
            .and_then(validate_and_format_phone_number);

        if let Some(phone) = &phone {
            if self.lists.is_blacklisted(&phone.formatted).await {
                warn!(
                    security_event = true,
                    order_id = %request.order_id,
                    phone = %mask_phone(&phone.formatted),
                    "payment from blacklisted phone number"
                );
                let mut assessment =
                    FraudAssessment::scored(100, vec![BLACKLISTED_REASON.to_string()], 0);
                assessment.blocked = true;
                self.audit.record(&assessment).await;
                return assessment;
            }
            if self.lists.is_whitelisted(&phone.formatted).await {
                let assessment =
                    FraudAssessment::scored(0, Vec::new(), self.config.risk_score_threshold);
                self.audit.record(&assessment).await;
                return assessment;
            }
        }

        let input = RuleInput {
            request,
            phone: phone.as_ref(),
            context,
            config: &self.config,
            now: context.timestamp.unwrap_or_else(Utc::now),
        };

        let mut total: u32 = 0;
        let mut reasons = Vec::new();
        for (name, rule) in &self.rules {
            match rule(&input) {
                Ok(outcome) => {
                    debug!(rule = *name, score = outcome.score, "fraud rule evaluated");
                    total += u32::from(outcome.score.min(MAX_RULE_SCORE));
                    reasons.extend(outcome.reasons);
                }
                Err(e) => {
                    error!(
                        rule = *name,
                        error = %e,
                        order_id = %request.order_id,
                        "fraud rule failed, returning degraded assessment"
                    );
                    let assessment = FraudAssessment::degraded();
                    self.audit.record(&assessment).await;
                    return assessment;
                }
            }
        }

        let score = total.min(100) as u8;
        let assessment = FraudAssessment::scored(score, reasons, self.config.risk_score_threshold);
        if assessment.blocked {
            warn!(
                security_event = true,
                order_id = %request.order_id,
                customer_id = %request.customer_id,
                score = assessment.score,
                risk_level = %assessment.risk_level,
                reasons = ?assessment.reasons,
                "payment blocked by fraud engine"
            );
        } else {
            debug!(
                order_id = %request.order_id,
                score = assessment.score,
                risk_level = %assessment.risk_level,
                "fraud assessment completed"
            );
        }
        self.audit.record(&assessment).await;
        assessment
    }

    /// Like [`analyze_payment_risk`](Self::analyze_payment_risk) but turns a
    /// blocking decision into a `FraudError`.
    pub async fn screen(
        &self,
        request: &PaymentRequest,
        context: &RequestContext,
    ) -> PaymentResult<FraudAssessment> {
        let assessment = self.analyze_payment_risk(request, context).await;
        if assessment.blocked {
            return Err(PaymentError::FraudError {
                score: assessment.score,
                risk_level: assessment.risk_level,
                reasons: assessment.reasons,
            });
        }
        Ok(assessment)
    }

    pub async fn blacklist_phone_number(
        &self,
        phone: &str,
        reason: &str,
    ) -> PaymentResult<ListEntry> {
        let entry = self.lists.blacklist(phone, reason).await?;
        warn!(
            security_event = true,
            phone = %mask_phone(&entry.phone_number),
            reason = %reason,
            "phone number blacklisted"
        );
        Ok(entry)
    }

    pub async fn whitelist_phone_number(
        &self,
        phone: &str,
        reason: &str,
    ) -> PaymentResult<ListEntry> {
        self.lists.whitelist(phone, reason).await
    }

    pub async fn remove_from_blacklist(&self, phone: &str) -> PaymentResult<bool> {
        self.lists.remove_from_blacklist(phone).await
    }

    pub async fn remove_from_whitelist(&self, phone: &str) -> PaymentResult<bool> {
        self.lists.remove_from_whitelist(phone).await
    }

    pub async fn is_blacklisted(&self, phone: &str) -> bool {
        self.lists.is_blacklisted(phone).await
    }

    pub async fn is_whitelisted(&self, phone: &str) -> bool {
        self.lists.is_whitelisted(phone).await
    }

    pub async fn fraud_statistics(&self, period: StatisticsPeriod) -> FraudStatistics {
        self.audit.statistics(period).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::types::{PaymentMethod, ProviderName};
    use chrono::TimeZone;
    use rules::{RuleError, RuleOutcome};

    fn request(amount: i64, provider: ProviderName, phone: &str) -> PaymentRequest {
        PaymentRequest {
            order_id: "ORD-42".to_string(),
            customer_id: "cust-42".to_string(),
            amount,
            currency: "XAF".to_string(),
            provider,
            method: PaymentMethod::MobileMoney,
            phone_number: Some(phone.to_string()),
            merchant_id: None,
            description: String::new(),
            metadata: None,
        }
    }

    fn clean_context() -> RequestContext {
        RequestContext {
            user_agent: Some(
                "Mozilla/5.0 (Linux; Android 13) AppleWebKit/537.36 Chrome/120.0 Mobile Safari/537.36"
                    .to_string(),
            ),
            ip_address: Some("41.202.219.10".to_string()),
            device_platform: Some("android".to_string()),
            customer_history: CustomerHistory {
                total_transactions: 12,
                failed_transactions: 0,
                average_amount: 8_000,
            },
            // Wednesday 14:00 WAT.
            timestamp: Some(Utc.with_ymd_and_hms(2024, 6, 12, 13, 0, 0).unwrap()),
            ..RequestContext::default()
        }
    }

    #[test]
    fn risk_level_breakpoints() {
        assert_eq!(RiskLevel::from_score(0), RiskLevel::Low);
        assert_eq!(RiskLevel::from_score(29), RiskLevel::Low);
        assert_eq!(RiskLevel::from_score(30), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_score(60), RiskLevel::High);
        assert_eq!(RiskLevel::from_score(80), RiskLevel::Critical);
        assert_eq!(RiskLevel::from_score(100), RiskLevel::Critical);
    }

    #[tokio::test]
    async fn ordinary_payment_is_low_risk() {
        let engine = FraudEngine::new(FraudConfig::default());
        let assessment = engine
            .analyze_payment_risk(&request(10_000, ProviderName::Mtn, "677123456"), &clean_context())
            .await;
        assert_eq!(assessment.risk_level, RiskLevel::Low);
        assert!(!assessment.blocked);
        assert!(assessment
            .recommendations
            .contains(&"Standard processing".to_string()));
    }

    #[tokio::test]
    async fn stacked_signals_block_the_payment() {
        let engine = FraudEngine::new(FraudConfig::default());
        let context = RequestContext {
            user_agent: Some("python-requests/2.31 crawler".to_string()),
            ..clean_context()
        };
        let assessment = engine
            .analyze_payment_risk(
                &request(2_000_000, ProviderName::Orange, "677123456"),
                &context,
            )
            .await;
        assert!(assessment.blocked);
        assert!(assessment.score >= 75);
        assert!(assessment
            .reasons
            .iter()
            .any(|r| r == "Phone number operator mismatch with payment provider"));

        let err = engine
            .screen(&request(2_000_000, ProviderName::Orange, "677123456"), &context)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "FRAUD_DETECTED");
    }

    #[tokio::test]
    async fn bot_reason_blocks_even_at_moderate_score() {
        let engine = FraudEngine::new(FraudConfig::default());
        let context = RequestContext {
            user_agent: Some("Googlebot/2.1".to_string()),
            ..clean_context()
        };
        let assessment = engine
            .analyze_payment_risk(&request(10_000, ProviderName::Mtn, "677123456"), &context)
            .await;
        assert!(assessment.score < 75);
        assert!(assessment.blocked);
    }

    #[tokio::test]
    async fn adding_a_signal_never_lowers_the_score() {
        let engine = FraudEngine::new(FraudConfig::default());
        let base = engine
            .analyze_payment_risk(&request(900_000, ProviderName::Mtn, "677123456"), &clean_context())
            .await;
        let with_mismatch = engine
            .analyze_payment_risk(
                &request(900_000, ProviderName::Orange, "677123456"),
                &clean_context(),
            )
            .await;
        assert!(with_mismatch.score >= base.score);
    }

    #[tokio::test]
    async fn lists_short_circuit_scoring() {
        let engine = FraudEngine::new(FraudConfig::default());
        engine
            .blacklist_phone_number("677123456", "chargeback")
            .await
            .expect("valid number");
        let assessment = engine
            .analyze_payment_risk(&request(1_000, ProviderName::Mtn, "+237677123456"), &clean_context())
            .await;
        assert!(assessment.blocked);
        assert_eq!(assessment.reasons, vec![BLACKLISTED_REASON.to_string()]);

        engine
            .whitelist_phone_number("677123456", "verified merchant")
            .await
            .expect("valid number");
        let context = RequestContext {
            user_agent: Some("Googlebot".to_string()),
            ..clean_context()
        };
        let assessment = engine
            .analyze_payment_risk(&request(2_000_000, ProviderName::Orange, "677123456"), &context)
            .await;
        assert_eq!(assessment.score, 0);
        assert!(!assessment.blocked);
    }

    #[tokio::test]
    async fn kill_switch_passes_everything() {
        let engine = FraudEngine::new(FraudConfig {
            enabled: false,
            ..FraudConfig::default()
        });
        let assessment = engine
            .analyze_payment_risk(
                &request(2_000_000, ProviderName::Orange, "677123456"),
                &RequestContext::default(),
            )
            .await;
        assert_eq!(assessment.score, 0);
        assert!(!assessment.blocked);
    }

    #[tokio::test]
    async fn failing_rule_degrades_to_medium() {
        fn broken(_: &RuleInput<'_>) -> Result<RuleOutcome, RuleError> {
            Err(RuleError::Evaluation("history store offline".to_string()))
        }
        let engine = FraudEngine::with_rules(FraudConfig::default(), vec![("broken", broken as Rule)]);
        let assessment = engine
            .analyze_payment_risk(&request(10_000, ProviderName::Mtn, "677123456"), &clean_context())
            .await;
        assert_eq!(assessment.score, 50);
        assert_eq!(assessment.risk_level, RiskLevel::Medium);
        assert!(!assessment.blocked);
        assert_eq!(assessment.reasons, vec![DEGRADED_REASON.to_string()]);
    }

    #[tokio::test]
    async fn statistics_reflect_assessments() {
        let engine = FraudEngine::new(FraudConfig::default());
        let ctx = clean_context();
        engine
            .analyze_payment_risk(&request(10_000, ProviderName::Mtn, "677123456"), &ctx)
            .await;
        let bot = RequestContext {
            user_agent: Some("bot".to_string()),
            ..clean_context()
        };
        engine
            .analyze_payment_risk(&request(10_000, ProviderName::Mtn, "677123456"), &bot)
            .await;

        let stats = engine.fraud_statistics(StatisticsPeriod::Day).await;
        assert_eq!(stats.total_transactions, 2);
        assert_eq!(stats.blocked_transactions, 1);
    }
}
