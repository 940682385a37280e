//! Independent scoring rules. Each rule is a pure function of the request and
//! its context; the engine sums their (capped) scores.

use crate::fraud::{FraudConfig, RequestContext};
use crate::helpers::phone::{operator_for_provider, PhoneNumberInfo};
use crate::helpers::user_agent::{is_bot_user_agent, parse_user_agent, DeviceKind};
use crate::payments::types::PaymentRequest;
use chrono::{DateTime, Datelike, FixedOffset, Timelike, Utc, Weekday};
use std::net::IpAddr;
use thiserror::Error;

pub const MAX_RULE_SCORE: u8 = 30;

pub const BOT_USER_AGENT_REASON: &str = "Suspicious user agent detected (bot/crawler signature)";

/// West Africa Time, used for the unusual-hours window.
const WAT_OFFSET_SECS: i32 = 3600;

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("rule misconfigured: {0}")]
    Misconfigured(String),
    #[error("rule evaluation failed: {0}")]
    Evaluation(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleOutcome {
    pub score: u8,
    pub reasons: Vec<String>,
}

impl RuleOutcome {
    fn add(&mut self, points: u32, reason: impl Into<String>) {
        let total = u32::from(self.score) + points;
        self.score = total.min(u32::from(MAX_RULE_SCORE)) as u8;
        self.reasons.push(reason.into());
    }
}

pub struct RuleInput<'a> {
    pub request: &'a PaymentRequest,
    pub phone: Option<&'a PhoneNumberInfo>,
    pub context: &'a RequestContext,
    pub config: &'a FraudConfig,
    pub now: DateTime<Utc>,
}

pub type Rule = fn(&RuleInput<'_>) -> Result<RuleOutcome, RuleError>;

pub fn default_rules() -> Vec<(&'static str, Rule)> {
    vec![
        ("amount_threshold", amount_threshold as Rule),
        ("operator_mismatch", operator_mismatch),
        ("velocity", velocity),
        ("customer_behavior", customer_behavior),
        ("device", device),
        ("ip_address", ip_address),
        ("temporal", temporal),
    ]
}

pub fn amount_threshold(input: &RuleInput<'_>) -> Result<RuleOutcome, RuleError> {
    let ceiling = input.config.max_single_transaction_amount;
    if ceiling <= 0 {
        return Err(RuleError::Misconfigured(
            "single transaction ceiling must be positive".to_string(),
        ));
    }

    let amount = input.request.amount;
    let mut outcome = RuleOutcome::default();
    if amount > ceiling {
        outcome.add(
            u32::from(MAX_RULE_SCORE),
            format!(
                "Transaction amount ({}) exceeds single transaction threshold",
                amount
            ),
        );
    } else {
        outcome.score = (amount.max(0).saturating_mul(20) / ceiling).min(20) as u8;
    }

    if amount > input.config.max_daily_amount {
        outcome.add(0, "Transaction amount exceeds daily limit");
    }
    Ok(outcome)
}

pub fn operator_mismatch(input: &RuleInput<'_>) -> Result<RuleOutcome, RuleError> {
    let mut outcome = RuleOutcome::default();
    let (Some(expected), Some(phone)) = (operator_for_provider(input.request.provider), input.phone)
    else {
        return Ok(outcome);
    };
    if phone.operator != expected {
        outcome.add(30, "Phone number operator mismatch with payment provider");
    }
    Ok(outcome)
}

pub fn velocity(input: &RuleInput<'_>) -> Result<RuleOutcome, RuleError> {
    let recent = &input.context.recent_activity;
    let mut outcome = RuleOutcome::default();

    if recent.transactions_last_24h > input.config.velocity_check_threshold {
        outcome.add(
            25,
            format!(
                "High transaction velocity: {} in 24h",
                recent.transactions_last_24h
            ),
        );
    }
    if recent.transactions_last_hour > 5 {
        outcome.add(
            20,
            format!(
                "Very high transaction velocity: {} in 1h",
                recent.transactions_last_hour
            ),
        );
    }
    if recent.failed_attempts_last_24h > 3 {
        outcome.add(
            15,
            format!(
                "Multiple failed attempts: {} in 24h",
                recent.failed_attempts_last_24h
            ),
        );
    }
    if recent.amount_last_24h.saturating_add(input.request.amount) > input.config.max_daily_amount {
        outcome.add(10, "Daily amount velocity exceeded");
    }
    Ok(outcome)
}

pub fn customer_behavior(input: &RuleInput<'_>) -> Result<RuleOutcome, RuleError> {
    let history = &input.context.customer_history;
    let amount = input.request.amount;
    let mut outcome = RuleOutcome::default();

    if history.total_transactions < 3 && amount > 100_000 {
        outcome.add(20, "New customer attempting large transaction");
    }

    if history.total_transactions > 0 {
        let failure_rate =
            f64::from(history.failed_transactions) / f64::from(history.total_transactions);
        if failure_rate > 0.3 {
            outcome.add(
                15,
                format!(
                    "High transaction failure rate: {:.1}%",
                    failure_rate * 100.0
                ),
            );
        }
    }

    if history.average_amount > 0 && amount > history.average_amount.saturating_mul(3) {
        outcome.add(
            10,
            "Transaction amount significantly deviates from customer average",
        );
    }
    Ok(outcome)
}

pub fn device(input: &RuleInput<'_>) -> Result<RuleOutcome, RuleError> {
    let mut outcome = RuleOutcome::default();
    let Some(user_agent) = input
        .context
        .user_agent
        .as_deref()
        .filter(|ua| !ua.trim().is_empty())
    else {
        outcome.add(5, "Missing user agent");
        return Ok(outcome);
    };

    if is_bot_user_agent(user_agent) {
        outcome.add(25, BOT_USER_AGENT_REASON);
    }

    let info = parse_user_agent(user_agent);
    let desktop_fingerprint = input
        .context
        .device_platform
        .as_deref()
        .map(|p| matches!(p.to_lowercase().as_str(), "desktop" | "windows" | "mac" | "linux"))
        .unwrap_or(false);
    if info.device == DeviceKind::Mobile && desktop_fingerprint {
        outcome.add(15, "Device type inconsistency detected");
    }
    Ok(outcome)
}

pub fn ip_address(input: &RuleInput<'_>) -> Result<RuleOutcome, RuleError> {
    let mut outcome = RuleOutcome::default();
    let Some(raw) = input.context.ip_address.as_deref() else {
        return Ok(outcome);
    };

    if input.config.blocked_ips.iter().any(|ip| ip == raw) {
        outcome.add(30, "IP address is blacklisted");
    }

    if !input.config.local_environment {
        let internal = match raw.parse::<IpAddr>() {
            Ok(IpAddr::V4(v4)) => v4.is_loopback() || v4.is_private() || v4.is_link_local(),
            Ok(IpAddr::V6(v6)) => v6.is_loopback(),
            Err(_) => false,
        };
        if internal {
            outcome.add(5, "Request from private or loopback IP address");
        }
    }
    Ok(outcome)
}

pub fn temporal(input: &RuleInput<'_>) -> Result<RuleOutcome, RuleError> {
    let offset = FixedOffset::east_opt(WAT_OFFSET_SECS)
        .ok_or_else(|| RuleError::Evaluation("invalid timezone offset".to_string()))?;
    let local = input.now.with_timezone(&offset);
    let mut outcome = RuleOutcome::default();

    if (1..6).contains(&local.hour()) {
        outcome.add(10, "Transaction during unusual hours");
    }
    if matches!(local.weekday(), Weekday::Sat | Weekday::Sun) && input.request.amount > 500_000 {
        outcome.add(5, "Large weekend transaction");
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fraud::{CustomerHistory, RecentActivity};
    use crate::helpers::phone::validate_and_format_phone_number;
    use crate::payments::types::{PaymentMethod, ProviderName};
    use chrono::TimeZone;

    fn request(amount: i64, provider: ProviderName) -> PaymentRequest {
        PaymentRequest {
            order_id: "ORD-1".to_string(),
            customer_id: "cust-1".to_string(),
            amount,
            currency: "XAF".to_string(),
            provider,
            method: PaymentMethod::MobileMoney,
            phone_number: Some("677123456".to_string()),
            merchant_id: None,
            description: String::new(),
            metadata: None,
        }
    }

    // Wednesday 14:00 WAT.
    fn midday() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 12, 13, 0, 0).unwrap()
    }

    fn evaluate(rule: Rule, request: &PaymentRequest, context: &RequestContext) -> RuleOutcome {
        let config = FraudConfig::default();
        let phone = request
            .phone_number
            .as_deref()
            .and_then(validate_and_format_phone_number);
        rule(&RuleInput {
            request,
            phone: phone.as_ref(),
            context,
            config: &config,
            now: context.timestamp.unwrap_or_else(midday),
        })
        .expect("rule evaluates")
    }

    #[test]
    fn amount_scales_until_the_ceiling() {
        let ctx = RequestContext::default();
        assert_eq!(evaluate(amount_threshold, &request(10_000, ProviderName::Mtn), &ctx).score, 0);
        assert_eq!(evaluate(amount_threshold, &request(500_000, ProviderName::Mtn), &ctx).score, 10);

        let over = evaluate(amount_threshold, &request(2_000_000, ProviderName::Mtn), &ctx);
        assert_eq!(over.score, 30);
        assert!(over.reasons[0].contains("exceeds single transaction threshold"));
    }

    #[test]
    fn mismatched_operator_scores_thirty() {
        let ctx = RequestContext::default();
        let outcome = evaluate(operator_mismatch, &request(10_000, ProviderName::Orange), &ctx);
        assert_eq!(outcome.score, 30);
        let outcome = evaluate(operator_mismatch, &request(10_000, ProviderName::Cash), &ctx);
        assert_eq!(outcome.score, 0);
    }

    #[test]
    fn velocity_signals_are_capped() {
        let ctx = RequestContext {
            recent_activity: RecentActivity {
                transactions_last_24h: 40,
                transactions_last_hour: 12,
                failed_attempts_last_24h: 9,
                amount_last_24h: 9_000_000,
            },
            ..RequestContext::default()
        };
        let outcome = evaluate(velocity, &request(10_000, ProviderName::Mtn), &ctx);
        assert_eq!(outcome.score, MAX_RULE_SCORE);
        assert_eq!(outcome.reasons.len(), 4);
    }

    #[test]
    fn new_customers_with_large_amounts_are_flagged() {
        let ctx = RequestContext {
            customer_history: CustomerHistory {
                total_transactions: 1,
                failed_transactions: 1,
                average_amount: 5_000,
            },
            ..RequestContext::default()
        };
        let outcome = evaluate(customer_behavior, &request(200_000, ProviderName::Mtn), &ctx);
        assert_eq!(outcome.score, 30);
        assert!(outcome
            .reasons
            .iter()
            .any(|r| r == "New customer attempting large transaction"));
    }

    #[test]
    fn bot_user_agents_and_fingerprint_mismatch() {
        let ctx = RequestContext {
            user_agent: Some("Googlebot/2.1 (+http://www.google.com/bot.html)".to_string()),
            ..RequestContext::default()
        };
        let outcome = evaluate(device, &request(10_000, ProviderName::Mtn), &ctx);
        assert_eq!(outcome.score, 25);
        assert_eq!(outcome.reasons, vec![BOT_USER_AGENT_REASON.to_string()]);

        let ctx = RequestContext {
            user_agent: Some("Mozilla/5.0 (Linux; Android 13) Mobile Safari/537.36".to_string()),
            device_platform: Some("desktop".to_string()),
            ..RequestContext::default()
        };
        assert_eq!(evaluate(device, &request(10_000, ProviderName::Mtn), &ctx).score, 15);
    }

    #[test]
    fn blocked_ips_and_loopback() {
        let ctx = RequestContext {
            ip_address: Some("127.0.0.1".to_string()),
            ..RequestContext::default()
        };
        let outcome = evaluate(ip_address, &request(10_000, ProviderName::Mtn), &ctx);
        assert_eq!(outcome.score, 5);
    }

    #[test]
    fn night_and_weekend_windows() {
        // 03:00 WAT on a Saturday.
        let ctx = RequestContext {
            timestamp: Some(Utc.with_ymd_and_hms(2024, 6, 15, 2, 0, 0).unwrap()),
            ..RequestContext::default()
        };
        let outcome = evaluate(temporal, &request(600_000, ProviderName::Mtn), &ctx);
        assert_eq!(outcome.score, 15);

        let ctx = RequestContext::default();
        assert_eq!(evaluate(temporal, &request(600_000, ProviderName::Mtn), &ctx).score, 0);
    }

    #[test]
    fn extreme_amounts_saturate_instead_of_overflowing() {
        let ctx = RequestContext {
            recent_activity: RecentActivity {
                amount_last_24h: 1,
                ..RecentActivity::default()
            },
            customer_history: CustomerHistory {
                total_transactions: 10,
                failed_transactions: 0,
                average_amount: i64::MAX / 2,
            },
            ..RequestContext::default()
        };
        let huge = request(i64::MAX, ProviderName::Mtn);
        for rule in default_rules().into_iter().map(|(_, rule)| rule) {
            let outcome = evaluate(rule, &huge, &ctx);
            assert!(outcome.score <= MAX_RULE_SCORE);
        }
        assert_eq!(evaluate(velocity, &huge, &ctx).score, 10);
        assert_eq!(evaluate(amount_threshold, &huge, &ctx).score, 30);
    }

    #[test]
    fn zero_ceiling_is_a_rule_error() {
        let config = FraudConfig {
            max_single_transaction_amount: 0,
            ..FraudConfig::default()
        };
        let req = request(10_000, ProviderName::Mtn);
        let ctx = RequestContext::default();
        let result = amount_threshold(&RuleInput {
            request: &req,
            phone: None,
            context: &ctx,
            config: &config,
            now: midday(),
        });
        assert!(result.is_err());
    }
}
