use crate::fraud::{FraudAssessment, RiskLevel};
use crate::payments::error::PaymentError;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::str::FromStr;
use tokio::sync::RwLock;

pub const DEFAULT_AUDIT_CAPACITY: usize = 10_000;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StatisticsPeriod {
    Day,
    Week,
    Month,
}

impl StatisticsPeriod {
    pub fn window(&self) -> Duration {
        match self {
            StatisticsPeriod::Day => Duration::days(1),
            StatisticsPeriod::Week => Duration::weeks(1),
            StatisticsPeriod::Month => Duration::days(30),
        }
    }
}

impl FromStr for StatisticsPeriod {
    type Err = PaymentError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "day" => Ok(StatisticsPeriod::Day),
            "week" => Ok(StatisticsPeriod::Week),
            "month" => Ok(StatisticsPeriod::Month),
            _ => Err(PaymentError::validation(
                format!("unsupported statistics period: {}", value),
                "period",
            )),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub struct RiskDistribution {
    pub low: u64,
    pub medium: u64,
    pub high: u64,
    pub critical: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FraudStatistics {
    pub period: StatisticsPeriod,
    pub total_transactions: u64,
    pub blocked_transactions: u64,
    /// Percentage of blocked assessments, 0-100.
    pub fraud_rate: f64,
    pub risk_distribution: RiskDistribution,
}

#[derive(Debug, Clone)]
struct AuditRecord {
    at: DateTime<Utc>,
    risk_level: RiskLevel,
    blocked: bool,
}

/// Bounded ring of recent assessments; the oldest record is evicted first.
#[derive(Debug)]
pub struct AssessmentAudit {
    records: RwLock<VecDeque<AuditRecord>>,
    capacity: usize,
}

impl Default for AssessmentAudit {
    fn default() -> Self {
        Self::new(DEFAULT_AUDIT_CAPACITY)
    }
}

impl AssessmentAudit {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: RwLock::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity: capacity.max(1),
        }
    }

    pub async fn record(&self, assessment: &FraudAssessment) {
        let mut records = self.records.write().await;
        if records.len() >= self.capacity {
            records.pop_front();
        }
        records.push_back(AuditRecord {
            at: assessment.assessed_at,
            risk_level: assessment.risk_level,
            blocked: assessment.blocked,
        });
    }

    pub async fn statistics(&self, period: StatisticsPeriod) -> FraudStatistics {
        let since = Utc::now() - period.window();
        let records = self.records.read().await;

        let mut total = 0u64;
        let mut blocked = 0u64;
        let mut distribution = RiskDistribution::default();
        for record in records.iter().filter(|r| r.at >= since) {
            total += 1;
            if record.blocked {
                blocked += 1;
            }
            match record.risk_level {
                RiskLevel::Low => distribution.low += 1,
                RiskLevel::Medium => distribution.medium += 1,
                RiskLevel::High => distribution.high += 1,
                RiskLevel::Critical => distribution.critical += 1,
            }
        }

        let fraud_rate = if total == 0 {
            0.0
        } else {
            blocked as f64 / total as f64 * 100.0
        };

        FraudStatistics {
            period,
            total_transactions: total,
            blocked_transactions: blocked,
            fraud_rate,
            risk_distribution: distribution,
        }
    }
}
