//! Fee, tax and limit arithmetic for XAF amounts.
//!
//! XAF is a zero-decimal currency: every intermediate value is computed as a
//! `Decimal` and only rounded (half away from zero) when it becomes a charge.

use crate::payments::types::ProviderName;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// Per-provider limits and fee schedule, in whole francs.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderSchedule {
    pub min_amount: i64,
    pub max_amount: i64,
    pub fixed_fee: i64,
    /// Percentage of the amount, e.g. `1.5` for 1.5 %.
    pub percentage: Decimal,
    pub max_fee: Option<i64>,
}

impl ProviderSchedule {
    pub fn for_provider(provider: ProviderName) -> Self {
        match provider {
            ProviderName::Mtn | ProviderName::Orange => Self {
                min_amount: 500,
                max_amount: 1_000_000,
                fixed_fee: 0,
                percentage: Decimal::new(15, 1),
                max_fee: Some(5_000),
            },
            ProviderName::Cash => Self {
                min_amount: 500,
                max_amount: 500_000,
                fixed_fee: 100,
                percentage: Decimal::ZERO,
                max_fee: Some(100),
            },
        }
    }
}

/// Regulatory ceilings for the CEMAC zone.
#[derive(Debug, Clone, PartialEq)]
pub struct CemacLimits {
    pub enabled: bool,
    pub transaction_limit: i64,
    pub daily_limit: i64,
    pub monthly_limit: i64,
    pub kyc_threshold: i64,
    /// VAT applied to fees.
    pub vat_rate: Decimal,
    pub commission_rate: Decimal,
}

impl Default for CemacLimits {
    fn default() -> Self {
        Self {
            enabled: true,
            transaction_limit: 5_000_000,
            daily_limit: 2_000_000,
            monthly_limit: 10_000_000,
            kyc_threshold: 1_000_000,
            vat_rate: Decimal::new(1925, 4),
            commission_rate: Decimal::new(25, 3),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FeeBreakdown {
    pub fees: i64,
    pub taxes: i64,
    pub net_amount: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AmountValidation {
    pub valid: bool,
    pub reason: Option<String>,
}

impl AmountValidation {
    fn ok() -> Self {
        Self {
            valid: true,
            reason: None,
        }
    }

    fn rejected(reason: String) -> Self {
        Self {
            valid: false,
            reason: Some(reason),
        }
    }
}

pub fn round_half_up(value: Decimal) -> i64 {
    value
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .unwrap_or(i64::MAX)
}

pub fn calculate_payment_fees(amount: i64, provider: ProviderName) -> FeeBreakdown {
    calculate_fees_with(
        amount,
        &ProviderSchedule::for_provider(provider),
        &CemacLimits::default(),
    )
}

pub fn calculate_fees_with(
    amount: i64,
    schedule: &ProviderSchedule,
    cemac: &CemacLimits,
) -> FeeBreakdown {
    let amount = Decimal::from(amount);
    let mut variable = amount * schedule.percentage / Decimal::ONE_HUNDRED;
    if let Some(cap) = schedule.max_fee {
        variable = variable.min(Decimal::from(cap));
    }
    let fees = Decimal::from(schedule.fixed_fee) + variable;
    let taxes = fees * cemac.vat_rate;
    let net = amount + fees + taxes;

    FeeBreakdown {
        fees: round_half_up(fees),
        taxes: round_half_up(taxes),
        net_amount: round_half_up(net),
    }
}

pub fn calculate_merchant_commission(amount: i64) -> i64 {
    round_half_up(Decimal::from(amount) * CemacLimits::default().commission_rate)
}

pub fn validate_amount(amount: i64, provider: ProviderName, is_daily: bool) -> AmountValidation {
    validate_amount_with(
        amount,
        &ProviderSchedule::for_provider(provider),
        &CemacLimits::default(),
        is_daily,
    )
}

pub fn validate_amount_with(
    amount: i64,
    schedule: &ProviderSchedule,
    cemac: &CemacLimits,
    is_daily: bool,
) -> AmountValidation {
    if amount < schedule.min_amount {
        return AmountValidation::rejected(format!(
            "Amount below minimum limit of {}",
            format_currency(schedule.min_amount)
        ));
    }
    if amount > schedule.max_amount {
        return AmountValidation::rejected(format!(
            "Amount exceeds maximum limit of {}",
            format_currency(schedule.max_amount)
        ));
    }
    if cemac.enabled {
        if amount > cemac.transaction_limit {
            return AmountValidation::rejected(format!(
                "Amount exceeds CEMAC transaction limit of {}",
                format_currency(cemac.transaction_limit)
            ));
        }
        if is_daily && amount > cemac.daily_limit {
            return AmountValidation::rejected(format!(
                "Amount exceeds CEMAC daily limit of {}",
                format_currency(cemac.daily_limit)
            ));
        }
    }
    AmountValidation::ok()
}

/// `1234567` -> `"1,234,567 XAF"`.
pub fn format_currency(amount: i64) -> String {
    let digits = amount.unsigned_abs().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    let sign = if amount < 0 { "-" } else { "" };
    format!("{}{} XAF", sign, grouped)
}
