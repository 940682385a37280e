//! Cameroonian phone number parsing and operator classification.

use crate::payments::types::ProviderName;
use serde::{Deserialize, Serialize};

pub const COUNTRY_CODE: &str = "+237";
const COUNTRY_DIGITS: &str = "237";
const NATIONAL_LENGTH: usize = 9;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operator {
    Mtn,
    Orange,
    Unknown,
}

impl Operator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Mtn => "MTN",
            Operator::Orange => "ORANGE",
            Operator::Unknown => "UNKNOWN",
        }
    }
}

impl std::fmt::Display for Operator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PhoneNumberInfo {
    pub formatted: String,
    pub country_code: String,
    pub national_number: String,
    pub operator: Operator,
}

impl PhoneNumberInfo {
    /// MSISDN without the leading `+`, as MTN expects it.
    pub fn msisdn(&self) -> String {
        format!("{}{}", COUNTRY_DIGITS, self.national_number)
    }
}

/// Operator ranges keyed on the first three national digits.
fn classify(national: &str) -> Option<Operator> {
    let prefix: u16 = national.get(..3)?.parse().ok()?;
    let operator = match prefix {
        650..=654 | 670..=679 | 680..=684 => Operator::Mtn,
        655..=659 | 690..=699 => Operator::Orange,
        600..=699 | 233..=239 => Operator::Unknown,
        _ => return None,
    };
    Some(operator)
}

/// Returns `None` for anything that is not a 9-digit Cameroonian number.
pub fn validate_and_format_phone_number(raw: &str) -> Option<PhoneNumberInfo> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();

    let national = if digits.len() == NATIONAL_LENGTH {
        digits.as_str()
    } else if let Some(rest) = digits.strip_prefix("00237") {
        rest
    } else if let Some(rest) = digits.strip_prefix(COUNTRY_DIGITS) {
        rest
    } else {
        return None;
    };

    if national.len() != NATIONAL_LENGTH {
        return None;
    }

    let operator = classify(national)?;
    Some(PhoneNumberInfo {
        formatted: format!("{}{}", COUNTRY_CODE, national),
        country_code: COUNTRY_CODE.to_string(),
        national_number: national.to_string(),
        operator,
    })
}

pub fn is_phone_number_compatible(phone: &str, provider: ProviderName) -> bool {
    let Some(info) = validate_and_format_phone_number(phone) else {
        return false;
    };
    match provider {
        ProviderName::Mtn => info.operator == Operator::Mtn,
        ProviderName::Orange => info.operator == Operator::Orange,
        ProviderName::Cash => true,
    }
}

pub fn operator_for_provider(provider: ProviderName) -> Option<Operator> {
    match provider {
        ProviderName::Mtn => Some(Operator::Mtn),
        ProviderName::Orange => Some(Operator::Orange),
        ProviderName::Cash => None,
    }
}
