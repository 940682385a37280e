use crate::payments::types::{ProviderName, DEFAULT_CURRENCY};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::Rng;
use serde::{Deserialize, Serialize};

const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

fn to_base36(mut value: u64) -> String {
    if value == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while value > 0 {
        out.push(BASE36[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

fn random_base36(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| BASE36[rng.gen_range(0..BASE36.len())] as char)
        .collect()
}

/// `OKD-<TAG>-<orderId>-<base36 millis>-<random>`, upper-cased.
pub fn generate_transaction_reference(provider: ProviderName, order_id: &str) -> String {
    let millis = chrono::Utc::now().timestamp_millis().max(0) as u64;
    format!(
        "OKD-{}-{}-{}-{}",
        provider.reference_tag(),
        order_id,
        to_base36(millis),
        random_base36(6)
    )
    .to_uppercase()
}

/// Uniform 8-digit code for cash pickups.
pub fn generate_payment_code() -> String {
    rand::thread_rng()
        .gen_range(10_000_000..=99_999_999_u32)
        .to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QrPaymentData {
    pub provider: ProviderName,
    pub amount: i64,
    pub currency: String,
    pub reference: String,
    pub timestamp: i64,
}

pub fn generate_qr_code_data(provider: ProviderName, amount: i64, reference: &str) -> String {
    let data = QrPaymentData {
        provider,
        amount,
        currency: DEFAULT_CURRENCY.to_string(),
        reference: reference.to_string(),
        timestamp: chrono::Utc::now().timestamp_millis(),
    };
    let json = serde_json::to_vec(&data).unwrap_or_default();
    BASE64.encode(json)
}

pub fn parse_qr_code_data(encoded: &str) -> Option<QrPaymentData> {
    let bytes = BASE64.decode(encoded.trim()).ok()?;
    serde_json::from_slice(&bytes).ok()
}
