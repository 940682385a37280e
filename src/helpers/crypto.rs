use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// Hex-encoded HMAC-SHA256 of the raw payload bytes.
pub fn generate_webhook_signature(payload: &[u8], secret: &str) -> String {
    // HMAC accepts keys of any length, so construction cannot fail.
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

pub fn verify_webhook_signature(payload: &[u8], signature: &str, secret: &str) -> bool {
    if secret.is_empty() {
        return false;
    }
    let expected = generate_webhook_signature(payload, secret);
    let provided = signature.trim();
    let provided = provided.strip_prefix("sha256=").unwrap_or(provided);
    secure_eq(expected.as_bytes(), provided.to_ascii_lowercase().as_bytes())
}

pub fn secure_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter()
        .zip(b.iter())
        .fold(0_u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

/// One-way SHA-256 hex digest, used to index phone numbers without storing them in clear.
pub fn hash_data(data: &str) -> String {
    hex::encode(Sha256::digest(data.as_bytes()))
}

pub fn mask_sensitive_data(data: &str, visible_chars: usize) -> String {
    let len = data.chars().count();
    if len <= visible_chars {
        return data.to_string();
    }
    let visible: String = data.chars().skip(len - visible_chars).collect();
    format!("{}{}", "*".repeat(len - visible_chars), visible)
}

pub fn mask_phone(phone: &str) -> String {
    mask_sensitive_data(phone, 4)
}

pub fn generate_secure_random_string(bytes: usize) -> String {
    let mut buf = vec![0_u8; bytes];
    rand::thread_rng().fill_bytes(&mut buf);
    hex::encode(buf)
}

/// `okd-<unix millis>-<16 hex chars>`.
pub fn generate_correlation_id() -> String {
    format!(
        "okd-{}-{}",
        chrono::Utc::now().timestamp_millis(),
        generate_secure_random_string(8)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secure_eq_behaves_correctly() {
        assert!(secure_eq(b"abc", b"abc"));
        assert!(!secure_eq(b"abc", b"abd"));
        assert!(!secure_eq(b"abc", b"ab"));
    }

    #[test]
    fn generated_signature_verifies() {
        let payload = br#"{"status":"SUCCESSFUL","externalId":"ORD-1"}"#;
        let signature = generate_webhook_signature(payload, "whsec");
        assert_eq!(signature.len(), 64);
        assert!(verify_webhook_signature(payload, &signature, "whsec"));
        assert!(verify_webhook_signature(
            payload,
            &format!("sha256={}", signature.to_uppercase()),
            "whsec"
        ));
    }

    #[test]
    fn any_single_byte_mutation_breaks_verification() {
        let payload = br#"{"status":"SUCCESSFUL"}"#.to_vec();
        let signature = generate_webhook_signature(&payload, "whsec");

        for i in 0..payload.len() {
            let mut mutated = payload.clone();
            mutated[i] ^= 0x01;
            assert!(!verify_webhook_signature(&mutated, &signature, "whsec"));
        }

        let mut sig_bytes = signature.clone().into_bytes();
        for i in 0..sig_bytes.len() {
            let original = sig_bytes[i];
            sig_bytes[i] = if original == b'0' { b'1' } else { b'0' };
            let mutated = String::from_utf8(sig_bytes.clone()).expect("ascii");
            assert!(!verify_webhook_signature(&payload, &mutated, "whsec"));
            sig_bytes[i] = original;
        }
    }

    #[test]
    fn empty_secret_never_verifies() {
        let signature = generate_webhook_signature(b"{}", "");
        assert!(!verify_webhook_signature(b"{}", &signature, ""));
    }

    #[test]
    fn masking_keeps_trailing_characters() {
        assert_eq!(mask_sensitive_data("+237677123456", 4), "*********3456");
        assert_eq!(mask_sensitive_data("123", 4), "123");
        assert_eq!(mask_phone("677123456"), "*****3456");
    }

    #[test]
    fn correlation_ids_have_expected_shape() {
        let id = generate_correlation_id();
        let parts: Vec<&str> = id.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "okd");
        assert!(parts[1].parse::<i64>().is_ok());
        assert_eq!(parts[2].len(), 16);
        assert_ne!(id, generate_correlation_id());
    }

    #[test]
    fn hash_is_stable_hex() {
        assert_eq!(hash_data("677123456"), hash_data("677123456"));
        assert_eq!(hash_data("abc").len(), 64);
    }
}
