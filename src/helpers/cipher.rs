//! Symmetric encryption for phone numbers and secrets at rest (AES-256-GCM).

use crate::payments::error::{PaymentError, PaymentResult};
use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use sha2::{Digest, Sha256};

pub const MIN_KEY_LENGTH: usize = 32;
const NONCE_LEN: usize = 12;

#[derive(Clone)]
pub struct DataCipher {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for DataCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataCipher").finish_non_exhaustive()
    }
}

impl DataCipher {
    /// The 256-bit key is the SHA-256 of the configured secret.
    pub fn new(secret: &str) -> PaymentResult<Self> {
        if secret.len() < MIN_KEY_LENGTH {
            return Err(PaymentError::ConfigurationError {
                message: format!(
                    "ENCRYPTION_KEY must be at least {} characters",
                    MIN_KEY_LENGTH
                ),
            });
        }
        let key = Sha256::digest(secret.as_bytes());
        let cipher =
            Aes256Gcm::new_from_slice(&key).map_err(|e| PaymentError::ConfigurationError {
                message: format!("invalid encryption key: {}", e),
            })?;
        Ok(Self { cipher })
    }

    /// Output is hex(nonce || ciphertext || tag); a fresh nonce is drawn per call.
    pub fn encrypt(&self, plaintext: &str) -> PaymentResult<String> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| PaymentError::StorageError {
                message: "encryption failed".to_string(),
            })?;
        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(nonce.as_slice());
        out.extend_from_slice(&ciphertext);
        Ok(hex::encode(out))
    }

    pub fn decrypt(&self, encoded: &str) -> PaymentResult<String> {
        let bytes = hex::decode(encoded).map_err(|_| PaymentError::StorageError {
            message: "ciphertext is not valid hex".to_string(),
        })?;
        if bytes.len() <= NONCE_LEN {
            return Err(PaymentError::StorageError {
                message: "ciphertext too short".to_string(),
            });
        }
        let (nonce, body) = bytes.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), body)
            .map_err(|_| PaymentError::StorageError {
                message: "decryption failed".to_string(),
            })?;
        String::from_utf8(plaintext).map_err(|_| PaymentError::StorageError {
            message: "decrypted data is not UTF-8".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "0123456789abcdef0123456789abcdef";

    #[test]
    fn rejects_short_keys() {
        assert!(matches!(
            DataCipher::new("short"),
            Err(PaymentError::ConfigurationError { .. })
        ));
    }

    #[test]
    fn decrypts_what_it_encrypts_with_random_nonces() {
        let cipher = DataCipher::new(KEY).expect("valid key");
        let a = cipher.encrypt("+237677123456").expect("encrypt");
        let b = cipher.encrypt("+237677123456").expect("encrypt");
        assert_ne!(a, b);
        assert_eq!(cipher.decrypt(&a).expect("decrypt"), "+237677123456");
    }

    #[test]
    fn tampering_and_wrong_keys_are_detected() {
        let cipher = DataCipher::new(KEY).expect("valid key");
        let mut encoded = cipher.encrypt("secret").expect("encrypt");
        let last = encoded.pop().expect("non-empty");
        encoded.push(if last == '0' { '1' } else { '0' });
        assert!(cipher.decrypt(&encoded).is_err());

        let other = DataCipher::new("ffffffffffffffffffffffffffffffffff").expect("valid key");
        let encoded = cipher.encrypt("secret").expect("encrypt");
        assert!(other.decrypt(&encoded).is_err());
        assert!(cipher.decrypt("zz").is_err());
    }
}
