use crate::helpers::phone::validate_and_format_phone_number;
use crate::payments::error::{PaymentError, PaymentResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ListEntry {
    pub phone_number: String,
    pub reason: String,
    pub added_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListKind {
    Black,
    White,
}

#[derive(Debug, Default)]
struct Lists {
    blacklist: HashMap<String, ListEntry>,
    whitelist: HashMap<String, ListEntry>,
}

/// Phone-keyed blacklist and whitelist. Both live behind one lock so a number
/// moves between lists atomically and is never on both.
#[derive(Debug, Default)]
pub struct PhoneLists {
    inner: RwLock<Lists>,
}

fn normalize(phone: &str) -> PaymentResult<String> {
    validate_and_format_phone_number(phone)
        .map(|info| info.formatted)
        .ok_or_else(|| PaymentError::validation("Invalid phone number format", "phoneNumber"))
}

impl PhoneLists {
    pub fn new() -> Self {
        Self::default()
    }

    async fn upsert(&self, kind: ListKind, phone: &str, reason: &str) -> PaymentResult<ListEntry> {
        let key = normalize(phone)?;
        let entry = ListEntry {
            phone_number: key.clone(),
            reason: reason.to_string(),
            added_at: Utc::now(),
        };

        let mut guard = self.inner.write().await;
        let lists = &mut *guard;
        let (target, other) = match kind {
            ListKind::Black => (&mut lists.blacklist, &mut lists.whitelist),
            ListKind::White => (&mut lists.whitelist, &mut lists.blacklist),
        };
        other.remove(&key);
        target.insert(key, entry.clone());
        Ok(entry)
    }

    pub async fn blacklist(&self, phone: &str, reason: &str) -> PaymentResult<ListEntry> {
        self.upsert(ListKind::Black, phone, reason).await
    }

    pub async fn whitelist(&self, phone: &str, reason: &str) -> PaymentResult<ListEntry> {
        self.upsert(ListKind::White, phone, reason).await
    }

    pub async fn remove_from_blacklist(&self, phone: &str) -> PaymentResult<bool> {
        let key = normalize(phone)?;
        Ok(self.inner.write().await.blacklist.remove(&key).is_some())
    }

    pub async fn remove_from_whitelist(&self, phone: &str) -> PaymentResult<bool> {
        let key = normalize(phone)?;
        Ok(self.inner.write().await.whitelist.remove(&key).is_some())
    }

    /// Malformed numbers are never listed.
    pub async fn is_blacklisted(&self, phone: &str) -> bool {
        match normalize(phone) {
            Ok(key) => self.inner.read().await.blacklist.contains_key(&key),
            Err(_) => false,
        }
    }

    pub async fn is_whitelisted(&self, phone: &str) -> bool {
        match normalize(phone) {
            Ok(key) => self.inner.read().await.whitelist.contains_key(&key),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lookups_ignore_number_formatting() {
        let lists = PhoneLists::new();
        lists
            .blacklist("+237 677 123 456", "chargeback")
            .await
            .expect("valid number");
        assert!(lists.is_blacklisted("677123456").await);
        assert!(lists.is_blacklisted("00237677123456").await);
        assert!(!lists.is_whitelisted("677123456").await);
    }

    #[tokio::test]
    async fn malformed_numbers_are_rejected_before_mutation() {
        let lists = PhoneLists::new();
        let err = lists.whitelist("12345", "vip").await.unwrap_err();
        assert!(matches!(err, PaymentError::ValidationError { .. }));
        assert!(!lists.is_whitelisted("12345").await);
    }

    #[tokio::test]
    async fn moving_between_lists_is_exclusive() {
        let lists = PhoneLists::new();
        lists.whitelist("691234567", "vip").await.expect("whitelisted");
        lists.blacklist("691234567", "fraud ring").await.expect("blacklisted");
        assert!(lists.is_blacklisted("691234567").await);
        assert!(!lists.is_whitelisted("691234567").await);

        assert!(lists.remove_from_blacklist("691234567").await.expect("valid"));
        assert!(!lists.remove_from_blacklist("691234567").await.expect("valid"));
    }
}
