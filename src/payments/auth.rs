//! Per-client bearer token cache with single-flight refresh.
//!
//! Readers take the fast path under a read lock. When the token is missing or
//! inside the expiry buffer, callers queue on `refresh`; the first one fetches
//! and the rest re-check and reuse its result.

use crate::payments::error::PaymentResult;
use std::future::Future;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::debug;

pub const DEFAULT_EXPIRY_BUFFER: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct AccessToken {
    pub value: String,
    pub expires_at: Instant,
}

impl AccessToken {
    pub fn new(value: impl Into<String>, expires_in: Duration) -> Self {
        Self {
            value: value.into(),
            expires_at: Instant::now() + expires_in,
        }
    }
}

#[derive(Debug)]
pub struct TokenCache {
    current: RwLock<Option<AccessToken>>,
    refresh: Mutex<()>,
    buffer: Duration,
}

impl Default for TokenCache {
    fn default() -> Self {
        Self::new(DEFAULT_EXPIRY_BUFFER)
    }
}

impl TokenCache {
    pub fn new(buffer: Duration) -> Self {
        Self {
            current: RwLock::new(None),
            refresh: Mutex::new(()),
            buffer,
        }
    }

    async fn fresh(&self) -> Option<String> {
        let guard = self.current.read().await;
        guard
            .as_ref()
            .filter(|t| Instant::now() + self.buffer < t.expires_at)
            .map(|t| t.value.clone())
    }

    pub async fn get_or_refresh<F, Fut>(&self, fetch: F) -> PaymentResult<String>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = PaymentResult<AccessToken>>,
    {
        if let Some(token) = self.fresh().await {
            return Ok(token);
        }

        let _flight = self.refresh.lock().await;
        if let Some(token) = self.fresh().await {
            return Ok(token);
        }

        debug!("access token missing or near expiry, refreshing");
        let token = fetch().await?;
        let value = token.value.clone();
        *self.current.write().await = Some(token);
        Ok(value)
    }

    /// Drop the cached token, e.g. after a 401 from the provider.
    pub async fn invalidate(&self) {
        *self.current.write().await = None;
    }

    pub async fn is_valid(&self) -> bool {
        self.fresh().await.is_some()
    }
}
