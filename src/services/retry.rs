use crate::payments::error::PaymentResult;
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Fixed,
    Exponential,
}

impl FromStr for Backoff {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "fixed" => Ok(Backoff::Fixed),
            "exponential" => Ok(Backoff::Exponential),
            other => Err(format!("unknown backoff strategy: {}", other)),
        }
    }
}

/// `max_attempts` counts every call, the first one included.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(2_000),
            max_delay: Duration::from_secs(30),
            backoff: Backoff::Exponential,
        }
    }
}

#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub result: PaymentResult<T>,
    pub attempts: u32,
}

impl RetryPolicy {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_attempts: std::env::var("PAYMENT_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse::<u32>().ok())
                .map(|v| v.max(1))
                .unwrap_or(defaults.max_attempts),
            initial_delay: std::env::var("PAYMENT_RETRY_DELAY_MS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.initial_delay),
            max_delay: std::env::var("PAYMENT_RETRY_MAX_DELAY_MS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.max_delay),
            backoff: std::env::var("PAYMENT_RETRY_BACKOFF")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.backoff),
        }
    }

    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff: Backoff::Fixed,
        }
    }

    /// Delay before attempt `attempt + 1`, where `attempt` is 1-based.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let delay = match self.backoff {
            Backoff::Fixed => self.initial_delay,
            Backoff::Exponential => {
                let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
                self.initial_delay.saturating_mul(factor)
            }
        };
        delay.min(self.max_delay)
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempt budget is spent.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> RetryOutcome<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = PaymentResult<T>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op(attempt).await {
                Ok(value) => {
                    return RetryOutcome {
                        result: Ok(value),
                        attempts: attempt,
                    }
                }
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    let delay = self.delay_after(attempt);
                    warn!(
                        operation = operation,
                        attempt = attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    return RetryOutcome {
                        result: Err(e),
                        attempts: attempt,
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::error::PaymentError;
    use crate::payments::types::ProviderName;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn network() -> PaymentError {
        PaymentError::NetworkError {
            provider: ProviderName::Mtn,
            message: "connection refused".to_string(),
        }
    }

    #[test]
    fn exponential_delays_are_capped() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(5),
            backoff: Backoff::Exponential,
        };
        assert_eq!(policy.delay_after(1), Duration::from_secs(2));
        assert_eq!(policy.delay_after(2), Duration::from_secs(4));
        assert_eq!(policy.delay_after(3), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_use_the_whole_budget() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let outcome: RetryOutcome<()> = RetryPolicy::default()
            .run("request_to_pay", |_| async move {
                let calls = counter;
                calls.fetch_add(1, Ordering::SeqCst);
                Err(network())
            })
            .await;
        assert_eq!(outcome.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(matches!(outcome.result, Err(PaymentError::NetworkError { .. })));
    }

    #[tokio::test]
    async fn definitive_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let outcome: RetryOutcome<()> = RetryPolicy::immediate(3)
            .run("request_to_pay", |_| async move {
                let calls = counter;
                calls.fetch_add(1, Ordering::SeqCst);
                Err(PaymentError::provider(ProviderName::Mtn, "INVALID_REQUEST", "bad payer"))
            })
            .await;
        assert_eq!(outcome.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn recovers_after_a_transient_failure() {
        let outcome = RetryPolicy::immediate(3)
            .run("request_to_pay", |attempt| async move {
                if attempt == 1 {
                    Err(network())
                } else {
                    Ok(attempt)
                }
            })
            .await;
        assert_eq!(outcome.result.ok(), Some(2));
        assert_eq!(outcome.attempts, 2);
    }
}
