//! Health check module
//! Provides health status for the service and the payment networks it depends on

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use crate::services::payment_orchestrator::PaymentOrchestrator;
use crate::services::ussd::UssdService;

/// Health status response
#[derive(Debug, Serialize, Clone)]
pub struct HealthStatus {
    pub status: HealthState,
    pub checks: HashMap<String, ComponentHealth>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Overall health state
#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Individual component health status
#[derive(Debug, Serialize, Clone)]
pub struct ComponentHealth {
    pub status: ComponentState,
    pub response_time_ms: Option<u128>,
    pub details: Option<serde_json::Value>,
}

/// Component state
#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
pub enum ComponentState {
    Up,
    Down,
}

impl Default for HealthStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthStatus {
    pub fn new() -> Self {
        Self {
            status: HealthState::Healthy,
            checks: HashMap::new(),
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self.status, HealthState::Healthy)
    }
}

impl ComponentHealth {
    pub fn up(response_time_ms: Option<u128>, details: Option<serde_json::Value>) -> Self {
        Self {
            status: ComponentState::Up,
            response_time_ms,
            details,
        }
    }

    pub fn down(details: Option<serde_json::Value>) -> Self {
        Self {
            status: ComponentState::Down,
            response_time_ms: None,
            details,
        }
    }
}

/// One provider down degrades the service; all of them down makes it unhealthy.
pub fn overall_state<'a>(providers: impl IntoIterator<Item = &'a ComponentHealth>) -> HealthState {
    let (mut up, mut total) = (0usize, 0usize);
    for component in providers {
        total += 1;
        if component.status == ComponentState::Up {
            up += 1;
        }
    }
    match (up, total) {
        (_, 0) => HealthState::Unhealthy,
        (up, total) if up == total => HealthState::Healthy,
        (0, _) => HealthState::Unhealthy,
        _ => HealthState::Degraded,
    }
}

/// Health checker for the application
#[derive(Clone)]
pub struct HealthChecker {
    orchestrator: Arc<PaymentOrchestrator>,
    ussd: Arc<UssdService>,
}

impl HealthChecker {
    pub fn new(orchestrator: Arc<PaymentOrchestrator>, ussd: Arc<UssdService>) -> Self {
        Self { orchestrator, ussd }
    }

    /// Probe every enabled provider (each bounded by the orchestrator's
    /// timeout) and report USSD session load.
    pub async fn check_health(&self) -> HealthStatus {
        let mut health_status = HealthStatus::new();

        let started = Instant::now();
        let providers = self.orchestrator.provider_health().await;
        let elapsed = started.elapsed().as_millis();

        let mut provider_components = Vec::with_capacity(providers.len());
        for (name, check) in providers {
            let component = if check.is_healthy() {
                info!(provider = %name, "Provider health check: OK");
                ComponentHealth::up(Some(elapsed), check.details)
            } else {
                warn!(provider = %name, details = ?check.details, "Provider health check failed");
                ComponentHealth::down(check.details)
            };
            provider_components.push(component.clone());
            health_status
                .checks
                .insert(format!("provider:{}", name), component);
        }

        let ussd = self.ussd.statistics().await;
        health_status.checks.insert(
            "ussd".to_string(),
            ComponentHealth::up(
                None,
                Some(serde_json::json!({ "activeSessions": ussd.active_sessions })),
            ),
        );

        health_status.status = overall_state(provider_components.iter());
        health_status
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_health_status_creation() {
        let health_status = HealthStatus::new();
        assert!(matches!(health_status.status, HealthState::Healthy));
        assert!(health_status.checks.is_empty());
        assert!(health_status.timestamp <= chrono::Utc::now());
    }

    #[test]
    fn test_overall_state_from_providers() {
        let up = ComponentHealth::up(Some(12), None);
        let down = ComponentHealth::down(Some(serde_json::json!({ "error": "timeout" })));

        assert_eq!(overall_state([&up, &up]), HealthState::Healthy);
        assert_eq!(overall_state([&up, &down]), HealthState::Degraded);
        assert_eq!(overall_state([&down, &down]), HealthState::Unhealthy);
        assert_eq!(overall_state(std::iter::empty()), HealthState::Unhealthy);
    }
}
