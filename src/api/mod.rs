//! HTTP surface. Handlers stay thin: extract, call a service, wrap the result
//! in the response envelope.

pub mod fraud;
pub mod health;
pub mod payments;
pub mod ussd;
pub mod webhooks;

use std::sync::Arc;

use axum::{
    routing::{delete, get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use crate::health::HealthChecker;
use crate::middleware::logging::{request_logging_middleware, UuidRequestId};
use crate::services::payment_orchestrator::PaymentOrchestrator;
use crate::services::ussd::UssdService;
use crate::services::webhook_processor::WebhookProcessor;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<PaymentOrchestrator>,
    pub ussd: Arc<UssdService>,
    pub webhooks: Arc<WebhookProcessor>,
    pub health_checker: HealthChecker,
}

impl AppState {
    pub fn new(orchestrator: Arc<PaymentOrchestrator>, ussd: Arc<UssdService>) -> Self {
        Self {
            webhooks: Arc::new(WebhookProcessor::new(orchestrator.clone())),
            health_checker: HealthChecker::new(orchestrator.clone(), ussd.clone()),
            orchestrator,
            ussd,
        }
    }
}

/// Full application router with request-id propagation, tracing and request logging.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health::health))
        .route("/health/providers", get(health::provider_health))
        .route("/api/payments/initiate", post(payments::initiate_payment))
        .route("/api/payments/methods", get(payments::payment_methods))
        .route(
            "/api/payments/{reference}/status",
            get(payments::payment_status),
        )
        .route("/api/payments/{reference}/refund", post(payments::refund))
        .route(
            "/api/payments/{reference}/cancel",
            post(payments::cancel_payment),
        )
        .route(
            "/api/payments/{reference}/confirm-cash",
            post(payments::confirm_cash_payment),
        )
        .route("/api/ussd/sessions", post(ussd::start_session))
        .route("/api/ussd/sessions/{id}/input", post(ussd::process_input))
        .route("/api/ussd/sessions/{id}", delete(ussd::cancel_session))
        .route("/api/fraud/blacklist", post(fraud::blacklist))
        .route("/api/fraud/whitelist", post(fraud::whitelist))
        .route("/api/fraud/statistics", get(fraud::statistics))
        .route("/webhooks/{provider}", post(webhooks::handle_webhook))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
                .layer(TraceLayer::new_for_http())
                .layer(axum::middleware::from_fn(request_logging_middleware))
                .layer(PropagateRequestIdLayer::x_request_id()),
        )
}

async fn root() -> &'static str {
    "Okada payments API"
}
