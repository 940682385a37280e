use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dotenv::dotenv;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};

use okada_payments::api::{self, AppState};
use okada_payments::config::{AppConfig, LoggingConfig};
use okada_payments::database::InMemoryTransactionRepository;
use okada_payments::fraud::FraudEngine;
use okada_payments::helpers::DataCipher;
use okada_payments::logging::init_tracing;
use okada_payments::payments::PaymentProviderFactory;
use okada_payments::services::payment_orchestrator::PaymentOrchestrator;
use okada_payments::services::ussd::UssdService;

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown");
}

async fn shutdown_signal_with_notify(shutdown_tx: watch::Sender<bool>) {
    shutdown_signal().await;
    let _ = shutdown_tx.send(true);
}

/// Periodically drops expired USSD sessions until shutdown is signalled.
async fn run_ussd_cleanup(
    ussd: Arc<UssdService>,
    interval_secs: u64,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
    loop {
        tokio::select! {
            _ = interval.tick() => {
                let removed = ussd.cleanup_expired(Utc::now()).await;
                if removed > 0 {
                    info!(removed, "🧹 Expired USSD sessions cleaned up");
                }
            }
            _ = shutdown_rx.changed() => {
                info!("USSD cleanup worker stopping");
                break;
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let logging = LoggingConfig::from_env()?;
    init_tracing(&logging);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
        "🚀 Starting Okada payments service"
    );

    let config = AppConfig::from_env()?;
    config.validate().map_err(|e| {
        error!(error = %e, "❌ Invalid configuration");
        e
    })?;
    info!(
        host = %config.server.host,
        port = config.server.port,
        default_provider = %config.payments.default_provider,
        "Server configuration loaded"
    );

    info!("💳 Initializing payment providers...");
    let factory = PaymentProviderFactory::with_config(config.payments.clone());
    let registry = factory.build_registry().map_err(|e| {
        error!(error = %e, "❌ Failed to initialize payment providers");
        e
    })?;
    info!(providers = ?registry.enabled(), "✅ Payment providers ready");

    let cipher = DataCipher::new(&config.security.encryption_key)?;
    let fraud = Arc::new(FraudEngine::new(config.fraud.clone()));
    let repository = Arc::new(InMemoryTransactionRepository::new());

    let orchestrator = Arc::new(PaymentOrchestrator::new(
        registry,
        repository,
        fraud,
        cipher,
        config.orchestrator.clone(),
    ));
    let ussd = Arc::new(UssdService::new(orchestrator.clone()));
    info!("✅ Payment orchestrator initialized");

    let (worker_shutdown_tx, worker_shutdown_rx) = watch::channel(false);
    let cleanup_handle = tokio::spawn(run_ussd_cleanup(
        ussd.clone(),
        config.ussd.cleanup_interval_secs,
        worker_shutdown_rx,
    ));
    info!(
        interval_secs = config.ussd.cleanup_interval_secs,
        "✅ USSD session cleanup worker started"
    );

    info!("🛣️  Setting up application routes...");
    let app = api::router(AppState::new(orchestrator, ussd));
    info!("✅ Routes configured");

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!("❌ Failed to bind to address {}: {}", addr, e);
        e
    })?;

    info!(address = %addr, "🚀 Server listening on http://{}", addr);
    info!("✅ Server is ready to accept connections");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal_with_notify(worker_shutdown_tx.clone()))
        .await?;

    let _ = worker_shutdown_tx.send(true);
    if let Err(e) = tokio::time::timeout(Duration::from_secs(5), cleanup_handle).await {
        error!(error = %e, "Timed out waiting for USSD cleanup worker shutdown");
    }

    info!("👋 Server shutdown complete");

    Ok(())
}
