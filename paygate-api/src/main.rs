use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use paygate_api::{app, AppState, AuthConfig};
use paygate_core::{AuditStore, PaymentStore};
use paygate_engine::{PaymentOrchestrator, PaymentProcessor, WebhookReconciler};
use paygate_store::app_config::{Config, StorageBackend};
use paygate_store::{
    DbClient, InMemoryAuditStore, InMemoryPaymentStore, PgAuditStore, PgPaymentStore,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "paygate_api=debug,paygate_engine=debug,tower_http=debug,axum::rejection=trace".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().context("Failed to load config")?;
    tracing::info!("Starting payment service on port {}", config.server.port);

    let (payments, audit): (Arc<dyn PaymentStore>, Arc<dyn AuditStore>) = match config.database.backend {
        StorageBackend::Postgres => {
            let db = DbClient::new(&config.database)
                .await
                .context("Failed to connect to Postgres")?;
            if config.database.run_migrations {
                db.migrate().await.context("Failed to run migrations")?;
            }
            (
                Arc::new(PgPaymentStore::new(db.pool.clone())),
                Arc::new(PgAuditStore::new(db.pool)),
            )
        }
        StorageBackend::Memory => {
            tracing::warn!("Using in-memory storage; payments are lost on restart");
            (
                Arc::new(InMemoryPaymentStore::new()),
                Arc::new(InMemoryAuditStore::new()),
            )
        }
    };

    let gateways = paygate_gateway::build_registry(
        &config.payments,
        &config.stripe,
        &config.paypal,
        config.webhooks.allow_unverified,
    )
    .context("Failed to configure payment gateways")?;

    let processor = Arc::new(PaymentProcessor::new(
        payments,
        audit,
        gateways,
        config.payments.clone(),
    ));
    let (orchestrator, worker) = PaymentOrchestrator::start(processor.clone());
    let reconciler = WebhookReconciler::new(processor);

    let app_state = AppState {
        orchestrator,
        reconciler,
        auth: AuthConfig {
            secret: config.auth.jwt_secret.clone(),
        },
    };

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(
        listener,
        app(app_state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("Server error")?;

    // The router held the last queue handles; wait for in-flight payments.
    worker.join().await;
    tracing::info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
