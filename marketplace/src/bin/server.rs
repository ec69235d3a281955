//! Marketplace HTTP server.

use anyhow::Context;
use inkmatch_core::environment::SystemClock;
use marketplace::auth::StaticIdentityGateway;
use marketplace::processors::PaymentProcessors;
use marketplace::{build_router, metrics, AppState, Config, PgMarketplaceStore};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_env();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.server.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting marketplace server");
    info!(
        host = %config.server.host,
        port = config.server.port,
        min_amount = config.payments.min_amount,
        processor_timeout_ms = config.payments.processor_timeout_ms,
        identity_tokens = config.identity.tokens.len(),
        webhook_signature_required = config.payments.webhook_secret.is_some(),
        "Configuration loaded"
    );

    let metrics_addr: SocketAddr = format!("{}:{}", config.server.metrics_host, config.server.metrics_port)
        .parse()
        .context("Invalid metrics address")?;
    metrics::install_exporter(metrics_addr).context("Failed to start metrics exporter")?;

    info!("Connecting to database...");
    let store = PgMarketplaceStore::connect(&config.postgres)
        .await
        .context("Failed to connect to database")?;
    if config.postgres.run_migrations {
        info!("Running migrations...");
        store.migrate().await.context("Failed to run migrations")?;
    }
    info!("Database ready");

    if config.identity.tokens.is_empty() {
        warn!("IDENTITY_TOKENS is empty; every authenticated request will be rejected");
    }

    let state = AppState::new(
        Arc::new(store),
        Arc::new(StaticIdentityGateway::from_config(&config.identity)),
        PaymentProcessors::from_config(&config.payments),
        Arc::new(SystemClock),
        config.payments.clone(),
    );
    let app = build_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(Duration::from_secs(config.server.shutdown_timeout)))
        .await
        .context("Server error")?;

    info!("Server stopped");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM.
///
/// In-flight requests get `grace` to drain before the process exits.
async fn shutdown_signal(grace: Duration) {
    let ctrl_c = async {
        if let Err(error) = signal::ctrl_c().await {
            warn!(%error, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(error) => {
                warn!(%error, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C signal, shutting down gracefully..."),
        () = terminate => info!("Received SIGTERM signal, shutting down gracefully..."),
    }

    // Hard stop if draining outlives the grace period.
    tokio::spawn(async move {
        tokio::time::sleep(grace).await;
        warn!(grace_secs = grace.as_secs(), "Shutdown grace period elapsed, exiting");
        std::process::exit(1);
    });
}
