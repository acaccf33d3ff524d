//! ContentFlow server - main entry point

use anyhow::Result;
use cflow_common::logging::{init_logging, LogConfig};
use cflow_server::{
    api::{self, ApiState},
    config::Config,
    pipeline::{Catalog, IngestionOrchestrator},
    source::SourceRegistry,
    store::ContentStore,
    transform::TransformerRegistry,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging with configuration from environment
    let log_config = LogConfig::builder()
        .log_file_prefix("cflow-server")
        .filter_directives("cflow_server=debug,tower_http=debug,sqlx=info")
        .build();
    let log_config = LogConfig::from_env().unwrap_or(log_config);
    init_logging(&log_config)?;

    info!("Starting ContentFlow server");

    // Load configuration
    let config = Config::load()?;
    info!(
        "Configuration loaded - server will bind to {}:{}",
        config.server.host, config.server.port
    );

    // Open the content store
    let store = Arc::new(
        ContentStore::open(&config.store.database_path, &config.store.blob_root).await?,
    );

    // Registries: explicit tables, populated at startup
    let sources = SourceRegistry::with_defaults();
    let transformers = TransformerRegistry::with_defaults();

    // Load the catalog and bring up one processor per entry
    let catalog = Catalog::load(&config.catalog_path).await?;
    info!(entries = catalog.transformers.len(), "catalog loaded");

    let orchestrator = Arc::new(
        IngestionOrchestrator::bootstrap(catalog, &sources, &transformers, store).await?,
    );

    // Build the application router
    let app = api::router(ApiState {
        orchestrator: Arc::clone(&orchestrator),
    });

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(config.server.shutdown_timeout_secs))
        .await?;

    // Sources are paused and disposed in turn; workers drain before exit.
    orchestrator.shutdown().await;

    info!("Server shut down gracefully");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal(timeout_secs: u64) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        },
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        },
    }

    // Give in-flight requests time to complete
    info!("Waiting up to {} seconds for connections to close", timeout_secs);
    tokio::time::sleep(Duration::from_secs(timeout_secs.min(5))).await;
}
