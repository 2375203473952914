use std::sync::Arc;
use std::time::Duration;

use drive_gateway::background;
use drive_gateway::config::AppConfig;
use drive_gateway::persistence::JournalBackend;
use drive_gateway::provider::google_drive::GoogleDriveConnector;
use drive_gateway::routes;
use drive_gateway::services::identity::{IdentityBackend, IdentityStore};
use drive_gateway::state::AppState;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Load .env if present
    let _ = dotenvy::dotenv();

    let config = AppConfig::from_env();

    // Init tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .json()
        .init();

    tracing::info!("Starting drive-gateway v{}", env!("CARGO_PKG_VERSION"));

    let journal = open_journal(&config);
    let durable = journal
        .clone()
        .map(|j| j as Arc<dyn IdentityBackend>);
    let identity = IdentityStore::new(durable);

    let connector = Arc::new(GoogleDriveConnector::new(&config));
    let state = AppState::new(config.clone(), connector, identity, journal.clone());

    // Shutdown signal
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let snapshot_handle = journal.clone().map(|journal| {
        tokio::spawn(background::snapshot_writer::run(
            journal,
            Duration::from_secs(config.snapshot_interval_secs),
            shutdown_rx.clone(),
        ))
    });

    let app = routes::build_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind");

    // Serve with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown_tx))
        .await
        .expect("Server error");

    if let Some(handle) = snapshot_handle {
        tracing::info!("Waiting for background tasks to finish");
        let _ = handle.await;
    }

    // Final snapshot
    if let Some(journal) = &journal {
        tracing::info!("Writing final identity snapshot");
        background::snapshot_writer::compact(journal).await;
    }

    tracing::info!("Shutdown complete");
}

/// Opens the durable identity backend. Any failure leaves the process running
/// on the in-memory fallback alone.
fn open_journal(config: &AppConfig) -> Option<Arc<JournalBackend>> {
    let (journal_dir, snapshot_path) = match (config.journal_dir(), config.snapshot_path()) {
        (Some(dir), Some(path)) => (dir, path),
        _ => return None,
    };

    match JournalBackend::open(&journal_dir, &snapshot_path) {
        Ok(backend) => {
            tracing::info!(
                users = backend.user_count(),
                dir = %journal_dir.display(),
                "Durable identity backend ready"
            );
            Some(Arc::new(backend))
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to open identity journal, using in-memory store");
            None
        }
    }
}

async fn shutdown_signal(shutdown_tx: tokio::sync::watch::Sender<bool>) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
    let _ = shutdown_tx.send(true);
}
