use crate::persistence::JournalBackend;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Periodically folds the identity journal into a snapshot.
pub async fn run(
    journal: Arc<JournalBackend>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.changed() => {
                tracing::info!("Snapshot writer shutting down");
                return;
            }
        }

        compact(&journal).await;
    }
}

pub async fn compact(journal: &JournalBackend) {
    if let Err(e) = journal.compact().await {
        tracing::error!("Failed to compact identity journal: {}", e);
    }
}
