use tokio::sync::broadcast::{self, error::RecvError};
use tracing_subscriber::EnvFilter;
use crate::queue::UploadEvent;

/// Initialize tracing for the command-line driver.
///
/// `RUST_LOG` overrides the default `upload_queue=info` filter.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("upload_queue=info")),
        )
        .with_target(false)
        .init();
}

/// Log queue events until every handle to the queue is gone.
///
/// Returns the number of events logged.
pub async fn log_events(mut events: broadcast::Receiver<UploadEvent>) -> usize {
    let mut logged = 0;
    loop {
        match events.recv().await {
            Ok(UploadEvent::Progress { upload_id, progress }) => {
                tracing::info!(%upload_id, progress, "progress");
            }
            Ok(UploadEvent::StatusChanged { upload_id, new_status, error, .. }) => {
                tracing::info!(%upload_id, status = %new_status, error = error.as_deref().unwrap_or(""), "status changed");
            }
            Ok(UploadEvent::Added { upload_id }) => tracing::debug!(%upload_id, "added"),
            Ok(UploadEvent::Removed { upload_id }) => tracing::debug!(%upload_id, "removed"),
            Err(RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "event log lagged");
                continue;
            }
            Err(RecvError::Closed) => return logged,
        }
        logged += 1;
    }
}
