use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use futures::FutureExt;
use tokio::sync::mpsc;
use super::abort::AbortHandle;
use super::client::{Transport, UploadResponse};
use super::errors::{UploadError, UPLOAD_FAILED};
use super::types::{FilePayload, TransferProgress, UploadId};

#[derive(Debug)]
pub(crate) enum TransferOutcome {
    Completed(UploadResponse),
    Failed(String),
}

/// One transfer attempt for one task
pub(crate) struct TransferWorker {
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) abort_handle: AbortHandle,
    pub(crate) timeout: Duration,
}

impl TransferWorker {
    /// `None` when the transfer was aborted through its handle.
    pub(crate) async fn run<F>(self, upload_id: UploadId, payload: FilePayload, mut on_progress: F) -> Option<TransferOutcome>
    where
        F: FnMut(TransferProgress),
    {
        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();

        // Dropping this future aborts the request
        let transfer = AssertUnwindSafe(self.transport.upload(upload_id, payload, progress_tx)).catch_unwind();
        tokio::pin!(transfer);

        let deadline = tokio::time::sleep(self.timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                biased;

                _ = self.abort_handle.aborted() => {
                    tracing::debug!(%upload_id, reason = ?self.abort_handle.reason(), "transfer aborted");
                    return None;
                }
                Some(progress) = progress_rx.recv() => {
                    on_progress(progress);
                }
                result = &mut transfer => {
                    let err = match result {
                        Ok(Ok(response)) => return Some(TransferOutcome::Completed(response)),
                        Ok(Err(err)) => err,
                        Err(panic) => UploadError::internal_error(panic_message(panic)),
                    };
                    tracing::debug!(%upload_id, error = %err, "transfer failed");
                    return Some(TransferOutcome::Failed(err.failure_reason()));
                }
                _ = &mut deadline => {
                    return Some(TransferOutcome::Failed(UploadError::TimedOut(self.timeout).failure_reason()));
                }
            }
        }
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        UPLOAD_FAILED.to_string()
    }
}
