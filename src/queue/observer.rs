use super::types::{UploadId, UploadStatus};

/// Callback style observation, invoked after the queue state has changed.
///
/// Callbacks run on the task driving the transfer and must not block.
pub trait UploadObserver: Send + Sync {
    fn on_progress(&self, _upload_id: UploadId, _progress: u8) {}

    fn on_status_change(&self, _upload_id: UploadId, _status: UploadStatus) {}
}
