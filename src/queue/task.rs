use chrono::{DateTime, Utc};
use serde::Serialize;
use super::types::{FilePayload, UploadId, UploadStatus};

#[derive(Debug, Clone, Serialize)]
pub struct UploadTask {
    pub id: UploadId,
    pub payload: FilePayload,
    pub file_size: u64,
    /// Whole percentage, 0..=100
    pub progress: u8,
    pub status: UploadStatus,
    /// Only set while `status` is `Failed`
    pub error: Option<String>,
    /// Server side correlation id, recorded once a transfer has started
    pub remote_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl UploadTask {
    pub fn new(payload: FilePayload) -> Self {
        Self {
            id: UploadId::new(),
            file_size: payload.size(),
            payload,
            progress: 0,
            status: UploadStatus::Queued,
            error: None,
            remote_id: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// A transfer attempt starts over from zero bytes.
    pub(crate) fn begin(&mut self) {
        self.status = UploadStatus::Uploading;
        self.progress = 0;
        self.error = None;
        self.remote_id = Some(self.id.to_string());
        self.started_at = Some(Utc::now());
        self.completed_at = None;
    }

    /// Returns `true` when the recorded value moved forward.
    pub(crate) fn advance_progress(&mut self, progress: u8) -> bool {
        let progress = progress.min(100);
        if self.status != UploadStatus::Uploading || progress <= self.progress {
            return false;
        }
        self.progress = progress;
        true
    }

    pub(crate) fn complete(&mut self) {
        self.status = UploadStatus::Completed;
        self.progress = 100;
        self.error = None;
        self.completed_at = Some(Utc::now());
    }

    pub(crate) fn fail(&mut self, reason: impl Into<String>) {
        self.status = UploadStatus::Failed;
        self.error = Some(reason.into());
        self.completed_at = Some(Utc::now());
    }

    pub(crate) fn pause(&mut self) {
        self.status = UploadStatus::Paused;
    }

    pub(crate) fn cancel(&mut self) {
        self.status = UploadStatus::Cancelled;
        self.error = None;
        self.completed_at = Some(Utc::now());
    }

    /// Back to the queue ahead of a restart.
    pub(crate) fn requeue(&mut self) {
        self.status = UploadStatus::Queued;
        self.error = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task() -> UploadTask {
        UploadTask::new(FilePayload::new("clip.mp4", "video/mp4", vec![0u8; 64]))
    }

    #[test]
    fn new_task_is_queued() {
        let task = task();
        assert_eq!(task.status, UploadStatus::Queued);
        assert_eq!(task.progress, 0);
        assert_eq!(task.file_size, 64);
        assert!(task.remote_id.is_none());
    }

    #[test]
    fn progress_only_moves_forward_while_uploading() {
        let mut task = task();
        assert!(!task.advance_progress(10));

        task.begin();
        assert!(task.advance_progress(40));
        assert!(!task.advance_progress(30));
        assert!(!task.advance_progress(40));
        assert!(task.advance_progress(250));
        assert_eq!(task.progress, 100);

        task.pause();
        assert!(!task.advance_progress(100));
    }

    #[test]
    fn restart_resets_progress_and_error() {
        let mut task = task();
        task.begin();
        task.advance_progress(70);
        task.fail("Network error");
        assert_eq!(task.error.as_deref(), Some("Network error"));

        task.requeue();
        task.begin();
        assert_eq!(task.progress, 0);
        assert!(task.error.is_none());
        assert_eq!(task.remote_id, Some(task.id.to_string()));
    }

    #[test]
    fn snapshot_omits_file_content() {
        let task = task();
        let json = serde_json::to_value(&task).unwrap();
        assert_eq!(json["payload"]["name"], "clip.mp4");
        assert!(json["payload"].get("content").is_none());
        assert_eq!(json["status"], "queued");
    }
}
