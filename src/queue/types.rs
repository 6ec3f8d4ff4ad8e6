use std::path::Path;
use std::time::Duration;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use super::errors::Result;

/// Upload task identifier, also the correlation key for every endpoint call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(transparent)]
pub struct UploadId(Uuid);

impl UploadId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for UploadId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for UploadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    /// Waiting for `start_uploads` or for a free transfer slot
    Queued,
    Uploading,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl UploadStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Queued => "queued",
            Self::Uploading => "uploading",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// A file handed to the queue. The content is shared, so cloning is cheap.
#[derive(Clone, Serialize)]
pub struct FilePayload {
    pub name: String,
    pub mime_type: String,
    #[serde(skip)]
    pub content: Bytes,
}

impl FilePayload {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, content: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            content: content.into(),
        }
    }

    /// Read a file from disk, guessing its MIME type from the extension.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read(path).await?;
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let mime_type = mime_guess::from_path(path)
            .first_or_octet_stream()
            .essence_str()
            .to_string();

        Ok(Self::new(name, mime_type, content))
    }

    pub fn size(&self) -> u64 {
        self.content.len() as u64
    }
}

impl std::fmt::Debug for FilePayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilePayload")
            .field("name", &self.name)
            .field("mime_type", &self.mime_type)
            .field("size", &self.size())
            .finish()
    }
}

/// Byte counters reported by a transport while the body is sent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferProgress {
    pub bytes_sent: u64,
    pub bytes_total: u64,
}

impl TransferProgress {
    /// Whole percentage sent, `None` when the total length is unknown.
    pub fn percent(&self) -> Option<u8> {
        if self.bytes_total == 0 {
            return None;
        }
        let ratio = self.bytes_sent as f64 / self.bytes_total as f64;
        Some((ratio * 100.0).round().clamp(0.0, 100.0) as u8)
    }
}

/// Queue events, consumed by a rendering layer
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UploadEvent {
    Added {
        upload_id: UploadId,
    },

    Progress {
        upload_id: UploadId,
        progress: u8,
    },

    StatusChanged {
        upload_id: UploadId,
        old_status: UploadStatus,
        new_status: UploadStatus,
        error: Option<String>,
    },

    Removed {
        upload_id: UploadId,
    },
}

impl UploadEvent {
    pub fn upload_id(&self) -> UploadId {
        match self {
            Self::Added { upload_id }
            | Self::Progress { upload_id, .. }
            | Self::StatusChanged { upload_id, .. }
            | Self::Removed { upload_id } => *upload_id,
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Batch size of `start_uploads` and the number of transfer slots
    pub max_concurrent: usize,

    /// Deadline for a single transfer attempt
    pub transfer_timeout: Duration,

    /// Buffered events per subscriber before it lags
    pub event_capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            transfer_timeout: Duration::from_secs(30 * 60),
            event_capacity: 256,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_rounds_and_clamps() {
        let progress = |bytes_sent, bytes_total| TransferProgress { bytes_sent, bytes_total };

        assert_eq!(progress(0, 200).percent(), Some(0));
        assert_eq!(progress(1, 100).percent(), Some(1));
        assert_eq!(progress(399, 400).percent(), Some(100));
        assert_eq!(progress(333, 1000).percent(), Some(33));
        assert_eq!(progress(500, 100).percent(), Some(100));
        assert_eq!(progress(10, 0).percent(), None);
    }

    #[test]
    fn status_terminal_states() {
        assert!(UploadStatus::Completed.is_terminal());
        assert!(UploadStatus::Failed.is_terminal());
        assert!(UploadStatus::Cancelled.is_terminal());
        assert!(!UploadStatus::Queued.is_terminal());
        assert!(!UploadStatus::Uploading.is_terminal());
        assert!(!UploadStatus::Paused.is_terminal());
    }

    #[test]
    fn status_serializes_lowercase() {
        let json = serde_json::to_string(&UploadStatus::Cancelled).unwrap();
        assert_eq!(json, "\"cancelled\"");
    }

    #[tokio::test]
    async fn payload_from_path_guesses_mime() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.mp4");
        tokio::fs::write(&path, b"not really a video").await.unwrap();

        let payload = FilePayload::from_path(&path).await.unwrap();
        assert_eq!(payload.name, "clip.mp4");
        assert_eq!(payload.mime_type, "video/mp4");
        assert_eq!(payload.size(), 18);
    }
}
