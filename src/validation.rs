use serde::Deserialize;
use crate::queue::{FilePayload, UploadError};
use crate::utils::format_bytes;

/// Checks applied to files before they reach the queue.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FileValidator {
    /// Required MIME prefix, e.g. `video/`
    pub accepted_mime_prefix: String,
    /// Size ceiling in bytes
    pub max_file_size: u64,
}

impl Default for FileValidator {
    fn default() -> Self {
        Self {
            accepted_mime_prefix: "video/".to_string(),
            max_file_size: 20 * 1024 * 1024,
        }
    }
}

impl FileValidator {
    pub fn validate(&self, payload: &FilePayload) -> Result<(), UploadError> {
        if !payload.mime_type.starts_with(&self.accepted_mime_prefix) {
            return Err(UploadError::InvalidFile(format!(
                "{} is not a valid video file",
                payload.name
            )));
        }

        if payload.size() > self.max_file_size {
            return Err(UploadError::InvalidFile(format!(
                "{} exceeds {} limit",
                payload.name,
                format_bytes(self.max_file_size)
            )));
        }

        Ok(())
    }

    /// Split files into accepted payloads and rejections, keeping order.
    pub fn partition(&self, files: impl IntoIterator<Item = FilePayload>) -> (Vec<FilePayload>, Vec<UploadError>) {
        let mut accepted = Vec::new();
        let mut rejected = Vec::new();

        for file in files {
            match self.validate(&file) {
                Ok(()) => accepted.push(file),
                Err(err) => rejected.push(err),
            }
        }

        (accepted, rejected)
    }
}
