use std::time::Duration;
use thiserror::Error;

/// Task error shown when the server rejects an upload without a message.
pub const UPLOAD_FAILED: &str = "Upload failed";

/// Task error shown when the request never reached the server.
pub const NETWORK_ERROR: &str = "Network error";

/// Task error shown when a transfer overruns its deadline.
pub const UPLOAD_TIMED_OUT: &str = "Upload timed out";

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("HTTP Request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Server error: status code {status_code}, message: {}", message.as_deref().unwrap_or("<none>"))]
    Server {
        status_code: u16,
        message: Option<String>,
    },

    #[error("Invalid url: {0}")]
    Url(#[from] url::ParseError),

    #[error("{0}")]
    InvalidFile(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Transfer timed out after {0:?}")]
    TimedOut(Duration),

    /// Unexpected failure inside a transfer, e.g. a panicking transport
    #[error("Internal error: {0}")]
    Internal(String),
}

impl UploadError {
    pub fn server_error(status_code: u16, message: Option<String>) -> Self {
        Self::Server {
            status_code,
            message,
        }
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    pub fn config_error(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// The reason recorded on a failed task.
    pub fn failure_reason(&self) -> String {
        match self {
            Self::Server { message: Some(message), .. } if !message.trim().is_empty() => {
                message.clone()
            }
            Self::Server { .. } => UPLOAD_FAILED.to_string(),
            Self::Http(err) if err.is_status() => UPLOAD_FAILED.to_string(),
            Self::Http(err) if err.is_builder() => err.to_string(),
            Self::Http(_) => NETWORK_ERROR.to_string(),
            Self::TimedOut(_) => UPLOAD_TIMED_OUT.to_string(),
            Self::Internal(message) => message.clone(),
            other => other.to_string(),
        }
    }
}

/// Error alias
pub type Result<T, E = UploadError> = std::result::Result<T, E>;
