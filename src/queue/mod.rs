mod abort;
mod client;
mod errors;
mod manager;
mod observer;
mod progress_stream;
mod task;
mod worker;
pub mod types;

pub use client::{CredentialProvider, HttpTransport, HttpTransportConfig, StaticToken, Transport, UploadResponse};
pub use errors::{Result, UploadError, NETWORK_ERROR, UPLOAD_FAILED, UPLOAD_TIMED_OUT};
pub use manager::{FilteredEventReceiver, QueueSummary, UploadQueue, UploadQueueBuilder};
pub use observer::UploadObserver;
pub use progress_stream::{ProgressSender, ProgressStream};
pub use task::UploadTask;
pub use types::{FilePayload, QueueConfig, TransferProgress, UploadEvent, UploadId, UploadStatus};
