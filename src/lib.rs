pub mod config;
pub mod queue;
pub mod telemetry;
pub mod utils;
pub mod validation;

pub use queue::{
    FilePayload,
    HttpTransport,
    HttpTransportConfig,
    QueueConfig,
    QueueSummary,
    Result,
    StaticToken,
    Transport,
    UploadError,
    UploadEvent,
    UploadId,
    UploadObserver,
    UploadQueue,
    UploadQueueBuilder,
    UploadStatus,
    UploadTask,
};
pub use validation::FileValidator;
