use std::process::ExitCode;
use std::sync::Arc;
use anyhow::Context;
use upload_queue::config::Config;
use upload_queue::telemetry::{init_tracing, log_events};
use upload_queue::utils::format_bytes;
use upload_queue::{FilePayload, HttpTransport, StaticToken, UploadQueue, UploadStatus};

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    init_tracing();

    let config_path = std::env::args().nth(1).unwrap_or_else(|| "config.toml".to_string());
    let config = Config::load(&config_path)?;

    let credentials = match &config.token {
        Some(token) => StaticToken::new(token.clone()),
        None => StaticToken::anonymous(),
    };
    let transport = HttpTransport::new(config.transport_config(), Arc::new(credentials))
        .context("failed to create upload transport")?;
    let queue = UploadQueue::new(Arc::new(transport), config.queue_config())?;

    let mut files = Vec::with_capacity(config.files.len());
    for path in &config.files {
        let payload = FilePayload::from_path(path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        files.push(payload);
    }

    let (accepted, rejected) = config.validation.partition(files);
    for err in &rejected {
        tracing::warn!("{}", err);
    }
    if accepted.is_empty() {
        tracing::error!("no files to upload");
        return Ok(ExitCode::FAILURE);
    }

    let reporter = tokio::spawn(log_events(queue.subscribe()));

    queue.add_files(accepted);
    queue.start_uploads().await;

    for task in queue.uploads() {
        match task.status {
            UploadStatus::Completed => println!("{} ({}): completed", task.payload.name, format_bytes(task.file_size)),
            status => println!(
                "{} ({}): {} {}",
                task.payload.name,
                format_bytes(task.file_size),
                status,
                task.error.as_deref().unwrap_or("")
            ),
        }
    }

    let summary = queue.summary();
    // Closing the last handle ends the event log once it has caught up
    drop(queue);
    let logged = reporter.await.context("event log task failed")?;
    tracing::debug!(logged, "event log closed");

    if summary.failed > 0 || !rejected.is_empty() {
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}
