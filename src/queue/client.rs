use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client, RequestBuilder, Response};
use serde::Deserialize;
use url::Url;
use super::errors::{Result, UploadError};
use super::progress_stream::{chunked, ProgressSender, ProgressStream};
use super::types::{FilePayload, UploadId};

/// Upload and control endpoints the queue talks to.
///
/// Implementations must be cancel-safe: the queue drops an in-flight
/// `upload` future to abort it.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send the whole payload, reporting progress through `progress_tx`.
    async fn upload(&self, upload_id: UploadId, payload: FilePayload, progress_tx: ProgressSender)
        -> Result<UploadResponse>;

    /// Ask the server to retain partial state for a paused transfer.
    async fn pause(&self, upload_id: UploadId) -> Result<()>;

    /// Announce that a transfer is about to restart.
    async fn resume(&self, upload_id: UploadId) -> Result<()>;

    /// Ask the server to discard partial state.
    async fn cancel(&self, upload_id: UploadId) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct UploadResponse {
    pub status: u16,
    /// JSON body if the server sent one
    pub body: Option<serde_json::Value>,
}

/// Source of the bearer credential attached to every request
pub trait CredentialProvider: Send + Sync {
    fn bearer_token(&self) -> Option<String>;
}

#[derive(Debug, Clone, Default)]
pub struct StaticToken(Option<String>);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(Some(token.into()))
    }

    pub fn anonymous() -> Self {
        Self(None)
    }
}

impl CredentialProvider for StaticToken {
    fn bearer_token(&self) -> Option<String> {
        self.0.clone()
    }
}

#[derive(Debug, Clone)]
pub struct HttpTransportConfig {
    /// API base, e.g. `https://api.example.com/api/v1`
    pub endpoint: String,
    /// Timeout for pause/resume/cancel notifications
    pub request_timeout: Duration,
    /// Size of the body slices progress is reported at
    pub chunk_size: usize,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            request_timeout: Duration::from_secs(30),
            chunk_size: 64 * 1024,
        }
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    endpoint: Url,
    config: HttpTransportConfig,
    credentials: Arc<dyn CredentialProvider>,
}

impl HttpTransport {
    pub fn new(config: HttpTransportConfig, credentials: Arc<dyn CredentialProvider>) -> Result<Self> {
        let endpoint = Url::parse(config.endpoint.trim_end_matches('/'))?;
        if endpoint.cannot_be_a_base() {
            return Err(UploadError::config_error(format!("endpoint {} cannot be a base url", endpoint)));
        }

        let client = Client::builder()
            .tcp_nodelay(true)
            .build()?;

        Ok(Self {
            client,
            endpoint,
            config,
            credentials,
        })
    }

    pub fn upload_url(&self, upload_id: UploadId) -> Result<Url> {
        self.endpoint_url(&["videos", "upload", &upload_id.to_string()])
    }

    pub fn control_url(&self, upload_id: UploadId, action: &str) -> Result<Url> {
        self.endpoint_url(&["uploads", &upload_id.to_string(), action])
    }

    fn endpoint_url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| UploadError::config_error("endpoint cannot be a base url"))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match self.credentials.bearer_token() {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn post_control(&self, upload_id: UploadId, action: &str) -> Result<()> {
        let url = self.control_url(upload_id, action)?;
        let response = self
            .authorize(self.client.post(url))
            .timeout(self.config.request_timeout)
            .send()
            .await?;

        Self::check_status(response).await?;
        Ok(())
    }

    /// Turn a non-2xx response into `UploadError::Server`.
    async fn check_status(response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&text)
            .ok()
            .and_then(|body| body.message);

        Err(UploadError::server_error(status.as_u16(), message))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn upload(&self, upload_id: UploadId, payload: FilePayload, progress_tx: ProgressSender)
        -> Result<UploadResponse>
    {
        let url = self.upload_url(upload_id)?;
        let file_size = payload.size();

        let body = ProgressStream::new(
            chunked(payload.content.clone(), self.config.chunk_size),
            file_size,
            progress_tx,
        );
        let part = Part::stream_with_length(Body::wrap_stream(body), file_size)
            .file_name(payload.name.clone())
            .mime_str(&payload.mime_type)?;
        let form = Form::new()
            .part("files", part)
            .text("id", upload_id.to_string());

        tracing::debug!(%upload_id, %url, file_size, "sending upload request");

        let response = self
            .authorize(self.client.post(url))
            .multipart(form)
            .send()
            .await?;
        let response = Self::check_status(response).await?;

        let status = response.status().as_u16();
        let text = response.text().await?;
        let body = serde_json::from_str(&text).ok();

        Ok(UploadResponse { status, body })
    }

    async fn pause(&self, upload_id: UploadId) -> Result<()> {
        self.post_control(upload_id, "pause").await
    }

    async fn resume(&self, upload_id: UploadId) -> Result<()> {
        self.post_control(upload_id, "resume").await
    }

    async fn cancel(&self, upload_id: UploadId) -> Result<()> {
        self.post_control(upload_id, "cancel").await
    }
}
