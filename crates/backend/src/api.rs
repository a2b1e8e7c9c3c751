//! REST client for the generation backend.
//!
//! [`GenerationBackend`] and [`AutosaveHook`] are the seams the session
//! depends on; [`HttpBackend`] implements both over HTTP using
//! [`reqwest`].

use std::time::Duration;

use async_trait::async_trait;
use madsea_core::catalog::CatalogEntry;
use madsea_core::job::{JobHandle, JobStatusSnapshot};

use crate::error::{AutosaveError, CatalogError, PollError, SubmissionError};
use crate::messages::{AutosaveRequest, GenerateRequest, GenerateResponse, StatusResponse};

// ---------------------------------------------------------------------------
// Seams
// ---------------------------------------------------------------------------

/// The external system that runs generation jobs.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Queue a batch. Returns the backend's task handle.
    async fn submit(&self, request: &GenerateRequest) -> Result<JobHandle, SubmissionError>;

    /// Read the current status of a task.
    async fn fetch_status(&self, job: &JobHandle) -> Result<JobStatusSnapshot, PollError>;

    /// Styles selectable for generation.
    async fn styles(&self) -> Result<Vec<CatalogEntry>, CatalogError>;

    /// LoRA models selectable for generation.
    async fn lora_models(&self) -> Result<Vec<CatalogEntry>, CatalogError>;
}

/// Best-effort persistence triggered after a successful run.
#[async_trait]
pub trait AutosaveHook: Send + Sync {
    async fn autosave(&self, request: &AutosaveRequest) -> Result<(), AutosaveError>;
}

// ---------------------------------------------------------------------------
// HttpBackend
// ---------------------------------------------------------------------------

/// HTTP client for a single generation backend.
pub struct HttpBackend {
    client: reqwest::Client,
    api_url: String,
}

impl HttpBackend {
    /// Create a new client.
    ///
    /// * `api_url` - Base HTTP URL, e.g. `http://host:5000/api`.
    pub fn new(api_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), api_url)
    }

    /// Create a client whose requests time out after `timeout`.
    pub fn with_timeout(
        api_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, api_url))
    }

    /// Create a client reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, api_url: impl Into<String>) -> Self {
        let api_url = api_url.into().trim_end_matches('/').to_string();
        Self { client, api_url }
    }

    /// Base HTTP URL without a trailing slash.
    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    // ---- private helpers ----

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_url, path)
    }

    /// `{api_url}/tasks/{task_id}/status`, with the task id escaped as a
    /// single path segment.
    fn status_url(&self, job: &JobHandle) -> Result<reqwest::Url, PollError> {
        let mut url = reqwest::Url::parse(&self.api_url)
            .map_err(|e| PollError::Transport(format!("invalid API URL {}: {e}", self.api_url)))?;
        url.path_segments_mut()
            .map_err(|()| PollError::Transport(format!("API URL {} cannot have a path", self.api_url)))?
            .pop_if_empty()
            .extend(["tasks", job.task_id.as_str(), "status"]);
        Ok(url)
    }

    async fn fetch_catalog(&self, path: &str) -> Result<Vec<CatalogEntry>, CatalogError> {
        let response = self
            .client
            .get(self.url(path))
            .send()
            .await
            .map_err(|e| CatalogError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CatalogError::Http {
                status: status.as_u16(),
                body: read_body(response).await,
            });
        }

        response
            .json::<Vec<CatalogEntry>>()
            .await
            .map_err(|e| CatalogError::Transport(e.to_string()))
    }
}

#[async_trait]
impl GenerationBackend for HttpBackend {
    /// Sends `POST /generate`.
    ///
    /// A `{ "error": ... }` body is a rejection whatever the status code.
    /// Server errors without such a body count as transport failures.
    async fn submit(&self, request: &GenerateRequest) -> Result<JobHandle, SubmissionError> {
        let response = self
            .client
            .post(self.url("/generate"))
            .json(request)
            .send()
            .await
            .map_err(|e| SubmissionError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| SubmissionError::Transport(e.to_string()))?;

        match serde_json::from_str::<GenerateResponse>(&body) {
            Ok(GenerateResponse::Rejected { error }) => Err(SubmissionError::BackendRejected(error)),
            Ok(GenerateResponse::Accepted { task_id }) if status.is_success() => {
                Ok(JobHandle::new(task_id))
            }
            Ok(GenerateResponse::Accepted { .. }) => Err(SubmissionError::BackendRejected(
                format!("HTTP {} with a task id", status.as_u16()),
            )),
            Err(_) if status.is_server_error() => Err(SubmissionError::Transport(format!(
                "HTTP {}: {body}",
                status.as_u16()
            ))),
            Err(e) => Err(SubmissionError::BackendRejected(format!(
                "unexpected response (HTTP {}): {e}",
                status.as_u16()
            ))),
        }
    }

    /// Sends `GET /tasks/{task_id}/status`.
    ///
    /// A status document is accepted whatever the status code, so a
    /// failure the backend explains with an error status keeps its reason.
    async fn fetch_status(&self, job: &JobHandle) -> Result<JobStatusSnapshot, PollError> {
        let response = self
            .client
            .get(self.status_url(job)?)
            .send()
            .await
            .map_err(|e| PollError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| PollError::Transport(e.to_string()))?;

        match serde_json::from_str::<StatusResponse>(&body) {
            Ok(wire) => Ok(wire.into()),
            Err(_) if !status.is_success() => Err(PollError::Http {
                status: status.as_u16(),
                body,
            }),
            Err(e) => Err(PollError::Decode(e.to_string())),
        }
    }

    async fn styles(&self) -> Result<Vec<CatalogEntry>, CatalogError> {
        self.fetch_catalog("/styles").await
    }

    async fn lora_models(&self) -> Result<Vec<CatalogEntry>, CatalogError> {
        self.fetch_catalog("/lora_models").await
    }
}

#[async_trait]
impl AutosaveHook for HttpBackend {
    /// Sends `POST /autosave`. The response body is ignored.
    async fn autosave(&self, request: &AutosaveRequest) -> Result<(), AutosaveError> {
        let response = self
            .client
            .post(self.url("/autosave"))
            .json(request)
            .send()
            .await
            .map_err(|e| AutosaveError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AutosaveError(format!(
                "HTTP {}: {}",
                status.as_u16(),
                read_body(response).await
            )));
        }
        Ok(())
    }
}

/// Read a response body for error reporting.
async fn read_body(response: reqwest::Response) -> String {
    response
        .text()
        .await
        .unwrap_or_else(|_| "<unreadable body>".to_string())
}
