use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{Map, Value};
use crate::config::Config;
use crate::error::{AppError, Result};
use crate::generation::model_id::ModelRoute;
use crate::models::generation::{Artifact, CancelOutcome, JobError, JobStatus, QueueReceipt, StatusReport};

/// Request id used by the credential probe; no job ever carries it.
const PROBE_REQUEST_ID: &str = "00000000-0000-0000-0000-000000000000";
/// Model family used by the credential probe.
const PROBE_MODEL: &str = "flux/schnell";

/// Wire access to the generation queue.
///
/// Every call receives the plaintext credential for that single request;
/// implementations must not retain it.
#[async_trait]
pub trait QueueTransport: Send + Sync {
    /// Enqueues a job. `body` is sent as-is as the flat JSON request body.
    async fn submit(
        &self,
        credential: &str,
        route: &ModelRoute,
        body: &Map<String, Value>,
    ) -> Result<QueueReceipt>;

    /// Fetches the current status of a job.
    async fn status(&self, credential: &str, route: &ModelRoute, request_id: &str) -> Result<StatusReport>;

    /// Fetches the outputs of a completed job.
    async fn result(&self, credential: &str, route: &ModelRoute, request_id: &str) -> Result<Vec<Artifact>>;

    /// Asks the queue to cancel a job.
    async fn cancel(&self, credential: &str, route: &ModelRoute, request_id: &str) -> Result<CancelOutcome>;

    /// Checks that the queue accepts `credential`, without creating a job.
    async fn probe(&self, credential: &str) -> Result<()>;
}

#[derive(Debug, Deserialize)]
struct SubmitBody {
    request_id: String,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatusBody {
    #[serde(default)]
    request_id: Option<String>,
    status: String,
    #[serde(default)]
    result: Option<ResultBody>,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct ResultBody {
    #[serde(default)]
    images: Vec<ImageBody>,
}

#[derive(Debug, Deserialize)]
struct ImageBody {
    url: String,
    #[serde(default)]
    thumbnail_url: Option<String>,
    #[serde(default)]
    width: Option<u32>,
    #[serde(default)]
    height: Option<u32>,
}

impl From<ImageBody> for Artifact {
    fn from(image: ImageBody) -> Self {
        Artifact {
            url: image.url,
            preview_url: image.thumbnail_url.filter(|u| !u.is_empty()),
            width: image.width,
            height: image.height,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    detail: Option<Value>,
}

impl ErrorBody {
    fn message(&self) -> Option<String> {
        if let Some(message) = &self.message {
            return Some(message.clone());
        }
        match &self.detail {
            Some(Value::String(s)) => Some(s.clone()),
            Some(other) => Some(other.to_string()),
            None => None,
        }
    }
}

/// Interprets the `error` member of a status body, which may be a bare
/// string or a `{code, message}` object.
fn job_error(raw: Option<Value>, fallback_code: &str, fallback_message: &str) -> JobError {
    let (code, message) = match raw {
        Some(Value::String(message)) if !message.is_empty() => (None, Some(message)),
        Some(value @ Value::Object(_)) => {
            let body: ErrorBody = serde_json::from_value(value).unwrap_or_default();
            let message = body.message();
            (body.code, message)
        }
        _ => (None, None),
    };

    JobError {
        code: code.unwrap_or_else(|| fallback_code.to_string()),
        message: message.unwrap_or_else(|| fallback_message.to_string()),
    }
}

/// Turns a non-success response into `AppError::External`.
async fn error_for(response: Response) -> AppError {
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    let body = serde_json::from_str::<ErrorBody>(&text).unwrap_or_default();

    let code = body.code.clone().unwrap_or_else(|| "http_error".to_string());
    let message = body
        .message()
        .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));

    tracing::error!(status = status.as_u16(), code = %code, message = %message, "❌ Generation service error");

    AppError::External {
        status: Some(status.as_u16()),
        code,
        message,
    }
}

fn is_already_terminal(text: &str) -> bool {
    let text = text.to_ascii_lowercase();
    ["already completed", "already_completed", "already finished", "already cancel", "not in queue"]
        .iter()
        .any(|needle| text.contains(needle))
}

/// `QueueTransport` over HTTPS with reqwest.
#[derive(Debug, Clone)]
pub struct HttpQueueTransport {
    client: Client,
    base_url: String,
}

impl HttpQueueTransport {
    /// Builds a transport pointed at `config.generation_base_url`.
    pub fn new(config: &Config) -> Result<Self> {
        Self::with_base_url(&config.generation_base_url, config.request_timeout)
    }

    /// Builds a transport against a custom base URL (tests, proxies).
    pub fn with_base_url(base_url: &str, timeout: std::time::Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn job_url(&self, route: &ModelRoute, request_id: &str) -> String {
        format!("{}/{}/requests/{}", self.base_url, route.status_path(), request_id)
    }

    fn authorized(&self, request: RequestBuilder, credential: &str) -> RequestBuilder {
        request.header(reqwest::header::AUTHORIZATION, format!("Key {}", credential))
    }
}

#[async_trait]
impl QueueTransport for HttpQueueTransport {
    async fn submit(
        &self,
        credential: &str,
        route: &ModelRoute,
        body: &Map<String, Value>,
    ) -> Result<QueueReceipt> {
        let url = format!("{}/{}", self.base_url, route.submit_path());
        let response = self
            .authorized(self.client.post(&url), credential)
            .json(body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_for(response).await);
        }

        let body: SubmitBody = response
            .json()
            .await
            .map_err(|e| AppError::external("invalid_response", format!("failed to parse submit response: {}", e)))?;

        if body.request_id.is_empty() {
            return Err(AppError::external("invalid_response", "submit response has no request_id"));
        }

        let status = match body.status.as_deref() {
            Some(raw) => raw.parse()?,
            None => JobStatus::Queued,
        };

        Ok(QueueReceipt {
            request_id: body.request_id,
            status,
        })
    }

    async fn status(&self, credential: &str, route: &ModelRoute, request_id: &str) -> Result<StatusReport> {
        let url = format!("{}/status", self.job_url(route, request_id));
        let response = self
            .authorized(self.client.get(&url), credential)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_for(response).await);
        }

        let body: StatusBody = response
            .json()
            .await
            .map_err(|e| AppError::external("invalid_response", format!("failed to parse status response: {}", e)))?;

        let status: JobStatus = body.status.parse()?;
        let (artifacts, error) = match status {
            JobStatus::Completed => (
                body.result
                    .unwrap_or_default()
                    .images
                    .into_iter()
                    .map(Artifact::from)
                    .collect(),
                None,
            ),
            JobStatus::Failed => (
                Vec::new(),
                Some(job_error(body.error, "generation_failed", "generation failed")),
            ),
            JobStatus::Cancelled => (
                Vec::new(),
                Some(job_error(body.error, "generation_cancelled", "generation was cancelled")),
            ),
            JobStatus::Queued | JobStatus::Processing => (Vec::new(), None),
        };

        Ok(StatusReport {
            request_id: body.request_id.unwrap_or_else(|| request_id.to_string()),
            status,
            artifacts,
            error,
        })
    }

    async fn result(&self, credential: &str, route: &ModelRoute, request_id: &str) -> Result<Vec<Artifact>> {
        let url = self.job_url(route, request_id);
        let response = self
            .authorized(self.client.get(&url), credential)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_for(response).await);
        }

        let body: ResultBody = response
            .json()
            .await
            .map_err(|e| AppError::external("invalid_response", format!("failed to parse result response: {}", e)))?;

        Ok(body.images.into_iter().map(Artifact::from).collect())
    }

    async fn cancel(&self, credential: &str, route: &ModelRoute, request_id: &str) -> Result<CancelOutcome> {
        let url = format!("{}/cancel", self.job_url(route, request_id));
        let response = self
            .authorized(self.client.put(&url), credential)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(CancelOutcome::Cancelled);
        }

        if status == StatusCode::BAD_REQUEST || status == StatusCode::CONFLICT {
            let text = response.text().await.unwrap_or_default();
            if is_already_terminal(&text) {
                return Ok(CancelOutcome::AlreadyTerminal);
            }
            let body = serde_json::from_str::<ErrorBody>(&text).unwrap_or_default();
            return Err(AppError::External {
                status: Some(status.as_u16()),
                code: body.code.clone().unwrap_or_else(|| "http_error".to_string()),
                message: body.message().unwrap_or_else(|| format!("HTTP {}", status.as_u16())),
            });
        }

        Err(error_for(response).await)
    }

    async fn probe(&self, credential: &str) -> Result<()> {
        let route = ModelRoute::resolve(PROBE_MODEL)?;
        let url = format!("{}/status", self.job_url(&route, PROBE_REQUEST_ID));
        let response = self
            .authorized(self.client.get(&url), credential)
            .send()
            .await?;

        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(AppError::Validation(
                "credential rejected by generation service".to_string(),
            )),
            _ => Ok(()),
        }
    }
}
