use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use crate::error::AppError;

/// Canonical lifecycle states of a generation job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Whether polling stops at this status.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = AppError;

    /// Parses an upstream status string, case-insensitively and with the
    /// queue service's aliases. Anything unrecognised is a protocol error.
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "queued" | "in_queue" => Ok(JobStatus::Queued),
            "processing" | "in_progress" => Ok(JobStatus::Processing),
            "completed" | "ok" => Ok(JobStatus::Completed),
            "failed" | "error" => Ok(JobStatus::Failed),
            "cancelled" | "canceled" => Ok(JobStatus::Cancelled),
            _ => Err(AppError::external(
                "unknown_status",
                format!("unknown generation status: {}", raw),
            )),
        }
    }
}

/// One produced output of a generation job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
}

/// Structured reason attached to a failed or cancelled job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    pub code: String,
    pub message: String,
}

/// Answer of the queue right after submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueReceipt {
    pub request_id: String,
    pub status: JobStatus,
}

/// A normalized status check.
///
/// `artifacts` is only populated for `Completed`; `error` only for
/// `Failed` and `Cancelled`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusReport {
    pub request_id: String,
    pub status: JobStatus,
    pub artifacts: Vec<Artifact>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,
}

/// What the caller asks to generate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub model: String,
    pub prompt: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
}

impl GenerationRequest {
    pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            parameters: Map::new(),
        }
    }

    /// Adds one parameter, builder style.
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }
}

/// A completed generation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationResponse {
    pub request_id: String,
    /// The registry name of the model, without vendor prefix.
    pub model: String,
    pub artifacts: Vec<Artifact>,
    /// `cost_per_unit * artifacts.len()`.
    pub cost: f64,
    pub elapsed: Duration,
}

/// Result of an explicit cancel request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelOutcome {
    /// The queue accepted the cancellation.
    Cancelled,
    /// The job had already finished; nothing was cancelled.
    AlreadyTerminal,
}
