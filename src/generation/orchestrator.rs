use std::sync::Arc;
use std::time::{Duration, Instant};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use crate::config::Config;
use crate::error::{AppError, Result};
use crate::generation::model_id::ModelRoute;
use crate::generation::registry::{self, ModelSpec};
use crate::generation::transport::{HttpQueueTransport, QueueTransport};
use crate::models::generation::{
    CancelOutcome, GenerationRequest, GenerationResponse, JobError, JobStatus, QueueReceipt, StatusReport,
};

/// Drives generation jobs through the external queue.
///
/// Model identifiers are resolved into a [`ModelRoute`] exactly once, at
/// the public entry points; everything below works on the route.
#[derive(Clone)]
pub struct GenerationOrchestrator {
    transport: Arc<dyn QueueTransport>,
    poll_interval: Duration,
    deadline: Duration,
}

impl GenerationOrchestrator {
    /// Creates an orchestrator talking HTTP to `config.generation_base_url`.
    pub fn new(config: &Config) -> Result<Self> {
        let transport = HttpQueueTransport::new(config)?;
        Ok(Self::with_transport(
            Arc::new(transport),
            config.poll_interval,
            config.generation_deadline,
        ))
    }

    /// Creates an orchestrator over any transport.
    pub fn with_transport(
        transport: Arc<dyn QueueTransport>,
        poll_interval: Duration,
        deadline: Duration,
    ) -> Self {
        Self {
            transport,
            poll_interval,
            deadline,
        }
    }

    /// The default polling deadline.
    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Validates `params` for `model` and returns the normalized parameters.
    pub fn validate(&self, model: &str, params: &Map<String, Value>) -> Result<Map<String, Value>> {
        let route = ModelRoute::resolve(model)?;
        registry::require_model(route.model())?.validate(params)
    }

    /// Submits a job and returns the queue's receipt.
    ///
    /// Never retried: a failed submission is surfaced as-is.
    pub async fn submit(&self, credential: &str, request: &GenerationRequest) -> Result<QueueReceipt> {
        let route = ModelRoute::resolve(&request.model)?;
        let spec = registry::require_model(route.model())?;
        self.submit_route(credential, &route, spec, request).await
    }

    /// Checks a job's status once.
    ///
    /// A `Completed` report always carries its artifacts: when the status
    /// response does not inline them they are fetched from the result
    /// endpoint, and a job with none is a `missing_result` error.
    pub async fn check_status(&self, credential: &str, model: &str, request_id: &str) -> Result<StatusReport> {
        let route = ModelRoute::resolve(model)?;
        require_credential(credential)?;
        require_request_id(request_id)?;
        self.status_route(credential, &route, request_id).await
    }

    /// Polls a job until it reaches a terminal status, `deadline` elapses
    /// (the configured default when `None`), or `cancel` fires.
    ///
    /// A timeout leaves the remote job running.
    pub async fn wait_for_completion(
        &self,
        credential: &str,
        model: &str,
        request_id: &str,
        deadline: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<GenerationResponse> {
        let route = ModelRoute::resolve(model)?;
        let spec = registry::require_model(route.model())?;
        require_credential(credential)?;
        require_request_id(request_id)?;

        let started = Instant::now();
        self.poll(credential, &route, spec, request_id, deadline.unwrap_or(self.deadline), cancel, started)
            .await
    }

    /// Requests cancellation of a job.
    pub async fn cancel(&self, credential: &str, model: &str, request_id: &str) -> Result<CancelOutcome> {
        let route = ModelRoute::resolve(model)?;
        require_credential(credential)?;
        require_request_id(request_id)?;

        let outcome = self.transport.cancel(credential, &route, request_id).await?;
        tracing::info!("🛑 Cancel of generation {} ({}): {:?}", request_id, route.model(), outcome);
        Ok(outcome)
    }

    /// Checks that the generation service accepts `credential`.
    pub async fn verify_credential(&self, credential: &str) -> Result<()> {
        require_credential(credential)?;
        self.transport.probe(credential).await
    }

    /// Submits a job and waits for its result.
    ///
    /// `deadline` bounds the wait after submission; `None` uses the
    /// configured default.
    pub async fn generate(
        &self,
        credential: &str,
        request: &GenerationRequest,
        deadline: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<GenerationResponse> {
        let started = Instant::now();
        let route = ModelRoute::resolve(&request.model)?;
        let spec = registry::require_model(route.model())?;

        let receipt = self.submit_route(credential, &route, spec, request).await?;
        self.poll(
            credential,
            &route,
            spec,
            &receipt.request_id,
            deadline.unwrap_or(self.deadline),
            cancel,
            started,
        )
        .await
    }

    async fn submit_route(
        &self,
        credential: &str,
        route: &ModelRoute,
        spec: &ModelSpec,
        request: &GenerationRequest,
    ) -> Result<QueueReceipt> {
        require_credential(credential)?;
        if request.prompt.trim().is_empty() {
            return Err(AppError::Validation("prompt cannot be empty".to_string()));
        }

        let mut body = spec.validate(&request.parameters)?;
        body.insert("prompt".to_string(), Value::String(request.prompt.clone()));

        let receipt = self.transport.submit(credential, route, &body).await?;
        tracing::info!("🎨 Submitted generation {} for model {}", receipt.request_id, route.model());
        Ok(receipt)
    }

    async fn status_route(&self, credential: &str, route: &ModelRoute, request_id: &str) -> Result<StatusReport> {
        let mut report = self.transport.status(credential, route, request_id).await?;
        if report.status == JobStatus::Completed && report.artifacts.is_empty() {
            report.artifacts = self.transport.result(credential, route, request_id).await?;
            if report.artifacts.is_empty() {
                return Err(AppError::external(
                    "missing_result",
                    "generation completed without results",
                ));
            }
        }
        Ok(report)
    }

    #[allow(clippy::too_many_arguments)]
    async fn poll(
        &self,
        credential: &str,
        route: &ModelRoute,
        spec: &ModelSpec,
        request_id: &str,
        deadline: Duration,
        cancel: &CancellationToken,
        started: Instant,
    ) -> Result<GenerationResponse> {
        let waiting_since = Instant::now();
        let deadline_at = tokio::time::Instant::now() + deadline;
        let timeout = || AppError::Timeout {
            request_id: request_id.to_string(),
            waited: waiting_since.elapsed(),
        };

        loop {
            let report = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(AppError::Aborted),
                _ = tokio::time::sleep_until(deadline_at) => return Err(timeout()),
                report = self.status_route(credential, route, request_id) => report?,
            };

            match report.status {
                JobStatus::Completed => {
                    let artifacts = report.artifacts;
                    let cost = spec.cost_for(artifacts.len());
                    return Ok(GenerationResponse {
                        request_id: request_id.to_string(),
                        model: route.model().to_string(),
                        artifacts,
                        cost,
                        elapsed: started.elapsed(),
                    });
                }
                JobStatus::Failed => {
                    let error = report.error.unwrap_or_else(|| JobError {
                        code: "generation_failed".to_string(),
                        message: "generation failed".to_string(),
                    });
                    return Err(AppError::JobFailed {
                        request_id: request_id.to_string(),
                        code: error.code,
                        message: error.message,
                    });
                }
                JobStatus::Cancelled => {
                    return Err(AppError::JobCancelled {
                        request_id: request_id.to_string(),
                    });
                }
                JobStatus::Queued | JobStatus::Processing => {
                    tracing::debug!("⏳ Generation {} is {}", request_id, report.status);
                }
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(AppError::Aborted),
                _ = tokio::time::sleep_until(deadline_at) => return Err(timeout()),
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }
}

fn require_credential(credential: &str) -> Result<()> {
    if credential.is_empty() {
        return Err(AppError::Validation("credential cannot be empty".to_string()));
    }
    Ok(())
}

fn require_request_id(request_id: &str) -> Result<()> {
    if request_id.is_empty() {
        return Err(AppError::Validation("request ID cannot be empty".to_string()));
    }
    Ok(())
}
