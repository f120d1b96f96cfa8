//! Pipeline execution and the human-in-the-loop feedback path.
//!
//! One code path runs every invocation, whether the caller waits inline or
//! the job goes through the background queue. The queue is bounded and the
//! worker pool is a semaphore: at most `workers` invocations run at once,
//! the rest wait in the channel.
//!
//! All job mutations go through the store's validated transitions, so a
//! finished invocation racing a feedback submission resolves to exactly one
//! winner instead of a clobbered record.

use std::sync::Arc;

use anyhow::{Result, anyhow};
use serde_json::{Value, json};
use thiserror::Error;
use tokio::sync::{Semaphore, mpsc};
use tracing::{error, info, warn};

use crate::config::AppConfig;
use crate::core::job::store::JobStore;
use crate::core::job::{Job, JobInputs, JobPatch, JobStatus, RetryContext};
use crate::core::pipeline::{PipelineRegistry, normalize, signals_approval};
use crate::core::webhook::WebhookNotifier;

/// One unit of work for the pool. Inputs here are already sanitized: the
/// `require_approval` flag has been lifted out of them by the caller.
#[derive(Debug, Clone)]
pub struct ExecuteRequest {
    pub job_id: String,
    pub pipeline: String,
    pub inputs: JobInputs,
    pub require_approval: bool,
}

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("unknown pipeline: {0}")]
    UnknownPipeline(String),
    #[error("{0}")]
    Config(String),
    #[error(transparent)]
    Execution(#[from] anyhow::Error),
}

impl ExecError {
    /// The `error_type` recorded on the job and sent in webhooks.
    pub fn kind(&self) -> &'static str {
        match self {
            ExecError::UnknownPipeline(_) => "PipelineNotFound",
            ExecError::Config(_) => "ConfigurationError",
            ExecError::Execution(_) => "ExecutionError",
        }
    }
}

#[derive(Debug, Error)]
pub enum FeedbackError {
    #[error("Job not found")]
    NotFound,
    #[error("job is not awaiting approval (current status: {})", .0.as_str())]
    InvalidState(JobStatus),
    #[error("feedback text is required when not approving")]
    MissingFeedback,
    #[error("job has no saved invocation to retry")]
    MissingRetryContext,
}

/// Everything an invocation needs, shared across the pool.
pub struct ExecutorCtx {
    pub store: Arc<dyn JobStore>,
    pub registry: Arc<PipelineRegistry>,
    pub notifier: WebhookNotifier,
    pub config: Arc<AppConfig>,
}

#[derive(Clone)]
pub struct ExecutorHandle {
    tx: mpsc::Sender<ExecuteRequest>,
    ctx: Arc<ExecutorCtx>,
}

/// Start the dispatcher and hand back the submission handle.
pub fn spawn_executor(ctx: ExecutorCtx, workers: usize, queue_depth: usize) -> ExecutorHandle {
    let ctx = Arc::new(ctx);
    let (tx, mut rx) = mpsc::channel::<ExecuteRequest>(queue_depth.max(1));
    let permits = Arc::new(Semaphore::new(workers.max(1)));

    let pool_ctx = ctx.clone();
    tokio::spawn(async move {
        while let Some(request) = rx.recv().await {
            let Ok(permit) = permits.clone().acquire_owned().await else {
                break;
            };
            let ctx = pool_ctx.clone();
            tokio::spawn(async move {
                run_invocation(&ctx, request).await;
                drop(permit);
            });
        }
    });

    ExecutorHandle { tx, ctx }
}

impl ExecutorHandle {
    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.ctx.store
    }

    /// Hand a job to the background pool. Applies backpressure when the
    /// queue is full rather than dropping work.
    pub async fn enqueue(&self, request: ExecuteRequest) -> Result<()> {
        self.tx
            .send(request)
            .await
            .map_err(|_| anyhow!("executor is shut down"))
    }

    /// Run the invocation inline and return the final record. The record is
    /// only absent if the job was deleted mid-flight.
    pub async fn run_blocking(&self, request: ExecuteRequest) -> Option<Job> {
        let job_id = request.job_id.clone();
        run_invocation(&self.ctx, request).await;
        self.ctx.store.get(&job_id)
    }

    /// Resolve a feedback submission against a `pending_approval` job.
    ///
    /// Approval completes the job as-is. A revision merges the feedback into
    /// the saved inputs and re-queues the invocation, so the pipeline sees
    /// the reviewer's notes on its next run.
    pub async fn submit_feedback(
        &self,
        job_id: &str,
        feedback: Option<String>,
        approved: bool,
    ) -> Result<Job, FeedbackError> {
        let job = self.ctx.store.get(job_id).ok_or(FeedbackError::NotFound)?;
        if job.status != JobStatus::PendingApproval {
            return Err(FeedbackError::InvalidState(job.status));
        }

        if approved {
            let patch = JobPatch {
                feedback: feedback.clone(),
                human_approved: Some(true),
                touch_feedback_at: true,
                ..JobPatch::default()
            };
            let job = self
                .ctx
                .store
                .transition(job_id, JobStatus::Completed, patch)
                .map_err(|_| FeedbackError::InvalidState(JobStatus::Completed))?;
            info!("job {} approved by reviewer", job_id);
            if let Some(url) = job.webhook_url.clone() {
                self.ctx
                    .notifier
                    .notify(
                        &url,
                        &json!({
                            "job_id": job.id,
                            "status": job.status,
                            "approved": true,
                            "feedback": job.feedback,
                            "completed_at": job.completed_at,
                        }),
                    )
                    .await;
            }
            return Ok(job);
        }

        let feedback = feedback
            .filter(|f| !f.trim().is_empty())
            .ok_or(FeedbackError::MissingFeedback)?;
        let retry = job.retry.clone().ok_or(FeedbackError::MissingRetryContext)?;

        let mut inputs = retry.inputs;
        inputs.insert("feedback".to_string(), Value::String(feedback.clone()));

        let patch = JobPatch {
            feedback: Some(feedback),
            human_approved: Some(false),
            touch_feedback_at: true,
            ..JobPatch::default()
        };
        let job = self
            .ctx
            .store
            .transition(job_id, JobStatus::Processing, patch)
            .map_err(|_| FeedbackError::InvalidState(JobStatus::Processing))?;
        info!("job {} sent back for revision", job_id);

        self.enqueue(ExecuteRequest {
            job_id: job_id.to_string(),
            pipeline: retry.pipeline,
            inputs,
            require_approval: retry.require_approval,
        })
        .await
        .map_err(|_| FeedbackError::MissingRetryContext)?;

        Ok(job)
    }
}

/// Drive one invocation from `processing` to a settled state.
pub async fn run_invocation(ctx: &ExecutorCtx, request: ExecuteRequest) {
    let job_id = request.job_id.clone();
    if let Err(e) = ctx
        .store
        .transition(&job_id, JobStatus::Processing, JobPatch::default())
    {
        // Deleted or already settled by a racing writer; nothing to run.
        warn!("job {} skipped: {}", job_id, e);
        return;
    }
    info!("job {} running pipeline {}", job_id, request.pipeline);

    match execute_pipeline(ctx, &request).await {
        Ok(result) => {
            if request.require_approval && signals_approval(&result) {
                let retry = RetryContext {
                    pipeline: request.pipeline.clone(),
                    inputs: request.inputs.clone(),
                    require_approval: true,
                };
                let patch = JobPatch {
                    result: Some(result),
                    retry: Some(retry),
                    ..JobPatch::default()
                };
                match ctx.store.transition(&job_id, JobStatus::PendingApproval, patch) {
                    Ok(job) => {
                        info!("job {} awaiting human approval", job_id);
                        notify(ctx, &job, json!({
                            "job_id": job.id,
                            "status": job.status,
                            "pipeline": job.pipeline,
                            "result": job.result,
                        }))
                        .await;
                    }
                    Err(e) => warn!("job {} could not pause for approval: {}", job_id, e),
                }
            } else {
                let patch = JobPatch {
                    result: Some(result),
                    ..JobPatch::default()
                };
                match ctx.store.transition(&job_id, JobStatus::Completed, patch) {
                    Ok(job) => {
                        info!("job {} completed", job_id);
                        notify(ctx, &job, json!({
                            "job_id": job.id,
                            "status": job.status,
                            "pipeline": job.pipeline,
                            "completed_at": job.completed_at,
                            "result": job.result,
                        }))
                        .await;
                    }
                    Err(e) => warn!("job {} could not complete: {}", job_id, e),
                }
            }
        }
        Err(e) => {
            error!("job {} failed: {}", job_id, e);
            let patch = JobPatch {
                error: Some(e.to_string()),
                error_type: Some(e.kind().to_string()),
                ..JobPatch::default()
            };
            match ctx.store.transition(&job_id, JobStatus::Error, patch) {
                Ok(job) => {
                    notify(ctx, &job, json!({
                        "job_id": job.id,
                        "status": job.status,
                        "error": job.error,
                        "error_type": job.error_type,
                    }))
                    .await;
                }
                Err(e) => warn!("job {} could not record failure: {}", job_id, e),
            }
        }
    }
}

async fn execute_pipeline(
    ctx: &ExecutorCtx,
    request: &ExecuteRequest,
) -> Result<serde_json::Map<String, Value>, ExecError> {
    let pipeline = ctx
        .registry
        .get(&request.pipeline)
        .ok_or_else(|| ExecError::UnknownPipeline(request.pipeline.clone()))?;

    ctx.config
        .require(pipeline.required_config())
        .map_err(ExecError::Config)?;

    let output = pipeline.kickoff(&request.inputs).await?;
    Ok(normalize(output))
}

async fn notify(ctx: &ExecutorCtx, job: &Job, payload: Value) {
    if let Some(url) = &job.webhook_url {
        ctx.notifier.notify(url, &payload).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::Map;

    use crate::config::ConfigKey;
    use crate::core::job::store::MemoryJobStore;
    use crate::core::pipeline::{NEEDS_APPROVAL, Pipeline, PipelineOutput};

    /// Always asks for the approval pause and records what it was given.
    struct Draft {
        calls: Arc<AtomicUsize>,
        last_feedback: Arc<std::sync::Mutex<Option<String>>>,
    }

    #[async_trait]
    impl Pipeline for Draft {
        fn name(&self) -> &'static str {
            "Draft"
        }

        async fn kickoff(&self, inputs: &JobInputs) -> Result<PipelineOutput> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_feedback.lock().unwrap() = inputs
                .get("feedback")
                .and_then(Value::as_str)
                .map(str::to_string);
            Ok(PipelineOutput::Structured(json!({
                "status": NEEDS_APPROVAL,
                "content": "draft text",
            })))
        }
    }

    struct NeedsKey;

    #[async_trait]
    impl Pipeline for NeedsKey {
        fn name(&self) -> &'static str {
            "NeedsKey"
        }

        fn required_config(&self) -> &'static [ConfigKey] {
            &[ConfigKey::OpenAiApiKey]
        }

        async fn kickoff(&self, _inputs: &JobInputs) -> Result<PipelineOutput> {
            unreachable!("must fail the config check before running")
        }
    }

    struct Harness {
        handle: ExecutorHandle,
        calls: Arc<AtomicUsize>,
        last_feedback: Arc<std::sync::Mutex<Option<String>>>,
    }

    fn harness() -> Harness {
        let calls = Arc::new(AtomicUsize::new(0));
        let last_feedback = Arc::new(std::sync::Mutex::new(None));
        let config = Arc::new(AppConfig::default());
        let mut registry = PipelineRegistry::builtin(&config);
        registry.register(Arc::new(Draft {
            calls: calls.clone(),
            last_feedback: last_feedback.clone(),
        }));
        registry.register(Arc::new(NeedsKey));
        let ctx = ExecutorCtx {
            store: Arc::new(MemoryJobStore::new()),
            registry: Arc::new(registry),
            notifier: WebhookNotifier::new(None),
            config,
        };
        Harness {
            handle: spawn_executor(ctx, 2, 8),
            calls,
            last_feedback,
        }
    }

    fn request(job: &Job, require_approval: bool) -> ExecuteRequest {
        ExecuteRequest {
            job_id: job.id.clone(),
            pipeline: job.pipeline.clone(),
            inputs: job.inputs.clone(),
            require_approval,
        }
    }

    async fn wait_for_status(handle: &ExecutorHandle, id: &str, status: JobStatus) -> Job {
        for _ in 0..200 {
            if let Some(job) = handle.store().get(id) {
                if job.status == status {
                    return job;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {} never reached {:?}", id, status);
    }

    #[tokio::test]
    async fn echo_job_completes_with_normalized_result() {
        let h = harness();
        let mut inputs = Map::new();
        inputs.insert("topic".to_string(), json!("hello"));
        let job = h.handle.store().create("Echo", inputs, None);

        let done = h.handle.run_blocking(request(&job, false)).await.unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert!(done.completed_at.is_some());
        let result = done.result.unwrap();
        assert_eq!(result["content"], "hello");
        assert_eq!(result["length"], 5);
    }

    #[tokio::test]
    async fn approval_signal_pauses_then_approve_completes_without_rerun() {
        let h = harness();
        let job = h.handle.store().create("Draft", Map::new(), None);

        let paused = h.handle.run_blocking(request(&job, true)).await.unwrap();
        assert_eq!(paused.status, JobStatus::PendingApproval);
        assert!(paused.retry.is_some());
        assert_eq!(h.calls.load(Ordering::SeqCst), 1);

        let approved = h
            .handle
            .submit_feedback(&job.id, Some("ship it".to_string()), true)
            .await
            .unwrap();
        assert_eq!(approved.status, JobStatus::Completed);
        assert_eq!(approved.human_approved, Some(true));
        assert!(approved.feedback_at.is_some());
        // Approval keeps the existing result, it does not re-run the pipeline
        assert_eq!(h.calls.load(Ordering::SeqCst), 1);
        assert_eq!(approved.result.unwrap()["content"], "draft text");
    }

    #[tokio::test]
    async fn rejection_reruns_the_pipeline_with_feedback_merged_in() {
        let h = harness();
        let job = h.handle.store().create("Draft", Map::new(), None);
        h.handle.run_blocking(request(&job, true)).await.unwrap();

        let revising = h
            .handle
            .submit_feedback(&job.id, Some("shorten it".to_string()), false)
            .await
            .unwrap();
        assert_eq!(revising.status, JobStatus::Processing);
        assert_eq!(revising.human_approved, Some(false));

        // The retry lands back in pending_approval since Draft always pauses
        wait_for_status(&h.handle, &job.id, JobStatus::PendingApproval).await;
        assert_eq!(h.calls.load(Ordering::SeqCst), 2);
        assert_eq!(
            h.last_feedback.lock().unwrap().as_deref(),
            Some("shorten it")
        );
    }

    #[tokio::test]
    async fn approval_signal_is_ignored_without_the_flag() {
        let h = harness();
        let job = h.handle.store().create("Draft", Map::new(), None);

        let done = h.handle.run_blocking(request(&job, false)).await.unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert!(done.retry.is_none());
    }

    #[tokio::test]
    async fn missing_credentials_fail_before_the_pipeline_runs() {
        let h = harness();
        let job = h.handle.store().create("NeedsKey", Map::new(), None);

        let failed = h.handle.run_blocking(request(&job, false)).await.unwrap();
        assert_eq!(failed.status, JobStatus::Error);
        assert_eq!(failed.error_type.as_deref(), Some("ConfigurationError"));
        assert!(failed.error.unwrap().contains("OPENAI_API_KEY"));
        assert!(failed.error_at.is_some());
    }

    #[tokio::test]
    async fn unknown_pipeline_fails_with_its_own_error_type() {
        let h = harness();
        let job = h.handle.store().create("NoSuchCrew", Map::new(), None);

        let failed = h.handle.run_blocking(request(&job, false)).await.unwrap();
        assert_eq!(failed.status, JobStatus::Error);
        assert_eq!(failed.error_type.as_deref(), Some("PipelineNotFound"));
    }

    #[tokio::test]
    async fn feedback_is_rejected_outside_pending_approval() {
        let h = harness();
        let job = h.handle.store().create("Echo", Map::new(), None);

        let err = h
            .handle
            .submit_feedback(&job.id, Some("x".to_string()), true)
            .await
            .unwrap_err();
        assert!(matches!(err, FeedbackError::InvalidState(JobStatus::Queued)));

        let err = h
            .handle
            .submit_feedback("nonexistent", None, true)
            .await
            .unwrap_err();
        assert!(matches!(err, FeedbackError::NotFound));
    }

    #[tokio::test]
    async fn approving_an_already_completed_job_is_rejected() {
        let h = harness();
        let job = h.handle.store().create("Draft", Map::new(), None);
        h.handle.run_blocking(request(&job, true)).await.unwrap();
        h.handle
            .submit_feedback(&job.id, None, true)
            .await
            .unwrap();

        let err = h
            .handle
            .submit_feedback(&job.id, None, true)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            FeedbackError::InvalidState(JobStatus::Completed)
        ));
    }

    #[tokio::test]
    async fn rejection_without_text_is_refused() {
        let h = harness();
        let job = h.handle.store().create("Draft", Map::new(), None);
        h.handle.run_blocking(request(&job, true)).await.unwrap();

        let err = h.handle.submit_feedback(&job.id, None, false).await.unwrap_err();
        assert!(matches!(err, FeedbackError::MissingFeedback));

        let err = h
            .handle
            .submit_feedback(&job.id, Some("  ".to_string()), false)
            .await
            .unwrap_err();
        assert!(matches!(err, FeedbackError::MissingFeedback));
    }

    #[tokio::test]
    async fn background_queue_runs_enqueued_jobs() {
        let h = harness();
        let mut inputs = Map::new();
        inputs.insert("topic".to_string(), json!("queued run"));
        let job = h.handle.store().create("Echo", inputs, None);

        h.handle.enqueue(request(&job, false)).await.unwrap();
        let done = wait_for_status(&h.handle, &job.id, JobStatus::Completed).await;
        assert_eq!(done.result.unwrap()["content"], "queued run");
    }
}
