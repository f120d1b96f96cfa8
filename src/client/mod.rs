//! Client for the crewd HTTP API.
//!
//! Mirrors the server's polling contract: a kicked-off job is polled every
//! two seconds up to thirty times, the attempt budget resets after each
//! feedback round, and a job with a webhook receiver is not polled at all.

pub mod blocking;

use std::time::Duration;

use anyhow::{Result, anyhow};
use reqwest::StatusCode;
use serde_json::{Value, json};
use tracing::debug;

use crate::core::job::JobInputs;

pub const POLL_DELAY: Duration = Duration::from_secs(2);
pub const MAX_POLL_ATTEMPTS: u32 = 30;

#[derive(Debug, Clone)]
pub struct PollOptions {
    pub delay: Duration,
    pub max_attempts: u32,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            delay: POLL_DELAY,
            max_attempts: MAX_POLL_ATTEMPTS,
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct KickoffOptions {
    pub inputs: JobInputs,
    pub require_approval: bool,
    pub webhook_url: Option<String>,
    pub wait: bool,
}

/// How a polling round ended. `StillProcessing` means the attempt budget ran
/// out while the job was live; the job may still finish on the server.
#[derive(Debug, Clone)]
pub enum PollOutcome {
    Completed(Value),
    Failed { error: String },
    PendingApproval(Value),
    StillProcessing,
}

/// A reviewer's answer to a `pending_approval` job.
#[derive(Debug, Clone)]
pub enum ReviewDecision {
    Approve,
    Revise(String),
    Abort,
}

pub struct JobClient {
    base_url: String,
    http: reqwest::Client,
}

impl JobClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    pub async fn kickoff(&self, pipeline: &str, options: &KickoffOptions) -> Result<Value> {
        let mut inputs = options.inputs.clone();
        if options.require_approval {
            inputs.insert("require_approval".to_string(), json!(true));
        }
        let body = json!({
            "pipeline": pipeline,
            "inputs": inputs,
            "webhook_url": options.webhook_url,
            "wait": options.wait,
        });
        let response = self
            .http
            .post(format!("{}/kickoff", self.base_url))
            .json(&body)
            .send()
            .await?;
        let status = response.status();
        let json: Value = response.json().await?;
        if !status.is_success() {
            return Err(anyhow!(
                "kickoff failed ({}): {}",
                status,
                json["error"].as_str().unwrap_or("unknown error")
            ));
        }
        Ok(json)
    }

    /// Fetch one job. `Ok(None)` means the server does not know it.
    pub async fn job(&self, job_id: &str) -> Result<Option<Value>> {
        let response = self
            .http
            .get(format!("{}/job/{}", self.base_url, job_id))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Ok(Some(response.error_for_status()?.json().await?))
    }

    pub async fn jobs(&self, status: Option<&str>, limit: Option<usize>) -> Result<Value> {
        let mut query: Vec<(&str, String)> = Vec::new();
        if let Some(status) = status {
            query.push(("status", status.to_string()));
        }
        if let Some(limit) = limit {
            query.push(("limit", limit.to_string()));
        }
        let response = self
            .http
            .get(format!("{}/jobs", self.base_url))
            .query(&query)
            .send()
            .await?;
        Ok(response.error_for_status()?.json().await?)
    }

    pub async fn submit_feedback(
        &self,
        job_id: &str,
        feedback: Option<&str>,
        approved: bool,
    ) -> Result<Value> {
        let response = self
            .http
            .post(format!("{}/job/{}/feedback", self.base_url, job_id))
            .json(&json!({ "feedback": feedback, "approved": approved }))
            .send()
            .await?;
        let status = response.status();
        let json: Value = response.json().await?;
        if !status.is_success() {
            return Err(anyhow!(
                "feedback rejected ({}): {}",
                status,
                json["error"].as_str().unwrap_or("unknown error")
            ));
        }
        Ok(json)
    }

    pub async fn delete_job(&self, job_id: &str) -> Result<bool> {
        let response = self
            .http
            .delete(format!("{}/job/{}", self.base_url, job_id))
            .send()
            .await?;
        Ok(response.status().is_success())
    }

    pub async fn health(&self) -> Result<Value> {
        let response = self
            .http
            .get(format!("{}/health", self.base_url))
            .send()
            .await?;
        Ok(response.error_for_status()?.json().await?)
    }

    /// Poll until the job settles or the attempt budget runs out.
    pub async fn poll_until_settled(
        &self,
        job_id: &str,
        options: &PollOptions,
    ) -> Result<PollOutcome> {
        for attempt in 1..=options.max_attempts {
            let job = self
                .job(job_id)
                .await?
                .ok_or_else(|| anyhow!("job {} disappeared while polling", job_id))?;
            debug!(
                "[{}/{}] job {} status: {}",
                attempt,
                options.max_attempts,
                job_id,
                job["status"].as_str().unwrap_or("?")
            );
            if let Some(outcome) = settle(&job) {
                return Ok(outcome);
            }
            tokio::time::sleep(options.delay).await;
        }
        Ok(PollOutcome::StillProcessing)
    }

    /// Drive the full human-in-the-loop loop. Each feedback round restarts
    /// the polling budget; `Abort` hands the paused job back untouched.
    pub async fn run_hitl<F>(
        &self,
        job_id: &str,
        options: &PollOptions,
        mut review: F,
    ) -> Result<PollOutcome>
    where
        F: FnMut(&Value) -> ReviewDecision,
    {
        loop {
            match self.poll_until_settled(job_id, options).await? {
                PollOutcome::PendingApproval(job) => match review(&job) {
                    ReviewDecision::Approve => {
                        self.submit_feedback(job_id, None, true).await?;
                    }
                    ReviewDecision::Revise(feedback) => {
                        self.submit_feedback(job_id, Some(&feedback), false).await?;
                    }
                    ReviewDecision::Abort => return Ok(PollOutcome::PendingApproval(job)),
                },
                outcome => return Ok(outcome),
            }
        }
    }
}

/// Classify a job record: `Some` when polling should stop.
fn settle(job: &Value) -> Option<PollOutcome> {
    match job["status"].as_str() {
        Some("completed") => Some(PollOutcome::Completed(job.clone())),
        Some("error") => Some(PollOutcome::Failed {
            error: job["error"]
                .as_str()
                .unwrap_or("unknown error")
                .to_string(),
        }),
        Some("pending_approval") => Some(PollOutcome::PendingApproval(job.clone())),
        _ => None,
    }
}
