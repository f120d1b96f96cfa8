//! In-memory job store.
//!
//! Process-local and non-persistent: a restart loses every job. Each
//! mutation is one atomic read-modify-write under the write lock, and
//! `transition` re-checks the state machine against the stored status, so
//! two writers racing on the same job cannot silently lose an update —
//! the loser gets `StoreError::InvalidTransition` instead.

use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use thiserror::Error;
use uuid::Uuid;

use super::{Job, JobInputs, JobPatch, JobStatus, JobSummary, can_transition};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("job not found")]
    NotFound,
    #[error("invalid transition: {from:?} -> {to:?}")]
    InvalidTransition { from: JobStatus, to: JobStatus },
}

/// The single source of truth for job state. Injected into the HTTP layer
/// and the executor so tests can substitute their own instance.
pub trait JobStore: Send + Sync {
    fn create(&self, pipeline: &str, inputs: JobInputs, webhook_url: Option<String>) -> Job;
    fn get(&self, id: &str) -> Option<Job>;
    /// Merge non-status fields into the record.
    fn apply(&self, id: &str, patch: JobPatch) -> Result<Job, StoreError>;
    /// Move the job to `to` and merge `patch` in the same atomic step.
    /// Entering `Completed` sets `completed_at` once; entering `Error` sets
    /// `error_at` once.
    fn transition(&self, id: &str, to: JobStatus, patch: JobPatch) -> Result<Job, StoreError>;
    /// Newest-created first. Returns the page and the total matching count,
    /// so `limit = 0` still reports how many jobs exist.
    fn list(&self, status: Option<JobStatus>, limit: usize) -> (Vec<JobSummary>, usize);
    fn delete(&self, id: &str) -> bool;
    /// Jobs currently in `Processing`, for the health endpoint.
    fn active_count(&self) -> usize;
}

#[derive(Default)]
pub struct MemoryJobStore {
    jobs: RwLock<HashMap<String, Job>>,
    next_seq: AtomicU64,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn merge(job: &mut Job, patch: JobPatch) {
        if let Some(result) = patch.result {
            job.result = Some(result);
        }
        if let Some(error) = patch.error {
            job.error = Some(error);
        }
        if let Some(error_type) = patch.error_type {
            job.error_type = Some(error_type);
        }
        if let Some(retry) = patch.retry {
            job.retry = Some(retry);
        }
        if let Some(feedback) = patch.feedback {
            job.feedback = Some(feedback);
        }
        if let Some(approved) = patch.human_approved {
            job.human_approved = Some(approved);
        }
        if patch.touch_feedback_at {
            job.feedback_at = Some(Utc::now());
        }
    }
}

impl JobStore for MemoryJobStore {
    fn create(&self, pipeline: &str, inputs: JobInputs, webhook_url: Option<String>) -> Job {
        let job = Job {
            id: Uuid::new_v4().to_string(),
            pipeline: pipeline.to_string(),
            inputs,
            status: JobStatus::Queued,
            created_at: Utc::now(),
            completed_at: None,
            error_at: None,
            feedback_at: None,
            result: None,
            error: None,
            error_type: None,
            retry: None,
            webhook_url,
            feedback: None,
            human_approved: None,
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
        };
        self.jobs
            .write()
            .expect("job store lock poisoned")
            .insert(job.id.clone(), job.clone());
        job
    }

    fn get(&self, id: &str) -> Option<Job> {
        self.jobs.read().expect("job store lock poisoned").get(id).cloned()
    }

    fn apply(&self, id: &str, patch: JobPatch) -> Result<Job, StoreError> {
        let mut jobs = self.jobs.write().expect("job store lock poisoned");
        let job = jobs.get_mut(id).ok_or(StoreError::NotFound)?;
        Self::merge(job, patch);
        Ok(job.clone())
    }

    fn transition(&self, id: &str, to: JobStatus, patch: JobPatch) -> Result<Job, StoreError> {
        let mut jobs = self.jobs.write().expect("job store lock poisoned");
        let job = jobs.get_mut(id).ok_or(StoreError::NotFound)?;
        if !can_transition(job.status, to) {
            return Err(StoreError::InvalidTransition {
                from: job.status,
                to,
            });
        }
        job.status = to;
        match to {
            JobStatus::Completed if job.completed_at.is_none() => {
                job.completed_at = Some(Utc::now());
            }
            JobStatus::Error if job.error_at.is_none() => {
                job.error_at = Some(Utc::now());
            }
            _ => {}
        }
        Self::merge(job, patch);
        Ok(job.clone())
    }

    fn list(&self, status: Option<JobStatus>, limit: usize) -> (Vec<JobSummary>, usize) {
        let jobs = self.jobs.read().expect("job store lock poisoned");
        let mut matching: Vec<&Job> = jobs
            .values()
            .filter(|j| status.is_none_or(|s| j.status == s))
            .collect();
        matching.sort_by(|a, b| b.seq.cmp(&a.seq));
        let total = matching.len();
        let page = matching.into_iter().take(limit).map(Job::summary).collect();
        (page, total)
    }

    fn delete(&self, id: &str) -> bool {
        self.jobs
            .write()
            .expect("job store lock poisoned")
            .remove(id)
            .is_some()
    }

    fn active_count(&self) -> usize {
        self.jobs
            .read()
            .expect("job store lock poisoned")
            .values()
            .filter(|j| j.status == JobStatus::Processing)
            .count()
    }
}
