//! Job records and the status state machine.
//!
//! A job tracks one pipeline invocation from creation to a terminal state.
//! Status moves only along the edges `can_transition` allows; the store
//! re-validates every transition against the current record, so a stale
//! writer cannot clobber a newer state.

pub mod store;


use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub type JobInputs = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    PendingApproval,
    Completed,
    Error,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::PendingApproval => "pending_approval",
            JobStatus::Completed => "completed",
            JobStatus::Error => "error",
        }
    }

    pub fn from_status(value: &str) -> Option<Self> {
        match value {
            "queued" => Some(JobStatus::Queued),
            "processing" => Some(JobStatus::Processing),
            "pending_approval" => Some(JobStatus::PendingApproval),
            "completed" => Some(JobStatus::Completed),
            "error" => Some(JobStatus::Error),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Error)
    }
}

/// The lifecycle edges. Terminal states permit nothing, not even a
/// self-transition; `Processing -> Processing` is allowed because a
/// feedback-driven retry marks the job processing before the executor
/// re-enters the invocation.
pub fn can_transition(from: JobStatus, to: JobStatus) -> bool {
    match from {
        JobStatus::Queued => matches!(to, JobStatus::Processing | JobStatus::Error),
        JobStatus::Processing => matches!(
            to,
            JobStatus::Processing
                | JobStatus::PendingApproval
                | JobStatus::Completed
                | JobStatus::Error
        ),
        JobStatus::PendingApproval => {
            matches!(to, JobStatus::Processing | JobStatus::Completed)
        }
        JobStatus::Completed | JobStatus::Error => false,
    }
}

/// The saved invocation that produced a `pending_approval` state. Built once
/// on entry, consumed (with feedback merged in) on every non-approval
/// feedback round, so the caller never has to resupply inputs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryContext {
    pub pipeline: String,
    pub inputs: JobInputs,
    pub require_approval: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: String,
    pub pipeline: String,
    pub inputs: JobInputs,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feedback_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryContext>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub human_approved: Option<bool>,
    /// Creation order within this process; drives newest-first listings.
    #[serde(skip)]
    pub(crate) seq: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobSummary {
    pub id: String,
    pub pipeline: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
}

impl Job {
    pub fn summary(&self) -> JobSummary {
        JobSummary {
            id: self.id.clone(),
            pipeline: self.pipeline.clone(),
            status: self.status,
            created_at: self.created_at,
        }
    }
}

/// Partial update applied together with (or without) a status transition.
/// `None` fields are left untouched; the store owns all timestamps except
/// `feedback_at`, which is bumped when `touch_feedback_at` is set.
#[derive(Debug, Default)]
pub struct JobPatch {
    pub result: Option<Map<String, Value>>,
    pub error: Option<String>,
    pub error_type: Option<String>,
    pub retry: Option<RetryContext>,
    pub feedback: Option<String>,
    pub human_approved: Option<bool>,
    pub touch_feedback_at: bool,
}
