//! Synchronous wrapper around [`JobClient`] for callers without a runtime.

use anyhow::Result;
use serde_json::Value;

use super::{JobClient, KickoffOptions, PollOptions, PollOutcome, ReviewDecision};

#[allow(dead_code)]
pub struct BlockingJobClient {
    rt: tokio::runtime::Runtime,
    inner: JobClient,
}

#[allow(dead_code)] // mirror of the async client; not every call site uses both
impl BlockingJobClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        Ok(Self {
            rt,
            inner: JobClient::new(base_url),
        })
    }

    pub fn kickoff(&self, pipeline: &str, options: &KickoffOptions) -> Result<Value> {
        self.rt.block_on(self.inner.kickoff(pipeline, options))
    }

    pub fn job(&self, job_id: &str) -> Result<Option<Value>> {
        self.rt.block_on(self.inner.job(job_id))
    }

    pub fn jobs(&self, status: Option<&str>, limit: Option<usize>) -> Result<Value> {
        self.rt.block_on(self.inner.jobs(status, limit))
    }

    pub fn submit_feedback(
        &self,
        job_id: &str,
        feedback: Option<&str>,
        approved: bool,
    ) -> Result<Value> {
        self.rt
            .block_on(self.inner.submit_feedback(job_id, feedback, approved))
    }

    pub fn delete_job(&self, job_id: &str) -> Result<bool> {
        self.rt.block_on(self.inner.delete_job(job_id))
    }

    pub fn health(&self) -> Result<Value> {
        self.rt.block_on(self.inner.health())
    }

    pub fn poll_until_settled(&self, job_id: &str, options: &PollOptions) -> Result<PollOutcome> {
        self.rt
            .block_on(self.inner.poll_until_settled(job_id, options))
    }

    pub fn run_hitl<F>(&self, job_id: &str, options: &PollOptions, review: F) -> Result<PollOutcome>
    where
        F: FnMut(&Value) -> ReviewDecision,
    {
        self.rt.block_on(self.inner.run_hitl(job_id, options, review))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocking_client_drives_requests_without_an_ambient_runtime() {
        let client = BlockingJobClient::new("http://127.0.0.1:1").unwrap();
        // Nothing listens on port 1; the call must fail cleanly, not hang.
        assert!(client.health().is_err());
        assert!(client.job("missing").is_err());
    }
}
