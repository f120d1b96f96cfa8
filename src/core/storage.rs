//! Client for the data platform's table export API.
//!
//! Exports are asynchronous on the platform side: start an export job, poll
//! it until it succeeds, then fetch the produced file. The poll loop is
//! bounded; an export that neither succeeds nor fails within the budget is
//! an error here, not a hang.

use std::time::Duration;

use anyhow::{Result, anyhow, bail};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

const TOKEN_HEADER: &str = "X-StorageApi-Token";
const POLL_DELAY: Duration = Duration::from_secs(2);
const MAX_POLL_ATTEMPTS: u32 = 30;

#[derive(Deserialize)]
struct ExportStarted {
    id: u64,
}

#[derive(Deserialize)]
struct ExportJob {
    status: String,
    results: Option<ExportResults>,
}

#[derive(Deserialize)]
struct ExportResults {
    file: ExportFile,
}

#[derive(Deserialize)]
struct ExportFile {
    id: u64,
}

pub struct StorageClient {
    base: String,
    token: String,
    client: Client,
}

impl StorageClient {
    pub fn new(base: &str, token: &str) -> Self {
        Self {
            base: base.trim_end_matches('/').to_string(),
            token: token.to_string(),
            client: Client::builder()
                .timeout(Duration::from_secs(60))
                .build()
                .unwrap_or_default(),
        }
    }

    /// Download a table as CSV text via the async export protocol.
    pub async fn download_table(&self, table_id: &str) -> Result<String> {
        let export_url = format!("{}/v2/storage/tables/{}/export-async", self.base, table_id);
        debug!("starting async export for table {}", table_id);
        let started: ExportStarted = self
            .client
            .post(&export_url)
            .header(TOKEN_HEADER, &self.token)
            .json(&json!({ "format": "rfc" }))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let file_id = self.await_export(started.id).await?;

        let data_url = format!("{}/v2/storage/files/{}/download", self.base, file_id);
        let csv = self
            .client
            .get(&data_url)
            .header(TOKEN_HEADER, &self.token)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        debug!("downloaded table {} ({} bytes)", table_id, csv.len());
        Ok(csv)
    }

    async fn await_export(&self, export_id: u64) -> Result<u64> {
        let job_url = format!("{}/v2/storage/jobs/{}", self.base, export_id);
        for attempt in 1..=MAX_POLL_ATTEMPTS {
            let job: ExportJob = self
                .client
                .get(&job_url)
                .header(TOKEN_HEADER, &self.token)
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;

            debug!(
                "[{}/{}] export job status: {}",
                attempt, MAX_POLL_ATTEMPTS, job.status
            );
            match job.status.as_str() {
                "success" => {
                    return job
                        .results
                        .map(|r| r.file.id)
                        .ok_or_else(|| anyhow!("export succeeded without a result file"));
                }
                "error" | "cancelled" => bail!("export job ended with status {}", job.status),
                _ => tokio::time::sleep(POLL_DELAY).await,
            }
        }
        bail!("export job did not complete within the polling budget")
    }
}
