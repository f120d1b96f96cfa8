use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use serde_json::json;

use super::{Pipeline, PipelineOutput, required_input};
use crate::config::{AppConfig, ConfigKey};
use crate::core::job::JobInputs;
use crate::core::slack::SlackNotifier;
use crate::core::storage::StorageClient;

/// Downloads a usage table from the data platform, aggregates billed
/// credits and error rate per customer, posts the summary to the chat
/// webhook, and returns it as the job result.
///
/// Expected CSV columns: `company`, `billed_credits`, `is_error`
/// (extra columns are ignored).
pub struct TableInsightsCrew {
    config: Arc<AppConfig>,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct CustomerUsage {
    pub billed_credits: f64,
    pub rows: u64,
    pub errors: u64,
}

impl CustomerUsage {
    pub fn error_rate(&self) -> f64 {
        if self.rows == 0 {
            0.0
        } else {
            self.errors as f64 / self.rows as f64
        }
    }
}

impl TableInsightsCrew {
    pub fn new(config: Arc<AppConfig>) -> Self {
        Self { config }
    }

    /// Aggregate the usage CSV per company. Column order is discovered from
    /// the header row; the parser is deliberately simple (the platform's
    /// `rfc` export does not quote these numeric columns).
    pub fn aggregate(csv: &str) -> Result<BTreeMap<String, CustomerUsage>> {
        let mut lines = csv.lines().filter(|l| !l.trim().is_empty());
        let header = lines.next().ok_or_else(|| anyhow!("table export is empty"))?;
        let columns: Vec<&str> = header.split(',').map(|c| c.trim().trim_matches('"')).collect();

        let col = |name: &str| -> Result<usize> {
            columns
                .iter()
                .position(|c| c.eq_ignore_ascii_case(name))
                .ok_or_else(|| anyhow!("table is missing required column: {}", name))
        };
        let company_col = col("company")?;
        let credits_col = col("billed_credits")?;
        let error_col = col("is_error")?;

        let mut usage: BTreeMap<String, CustomerUsage> = BTreeMap::new();
        for (line_no, line) in lines.enumerate() {
            let fields: Vec<&str> = line.split(',').map(|f| f.trim().trim_matches('"')).collect();
            let company = fields
                .get(company_col)
                .filter(|v| !v.is_empty())
                .ok_or_else(|| anyhow!("row {} has no company value", line_no + 2))?;
            let credits: f64 = fields
                .get(credits_col)
                .and_then(|v| v.parse().ok())
                .unwrap_or(0.0);
            let is_error = matches!(fields.get(error_col).copied(), Some("1") | Some("true"));

            let entry = usage.entry(company.to_string()).or_default();
            entry.billed_credits += credits;
            entry.rows += 1;
            if is_error {
                entry.errors += 1;
            }
        }

        if usage.is_empty() {
            bail!("table contains a header but no data rows");
        }
        Ok(usage)
    }

    pub fn format_summary(table_id: &str, usage: &BTreeMap<String, CustomerUsage>) -> String {
        let mut lines = vec![format!(
            "Here is the summary of the usage report for table `{}`:\n",
            table_id
        )];
        for (company, stats) in usage {
            lines.push(format!(
                "- *{}*:\n  • Total Billed Credits: {:.2}\n  • Error Rate: {:.4}\n",
                company,
                stats.billed_credits,
                stats.error_rate()
            ));
        }
        lines.join("\n")
    }
}

#[async_trait]
impl Pipeline for TableInsightsCrew {
    fn name(&self) -> &'static str {
        "TableInsightsCrew"
    }

    fn required_config(&self) -> &'static [ConfigKey] {
        &[ConfigKey::StorageApiToken, ConfigKey::SlackWebhookUrl]
    }

    async fn kickoff(&self, inputs: &JobInputs) -> Result<PipelineOutput> {
        let table_id = required_input(inputs, "table_id")?;
        let token = self
            .config
            .storage_api_token
            .as_deref()
            .ok_or_else(|| anyhow!("STORAGE_API_TOKEN is not configured"))?;
        let slack_url = self
            .config
            .slack_webhook_url
            .as_deref()
            .ok_or_else(|| anyhow!("SLACK_WEBHOOK_URL is not configured"))?;

        let storage = StorageClient::new(&self.config.storage_api_url, token);
        let csv = storage.download_table(table_id).await?;

        let usage = Self::aggregate(&csv)?;
        let summary = Self::format_summary(table_id, &usage);

        SlackNotifier::new(slack_url).post(&summary).await?;

        Ok(PipelineOutput::Structured(json!({
            "status": "success",
            "table_id": table_id,
            "content": summary,
            "length": summary.len(),
            "customers": usage.len(),
        })))
    }
}
