//! Pipeline contract, registry, and result normalization.
//!
//! Pipelines are resolved by name from an explicit registry populated at
//! startup — no runtime discovery. Whatever shape a pipeline returns, the
//! executor only ever sees one: the normalized map produced here.

mod content;
mod echo;
mod insights;

pub use content::ContentCreationCrew;
pub use echo::Echo;
pub use insights::TableInsightsCrew;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Map, Value, json};

use crate::config::{AppConfig, ConfigKey};
use crate::core::job::JobInputs;

/// Tag a pipeline puts in its structured output to request a human pause.
/// Only honored when the caller asked for approval.
pub const NEEDS_APPROVAL: &str = "needs_approval";

/// What a pipeline hands back: raw text, or an arbitrary JSON value.
#[derive(Debug, Clone)]
pub enum PipelineOutput {
    Raw(String),
    Structured(Value),
}

#[async_trait]
pub trait Pipeline: Send + Sync {
    fn name(&self) -> &'static str;

    /// Configuration that must be present before the pipeline may run.
    /// Checked by the executor up front; missing keys fail the job without
    /// attempting partial execution.
    fn required_config(&self) -> &'static [ConfigKey] {
        &[]
    }

    async fn kickoff(&self, inputs: &JobInputs) -> Result<PipelineOutput>;
}

/// Collapse every output shape into one map:
/// raw text becomes `{content, length}`, an object passes through, and
/// anything else is stringified and wrapped like raw text.
pub fn normalize(output: PipelineOutput) -> Map<String, Value> {
    match output {
        PipelineOutput::Raw(text) => wrap_text(text),
        PipelineOutput::Structured(Value::Object(map)) => map,
        PipelineOutput::Structured(other) => {
            let text = match other {
                Value::String(s) => s,
                v => v.to_string(),
            };
            wrap_text(text)
        }
    }
}

fn wrap_text(text: String) -> Map<String, Value> {
    let mut map = Map::new();
    map.insert("length".to_string(), json!(text.len()));
    map.insert("content".to_string(), Value::String(text));
    map
}

/// Does a normalized result ask for the human-approval pause?
pub fn signals_approval(result: &Map<String, Value>) -> bool {
    result.get("status").and_then(Value::as_str) == Some(NEEDS_APPROVAL)
}

/// Name -> pipeline map, populated once at startup.
#[derive(Default)]
pub struct PipelineRegistry {
    pipelines: HashMap<String, Arc<dyn Pipeline>>,
}

impl PipelineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, pipeline: Arc<dyn Pipeline>) {
        self.pipelines.insert(pipeline.name().to_string(), pipeline);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Pipeline>> {
        self.pipelines.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.pipelines.keys().cloned().collect();
        names.sort();
        names
    }

    /// The pipelines crewd ships with.
    pub fn builtin(config: &Arc<AppConfig>) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(Echo));
        registry.register(Arc::new(ContentCreationCrew::new(config.clone())));
        registry.register(Arc::new(TableInsightsCrew::new(config.clone())));
        registry
    }
}

/// Pull a required string input out of the inputs map.
pub(crate) fn required_input<'a>(inputs: &'a JobInputs, key: &str) -> Result<&'a str> {
    inputs
        .get(key)
        .and_then(Value::as_str)
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| anyhow::anyhow!("missing required input: {}", key))
}
