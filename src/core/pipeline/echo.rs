use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use super::{Pipeline, PipelineOutput};
use crate::core::job::JobInputs;

/// Returns its `topic` (or `message`) input as raw text. Exists for smoke
/// tests and for checking the job lifecycle end to end without credentials.
pub struct Echo;

#[async_trait]
impl Pipeline for Echo {
    fn name(&self) -> &'static str {
        "Echo"
    }

    async fn kickoff(&self, inputs: &JobInputs) -> Result<PipelineOutput> {
        let text = inputs
            .get("topic")
            .or_else(|| inputs.get("message"))
            .and_then(Value::as_str)
            .unwrap_or("echo");
        Ok(PipelineOutput::Raw(text.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Map, json};

    #[tokio::test]
    async fn echo_returns_its_topic() {
        let mut inputs = Map::new();
        inputs.insert("topic".to_string(), json!("x"));
        let out = Echo.kickoff(&inputs).await.unwrap();
        match out {
            PipelineOutput::Raw(text) => assert_eq!(text, "x"),
            other => panic!("expected raw output, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn echo_falls_back_without_inputs() {
        let out = Echo.kickoff(&Map::new()).await.unwrap();
        match out {
            PipelineOutput::Raw(text) => assert_eq!(text, "echo"),
            other => panic!("expected raw output, got {:?}", other),
        }
    }
}
