use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{NEEDS_APPROVAL, Pipeline, PipelineOutput, required_input};
use crate::config::{AppConfig, ConfigKey};
use crate::core::job::JobInputs;

// ── OpenAI-compatible request/response ──

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageOwned,
}

#[derive(Deserialize)]
struct ChatMessageOwned {
    content: String,
}

const SYSTEM_PROMPT: &str = "You are a senior content writer. Produce clear, \
well-structured prose on the requested topic. Return only the article body.";

/// Drafts content on a topic through an OpenAI-compatible chat endpoint.
///
/// Drafts are always tagged `needs_approval`; whether that pauses the job is
/// the caller's choice, enforced by the executor. When the inputs carry
/// `feedback` the prompt becomes a revision request, which is how HITL
/// regeneration rounds reach the model.
pub struct ContentCreationCrew {
    config: Arc<AppConfig>,
    client: Client,
}

impl ContentCreationCrew {
    pub fn new(config: Arc<AppConfig>) -> Self {
        Self {
            config,
            client: Client::builder()
                .timeout(Duration::from_secs(120))
                .build()
                .unwrap_or_default(),
        }
    }

    fn build_prompt(topic: &str, feedback: Option<&str>) -> String {
        match feedback {
            Some(feedback) => format!(
                "Revise your draft about \"{}\". Reviewer feedback: {}",
                topic, feedback
            ),
            None => format!("Write an article about \"{}\".", topic),
        }
    }

    async fn chat(&self, prompt: &str) -> Result<String> {
        let api_key = self
            .config
            .openai_api_key
            .as_deref()
            .ok_or_else(|| anyhow!("OPENAI_API_KEY is not configured"))?;
        let url = format!(
            "{}/chat/completions",
            self.config.openai_api_base.trim_end_matches('/')
        );
        let request = ChatRequest {
            model: &self.config.openai_model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            temperature: 0.7,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("chat completion failed ({}): {}", status, body));
        }

        let parsed: ChatResponse = response.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| anyhow!("chat completion returned no choices"))
    }
}

#[async_trait]
impl Pipeline for ContentCreationCrew {
    fn name(&self) -> &'static str {
        "ContentCreationCrew"
    }

    fn required_config(&self) -> &'static [ConfigKey] {
        &[ConfigKey::OpenAiApiKey]
    }

    async fn kickoff(&self, inputs: &JobInputs) -> Result<PipelineOutput> {
        let topic = required_input(inputs, "topic")?;
        let feedback = inputs.get("feedback").and_then(serde_json::Value::as_str);

        let prompt = Self::build_prompt(topic, feedback);
        let content = self.chat(&prompt).await?;

        Ok(PipelineOutput::Structured(json!({
            "status": NEEDS_APPROVAL,
            "topic": topic,
            "content": content,
            "length": content.len(),
            "revised": feedback.is_some(),
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_switches_to_revision_with_feedback() {
        let fresh = ContentCreationCrew::build_prompt("rust", None);
        assert!(fresh.starts_with("Write an article"));

        let revision = ContentCreationCrew::build_prompt("rust", Some("shorten it"));
        assert!(revision.contains("Reviewer feedback: shorten it"));
    }

    #[tokio::test]
    async fn kickoff_requires_a_topic() {
        let crew = ContentCreationCrew::new(Arc::new(AppConfig::default()));
        let err = crew.kickoff(&JobInputs::new()).await.unwrap_err();
        assert!(err.to_string().contains("topic"));
    }
}
