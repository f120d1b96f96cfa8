//! Runtime configuration: environment variables first, with an optional
//! `crewd.toml` secrets overlay that only fills keys the environment left
//! unset. Credentials are validated per pipeline at execution time, not at
//! startup, so the daemon can serve pipelines whose secrets it has while
//! failing fast on the ones it does not.

use std::env;
use std::path::Path;

use serde::Deserialize;
use tracing::info;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8888;
pub const DEFAULT_WORKERS: usize = 4;
pub const DEFAULT_QUEUE_DEPTH: usize = 64;

/// Credentials a pipeline can declare as prerequisites. `as_str` is the
/// environment variable name, which is also how missing keys are reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigKey {
    OpenAiApiKey,
    StorageApiToken,
    SlackWebhookUrl,
}

impl ConfigKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigKey::OpenAiApiKey => "OPENAI_API_KEY",
            ConfigKey::StorageApiToken => "STORAGE_API_TOKEN",
            ConfigKey::SlackWebhookUrl => "SLACK_WEBHOOK_URL",
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub workers: usize,
    pub queue_depth: usize,
    pub log_level: String,
    /// Shared secret for signing outgoing job webhooks. Unsigned when unset.
    pub webhook_secret: Option<String>,
    pub openai_api_key: Option<String>,
    pub openai_api_base: String,
    pub openai_model: String,
    pub storage_api_token: Option<String>,
    pub storage_api_url: String,
    pub slack_webhook_url: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            workers: DEFAULT_WORKERS,
            queue_depth: DEFAULT_QUEUE_DEPTH,
            log_level: "info".to_string(),
            webhook_secret: None,
            openai_api_key: None,
            openai_api_base: "https://api.openai.com/v1".to_string(),
            openai_model: "gpt-4o-mini".to_string(),
            storage_api_token: None,
            storage_api_url: "https://connection.keboola.com".to_string(),
            slack_webhook_url: None,
        }
    }
}

/// The `crewd.toml` overlay. Every field is optional; anything absent keeps
/// the value already resolved from the environment or the defaults.
#[derive(Debug, Default, Deserialize)]
struct SecretsFile {
    webhook_secret: Option<String>,
    openai_api_key: Option<String>,
    openai_api_base: Option<String>,
    openai_model: Option<String>,
    storage_api_token: Option<String>,
    storage_api_url: Option<String>,
    slack_webhook_url: Option<String>,
}

impl AppConfig {
    /// Resolve configuration from the environment, then overlay `crewd.toml`
    /// from the working directory if it exists.
    pub fn load() -> Self {
        let mut config = Self::from_env();
        config.overlay_secrets(Path::new("crewd.toml"));
        config
    }

    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: env_or("CREWD_HOST", defaults.host),
            port: env_parsed("CREWD_PORT", defaults.port),
            workers: env_parsed("CREWD_WORKERS", defaults.workers),
            queue_depth: env_parsed("CREWD_QUEUE_DEPTH", defaults.queue_depth),
            log_level: env_or("CREWD_LOG_LEVEL", defaults.log_level),
            webhook_secret: env_opt("CREWD_WEBHOOK_SECRET"),
            openai_api_key: env_opt("OPENAI_API_KEY"),
            openai_api_base: env_or("OPENAI_API_BASE", defaults.openai_api_base),
            openai_model: env_or("OPENAI_MODEL", defaults.openai_model),
            storage_api_token: env_opt("STORAGE_API_TOKEN"),
            storage_api_url: env_or("STORAGE_API_URL", defaults.storage_api_url),
            slack_webhook_url: env_opt("SLACK_WEBHOOK_URL"),
        }
    }

    /// Fill unset keys from a secrets file. The environment always wins.
    pub fn overlay_secrets(&mut self, path: &Path) {
        let Ok(content) = std::fs::read_to_string(path) else {
            return;
        };
        let secrets: SecretsFile = match toml::from_str(&content) {
            Ok(secrets) => secrets,
            Err(e) => {
                tracing::warn!("ignoring malformed secrets file {}: {}", path.display(), e);
                return;
            }
        };
        info!("loaded secrets overlay from {}", path.display());

        fill(&mut self.webhook_secret, secrets.webhook_secret);
        fill(&mut self.openai_api_key, secrets.openai_api_key);
        fill(&mut self.storage_api_token, secrets.storage_api_token);
        fill(&mut self.slack_webhook_url, secrets.slack_webhook_url);
        if let Some(base) = secrets.openai_api_base {
            self.openai_api_base = base;
        }
        if let Some(model) = secrets.openai_model {
            self.openai_model = model;
        }
        if let Some(url) = secrets.storage_api_url {
            self.storage_api_url = url;
        }
    }

    fn resolve(&self, key: ConfigKey) -> Option<&str> {
        match key {
            ConfigKey::OpenAiApiKey => self.openai_api_key.as_deref(),
            ConfigKey::StorageApiToken => self.storage_api_token.as_deref(),
            ConfigKey::SlackWebhookUrl => self.slack_webhook_url.as_deref(),
        }
    }

    /// Check that every listed credential is present, naming the missing
    /// ones by their environment variable.
    pub fn require(&self, keys: &[ConfigKey]) -> Result<(), String> {
        let missing: Vec<&str> = keys
            .iter()
            .filter(|key| self.resolve(**key).is_none_or(|v| v.trim().is_empty()))
            .map(|key| key.as_str())
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(format!(
                "missing required configuration: {}",
                missing.join(", ")
            ))
        }
    }
}

fn env_opt(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_or(name: &str, default: String) -> String {
    env_opt(name).unwrap_or(default)
}

fn env_parsed<T: std::str::FromStr>(name: &str, default: T) -> T {
    env_opt(name)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn fill(slot: &mut Option<String>, value: Option<String>) {
    if slot.is_none() {
        *slot = value.filter(|v| !v.trim().is_empty());
    }
}
