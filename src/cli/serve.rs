use std::sync::Arc;

use anyhow::Result;

use crate::config::AppConfig;
use crate::core::executor::{ExecutorCtx, spawn_executor};
use crate::core::job::store::MemoryJobStore;
use crate::core::pipeline::PipelineRegistry;
use crate::core::terminal::GuideSection;
use crate::core::webhook::WebhookNotifier;
use crate::interfaces::web;
use crate::logging;

pub(crate) fn parse_serve_flags(args: &[String], start: usize, config: &mut AppConfig) {
    let mut i = start;
    while i < args.len() {
        match args[i].as_str() {
            "--host" => {
                if i + 1 < args.len() {
                    config.host = args[i + 1].clone();
                    i += 2;
                } else {
                    i += 1;
                }
            }
            "--port" => {
                if i + 1 < args.len() {
                    config.port = args[i + 1].parse().unwrap_or(config.port);
                    i += 2;
                } else {
                    i += 1;
                }
            }
            "--workers" => {
                if i + 1 < args.len() {
                    config.workers = args[i + 1].parse().unwrap_or(config.workers);
                    i += 2;
                } else {
                    i += 1;
                }
            }
            "--queue-depth" => {
                if i + 1 < args.len() {
                    config.queue_depth = args[i + 1].parse().unwrap_or(config.queue_depth);
                    i += 2;
                } else {
                    i += 1;
                }
            }
            _ => i += 1,
        }
    }
}

pub(crate) async fn run_serve(args: &[String]) -> Result<()> {
    let mut config = AppConfig::load();
    parse_serve_flags(args, 2, &mut config);

    let (log_tx, _) = tokio::sync::broadcast::channel::<String>(1024);
    logging::init(&config.log_level, log_tx.clone());

    let config = Arc::new(config);
    let registry = Arc::new(PipelineRegistry::builtin(&config));
    let ctx = ExecutorCtx {
        store: Arc::new(MemoryJobStore::new()),
        registry: registry.clone(),
        notifier: WebhookNotifier::new(config.webhook_secret.clone()),
        config: config.clone(),
    };
    let executor = spawn_executor(ctx, config.workers, config.queue_depth);

    GuideSection::new("crewd")
        .status(
            "API Endpoint",
            &format!("http://{}:{}", config.host, config.port),
        )
        .status("Workers", &config.workers.to_string())
        .status("Pipelines", &registry.names().join(", "))
        .blank()
        .print();

    web::serve(&config, executor, registry, log_tx).await
}
