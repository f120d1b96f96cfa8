mod handlers;
mod router;

use std::convert::Infallible;
use std::sync::Arc;

use anyhow::Result;
use axum::extract::State;
use axum::response::sse::{Event, Sse};
use chrono::{DateTime, Utc};
use tokio_stream::{Stream, StreamExt, wrappers::BroadcastStream};
use tracing::info;

use crate::config::AppConfig;
use crate::core::executor::ExecutorHandle;
use crate::core::pipeline::PipelineRegistry;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) executor: ExecutorHandle,
    pub(crate) registry: Arc<PipelineRegistry>,
    pub(crate) log_tx: tokio::sync::broadcast::Sender<String>,
    pub(crate) started_at: DateTime<Utc>,
}

/// Bind and serve the HTTP API until the process exits.
pub async fn serve(
    config: &AppConfig,
    executor: ExecutorHandle,
    registry: Arc<PipelineRegistry>,
    log_tx: tokio::sync::broadcast::Sender<String>,
) -> Result<()> {
    let state = AppState {
        executor,
        registry,
        log_tx,
        started_at: Utc::now(),
    };
    let app = router::build_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("crewd API running at http://{addr}");
    axum::serve(listener, app).await?;
    Ok(())
}

// --- SSE Logs (used by router) ---

async fn sse_logs_endpoint(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let receiver = state.log_tx.subscribe();
    let stream = BroadcastStream::new(receiver).map(|msg| {
        match msg {
            Ok(log) => Ok(Event::default().data(log)),
            Err(_) => Ok(Event::default().data("Log stream lagged")),
        }
    });

    Sse::new(stream)
}
