use axum::Json;
use axum::extract::State;
use chrono::Utc;
use serde_json::{Value, json};

use crate::interfaces::web::AppState;

pub(crate) async fn root(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "service": "crewd",
        "status": "running",
        "version": env!("CARGO_PKG_VERSION"),
        "started_at": state.started_at,
        "timestamp": Utc::now(),
    }))
}

pub(crate) async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "active_jobs": state.executor.store().active_count(),
        "pipelines": state.registry.names(),
        "uptime_seconds": (Utc::now() - state.started_at).num_seconds(),
        "timestamp": Utc::now(),
    }))
}
