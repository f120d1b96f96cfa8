use axum::{
    Router,
    body::Body,
    http::{HeaderValue, Request, header},
    middleware,
    middleware::Next,
    routing::{get, post},
};
use tower_http::cors::{Any, CorsLayer};

use super::AppState;
use super::handlers::{health, jobs};

pub fn build_router(state: AppState) -> Router {
    // Open CORS: the API is a machine surface consumed by polling clients
    // and dashboards on arbitrary origins, and carries no cookies.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(health::root))
        .route("/health", get(health::health))
        .route("/kickoff", post(jobs::kickoff_endpoint))
        .route("/jobs", get(jobs::list_jobs_endpoint))
        .route(
            "/job/{job_id}",
            get(jobs::get_job_endpoint).delete(jobs::delete_job_endpoint),
        )
        .route("/job/{job_id}/feedback", post(jobs::feedback_endpoint))
        .route("/logs", get(super::sse_logs_endpoint))
        .layer(middleware::from_fn(security_headers))
        .layer(cors)
        .with_state(state)
}

async fn security_headers(req: Request<Body>, next: Next) -> axum::response::Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::http::{Method, StatusCode};
    use chrono::Utc;
    use serde_json::{Value, json};
    use tower::util::ServiceExt;

    use crate::config::AppConfig;
    use crate::core::executor::{ExecutorCtx, spawn_executor};
    use crate::core::job::JobStatus;
    use crate::core::job::store::MemoryJobStore;
    use crate::core::pipeline::PipelineRegistry;
    use crate::core::webhook::WebhookNotifier;

    fn test_state() -> AppState {
        let config = Arc::new(AppConfig::default());
        let registry = Arc::new(PipelineRegistry::builtin(&config));
        let ctx = ExecutorCtx {
            store: Arc::new(MemoryJobStore::new()),
            registry: registry.clone(),
            notifier: WebhookNotifier::new(None),
            config,
        };
        let (log_tx, _) = tokio::sync::broadcast::channel(16);
        AppState {
            executor: spawn_executor(ctx, 2, 8),
            registry,
            log_tx,
            started_at: Utc::now(),
        }
    }

    async fn json_request(
        app: Router,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let body = match body {
            Some(json) => Body::from(serde_json::to_string(&json).unwrap()),
            None => Body::empty(),
        };

        let req = Request::builder()
            .method(method)
            .uri(path)
            .header("content-type", "application/json")
            .body(body)
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        let status = resp.status();
        let body_bytes = axum::body::to_bytes(resp.into_body(), 1024 * 1024)
            .await
            .unwrap();
        let json: Value = serde_json::from_slice(&body_bytes).unwrap_or(json!({}));
        (status, json)
    }

    #[tokio::test]
    async fn kickoff_with_wait_returns_the_finished_job() {
        let app = build_router(test_state());
        let (status, json) = json_request(
            app,
            Method::POST,
            "/kickoff",
            Some(json!({
                "pipeline": "Echo",
                "inputs": { "topic": "ping" },
                "wait": true
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["success"], true);
        assert_eq!(json["status"], "completed");
        assert_eq!(json["result"]["content"], "ping");
    }

    #[tokio::test]
    async fn kickoff_accepts_the_legacy_crew_field() {
        let app = build_router(test_state());
        let (status, json) = json_request(
            app,
            Method::POST,
            "/kickoff",
            Some(json!({ "crew": "Echo", "wait": true })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["result"]["content"], "echo");
    }

    #[tokio::test]
    async fn kickoff_rejects_missing_and_unknown_pipelines() {
        let app = build_router(test_state());
        let (status, json) =
            json_request(app, Method::POST, "/kickoff", Some(json!({ "inputs": {} }))).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(json["success"], false);

        let app = build_router(test_state());
        let (status, json) = json_request(
            app,
            Method::POST,
            "/kickoff",
            Some(json!({ "pipeline": "NoSuchCrew" })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(json["error"].as_str().unwrap().contains("NoSuchCrew"));
    }

    #[tokio::test]
    async fn background_kickoff_returns_queued_and_job_becomes_readable() {
        let state = test_state();
        let app = build_router(state.clone());
        let (status, json) = json_request(
            app,
            Method::POST,
            "/kickoff",
            Some(json!({ "pipeline": "Echo", "inputs": { "topic": "bg" } })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "queued");
        let job_id = json["job_id"].as_str().unwrap().to_string();

        for _ in 0..200 {
            let app = build_router(state.clone());
            let (status, json) =
                json_request(app, Method::GET, &format!("/job/{}", job_id), None).await;
            assert_eq!(status, StatusCode::OK);
            if json["status"] == "completed" {
                assert_eq!(json["result"]["content"], "bg");
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("background job never completed");
    }

    #[tokio::test]
    async fn feedback_on_a_queued_job_names_the_current_status() {
        let state = test_state();
        let job = state.executor.store().create("Echo", Default::default(), None);

        let app = build_router(state);
        let (status, json) = json_request(
            app,
            Method::POST,
            &format!("/job/{}/feedback", job.id),
            Some(json!({ "approved": true })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json["error"].as_str().unwrap().contains("queued"));
    }

    #[tokio::test]
    async fn unknown_job_returns_404_everywhere() {
        for (method, path) in [
            (Method::GET, "/job/nonexistent".to_string()),
            (Method::DELETE, "/job/nonexistent".to_string()),
            (Method::POST, "/job/nonexistent/feedback".to_string()),
        ] {
            let app = build_router(test_state());
            let body = (method == Method::POST).then(|| json!({ "approved": true }));
            let (status, json) = json_request(app, method, &path, body).await;
            assert_eq!(status, StatusCode::NOT_FOUND);
            assert_eq!(json["error"], "Job not found");
        }
    }

    #[tokio::test]
    async fn list_jobs_with_zero_limit_still_reports_the_total() {
        let state = test_state();
        for _ in 0..3 {
            state.executor.store().create("Echo", Default::default(), None);
        }

        let app = build_router(state.clone());
        let (status, json) = json_request(app, Method::GET, "/jobs?limit=0", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["jobs"].as_array().unwrap().len(), 0);
        assert_eq!(json["total_jobs"], 3);

        let app = build_router(state);
        let (status, json) = json_request(app, Method::GET, "/jobs?status=bogus", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json["error"].as_str().unwrap().contains("bogus"));
    }

    #[tokio::test]
    async fn list_jobs_filters_by_status() {
        let state = test_state();
        state.executor.store().create("Echo", Default::default(), None);
        let processing = state.executor.store().create("Echo", Default::default(), None);
        state
            .executor
            .store()
            .transition(&processing.id, JobStatus::Processing, Default::default())
            .unwrap();

        let app = build_router(state);
        let (_, json) = json_request(app, Method::GET, "/jobs?status=processing", None).await;
        assert_eq!(json["total_jobs"], 1);
        assert_eq!(json["jobs"][0]["id"], processing.id);
    }

    #[tokio::test]
    async fn delete_job_roundtrip() {
        let state = test_state();
        let job = state.executor.store().create("Echo", Default::default(), None);

        let app = build_router(state.clone());
        let (status, json) =
            json_request(app, Method::DELETE, &format!("/job/{}", job.id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["success"], true);

        let app = build_router(state);
        let (status, _) = json_request(app, Method::GET, &format!("/job/{}", job.id), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn health_reports_pipelines_and_active_jobs() {
        let app = build_router(test_state());
        let (status, json) = json_request(app, Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["active_jobs"], 0);
        let pipelines: Vec<&str> = json["pipelines"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(Value::as_str)
            .collect();
        assert!(pipelines.contains(&"Echo"));
        assert!(pipelines.contains(&"ContentCreationCrew"));
    }

    #[tokio::test]
    async fn security_headers_present_on_responses() {
        let app = build_router(test_state());
        let req = Request::builder()
            .method(Method::GET)
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(
            resp.headers().get("x-content-type-options").unwrap(),
            "nosniff"
        );
        assert_eq!(resp.headers().get("x-frame-options").unwrap(), "DENY");
    }
}
