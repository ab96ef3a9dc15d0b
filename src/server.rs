//! HTTP 入口（需 `server` feature）
//!
//! - `POST /run`：`{prompt, user_email, context?}` -> Response
//! - `GET /metrics`：Agent 表现统计
//! - `GET /health`：存活检查

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response as HttpResponse},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;

use crate::core::{HiveComponents, HiveError, RunRequest};

type AppState = Arc<HiveComponents>;

pub fn router(hive: Arc<HiveComponents>) -> Router {
    Router::new()
        .route("/run", post(run))
        .route("/metrics", get(metrics))
        .route("/health", get(health))
        .with_state(hive)
}

fn error_body(status: StatusCode, message: impl Into<String>) -> HttpResponse {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

fn status_for(err: &HiveError) -> StatusCode {
    match err {
        HiveError::ScopeViolation(_) | HiveError::MissingRequiredEntity { .. } => {
            StatusCode::BAD_REQUEST
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

async fn run(
    State(hive): State<AppState>,
    payload: Result<Json<RunRequest>, JsonRejection>,
) -> HttpResponse {
    let Json(request) = match payload {
        Ok(p) => p,
        Err(rejection) => {
            tracing::warn!("Rejected /run payload: {}", rejection.body_text());
            return error_body(StatusCode::BAD_REQUEST, rejection.body_text());
        }
    };

    match hive.orchestrator.handle(request).await {
        Ok(response) => Json(response).into_response(),
        Err(e) => {
            tracing::error!("Request failed: {}", e);
            error_body(status_for(&e), e.user_message())
        }
    }
}

async fn metrics(State(hive): State<AppState>) -> impl IntoResponse {
    Json(hive.tracker.metrics_summary())
}

async fn health() -> &'static str {
    "OK"
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::Value;
    use tower::ServiceExt;

    use crate::config::AppConfig;
    use crate::core::HiveBuilder;
    use crate::llm::MockLlmClient;

    fn app() -> Router {
        let hive = HiveBuilder::new(AppConfig::default())
            .with_llm(Arc::new(MockLlmClient::default()))
            .build()
            .unwrap();
        router(Arc::new(hive))
    }

    fn post_run(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/run")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn json_body(response: HttpResponse) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let response = app()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_run_returns_final_output() {
        let response = app()
            .oneshot(post_run(r#"{"prompt": "hello there", "user_email": "a@x.io"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert!(body["final_output"].as_str().unwrap().starts_with("Echo from Mock:"));
        assert!(body["execution_time"].as_f64().is_some());
        assert!(body["file_name"].is_null());
    }

    #[tokio::test]
    async fn test_malformed_json_is_bad_request() {
        let response = app().oneshot(post_run("{not json")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(json_body(response).await["error"].is_string());
    }

    #[tokio::test]
    async fn test_missing_user_is_rejected() {
        let response = app()
            .oneshot(post_run(r#"{"prompt": "hello", "user_email": ""}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_metrics_lists_every_agent() {
        let response = app()
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["agents"].as_array().unwrap().len(), 11);
        assert_eq!(body["totals"]["tasks_started"], 0);
    }
}
