//! Control API
//!
//! HTTP surface for project agents announcing themselves and for operators
//! inspecting the engine.
//!
//! # Endpoints
//!
//! - POST /api/v1/project-agents/register - Register (or replace) a project agent
//! - POST /api/v1/project-agents/:id/heartbeat - Record an agent heartbeat
//! - GET /api/v1/environments - List registered environments
//! - GET /api/v1/workers/stats - Worker pool statistics
//! - GET /health - Liveness

use crate::containers::Orchestrator;
use crate::worker::WorkerPool;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use sdk::errors::EngineError;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// State shared across handlers
#[derive(Clone)]
pub struct ApiState {
    pub orchestrator: Arc<Orchestrator>,
    pub pool: Arc<WorkerPool>,
}

/// Body of a registration request
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    #[serde(default)]
    pub project_id: String,
    #[serde(default)]
    pub agent_url: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

type ApiResult = Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)>;

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/v1/project-agents/register", post(register_handler))
        .route(
            "/api/v1/project-agents/:id/heartbeat",
            post(heartbeat_handler),
        )
        .route("/api/v1/environments", get(environments_handler))
        .route("/api/v1/workers/stats", get(worker_stats_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Serve the control API on `bind` until `shutdown` is cancelled
pub async fn serve(
    bind: &str,
    state: ApiState,
    shutdown: CancellationToken,
) -> Result<(), EngineError> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!("Control API listening on {}", listener.local_addr()?);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    tracing::info!("Control API stopped");
    Ok(())
}

async fn register_handler(
    State(state): State<ApiState>,
    Json(request): Json<RegisterRequest>,
) -> ApiResult {
    if request.project_id.trim().is_empty() || request.agent_url.trim().is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "project_id and agent_url are required"})),
        ));
    }

    let client = state
        .orchestrator
        .register_agent(&request.project_id, &request.agent_url, request.roles)
        .map_err(error_response)?;

    Ok(Json(json!({
        "status": "registered",
        "project_id": client.project_id(),
        "agent_url": client.endpoint(),
        "roles": client.roles(),
    })))
}

async fn heartbeat_handler(State(state): State<ApiState>, Path(id): Path<String>) -> ApiResult {
    state
        .orchestrator
        .heartbeat(&id)
        .map_err(error_response)?;

    Ok(Json(json!({"status": "ok", "project_id": id})))
}

async fn environments_handler(State(state): State<ApiState>) -> Json<serde_json::Value> {
    let environments = state.orchestrator.environment_infos();
    Json(json!({
        "count": environments.len(),
        "environments": environments,
    }))
}

async fn worker_stats_handler(State(state): State<ApiState>) -> Json<serde_json::Value> {
    let stats = state.pool.get_pool_stats();
    Json(json!(stats))
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

fn error_response(err: EngineError) -> (StatusCode, Json<serde_json::Value>) {
    let status = match &err {
        EngineError::NoAgentForProject(_) => StatusCode::NOT_FOUND,
        EngineError::EnvironmentCapacityExceeded { .. } => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({"error": err.to_string()})))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ContainersConfig;
    use crate::containers::{AgentConnector, ContainerRuntime};
    use crate::provider::{ChatCompletionConnector, StaticProviderDirectory};
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use sdk::transport::TaskTransport;
    use sdk::types::{AgentStatus, TaskOutcome, TaskRequest};
    use std::time::Duration;
    use tower::ServiceExt;

    struct IdleRuntime;

    #[async_trait]
    impl ContainerRuntime for IdleRuntime {
        async fn build(&self, _: &std::path::Path, _: &str) -> Result<(), EngineError> {
            Ok(())
        }
        async fn start(&self, _: &std::path::Path, _: &str) -> Result<(), EngineError> {
            Ok(())
        }
        async fn stop(&self, _: &std::path::Path, _: &str) -> Result<(), EngineError> {
            Ok(())
        }
        async fn down(&self, _: &std::path::Path) -> Result<(), EngineError> {
            Ok(())
        }
        async fn list_by_name_prefix(&self, _: &str) -> Result<Vec<String>, EngineError> {
            Ok(Vec::new())
        }
    }

    struct HealthyAgent;

    #[async_trait]
    impl TaskTransport for HealthyAgent {
        async fn execute_task(&self, _: &TaskRequest) -> Result<TaskOutcome, EngineError> {
            Ok(TaskOutcome::default())
        }
        async fn health_check(&self) -> Result<(), EngineError> {
            Ok(())
        }
        async fn status(&self) -> Result<AgentStatus, EngineError> {
            Ok(AgentStatus::default())
        }
    }

    struct HealthyConnector;

    impl AgentConnector for HealthyConnector {
        fn connect(&self, _: &str, _: &str) -> Result<Arc<dyn TaskTransport>, EngineError> {
            Ok(Arc::new(HealthyAgent))
        }
    }

    fn state() -> ApiState {
        let orchestrator = Orchestrator::new(
            &ContainersConfig::default(),
            Arc::new(IdleRuntime),
            Arc::new(HealthyConnector),
        );
        let pool = WorkerPool::new(
            Arc::new(StaticProviderDirectory::default()),
            Arc::new(ChatCompletionConnector::new(Duration::from_secs(1)).unwrap()),
            4,
        );
        ApiState {
            orchestrator: Arc::new(orchestrator),
            pool: Arc::new(pool),
        }
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let response = router(state())
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "ok");
    }

    #[tokio::test]
    async fn test_register_requires_project_and_url() {
        let response = router(state())
            .oneshot(post_json(
                "/api/v1/project-agents/register",
                json!({"project_id": "proj1", "agent_url": ""}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_register_then_list_and_heartbeat() {
        let state = state();

        let response = router(state.clone())
            .oneshot(post_json(
                "/api/v1/project-agents/register",
                json!({
                    "project_id": "proj1",
                    "agent_url": "http://foreman-project-proj1:8090",
                    "roles": ["builder"]
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "registered");

        let response = router(state.clone())
            .oneshot(
                Request::builder()
                    .uri("/api/v1/environments")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["count"], 1);
        assert_eq!(body["environments"][0]["roles"][0], "builder");

        let response = router(state)
            .oneshot(post_json("/api/v1/project-agents/proj1/heartbeat", json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_heartbeat_unknown_project() {
        let response = router(state())
            .oneshot(post_json("/api/v1/project-agents/ghost/heartbeat", json!({})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_worker_stats() {
        let response = router(state())
            .oneshot(
                Request::builder()
                    .uri("/api/v1/workers/stats")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        let body = body_json(response).await;
        assert_eq!(body["total_workers"], 0);
        assert_eq!(body["max_workers"], 4);
    }
}
