//! Project agent client
//!
//! The callable handle for a healthy project environment. Task submission,
//! status and health all go through a [`TaskTransport`] bound to the
//! environment's endpoint; publication goes through the message bus shared
//! with the orchestrator.

use crate::health::{GateOutcome, HealthGate};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sdk::errors::EngineError;
use sdk::transport::{MessageBus, TaskTransport};
use sdk::types::{AgentStatus, AgentTaskResult, TaskOutcome, TaskRequest};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Status poll interval while waiting for a submitted task
pub const STATUS_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Per-request timeout for health checks
const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

/// Default timeout for submission and status calls
pub const DEFAULT_AGENT_TIMEOUT: Duration = Duration::from_secs(60);

/// Topic a project's tasks are published on
pub fn task_topic(project_id: &str) -> String {
    format!("tasks.project.{}", project_id)
}

/// Message bus slot shared by the orchestrator and every client it creates
///
/// Setting the bus on the orchestrator makes it visible to existing clients.
#[derive(Clone, Default)]
pub struct BusSlot(Arc<RwLock<Option<Arc<dyn MessageBus>>>>);

impl BusSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, bus: Option<Arc<dyn MessageBus>>) {
        *self.0.write().unwrap_or_else(|e| e.into_inner()) = bus;
    }

    pub fn get(&self) -> Option<Arc<dyn MessageBus>> {
        self.0.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn is_set(&self) -> bool {
        self.0.read().unwrap_or_else(|e| e.into_inner()).is_some()
    }
}

/// Builds the transport a client uses to reach an environment endpoint
pub trait AgentConnector: Send + Sync {
    fn connect(&self, project_id: &str, endpoint: &str)
        -> Result<Arc<dyn TaskTransport>, EngineError>;
}

/// Handle to one project environment's task agent
pub struct ProjectAgentClient {
    project_id: String,
    endpoint: String,
    roles: Vec<String>,
    transport: Arc<dyn TaskTransport>,
    bus: BusSlot,
    registered_at: DateTime<Utc>,
    last_seen: Mutex<DateTime<Utc>>,
}

impl ProjectAgentClient {
    pub fn new(
        project_id: impl Into<String>,
        endpoint: impl Into<String>,
        transport: Arc<dyn TaskTransport>,
        bus: BusSlot,
    ) -> Self {
        let now = Utc::now();
        Self {
            project_id: project_id.into(),
            endpoint: endpoint.into(),
            roles: Vec::new(),
            transport,
            bus,
            registered_at: now,
            last_seen: Mutex::new(now),
        }
    }

    pub fn with_roles(mut self, roles: Vec<String>) -> Self {
        self.roles = roles;
        self
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn roles(&self) -> &[String] {
        &self.roles
    }

    pub fn registered_at(&self) -> DateTime<Utc> {
        self.registered_at
    }

    pub fn last_seen(&self) -> DateTime<Utc> {
        *self.last_seen.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record a heartbeat from the agent
    pub fn touch(&self) {
        *self.last_seen.lock().unwrap_or_else(|e| e.into_inner()) = Utc::now();
    }

    pub fn has_message_bus(&self) -> bool {
        self.bus.is_set()
    }

    pub async fn health(&self) -> Result<(), EngineError> {
        self.transport.health_check().await?;
        self.touch();
        Ok(())
    }

    pub async fn status(&self) -> Result<AgentStatus, EngineError> {
        self.transport.status().await
    }

    /// Submit a task to the agent
    ///
    /// The request is always scoped to this client's project.
    pub async fn execute_task(
        &self,
        cancel: &CancellationToken,
        request: &TaskRequest,
    ) -> Result<TaskOutcome, EngineError> {
        let request = self.scoped(request);
        tracing::debug!(
            "Submitting task {} to project {}",
            request.task_id,
            self.project_id
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(EngineError::Cancelled),
            result = self.transport.execute_task(&request) => result,
        }
    }

    /// Submit a task and wait until the agent reports it is no longer busy
    pub async fn execute_task_sync(
        &self,
        cancel: &CancellationToken,
        request: &TaskRequest,
        timeout: Duration,
    ) -> Result<AgentTaskResult, EngineError> {
        let submitted = self.execute_task(cancel, request).await?;

        // Give the agent one interval to pick the task up before polling
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(EngineError::Cancelled),
            _ = tokio::time::sleep(STATUS_POLL_INTERVAL) => {}
        }

        let this = self;
        let gate = HealthGate::new(STATUS_POLL_INTERVAL, timeout);
        let outcome = gate
            .wait(cancel, move || async move {
                let status = this.status().await?;
                if status.busy {
                    Err(EngineError::Transport(format!(
                        "project {} still busy",
                        this.project_id
                    )))
                } else {
                    Ok(())
                }
            })
            .await;

        match outcome {
            GateOutcome::Ready => {}
            GateOutcome::Cancelled => return Err(EngineError::Cancelled),
            GateOutcome::TimedOut => {
                return Err(EngineError::Transport(format!(
                    "Task {} did not complete within {}s",
                    request.task_id,
                    timeout.as_secs()
                )))
            }
        }

        if let Some(result) = self.transport.task_result(&request.task_id).await? {
            return Ok(result);
        }

        let output = if submitted.output.trim().is_empty() {
            "Task completed".to_string()
        } else {
            submitted.output
        };
        Ok(AgentTaskResult {
            task_id: request.task_id.clone(),
            bead_id: request.bead_id.clone(),
            success: true,
            output,
            error: None,
        })
    }

    /// Publish a task on the shared bus instead of calling the agent directly
    pub async fn publish_task(&self, request: &TaskRequest) -> Result<(), EngineError> {
        let bus = self
            .bus
            .get()
            .ok_or_else(|| EngineError::Transport("message bus not configured".to_string()))?;

        let request = self.scoped(request);
        let payload = serde_json::to_value(&request)
            .map_err(|e| EngineError::Transport(format!("Failed to encode task: {}", e)))?;

        bus.publish(&task_topic(&self.project_id), payload).await?;
        tracing::debug!(
            "Published task {} for project {}",
            request.task_id,
            self.project_id
        );
        Ok(())
    }

    fn scoped(&self, request: &TaskRequest) -> TaskRequest {
        let mut request = request.clone();
        request.project_id = self.project_id.clone();
        request
    }
}

impl std::fmt::Debug for ProjectAgentClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProjectAgentClient")
            .field("project_id", &self.project_id)
            .field("endpoint", &self.endpoint)
            .field("roles", &self.roles)
            .finish()
    }
}

/// Connects clients to agents over HTTP
#[derive(Debug, Clone)]
pub struct HttpAgentConnector {
    client: reqwest::Client,
}

impl HttpAgentConnector {
    pub fn new(timeout: Duration) -> Result<Self, EngineError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EngineError::Transport(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

impl AgentConnector for HttpAgentConnector {
    fn connect(
        &self,
        project_id: &str,
        endpoint: &str,
    ) -> Result<Arc<dyn TaskTransport>, EngineError> {
        Ok(Arc::new(HttpAgentTransport::new(
            self.client.clone(),
            endpoint,
            project_id,
        )))
    }
}

/// HTTP transport to an in-environment task agent
///
/// `GET /health`, `GET /status`, `POST /task` (202 Accepted),
/// `GET /results/{task_id}`.
pub struct HttpAgentTransport {
    client: reqwest::Client,
    base_url: String,
    project_id: String,
}

impl HttpAgentTransport {
    pub fn new(client: reqwest::Client, base_url: &str, project_id: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            project_id: project_id.to_string(),
        }
    }

    fn transport_error(&self, e: reqwest::Error) -> EngineError {
        EngineError::Transport(format!("project {}: {}", self.project_id, e))
    }
}

#[async_trait]
impl TaskTransport for HttpAgentTransport {
    async fn execute_task(&self, request: &TaskRequest) -> Result<TaskOutcome, EngineError> {
        let response = self
            .client
            .post(format!("{}/task", self.base_url))
            .json(request)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if status != reqwest::StatusCode::ACCEPTED && status != reqwest::StatusCode::OK {
            return Err(EngineError::Transport(format!(
                "Task submission to project {} failed with {}: {}",
                self.project_id, status, body
            )));
        }

        Ok(TaskOutcome {
            output: body,
            tokens_used: 0,
        })
    }

    async fn health_check(&self) -> Result<(), EngineError> {
        let response = self
            .client
            .get(format!("{}/health", self.base_url))
            .timeout(HEALTH_CHECK_TIMEOUT)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        if response.status() == reqwest::StatusCode::OK {
            Ok(())
        } else {
            Err(EngineError::Transport(format!(
                "unhealthy status: {}",
                response.status()
            )))
        }
    }

    async fn status(&self) -> Result<AgentStatus, EngineError> {
        let response = self
            .client
            .get(format!("{}/status", self.base_url))
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        if !response.status().is_success() {
            return Err(EngineError::Transport(format!(
                "Status request failed: {}",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| EngineError::Transport(format!("Invalid status body: {}", e)))
    }

    async fn task_result(&self, task_id: &str) -> Result<Option<AgentTaskResult>, EngineError> {
        let response = self
            .client
            .get(format!("{}/results/{}", self.base_url, task_id))
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(EngineError::Transport(format!(
                "Result request failed: {}",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map(Some)
            .map_err(|e| EngineError::Transport(format!("Invalid result body: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message_bus::MessageBus as InProcessBus;
    use sdk::types::Task;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer, project_id: &str) -> ProjectAgentClient {
        let connector = HttpAgentConnector::new(Duration::from_secs(5)).unwrap();
        let transport = connector.connect(project_id, &server.uri()).unwrap();
        ProjectAgentClient::new(project_id, server.uri(), transport, BusSlot::new())
    }

    #[tokio::test]
    async fn test_health_ok_and_unhealthy() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = client_for(&server, "proj1");
        assert!(client.health().await.is_ok());
        assert!(matches!(client.health().await, Err(EngineError::Transport(_))));
    }

    #[tokio::test]
    async fn test_execute_task_forces_project_scope() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/task"))
            .and(body_partial_json(json!({ "project_id": "proj1", "task_id": "t1" })))
            .respond_with(ResponseTemplate::new(202).set_body_string("accepted"))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server, "proj1");
        let mut task = Task::new("t1", "build it");
        task.project_id = "someone-else".to_string();

        let outcome = client
            .execute_task(&CancellationToken::new(), &task.to_request("run"))
            .await
            .unwrap();
        assert_eq!(outcome.output, "accepted");
    }

    #[tokio::test]
    async fn test_execute_task_rejected_submission() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/task"))
            .respond_with(ResponseTemplate::new(409).set_body_string("busy"))
            .mount(&server)
            .await;

        let client = client_for(&server, "proj1");
        let result = client
            .execute_task(&CancellationToken::new(), &Task::new("t1", "x").to_request("run"))
            .await;

        match result {
            Err(EngineError::Transport(msg)) => assert!(msg.contains("409")),
            other => panic!("Expected Transport error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_execute_task_sync_returns_reported_result() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/task"))
            .respond_with(ResponseTemplate::new(202))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/status"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "project_id": "proj1",
                "work_dir": "/workspace",
                "busy": false
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/results/t1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "task_id": "t1",
                "bead_id": "b1",
                "success": true,
                "output": "all green"
            })))
            .mount(&server)
            .await;

        let client = client_for(&server, "proj1");
        let result = client
            .execute_task_sync(
                &CancellationToken::new(),
                &Task::new("t1", "test").to_request("run"),
                Duration::from_secs(10),
            )
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.output, "all green");
    }

    #[tokio::test]
    async fn test_execute_task_sync_without_stored_result() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/task"))
            .respond_with(ResponseTemplate::new(202))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/status"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "project_id": "proj1",
                "busy": false
            })))
            .mount(&server)
            .await;

        let client = client_for(&server, "proj1");
        let result = client
            .execute_task_sync(
                &CancellationToken::new(),
                &Task::new("t2", "test").to_request("run"),
                Duration::from_secs(10),
            )
            .await
            .unwrap();

        assert_eq!(result.task_id, "t2");
        assert_eq!(result.output, "Task completed");
    }

    #[tokio::test]
    async fn test_execute_task_sync_times_out_while_busy() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/task"))
            .respond_with(ResponseTemplate::new(202))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/status"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "project_id": "proj1",
                "busy": true
            })))
            .mount(&server)
            .await;

        let client = client_for(&server, "proj1");
        let result = client
            .execute_task_sync(
                &CancellationToken::new(),
                &Task::new("t3", "test").to_request("run"),
                Duration::from_secs(2),
            )
            .await;

        match result {
            Err(EngineError::Transport(msg)) => assert!(msg.contains("did not complete")),
            other => panic!("Expected timeout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_publish_task_requires_bus() {
        let server = MockServer::start().await;
        let client = client_for(&server, "proj1");

        let result = client
            .publish_task(&Task::new("t1", "x").to_request("run"))
            .await;
        assert!(matches!(result, Err(EngineError::Transport(_))));
        assert!(!client.has_message_bus());
    }

    #[tokio::test]
    async fn test_publish_task_uses_project_topic() {
        let server = MockServer::start().await;
        let client = client_for(&server, "proj1");

        let bus = Arc::new(InProcessBus::new());
        let mut rx = bus.subscribe(&task_topic("proj1")).await;
        let shared: Arc<dyn MessageBus> = bus.clone();
        client.bus.set(Some(shared));

        client
            .publish_task(&Task::new("t1", "x").to_request("run"))
            .await
            .unwrap();

        let message = rx.recv().await.unwrap();
        assert_eq!(message.topic, "tasks.project.proj1");
        assert_eq!(message.payload["project_id"], "proj1");
        assert_eq!(message.payload["task_id"], "t1");
    }
}
