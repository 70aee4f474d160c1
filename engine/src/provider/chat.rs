//! OpenAI-compatible chat completion transport
//!
//! Binds a worker to any backend that speaks the `/chat/completions` dialect
//! (OpenAI, Ollama's `/v1` endpoint, vLLM, NVIDIA NIM, ...).

use super::TransportConnector;
use async_trait::async_trait;
use sdk::errors::EngineError;
use sdk::transport::TaskTransport;
use sdk::types::{Agent, AgentStatus, ConnectionParams, TaskOutcome, TaskRequest};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

/// Default per-request timeout for provider calls
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// Builds `ChatCompletionTransport`s sharing one HTTP client
#[derive(Debug, Clone)]
pub struct ChatCompletionConnector {
    client: reqwest::Client,
}

impl ChatCompletionConnector {
    pub fn new(timeout: Duration) -> Result<Self, EngineError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EngineError::Transport(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

impl TransportConnector for ChatCompletionConnector {
    fn connect(
        &self,
        agent: &Agent,
        params: &ConnectionParams,
    ) -> Result<Arc<dyn TaskTransport>, EngineError> {
        Ok(Arc::new(ChatCompletionTransport::new(
            self.client.clone(),
            params.clone(),
            system_prompt(agent),
        )))
    }
}

/// Task transport for one agent on one provider
pub struct ChatCompletionTransport {
    client: reqwest::Client,
    params: ConnectionParams,
    system_prompt: String,
}

impl ChatCompletionTransport {
    pub fn new(client: reqwest::Client, params: ConnectionParams, system_prompt: String) -> Self {
        Self {
            client,
            params,
            system_prompt,
        }
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.params.api_key {
            Some(key) => request.header("Authorization", format!("Bearer {}", key)),
            None => request,
        }
    }
}

#[async_trait]
impl TaskTransport for ChatCompletionTransport {
    async fn execute_task(&self, request: &TaskRequest) -> Result<TaskOutcome, EngineError> {
        let mut user_prompt = request.param_str("description").unwrap_or_default().to_string();
        if let Some(context) = request.param_str("context") {
            user_prompt = format!("{}\n\nContext:\n{}", user_prompt, context);
        }

        let payload = json!({
            "model": self.params.model,
            "messages": [
                { "role": "system", "content": self.system_prompt },
                { "role": "user", "content": user_prompt },
            ],
            "temperature": 0.7,
        });

        tracing::debug!(
            "Chat completion request: provider={}, model={}, task={}",
            self.params.provider_id,
            self.params.model,
            request.task_id
        );

        let url = format!("{}/chat/completions", self.params.base_url);
        let response = self
            .authorize(self.client.post(&url))
            .json(&payload)
            .send()
            .await
            .map_err(|e| EngineError::Transport(format!("{}: {}", self.params.provider_id, e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(EngineError::Transport(format!(
                "{} returned {}: {}",
                self.params.provider_id, status, text
            )));
        }

        let data: serde_json::Value = response
            .json()
            .await
            .map_err(|e| EngineError::Transport(format!("Invalid completion body: {}", e)))?;

        let content = data
            .get("choices")
            .and_then(|c| c.as_array())
            .and_then(|c| c.first())
            .and_then(|choice| choice.get("message"))
            .and_then(|message| message.get("content"))
            .and_then(|content| content.as_str())
            .ok_or_else(|| EngineError::Transport("No response from provider".to_string()))?;

        let tokens_used = data
            .get("usage")
            .and_then(|u| u.get("total_tokens"))
            .and_then(|t| t.as_u64())
            .unwrap_or(0);

        Ok(TaskOutcome {
            output: content.to_string(),
            tokens_used,
        })
    }

    async fn health_check(&self) -> Result<(), EngineError> {
        let url = format!("{}/models", self.params.base_url);
        let response = self
            .authorize(self.client.get(&url))
            .send()
            .await
            .map_err(|e| EngineError::Transport(e.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(EngineError::Transport(format!(
                "unhealthy status: {}",
                response.status()
            )))
        }
    }

    async fn status(&self) -> Result<AgentStatus, EngineError> {
        Ok(AgentStatus {
            project_id: String::new(),
            work_dir: String::new(),
            busy: false,
            current_task: None,
        })
    }
}

/// System prompt derived from the agent's persona
fn system_prompt(agent: &Agent) -> String {
    let Some(persona) = &agent.persona else {
        return format!("You are {}, an AI agent.", agent.name);
    };

    let mut prompt = format!("You are {}.\n\n", agent.name);
    if !persona.character.is_empty() {
        prompt.push_str(&format!("# Your Character\n{}\n\n", persona.character));
    }
    if !persona.mission.is_empty() {
        prompt.push_str(&format!("# Your Mission\n{}\n\n", persona.mission));
    }
    if !persona.capabilities.is_empty() {
        prompt.push_str("# Your Capabilities\n");
        for capability in &persona.capabilities {
            prompt.push_str(&format!("- {}\n", capability));
        }
    }
    prompt.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use sdk::types::{Persona, Task};
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn params(base_url: String, api_key: Option<&str>) -> ConnectionParams {
        ConnectionParams {
            provider_id: "mock".to_string(),
            name: "Mock".to_string(),
            base_url,
            model: "test-model".to_string(),
            api_key: api_key.map(String::from),
        }
    }

    #[test]
    fn test_system_prompt_without_persona() {
        let prompt = system_prompt(&Agent::new("a", "Ada"));
        assert_eq!(prompt, "You are Ada, an AI agent.");
    }

    #[test]
    fn test_system_prompt_with_persona() {
        let agent = Agent::new("a", "Ada").with_persona(Persona {
            name: "reviewer".to_string(),
            character: "Meticulous".to_string(),
            mission: "Keep main green".to_string(),
            capabilities: vec!["review".to_string()],
        });
        let prompt = system_prompt(&agent);

        assert!(prompt.contains("# Your Character\nMeticulous"));
        assert!(prompt.contains("# Your Mission\nKeep main green"));
        assert!(prompt.contains("- review"));
    }

    #[tokio::test]
    async fn test_execute_task_parses_completion() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("Authorization", "Bearer sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{ "message": { "role": "assistant", "content": "done" } }],
                "usage": { "total_tokens": 42 }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let connector = ChatCompletionConnector::new(Duration::from_secs(5)).unwrap();
        let transport = connector
            .connect(&Agent::new("a", "Ada"), &params(server.uri(), Some("sk-test")))
            .unwrap();

        let outcome = transport
            .execute_task(&Task::new("t1", "write tests").to_request("complete"))
            .await
            .unwrap();

        assert_eq!(outcome.output, "done");
        assert_eq!(outcome.tokens_used, 42);
    }

    #[tokio::test]
    async fn test_execute_task_surfaces_http_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(500).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let connector = ChatCompletionConnector::new(Duration::from_secs(5)).unwrap();
        let transport = connector
            .connect(&Agent::new("a", "Ada"), &params(server.uri(), None))
            .unwrap();

        let result = transport
            .execute_task(&Task::new("t1", "x").to_request("complete"))
            .await;

        match result {
            Err(EngineError::Transport(msg)) => assert!(msg.contains("overloaded")),
            other => panic!("Expected Transport error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_execute_task_without_choices() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "choices": [] })))
            .mount(&server)
            .await;

        let connector = ChatCompletionConnector::new(Duration::from_secs(5)).unwrap();
        let transport = connector
            .connect(&Agent::new("a", "Ada"), &params(server.uri(), None))
            .unwrap();

        let result = transport
            .execute_task(&Task::new("t1", "x").to_request("complete"))
            .await;
        assert!(matches!(result, Err(EngineError::Transport(_))));
    }

    #[tokio::test]
    async fn test_health_check_hits_models_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/models"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": [] })))
            .mount(&server)
            .await;

        let connector = ChatCompletionConnector::new(Duration::from_secs(5)).unwrap();
        let transport = connector
            .connect(&Agent::new("a", "Ada"), &params(server.uri(), None))
            .unwrap();

        assert!(transport.health_check().await.is_ok());
    }
}
