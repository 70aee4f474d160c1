//! Domain and wire types shared between the engine and task transports

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Persona attached to an agent
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Persona {
    pub name: String,
    #[serde(default)]
    pub character: String,
    #[serde(default)]
    pub mission: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

/// A configured identity capable of executing tasks
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Agent {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persona: Option<Persona>,
}

impl Agent {
    /// Create an agent without a persona
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            persona: None,
        }
    }

    /// Attach a persona
    pub fn with_persona(mut self, persona: Persona) -> Self {
        self.persona = Some(persona);
        self
    }

    /// Persona name, if one is attached
    pub fn persona_name(&self) -> Option<&str> {
        self.persona.as_ref().map(|p| p.name.as_str())
    }
}

/// Connection parameters for an LLM provider, as resolved by a provider directory
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectionParams {
    pub provider_id: String,
    pub name: String,
    pub base_url: String,
    pub model: String,
    /// API key, if the provider needs one. Never serialized.
    #[serde(skip)]
    pub api_key: Option<String>,
}

/// A unit of work handed to a worker
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub id: String,
    pub description: String,
    #[serde(default)]
    pub context: String,
    #[serde(default)]
    pub bead_id: String,
    #[serde(default)]
    pub project_id: String,
}

impl Task {
    /// Create a task with an ID and description
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            ..Default::default()
        }
    }

    /// Attach free-form context
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    /// Convert into the transport request for a given action
    pub fn to_request(&self, action: &str) -> TaskRequest {
        let mut params = serde_json::Map::new();
        params.insert(
            "description".to_string(),
            serde_json::Value::String(self.description.clone()),
        );
        if !self.context.is_empty() {
            params.insert(
                "context".to_string(),
                serde_json::Value::String(self.context.clone()),
            );
        }

        TaskRequest {
            task_id: self.id.clone(),
            bead_id: self.bead_id.clone(),
            action: action.to_string(),
            project_id: self.project_id.clone(),
            params,
        }
    }
}

/// Result of a task executed by a worker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: String,
    pub worker_id: String,
    pub agent_id: String,
    pub response: String,
    pub tokens_used: u64,
    pub completed_at: DateTime<Utc>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Request sent over a task transport
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TaskRequest {
    pub task_id: String,
    #[serde(default)]
    pub bead_id: String,
    pub action: String,
    #[serde(default)]
    pub project_id: String,
    #[serde(default)]
    pub params: serde_json::Map<String, serde_json::Value>,
}

impl TaskRequest {
    /// Get a string parameter
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(|v| v.as_str())
    }
}

/// What a transport reports back after executing a request
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TaskOutcome {
    pub output: String,
    #[serde(default)]
    pub tokens_used: u64,
}

/// Status snapshot reported by an execution target
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AgentStatus {
    pub project_id: String,
    #[serde(default)]
    pub work_dir: String,
    pub busy: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_task: Option<serde_json::Value>,
}

/// Result reported by a project agent for a submitted task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentTaskResult {
    pub task_id: String,
    #[serde(default)]
    pub bead_id: String,
    pub success: bool,
    #[serde(default)]
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Resource limits for a project environment
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ResourceLimits {
    /// CPU quota, e.g. "2.0"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpus: Option<String>,
    /// Memory limit, e.g. "4g"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
}

/// A project whose tasks run inside an isolated environment
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Project {
    pub id: String,
    pub name: String,
    /// Free-form project context. `base_image` overrides the default image.
    #[serde(default)]
    pub context: HashMap<String, String>,
    /// Extra packages installed into the default build definition
    #[serde(default)]
    pub packages: Vec<String>,
    #[serde(default)]
    pub resources: ResourceLimits,
}

impl Project {
    /// Create a project with an ID and display name
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    /// Override the base image
    pub fn with_base_image(mut self, image: impl Into<String>) -> Self {
        self.context.insert("base_image".to_string(), image.into());
        self
    }

    /// Per-project base image override, if any
    pub fn base_image(&self) -> Option<&str> {
        self.context
            .get("base_image")
            .map(String::as_str)
            .filter(|s| !s.is_empty())
    }
}
