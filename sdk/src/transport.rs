//! Transport and message bus contracts
//!
//! This module defines the traits an execution target must implement to be
//! driven by the engine. A worker is bound to one `TaskTransport` for its LLM
//! provider; a project agent client is bound to one `TaskTransport` for its
//! environment's endpoint.
//!
//! Cancellation is expressed by dropping the returned future: implementations
//! must not detach work that outlives the future.

use crate::errors::EngineError;
use crate::types::{AgentStatus, AgentTaskResult, TaskOutcome, TaskRequest};
use async_trait::async_trait;

/// Contract every task executor transport must satisfy
#[async_trait]
pub trait TaskTransport: Send + Sync {
    /// Execute (or submit) a task on the target
    async fn execute_task(&self, request: &TaskRequest) -> Result<TaskOutcome, EngineError>;

    /// Liveness check. `Ok(())` means healthy.
    async fn health_check(&self) -> Result<(), EngineError>;

    /// Current status snapshot of the target
    async fn status(&self) -> Result<AgentStatus, EngineError>;

    /// Result of a previously submitted task, if the target keeps one
    async fn task_result(&self, _task_id: &str) -> Result<Option<AgentTaskResult>, EngineError> {
        Ok(None)
    }
}

/// Fire-and-forget publication channel
///
/// Injected into the orchestrator, never constructed by it.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publish a payload on a topic
    async fn publish(&self, topic: &str, payload: serde_json::Value) -> Result<(), EngineError>;
}
