//! Foreman SDK
//!
//! Shared contracts between the Foreman engine and the execution targets it
//! drives: the error taxonomy, the task/transport types, and the traits a
//! task transport or message bus must implement.

/// Error types and handling
pub mod errors;

/// Task, agent and project types
pub mod types;

/// Transport and message bus traits
pub mod transport;

// Re-export commonly used types
pub use errors::{EngineError, EngineErrorExt};
pub use transport::{MessageBus, TaskTransport};
pub use types::{
    Agent, AgentStatus, AgentTaskResult, ConnectionParams, Persona, Project, ResourceLimits, Task,
    TaskOutcome, TaskRequest, TaskResult,
};
