//! Container Orchestrator module
//!
//! Per-project isolated execution environments: manifest generation, the
//! container runtime driver, the project agent client and the orchestrator
//! tying them together.

pub mod client;
pub mod manifest;
pub mod orchestrator;
pub mod runtime;

pub use client::{
    task_topic, AgentConnector, BusSlot, HttpAgentConnector, HttpAgentTransport,
    ProjectAgentClient,
};
pub use manifest::{ComposeFile, EnvironmentNaming};
pub use orchestrator::{EnvironmentInfo, Orchestrator};
pub use runtime::{ComposeRuntime, ContainerRuntime};
