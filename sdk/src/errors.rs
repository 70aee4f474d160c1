//! Error types and handling
//!
//! This module provides the error types used throughout the Foreman engine.
//! All errors implement the `EngineErrorExt` trait which provides operator-facing
//! hints and indicates whether errors are recoverable.
//!
//! Every failure is scoped to a single identity (an agent ID or a project ID).
//! Nothing in this taxonomy is fatal to the process.

use thiserror::Error;

/// Trait for engine error extensions
///
/// This trait provides additional context for errors, including short hints
/// for whoever is driving the scheduler and recoverability information.
pub trait EngineErrorExt {
    /// Returns a short hint describing what the caller can do about the error
    fn user_hint(&self) -> &str;

    /// Returns whether the error is recoverable
    ///
    /// Recoverable errors can be corrected or retried by the caller. The engine
    /// itself never retries; retry policy belongs to whoever called it.
    fn is_recoverable(&self) -> bool;
}

/// Main engine error type
///
/// # Error Categories
///
/// - **Capacity / identity**: pool full, duplicate or unknown identities
/// - **Provisioning**: manifest generation, image build, runtime commands
/// - **Readiness**: health gate deadline expiry
/// - **Execution**: transport failures, busy workers, cancellation
/// - **Configuration**: invalid or missing configuration
///
/// # Examples
///
/// ```
/// use sdk::errors::{EngineError, EngineErrorExt};
///
/// let error = EngineError::CapacityExceeded { max: 4 };
/// println!("Hint: {}", error.user_hint());
/// assert!(error.is_recoverable());
///
/// let fatal = EngineError::ManifestGenerationFailed {
///     project: "proj1".to_string(),
///     reason: "read-only filesystem".to_string(),
/// };
/// assert!(!fatal.is_recoverable());
/// ```
#[derive(Debug, Error)]
pub enum EngineError {
    // Worker pool errors
    #[error("Maximum number of workers ({max}) reached")]
    CapacityExceeded { max: usize },

    #[error("Worker already exists for agent {0}")]
    DuplicateWorker(String),

    #[error("Worker not found for agent {0}")]
    WorkerNotFound(String),

    #[error("Worker {0} is busy")]
    WorkerBusy(String),

    #[error("Provider not found: {0}")]
    ProviderNotFound(String),

    // Orchestrator errors
    #[error("No agent for project {0}")]
    NoAgentForProject(String),

    #[error("Maximum number of environments ({max}) reached")]
    EnvironmentCapacityExceeded { max: usize },

    #[error("Failed to generate manifest for project {project}: {reason}")]
    ManifestGenerationFailed { project: String, reason: String },

    #[error("Build failed for project {project}: {reason}")]
    BuildFailed { project: String, reason: String },

    #[error("Timed out after {timeout_secs}s waiting for {target} to become healthy")]
    HealthTimeout { target: String, timeout_secs: u64 },

    #[error("Runtime command `{command}` failed: {output}")]
    RuntimeCommandFailed { command: String, output: String },

    // Execution errors
    #[error("Operation cancelled")]
    Cancelled,

    #[error("Transport error: {0}")]
    Transport(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Returns true for the not-found family of errors
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::WorkerNotFound(_) | Self::ProviderNotFound(_) | Self::NoAgentForProject(_)
        )
    }
}

impl EngineErrorExt for EngineError {
    fn user_hint(&self) -> &str {
        match self {
            Self::CapacityExceeded { .. } => "Worker pool is full. Stop an idle worker first",
            Self::DuplicateWorker(_) => "This agent already has a live worker",
            Self::WorkerNotFound(_) => "Spawn a worker for this agent first",
            Self::WorkerBusy(_) => "Worker is executing another task. Try again later",
            Self::ProviderNotFound(_) => "Check the [[providers]] section of your config",

            Self::NoAgentForProject(_) => "Ensure the project environment before routing work",
            Self::EnvironmentCapacityExceeded { .. } => {
                "Too many project environments. Stop one first"
            }
            Self::ManifestGenerationFailed { .. } => {
                "Could not write the environment manifest. Check projects_root permissions"
            }
            Self::BuildFailed { .. } => "Environment image failed to build. Check runtime logs",
            Self::HealthTimeout { .. } => "Environment started but never reported healthy",
            Self::RuntimeCommandFailed { .. } => "Container runtime command failed",

            Self::Cancelled => "Operation was cancelled by the caller",
            Self::Transport(_) => "Could not reach the execution target",

            Self::Config(_) => "Check your config.toml file for errors",
            Self::Io(_) => "File system operation failed",
        }
    }

    fn is_recoverable(&self) -> bool {
        match self {
            // Non-recoverable errors
            Self::ManifestGenerationFailed { .. } | Self::Config(_) => false,

            // All other errors are potentially recoverable
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_identity() {
        let err = EngineError::BuildFailed {
            project: "proj1".to_string(),
            reason: "exit status 1".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("proj1"));
        assert!(msg.contains("exit status 1"));
    }

    #[test]
    fn test_health_timeout_is_distinct_from_build_failure() {
        let timeout = EngineError::HealthTimeout {
            target: "proj1".to_string(),
            timeout_secs: 60,
        };
        assert!(matches!(timeout, EngineError::HealthTimeout { .. }));
        assert_ne!(
            timeout.user_hint(),
            EngineError::BuildFailed {
                project: "proj1".to_string(),
                reason: String::new(),
            }
            .user_hint()
        );
    }

    #[test]
    fn test_not_found_family() {
        assert!(EngineError::WorkerNotFound("a".into()).is_not_found());
        assert!(EngineError::NoAgentForProject("p".into()).is_not_found());
        assert!(!EngineError::Cancelled.is_not_found());
    }
}
