//! Container runtime driver
//!
//! The orchestrator only needs five verbs from the runtime: build an image,
//! start a service, stop a service, tear everything in a manifest down, and
//! list running environments by name prefix. `ComposeRuntime` implements them
//! on top of the `docker compose` CLI.

use async_trait::async_trait;
use sdk::errors::EngineError;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

/// Runtime verbs the orchestrator drives
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Build the image for `service` described in `manifest`
    async fn build(&self, manifest: &Path, service: &str) -> Result<(), EngineError>;

    /// Start (or recreate) `service` in the background
    async fn start(&self, manifest: &Path, service: &str) -> Result<(), EngineError>;

    /// Stop `service`, keeping its volume
    async fn stop(&self, manifest: &Path, service: &str) -> Result<(), EngineError>;

    /// Stop and remove every service in `manifest`
    async fn down(&self, manifest: &Path) -> Result<(), EngineError>;

    /// Names of running containers whose name contains `prefix`
    async fn list_by_name_prefix(&self, prefix: &str) -> Result<Vec<String>, EngineError>;
}

/// `docker compose` backed runtime
#[derive(Debug, Clone)]
pub struct ComposeRuntime {
    binary: String,
}

impl ComposeRuntime {
    pub fn new() -> Self {
        Self::with_binary("docker")
    }

    /// Use a different CLI binary (e.g. `podman`)
    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn compose_args(manifest: &Path, verb: &[&str]) -> Vec<String> {
        let mut args = vec![
            "compose".to_string(),
            "-f".to_string(),
            manifest.display().to_string(),
        ];
        args.extend(verb.iter().map(|s| s.to_string()));
        args
    }

    /// Run the CLI and return stdout; a non-zero exit carries combined output
    async fn run(&self, args: Vec<String>) -> Result<String, EngineError> {
        let command_line = format!("{} {}", self.binary, args.join(" "));
        tracing::debug!("Running: {}", command_line);

        let output = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| EngineError::RuntimeCommandFailed {
                command: command_line.clone(),
                output: e.to_string(),
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if output.status.success() {
            return Ok(stdout);
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let combined = format!("{}{}", stdout, stderr).trim().to_string();
        tracing::error!("Command failed ({}): {}", output.status, command_line);
        Err(EngineError::RuntimeCommandFailed {
            command: command_line,
            output: combined,
        })
    }
}

impl Default for ComposeRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContainerRuntime for ComposeRuntime {
    async fn build(&self, manifest: &Path, service: &str) -> Result<(), EngineError> {
        self.run(Self::compose_args(manifest, &["build", service]))
            .await
            .map(|_| ())
    }

    async fn start(&self, manifest: &Path, service: &str) -> Result<(), EngineError> {
        self.run(Self::compose_args(manifest, &["up", "-d", service]))
            .await
            .map(|_| ())
    }

    async fn stop(&self, manifest: &Path, service: &str) -> Result<(), EngineError> {
        self.run(Self::compose_args(manifest, &["stop", service]))
            .await
            .map(|_| ())
    }

    async fn down(&self, manifest: &Path) -> Result<(), EngineError> {
        self.run(Self::compose_args(manifest, &["down"]))
            .await
            .map(|_| ())
    }

    async fn list_by_name_prefix(&self, prefix: &str) -> Result<Vec<String>, EngineError> {
        let stdout = self
            .run(vec![
                "ps".to_string(),
                "--filter".to_string(),
                format!("name={}", prefix),
                "--format".to_string(),
                "{{.Names}}".to_string(),
            ])
            .await?;

        Ok(stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(String::from)
            .collect())
    }
}
