//! Command handlers for CLI operations
//!
//! This module implements the handlers for all CLI commands:
//! - ensure: Provision a project environment
//! - stop: Stop one project environment
//! - ps: List running environments
//! - down: Tear down every environment
//! - serve: Run the control API
//! - config: Show configuration

use anyhow::{Context, Result};
use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::api::{self, ApiState};
use crate::config::Config;
use crate::containers::{
    client::DEFAULT_AGENT_TIMEOUT, ComposeRuntime, HttpAgentConnector, Orchestrator,
};
use crate::message_bus::MessageBus;
use crate::provider::{
    chat::DEFAULT_REQUEST_TIMEOUT, ChatCompletionConnector, StaticProviderDirectory,
};
use crate::worker::WorkerPool;
use sdk::errors::EngineErrorExt;
use sdk::types::{Project, ResourceLimits};

/// Output format for command results
#[derive(Debug, Clone, Copy)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for machine consumption
    Json,
}

/// Project description assembled from `ensure` arguments
#[derive(Debug, Clone, Default)]
pub struct EnsureArgs {
    pub project: String,
    pub name: Option<String>,
    pub base_image: Option<String>,
    pub packages: Vec<String>,
    pub cpus: Option<String>,
    pub memory: Option<String>,
}

impl EnsureArgs {
    pub fn into_project(self) -> Project {
        let name = self.name.unwrap_or_else(|| self.project.clone());
        let mut project = Project::new(self.project, name);
        if let Some(image) = self.base_image {
            project = project.with_base_image(image);
        }
        project.packages = self.packages;
        project.resources = ResourceLimits {
            cpus: self.cpus,
            memory: self.memory,
        };
        project
    }
}

/// Build an orchestrator driving the local container runtime
pub fn build_orchestrator(config: &Config) -> Result<Orchestrator> {
    let connector =
        HttpAgentConnector::new(DEFAULT_AGENT_TIMEOUT).context("Failed to create agent connector")?;
    Ok(Orchestrator::new(
        &config.containers,
        Arc::new(ComposeRuntime::new()),
        Arc::new(connector),
    ))
}

/// Build a worker pool over the configured providers
pub fn build_pool(config: &Config) -> Result<WorkerPool> {
    let connector = ChatCompletionConnector::new(DEFAULT_REQUEST_TIMEOUT)
        .context("Failed to create provider connector")?;
    Ok(WorkerPool::new(
        Arc::new(StaticProviderDirectory::new(config.providers.clone())),
        Arc::new(connector),
        config.workers.max_workers,
    ))
}

/// Cancellation token fired on Ctrl-C
fn interrupt_token() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, cancelling");
            trigger.cancel();
        }
    });
    token
}

/// Provision (or verify) a project environment
pub async fn handle_ensure(args: EnsureArgs, config: &Config, format: OutputFormat) -> Result<()> {
    let orchestrator = build_orchestrator(config)?;
    let project = args.into_project();
    let cancel = interrupt_token();

    match orchestrator.ensure_environment(&cancel, &project).await {
        Ok(client) => {
            match format {
                OutputFormat::Text => {
                    println!("✓ Environment for {} is ready", project.id);
                    println!("  Endpoint: {}", client.endpoint());
                    println!("  Manifest: {}", orchestrator.compose_path().display());
                }
                OutputFormat::Json => {
                    let output = json!({
                        "success": true,
                        "project_id": project.id,
                        "endpoint": client.endpoint(),
                        "manifest": orchestrator.compose_path(),
                    });
                    println!("{}", serde_json::to_string_pretty(&output)?);
                }
            }
            Ok(())
        }
        Err(e) => {
            match format {
                OutputFormat::Text => {
                    println!("✗ Failed to ensure environment for {}: {}", project.id, e);
                    println!("  Hint: {}", e.user_hint());
                }
                OutputFormat::Json => {
                    let output = json!({
                        "success": false,
                        "project_id": project.id,
                        "error": e.to_string(),
                        "recoverable": e.is_recoverable(),
                    });
                    println!("{}", serde_json::to_string_pretty(&output)?);
                }
            }
            Err(e.into())
        }
    }
}

/// Stop one project environment
pub async fn handle_stop(project_id: String, config: &Config, format: OutputFormat) -> Result<()> {
    let orchestrator = build_orchestrator(config)?;
    let cancel = interrupt_token();

    orchestrator
        .stop_running_environment(&cancel, &project_id)
        .await?;

    match format {
        OutputFormat::Text => println!("✓ Stopped environment for {}", project_id),
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({"stopped": project_id}))?
            );
        }
    }
    Ok(())
}

/// List running project environments
pub async fn handle_ps(config: &Config, format: OutputFormat) -> Result<()> {
    let orchestrator = build_orchestrator(config)?;
    let projects = orchestrator
        .list_running_environments(&interrupt_token())
        .await?;

    match format {
        OutputFormat::Text => {
            if projects.is_empty() {
                println!("No running environments");
                return Ok(());
            }
            println!("Running environments:");
            for project in &projects {
                println!(
                    "  {:<24} {}",
                    project,
                    orchestrator.naming().endpoint(project)
                );
            }
        }
        OutputFormat::Json => {
            let output = json!({
                "count": projects.len(),
                "projects": projects,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }
    Ok(())
}

/// Tear down every environment in the manifest
pub async fn handle_down(config: &Config, format: OutputFormat) -> Result<()> {
    let orchestrator = build_orchestrator(config)?;
    orchestrator.stop_all(&interrupt_token()).await?;

    match format {
        OutputFormat::Text => println!("✓ All environments stopped"),
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&json!({"success": true}))?);
        }
    }
    Ok(())
}

/// Run the control API until Ctrl-C
pub async fn handle_serve(bind: Option<String>, config: &Config) -> Result<()> {
    let orchestrator = Arc::new(build_orchestrator(config)?);
    let pool = Arc::new(build_pool(config)?);

    orchestrator.set_message_bus(Arc::new(MessageBus::new()));

    let shutdown = interrupt_token();
    if let Err(e) = orchestrator.adopt_running_environments(&shutdown).await {
        tracing::warn!("Could not adopt running environments: {}", e);
    }

    let bind = bind.unwrap_or_else(|| config.api.bind.clone());
    let state = ApiState {
        orchestrator,
        pool: Arc::clone(&pool),
    };

    api::serve(&bind, state, shutdown)
        .await
        .with_context(|| format!("Control API failed on {}", bind))?;

    pool.stop_all().await;
    Ok(())
}

/// Show the effective configuration
pub fn handle_config_show(config: &Config, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => {
            let text =
                toml::to_string_pretty(config).context("Failed to serialize configuration")?;
            println!("{}", text);
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(config)?);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensure_args_into_project() {
        let project = EnsureArgs {
            project: "proj1".to_string(),
            base_image: Some("rust:1.80".to_string()),
            packages: vec!["pkg-config".to_string()],
            memory: Some("4g".to_string()),
            ..Default::default()
        }
        .into_project();

        assert_eq!(project.id, "proj1");
        assert_eq!(project.name, "proj1");
        assert_eq!(project.base_image(), Some("rust:1.80"));
        assert_eq!(project.packages, vec!["pkg-config"]);
        assert_eq!(project.resources.memory.as_deref(), Some("4g"));
        assert!(project.resources.cpus.is_none());
    }

    #[test]
    fn test_build_components_from_default_config() {
        let config = Config::default_config();

        let pool = build_pool(&config).unwrap();
        assert_eq!(pool.max_workers(), 10);

        let orchestrator = build_orchestrator(&config).unwrap();
        assert!(orchestrator
            .compose_path()
            .ends_with("docker-compose-projects.yml"));
    }
}
