//! Container Orchestrator
//!
//! Provisions one isolated environment per project and keeps a registry of
//! healthy [`ProjectAgentClient`]s.
//!
//! `ensure_environment` is idempotent: a registered client that still answers
//! its health check is reused, an unhealthy one is discarded and the
//! environment rebuilt. Provisioning is serialized per project only, so a slow
//! build or health wait for one project never blocks lookups or provisioning
//! for another.

use super::client::{AgentConnector, BusSlot, ProjectAgentClient};
use super::manifest::{
    default_build_definition, is_valid_project_id, ComposeFile, EnvironmentNaming,
    ManifestSettings, BUILD_DEFINITION_NAME, COMPOSE_FILE_NAME,
};
use super::runtime::ContainerRuntime;
use crate::config::ContainersConfig;
use crate::health::HealthGate;
use crate::registry::{ProvisioningGuard, Registry, RegistryError};
use chrono::{DateTime, Utc};
use sdk::errors::EngineError;
use sdk::transport::MessageBus;
use sdk::types::Project;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

/// Registered environment as reported by the control API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentInfo {
    pub project_id: String,
    pub endpoint: String,
    pub roles: Vec<String>,
    pub registered_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

struct ManifestState {
    doc: ComposeFile,
    loaded: bool,
}

pub struct Orchestrator {
    naming: EnvironmentNaming,
    settings: ManifestSettings,
    compose_path: PathBuf,
    manifest: Mutex<ManifestState>,
    runtime: Arc<dyn ContainerRuntime>,
    connector: Arc<dyn AgentConnector>,
    gate: HealthGate,
    agents: Registry<ProjectAgentClient>,
    bus: BusSlot,
}

impl Orchestrator {
    pub fn new(
        config: &ContainersConfig,
        runtime: Arc<dyn ContainerRuntime>,
        connector: Arc<dyn AgentConnector>,
    ) -> Self {
        let settings = ManifestSettings {
            projects_root: config.projects_root.clone(),
            control_plane_url: config.control_plane_url.clone(),
            network: config.network.clone(),
            default_base_image: config.default_base_image.clone(),
            agent_image: config.agent_image.clone(),
        };

        tracing::info!(
            "Initializing Orchestrator (projects_root={}, prefix={})",
            settings.projects_root.display(),
            config.name_prefix
        );

        Self {
            naming: EnvironmentNaming::new(config.name_prefix.clone(), config.agent_port),
            compose_path: settings.projects_root.join(COMPOSE_FILE_NAME),
            settings,
            manifest: Mutex::new(ManifestState {
                doc: ComposeFile::default(),
                loaded: false,
            }),
            runtime,
            connector,
            gate: HealthGate::new(config.health_interval(), config.health_timeout()),
            agents: Registry::new("environment", config.max_environments),
            bus: BusSlot::new(),
        }
    }

    pub fn naming(&self) -> &EnvironmentNaming {
        &self.naming
    }

    /// Path of the compose manifest describing every environment
    pub fn compose_path(&self) -> &Path {
        &self.compose_path
    }

    /// Make sure a healthy environment is running for `project`
    ///
    /// # Errors
    ///
    /// - `ManifestGenerationFailed` if the manifest or build definition cannot be written
    /// - `BuildFailed` if the image build fails
    /// - `RuntimeCommandFailed` if the environment cannot be started
    /// - `HealthTimeout` if it never reports healthy; nothing is registered
    /// - `EnvironmentCapacityExceeded` if the environment ceiling is reached
    /// - `Cancelled` if `cancel` fires first
    pub async fn ensure_environment(
        &self,
        cancel: &CancellationToken,
        project: &Project,
    ) -> Result<Arc<ProjectAgentClient>, EngineError> {
        let project_id = project.id.as_str();
        if !is_valid_project_id(project_id) {
            return Err(EngineError::ManifestGenerationFailed {
                project: project_id.to_string(),
                reason: "project id must be alphanumeric with '.', '_' or '-'".to_string(),
            });
        }

        let _slot = self.acquire_slot(cancel, project_id).await?;

        if let Some(existing) = self.agents.get(project_id) {
            match cancellable(cancel, existing.health()).await {
                Ok(()) => {
                    tracing::debug!("Environment for project {} already healthy", project_id);
                    return Ok(existing);
                }
                Err(EngineError::Cancelled) => return Err(EngineError::Cancelled),
                Err(e) => {
                    tracing::warn!(
                        "Environment for project {} unhealthy ({}), rebuilding",
                        project_id,
                        e
                    );
                    self.agents.discard(project_id, &existing);
                }
            }
        }

        // Held until the client is published; in-flight provisioning counts
        // against the environment ceiling
        let reservation = self
            .agents
            .reserve(project_id)
            .map_err(|e| environment_error(e, project_id))?;

        tracing::info!("Provisioning environment for project {}", project_id);
        let manifest = self.write_manifest(project).await?;
        let service = self.naming.service_name(project_id);

        cancellable(cancel, self.runtime.build(&manifest, &service))
            .await
            .map_err(|e| match e {
                EngineError::Cancelled => EngineError::Cancelled,
                other => EngineError::BuildFailed {
                    project: project_id.to_string(),
                    reason: other.to_string(),
                },
            })?;

        cancellable(cancel, self.runtime.start(&manifest, &service))
            .await
            .map_err(|e| with_project_context(e, project_id))?;

        let endpoint = self.naming.endpoint(project_id);
        let client = self.client_for(project_id, &endpoint, Vec::new())?;

        let target = &client;
        self.gate
            .wait(cancel, move || target.health())
            .await
            .into_result(project_id, self.gate.timeout())?;

        let client = reservation.publish(client);

        tracing::info!(
            "Environment for project {} ready at {}",
            project_id,
            client.endpoint()
        );
        Ok(client)
    }

    pub fn get_agent(&self, project_id: &str) -> Result<Arc<ProjectAgentClient>, EngineError> {
        self.agents
            .get(project_id)
            .ok_or_else(|| EngineError::NoAgentForProject(project_id.to_string()))
    }

    /// Stop the environment for `project_id` and unregister its client
    ///
    /// Lookups for the project fail while the runtime stops it. If the
    /// runtime fails, or `cancel` fires first, the client stays registered.
    pub async fn stop_environment(
        &self,
        cancel: &CancellationToken,
        project_id: &str,
    ) -> Result<(), EngineError> {
        let _slot = self.acquire_slot(cancel, project_id).await?;
        self.stop_registered(cancel, project_id).await
    }

    /// Stop `project_id` whether or not this process registered it
    ///
    /// Environments outlive the process that started them, so a fresh process
    /// falls back to the runtime listing. Fails with `NoAgentForProject` if
    /// the project is neither registered nor running.
    pub async fn stop_running_environment(
        &self,
        cancel: &CancellationToken,
        project_id: &str,
    ) -> Result<(), EngineError> {
        let _slot = self.acquire_slot(cancel, project_id).await?;
        if self.agents.contains(project_id) {
            return self.stop_registered(cancel, project_id).await;
        }

        let running = self.list_running_environments(cancel).await?;
        if !running.iter().any(|p| p == project_id) {
            return Err(EngineError::NoAgentForProject(project_id.to_string()));
        }

        let service = self.naming.service_name(project_id);
        cancellable(cancel, self.runtime.stop(&self.compose_path, &service))
            .await
            .map_err(|e| with_project_context(e, project_id))?;

        tracing::info!("Stopped unregistered environment for project {}", project_id);
        Ok(())
    }

    /// Project IDs of running environments, as reported by the runtime
    ///
    /// Container names outside the naming scheme are skipped.
    pub async fn list_running_environments(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>, EngineError> {
        let names = cancellable(
            cancel,
            self.runtime.list_by_name_prefix(&self.naming.name_prefix()),
        )
        .await?;

        let mut projects: Vec<String> = names
            .iter()
            .filter_map(|name| self.naming.project_from_name(name))
            .map(String::from)
            .collect();
        projects.sort();
        projects.dedup();
        Ok(projects)
    }

    /// Tear down every environment described by the manifest
    ///
    /// A missing manifest means nothing was ever provisioned.
    pub async fn stop_all(&self, cancel: &CancellationToken) -> Result<(), EngineError> {
        let exists = tokio::fs::try_exists(&self.compose_path)
            .await
            .unwrap_or(false);
        if !exists {
            tracing::debug!("No manifest at {}, nothing to stop", self.compose_path.display());
            return Ok(());
        }

        let manifest = self.compose_path.clone();
        let runtime = &self.runtime;
        let drained = self
            .agents
            .drain_with(|_| async move { cancellable(cancel, runtime.down(&manifest)).await })
            .await
            .map_err(|e| environment_error(e, "*"))?;

        tracing::info!("Stopped all environments ({} registered)", drained.len());
        Ok(())
    }

    /// Share `bus` with this orchestrator and every client it has created
    pub fn set_message_bus(&self, bus: Arc<dyn MessageBus>) {
        self.bus.set(Some(bus));
        tracing::info!("Message bus configured for project agents");
    }

    /// Register (or replace) the client for an agent that announced itself
    pub fn register_agent(
        &self,
        project_id: &str,
        endpoint: &str,
        roles: Vec<String>,
    ) -> Result<Arc<ProjectAgentClient>, EngineError> {
        if project_id.trim().is_empty() || endpoint.trim().is_empty() {
            return Err(EngineError::Transport(
                "project_id and agent endpoint are required".to_string(),
            ));
        }

        let client = self.client_for(project_id, endpoint, roles)?;
        let client = self
            .agents
            .publish(project_id, client)
            .map_err(|e| environment_error(e, project_id))?;

        tracing::info!(
            "Registered agent for project {} at {} (roles: {:?})",
            project_id,
            endpoint,
            client.roles()
        );
        Ok(client)
    }

    /// Register clients for healthy running environments this process does not know yet
    ///
    /// Used after a restart: environments outlive the process that started
    /// them. An environment that fails its health check is skipped. Returns
    /// the adopted project IDs.
    pub async fn adopt_running_environments(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>, EngineError> {
        let mut adopted = Vec::new();
        for project_id in self.list_running_environments(cancel).await? {
            if self.agents.contains(&project_id) {
                continue;
            }

            let endpoint = self.naming.endpoint(&project_id);
            let client = self.client_for(&project_id, &endpoint, Vec::new())?;
            match cancellable(cancel, client.health()).await {
                Ok(()) => {}
                Err(EngineError::Cancelled) => return Err(EngineError::Cancelled),
                Err(e) => {
                    tracing::warn!(
                        "Not adopting environment for project {}: {}",
                        project_id,
                        e
                    );
                    continue;
                }
            }

            self.agents
                .publish(&project_id, client)
                .map_err(|e| environment_error(e, &project_id))?;
            adopted.push(project_id);
        }

        if !adopted.is_empty() {
            tracing::info!("Adopted {} running environments", adopted.len());
        }
        Ok(adopted)
    }

    /// Record a heartbeat from a registered agent
    pub fn heartbeat(&self, project_id: &str) -> Result<(), EngineError> {
        self.get_agent(project_id)?.touch();
        Ok(())
    }

    pub fn environment_infos(&self) -> Vec<EnvironmentInfo> {
        let mut infos: Vec<EnvironmentInfo> = self
            .agents
            .values()
            .iter()
            .map(|client| EnvironmentInfo {
                project_id: client.project_id().to_string(),
                endpoint: client.endpoint().to_string(),
                roles: client.roles().to_vec(),
                registered_at: client.registered_at(),
                last_seen: client.last_seen(),
            })
            .collect();
        infos.sort_by(|a, b| a.project_id.cmp(&b.project_id));
        infos
    }

    async fn acquire_slot(
        &self,
        cancel: &CancellationToken,
        project_id: &str,
    ) -> Result<ProvisioningGuard, EngineError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(EngineError::Cancelled),
            slot = self.agents.provisioning_slot(project_id) => Ok(slot),
        }
    }

    /// Caller holds the provisioning slot for `project_id`
    async fn stop_registered(
        &self,
        cancel: &CancellationToken,
        project_id: &str,
    ) -> Result<(), EngineError> {
        let service = self.naming.service_name(project_id);
        let managed = self.is_managed(&service).await;
        let manifest = self.compose_path.clone();
        let runtime = &self.runtime;

        self.agents
            .remove_with(project_id, |_| async move {
                if !managed {
                    // Registered from outside; nothing of ours to stop
                    return Ok(());
                }
                cancellable(cancel, runtime.stop(&manifest, &service))
                    .await
                    .map_err(|e| with_project_context(e, project_id))
            })
            .await
            .map_err(|e| environment_error(e, project_id))?;

        tracing::info!("Stopped environment for project {}", project_id);
        Ok(())
    }

    fn client_for(
        &self,
        project_id: &str,
        endpoint: &str,
        roles: Vec<String>,
    ) -> Result<ProjectAgentClient, EngineError> {
        let transport = self.connector.connect(project_id, endpoint)?;
        Ok(
            ProjectAgentClient::new(project_id, endpoint, transport, self.bus.clone())
                .with_roles(roles),
        )
    }

    async fn is_managed(&self, service: &str) -> bool {
        self.manifest_state()
            .await
            .doc
            .services
            .contains_key(service)
    }

    /// Lock the manifest, reading what a previous run left on disk the first time
    async fn manifest_state(&self) -> MutexGuard<'_, ManifestState> {
        let mut state = self.manifest.lock().await;
        if !state.loaded {
            if let Ok(text) = tokio::fs::read_to_string(&self.compose_path).await {
                match serde_yaml::from_str::<ComposeFile>(&text) {
                    Ok(doc) => state.doc = doc,
                    Err(e) => tracing::warn!(
                        "Ignoring unreadable manifest {}: {}",
                        self.compose_path.display(),
                        e
                    ),
                }
            }
            state.loaded = true;
        }
        state
    }

    /// Add `project` to the manifest and rewrite it
    async fn write_manifest(&self, project: &Project) -> Result<PathBuf, EngineError> {
        let failed = |reason: String| EngineError::ManifestGenerationFailed {
            project: project.id.clone(),
            reason,
        };

        let build_definition = self.ensure_build_definition(project).await?;

        let mut state = self.manifest_state().await;
        state
            .doc
            .upsert_project(&self.naming, &self.settings, project, &build_definition);
        let yaml = state.doc.to_yaml().map_err(|e| failed(e.to_string()))?;

        tokio::fs::create_dir_all(&self.settings.projects_root)
            .await
            .map_err(|e| failed(e.to_string()))?;
        tokio::fs::write(&self.compose_path, yaml)
            .await
            .map_err(|e| failed(e.to_string()))?;

        tracing::debug!(
            "Wrote manifest {} for project {}",
            self.compose_path.display(),
            project.id
        );
        Ok(self.compose_path.clone())
    }

    /// Path of the project's build definition, generating a default one if absent
    async fn ensure_build_definition(&self, project: &Project) -> Result<PathBuf, EngineError> {
        let failed = |reason: String| EngineError::ManifestGenerationFailed {
            project: project.id.clone(),
            reason,
        };

        let dir = self.settings.projects_root.join(&project.id);
        let path = dir.join(BUILD_DEFINITION_NAME);
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(path);
        }

        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| failed(e.to_string()))?;
        tokio::fs::write(&path, default_build_definition(project, &self.settings))
            .await
            .map_err(|e| failed(e.to_string()))?;

        tracing::info!("Generated default build definition at {}", path.display());
        Ok(path)
    }
}

/// Race `fut` against `cancel`; dropping `fut` aborts the underlying work
async fn cancellable<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = Result<T, EngineError>>,
) -> Result<T, EngineError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(EngineError::Cancelled),
        result = fut => result,
    }
}

fn with_project_context(err: EngineError, project_id: &str) -> EngineError {
    match err {
        EngineError::RuntimeCommandFailed { command, output } => {
            EngineError::RuntimeCommandFailed {
                command: format!("{} (project {})", command, project_id),
                output,
            }
        }
        other => other,
    }
}

fn environment_error(err: RegistryError, project_id: &str) -> EngineError {
    match err {
        RegistryError::AtCapacity { max } => EngineError::EnvironmentCapacityExceeded { max },
        RegistryError::Duplicate(_) | RegistryError::NotFound(_) => {
            EngineError::NoAgentForProject(project_id.to_string())
        }
        RegistryError::Resource(e) => e,
    }
}
