//! Environment manifest generation
//!
//! One compose manifest describes every project environment the orchestrator
//! has provisioned. Ensuring a project adds (or refreshes) its service and
//! rewrites the file. Each service gets identity-scoped names, a named
//! workspace volume and an attachment to the shared external network. Host
//! path mounts are never generated.

use sdk::types::Project;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// File name of the compose manifest under `projects_root`
pub const COMPOSE_FILE_NAME: &str = "docker-compose-projects.yml";

/// File name of a project's build definition under `projects_root/<id>/`
pub const BUILD_DEFINITION_NAME: &str = "Dockerfile.project";

/// Working directory inside every environment
pub const WORK_DIR: &str = "/workspace";

/// Deterministic, identity-scoped names for a project's environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentNaming {
    prefix: String,
    port: u16,
}

impl EnvironmentNaming {
    pub fn new(prefix: impl Into<String>, port: u16) -> Self {
        Self {
            prefix: prefix.into(),
            port,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Service and container name, e.g. `foreman-project-proj1`
    pub fn service_name(&self, project_id: &str) -> String {
        format!("{}-{}", self.prefix, project_id)
    }

    pub fn image(&self, project_id: &str) -> String {
        format!("{}:{}", self.prefix, project_id)
    }

    pub fn volume(&self, project_id: &str) -> String {
        format!("{}-{}-workspace", self.prefix, project_id)
    }

    /// Endpoint of the in-environment task agent
    pub fn endpoint(&self, project_id: &str) -> String {
        format!("http://{}:{}", self.service_name(project_id), self.port)
    }

    /// Prefix every environment name starts with, e.g. `foreman-project-`
    pub fn name_prefix(&self) -> String {
        format!("{}-", self.prefix)
    }

    /// Recover the project ID from an environment name
    ///
    /// Returns `None` for names outside the naming scheme.
    pub fn project_from_name<'a>(&self, name: &'a str) -> Option<&'a str> {
        let rest = name.trim().strip_prefix(&self.name_prefix())?;
        if is_valid_project_id(rest) {
            Some(rest)
        } else {
            None
        }
    }
}

/// Project IDs become container names, image tags and volume names
pub fn is_valid_project_id(id: &str) -> bool {
    let mut chars = id.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphanumeric() => {}
        _ => return false,
    }
    id.len() <= 64 && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}

/// Settings shared by every generated service
#[derive(Debug, Clone)]
pub struct ManifestSettings {
    pub projects_root: PathBuf,
    pub control_plane_url: String,
    pub network: String,
    pub default_base_image: String,
    pub agent_image: String,
}

/// Compose document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComposeFile {
    pub services: BTreeMap<String, ServiceSpec>,
    #[serde(default)]
    pub networks: BTreeMap<String, NetworkSpec>,
    #[serde(default)]
    pub volumes: BTreeMap<String, VolumeSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceSpec {
    pub image: String,
    pub container_name: String,
    pub build: BuildSpec,
    pub environment: Vec<String>,
    pub volumes: Vec<String>,
    pub networks: Vec<String>,
    pub restart: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpus: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mem_limit: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildSpec {
    pub context: String,
    pub dockerfile: String,
    pub args: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkSpec {
    pub external: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeSpec {
    pub driver: String,
}

impl ComposeFile {
    /// Add or replace the service for `project`
    pub fn upsert_project(
        &mut self,
        naming: &EnvironmentNaming,
        settings: &ManifestSettings,
        project: &Project,
        build_definition: &Path,
    ) {
        let service_name = naming.service_name(&project.id);
        let volume = naming.volume(&project.id);

        let mut args = BTreeMap::new();
        args.insert("PROJECT_ID".to_string(), project.id.clone());

        let service = ServiceSpec {
            image: naming.image(&project.id),
            container_name: service_name.clone(),
            build: BuildSpec {
                context: settings.projects_root.display().to_string(),
                dockerfile: build_definition.display().to_string(),
                args,
            },
            environment: vec![
                format!("PROJECT_ID={}", project.id),
                format!("CONTROL_PLANE_URL={}", settings.control_plane_url),
                format!("WORK_DIR={}", WORK_DIR),
                format!("AGENT_PORT={}", naming.port()),
                "GITLAB_TOKEN=${GITLAB_TOKEN}".to_string(),
                "GITHUB_TOKEN=${GITHUB_TOKEN}".to_string(),
            ],
            volumes: vec![format!("{}:{}", volume, WORK_DIR)],
            networks: vec![settings.network.clone()],
            restart: "unless-stopped".to_string(),
            cpus: project.resources.cpus.clone(),
            mem_limit: project.resources.memory.clone(),
        };

        self.services.insert(service_name, service);
        self.volumes.insert(
            volume,
            VolumeSpec {
                driver: "local".to_string(),
            },
        );
        self.networks
            .insert(settings.network.clone(), NetworkSpec { external: true });
    }

    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }
}

/// Default build definition for a project without one
///
/// Base image, the standard toolchain, git, and an entrypoint that launches
/// the in-environment task agent.
pub fn default_build_definition(project: &Project, settings: &ManifestSettings) -> String {
    let base_image = project
        .base_image()
        .unwrap_or(settings.default_base_image.as_str());

    let mut packages = vec![
        "git",
        "curl",
        "wget",
        "ca-certificates",
        "build-essential",
    ];
    packages.extend(project.packages.iter().map(String::as_str));
    let install = packages.join(" \\\n    ");

    format!(
        r#"# Auto-generated build definition for project: {name}
FROM {base_image}

# Install essential tools
RUN apt-get update && apt-get install -y \
    {install} \
    && rm -rf /var/lib/apt/lists/*

# Create workspace
WORKDIR {work_dir}

# Copy project agent binary
COPY --from={agent_image} /app/foreman-project-agent /usr/local/bin/foreman-project-agent
RUN chmod +x /usr/local/bin/foreman-project-agent

# Git config
RUN git config --global user.name "Foreman Agent" && \
    git config --global user.email "foreman@localhost"

# Entrypoint runs project agent
ENTRYPOINT ["/usr/local/bin/foreman-project-agent"]
"#,
        name = if project.name.is_empty() {
            project.id.as_str()
        } else {
            project.name.as_str()
        },
        base_image = base_image,
        install = install,
        work_dir = WORK_DIR,
        agent_image = settings.agent_image,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> ManifestSettings {
        ManifestSettings {
            projects_root: PathBuf::from("/srv/foreman/projects"),
            control_plane_url: "http://foreman:8080".to_string(),
            network: "foreman-network".to_string(),
            default_base_image: "ubuntu:22.04".to_string(),
            agent_image: "foreman:latest".to_string(),
        }
    }

    #[test]
    fn test_names_are_identity_scoped() {
        let naming = EnvironmentNaming::new("foreman-project", 8090);

        assert_eq!(naming.service_name("proj1"), "foreman-project-proj1");
        assert_eq!(naming.image("proj1"), "foreman-project:proj1");
        assert_eq!(naming.volume("proj1"), "foreman-project-proj1-workspace");
        assert_eq!(naming.endpoint("proj1"), "http://foreman-project-proj1:8090");
        assert_ne!(naming.volume("proj1"), naming.volume("proj2"));
    }

    #[test]
    fn test_project_from_name_skips_foreign_names() {
        let naming = EnvironmentNaming::new("foreman-project", 8090);

        assert_eq!(naming.project_from_name("foreman-project-proj1"), Some("proj1"));
        assert_eq!(naming.project_from_name("foreman-project-proj1\n"), Some("proj1"));
        assert_eq!(naming.project_from_name("other-foreman-project-x"), None);
        assert_eq!(naming.project_from_name("foreman-project-"), None);
        assert_eq!(naming.project_from_name("postgres"), None);
    }

    #[test]
    fn test_project_id_validation() {
        assert!(is_valid_project_id("proj1"));
        assert!(is_valid_project_id("my_project.v2-beta"));
        assert!(!is_valid_project_id(""));
        assert!(!is_valid_project_id("-leading"));
        assert!(!is_valid_project_id("has space"));
        assert!(!is_valid_project_id("../escape"));
    }

    #[test]
    fn test_upsert_uses_named_volume_and_external_network() {
        let naming = EnvironmentNaming::new("foreman-project", 8090);
        let mut compose = ComposeFile::default();
        let project = Project::new("proj1", "Project One");

        compose.upsert_project(
            &naming,
            &settings(),
            &project,
            Path::new("/srv/foreman/projects/proj1/Dockerfile.project"),
        );

        let service = &compose.services["foreman-project-proj1"];
        assert_eq!(service.volumes, vec!["foreman-project-proj1-workspace:/workspace"]);
        assert!(service.volumes.iter().all(|v| !v.starts_with('/')));
        assert_eq!(service.networks, vec!["foreman-network"]);
        assert!(compose.networks["foreman-network"].external);
        assert!(compose.volumes.contains_key("foreman-project-proj1-workspace"));
        assert!(service
            .environment
            .contains(&"PROJECT_ID=proj1".to_string()));
    }

    #[test]
    fn test_upsert_keeps_other_projects() {
        let naming = EnvironmentNaming::new("foreman-project", 8090);
        let mut compose = ComposeFile::default();
        let dockerfile = Path::new("Dockerfile.project");

        compose.upsert_project(&naming, &settings(), &Project::new("a", "A"), dockerfile);
        compose.upsert_project(&naming, &settings(), &Project::new("b", "B"), dockerfile);
        compose.upsert_project(&naming, &settings(), &Project::new("a", "A"), dockerfile);

        assert_eq!(compose.services.len(), 2);
        assert_eq!(compose.volumes.len(), 2);
    }

    #[test]
    fn test_resource_limits_are_rendered() {
        let naming = EnvironmentNaming::new("foreman-project", 8090);
        let mut compose = ComposeFile::default();
        let mut project = Project::new("proj1", "Project One");
        project.resources.cpus = Some("2.0".to_string());
        project.resources.memory = Some("4g".to_string());

        compose.upsert_project(&naming, &settings(), &project, Path::new("Dockerfile.project"));
        let yaml = compose.to_yaml().unwrap();

        assert!(yaml.contains("cpus: '2.0'") || yaml.contains("cpus: \"2.0\""));
        assert!(yaml.contains("mem_limit: 4g"));
    }

    #[test]
    fn test_default_build_definition_uses_override_and_packages() {
        let mut project = Project::new("proj1", "Project One").with_base_image("rust:1.80");
        project.packages = vec!["pkg-config".to_string()];

        let dockerfile = default_build_definition(&project, &settings());

        assert!(dockerfile.starts_with("# Auto-generated build definition for project: Project One"));
        assert!(dockerfile.contains("FROM rust:1.80"));
        assert!(dockerfile.contains("git"));
        assert!(dockerfile.contains("pkg-config"));
        assert!(dockerfile.contains("COPY --from=foreman:latest"));
        assert!(dockerfile.contains("ENTRYPOINT [\"/usr/local/bin/foreman-project-agent\"]"));
    }

    #[test]
    fn test_default_build_definition_falls_back_to_default_image() {
        let dockerfile = default_build_definition(&Project::new("p", ""), &settings());
        assert!(dockerfile.contains("FROM ubuntu:22.04"));
        assert!(dockerfile.contains("for project: p"));
    }
}
