//! Configuration management
//!
//! This module handles loading, validation, and management of the Foreman configuration.
//! Configuration is stored in TOML format at ~/.foreman/config.toml.
//!
//! # Configuration Sections
//!
//! - **core**: Log level, data directory
//! - **workers**: Worker pool capacity
//! - **containers**: Project environment naming, build and health gate settings
//! - **api**: Control API bind address
//! - **providers**: LLM providers workers can be bound to
//!
//! # Path Expansion
//!
//! `~` is expanded to the user's home directory for `core.data_dir` and
//! `containers.projects_root`. The data directory is created on load; the
//! projects root is created lazily by the orchestrator.
//!
//! # Examples
//!
//! ```no_run
//! use foreman_engine::config::Config;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load_or_create()?;
//! println!("Max workers: {}", config.workers.max_workers);
//! # Ok(())
//! # }
//! ```

use crate::containers::manifest::is_valid_project_id;
use sdk::errors::EngineError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Core engine settings
    pub core: CoreConfig,

    /// Worker pool settings
    #[serde(default)]
    pub workers: WorkersConfig,

    /// Container orchestrator settings
    #[serde(default)]
    pub containers: ContainersConfig,

    /// Control API settings
    #[serde(default)]
    pub api: ApiConfig,

    /// LLM providers
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
}

/// Core engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Data directory path (supports ~ expansion)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

/// Worker pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkersConfig {
    /// Hard ceiling on live workers
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
        }
    }
}

/// Container orchestrator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainersConfig {
    /// Directory holding the compose manifest and per-project build definitions
    #[serde(default = "default_projects_root")]
    pub projects_root: PathBuf,

    /// URL environments use to call back into the control plane
    #[serde(default = "default_control_plane_url")]
    pub control_plane_url: String,

    /// Prefix of every environment name
    #[serde(default = "default_name_prefix")]
    pub name_prefix: String,

    /// Port the in-environment task agent listens on
    #[serde(default = "default_agent_port")]
    pub agent_port: u16,

    /// Base image when a project does not override it
    #[serde(default = "default_base_image")]
    pub default_base_image: String,

    /// Image the project agent binary is copied from
    #[serde(default = "default_agent_image")]
    pub agent_image: String,

    /// Shared external network every environment attaches to
    #[serde(default = "default_network")]
    pub network: String,

    /// Health gate poll interval (seconds)
    #[serde(default = "default_health_interval")]
    pub health_interval_secs: u64,

    /// Health gate deadline (seconds)
    #[serde(default = "default_health_timeout")]
    pub health_timeout_secs: u64,

    /// Optional ceiling on concurrently registered environments
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_environments: Option<usize>,
}

impl ContainersConfig {
    pub fn health_interval(&self) -> Duration {
        Duration::from_secs(self.health_interval_secs)
    }

    pub fn health_timeout(&self) -> Duration {
        Duration::from_secs(self.health_timeout_secs)
    }
}

impl Default for ContainersConfig {
    fn default() -> Self {
        Self {
            projects_root: default_projects_root(),
            control_plane_url: default_control_plane_url(),
            name_prefix: default_name_prefix(),
            agent_port: default_agent_port(),
            default_base_image: default_base_image(),
            agent_image: default_agent_image(),
            network: default_network(),
            health_interval_secs: default_health_interval(),
            health_timeout_secs: default_health_timeout(),
            max_environments: None,
        }
    }
}

/// Control API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Socket address the API listens on
    #[serde(default = "default_api_bind")]
    pub bind: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind: default_api_bind(),
        }
    }
}

/// LLM provider entry
///
/// API keys are never stored in the file; `api_key_env` names the
/// environment variable holding the key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub id: String,

    #[serde(default)]
    pub name: String,

    pub base_url: String,

    pub model: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("~/.foreman")
}

fn default_max_workers() -> usize {
    10
}

fn default_projects_root() -> PathBuf {
    PathBuf::from("~/.foreman/projects")
}

fn default_control_plane_url() -> String {
    "http://foreman:8080".to_string()
}

fn default_name_prefix() -> String {
    "foreman-project".to_string()
}

fn default_agent_port() -> u16 {
    8090
}

fn default_base_image() -> String {
    "ubuntu:22.04".to_string()
}

fn default_agent_image() -> String {
    "foreman:latest".to_string()
}

fn default_network() -> String {
    "foreman-network".to_string()
}

fn default_health_interval() -> u64 {
    2
}

fn default_health_timeout() -> u64 {
    60
}

fn default_api_bind() -> String {
    "127.0.0.1:8080".to_string()
}

impl Config {
    /// Load configuration from the default location (~/.foreman/config.toml)
    ///
    /// If the configuration file doesn't exist, creates a default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Configuration file cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    pub fn load_or_create() -> Result<Self, EngineError> {
        let config_path = Self::default_config_path()?;
        Self::load_or_create_at(&config_path)
    }

    /// Load configuration from `path`, writing defaults there first if absent
    pub fn load_or_create_at(path: &Path) -> Result<Self, EngineError> {
        if path.exists() {
            Self::load_from_path(path)
        } else {
            Self::create_default(path)
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self, EngineError> {
        let contents = fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_toml_str(&contents)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(contents: &str) -> Result<Self, EngineError> {
        let mut config: Config = toml::from_str(contents)
            .map_err(|e| EngineError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate_and_process()?;

        Ok(config)
    }

    fn create_default(path: &Path) -> Result<Self, EngineError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                EngineError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        // Written before path expansion so the file keeps the portable `~` form
        let config = Self::default_config();
        let toml_string = toml::to_string_pretty(&config)
            .map_err(|e| EngineError::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, toml_string)
            .map_err(|e| EngineError::Config(format!("Failed to write config file: {}", e)))?;

        let mut config = config;
        config.validate_and_process()?;
        Ok(config)
    }

    /// Get the default configuration file path (~/.foreman/config.toml)
    pub fn default_config_path() -> Result<PathBuf, EngineError> {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(".foreman").join("config.toml"))
    }

    /// Create a default configuration
    pub fn default_config() -> Self {
        Self {
            core: CoreConfig {
                log_level: default_log_level(),
                data_dir: default_data_dir(),
            },
            workers: WorkersConfig::default(),
            containers: ContainersConfig::default(),
            api: ApiConfig::default(),
            providers: vec![
                ProviderConfig {
                    id: "ollama".to_string(),
                    name: "Ollama".to_string(),
                    base_url: "http://localhost:11434/v1".to_string(),
                    model: "llama3.1:8b".to_string(),
                    api_key_env: None,
                },
                ProviderConfig {
                    id: "openai".to_string(),
                    name: "OpenAI".to_string(),
                    base_url: "https://api.openai.com/v1".to_string(),
                    model: "gpt-4o-mini".to_string(),
                    api_key_env: Some("OPENAI_API_KEY".to_string()),
                },
            ],
        }
    }

    /// Validate and process configuration
    ///
    /// Checks value ranges and naming rules, expands `~` in paths and creates
    /// the data directory.
    fn validate_and_process(&mut self) -> Result<(), EngineError> {
        let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_log_levels.contains(&self.core.log_level.as_str()) {
            return Err(EngineError::Config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.core.log_level,
                valid_log_levels.join(", ")
            )));
        }

        if self.workers.max_workers == 0 {
            return Err(EngineError::Config(
                "workers.max_workers must be greater than 0".to_string(),
            ));
        }

        let containers = &self.containers;
        if containers.max_environments == Some(0) {
            return Err(EngineError::Config(
                "containers.max_environments must be greater than 0 when set".to_string(),
            ));
        }

        // The prefix becomes an image repository name, which must be lowercase
        if !is_valid_project_id(&containers.name_prefix)
            || containers.name_prefix.chars().any(|c| c.is_ascii_uppercase())
        {
            return Err(EngineError::Config(format!(
                "Invalid containers.name_prefix '{}'. Use lowercase letters, digits, '.', '_' or '-'",
                containers.name_prefix
            )));
        }

        if containers.agent_port == 0 {
            return Err(EngineError::Config(
                "containers.agent_port must be greater than 0".to_string(),
            ));
        }

        if containers.network.trim().is_empty() {
            return Err(EngineError::Config(
                "containers.network must not be empty".to_string(),
            ));
        }

        if containers.health_interval_secs == 0 || containers.health_timeout_secs == 0 {
            return Err(EngineError::Config(
                "containers health interval and timeout must be greater than 0".to_string(),
            ));
        }
        if containers.health_interval_secs > containers.health_timeout_secs {
            return Err(EngineError::Config(
                "containers.health_interval_secs must not exceed health_timeout_secs".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for provider in &self.providers {
            if provider.id.trim().is_empty() {
                return Err(EngineError::Config("Provider id must not be empty".to_string()));
            }
            if provider.base_url.trim().is_empty() {
                return Err(EngineError::Config(format!(
                    "Provider '{}' has an empty base_url",
                    provider.id
                )));
            }
            if !seen.insert(provider.id.as_str()) {
                return Err(EngineError::Config(format!(
                    "Duplicate provider id '{}'",
                    provider.id
                )));
            }
        }

        self.containers.projects_root = expand_path(&self.containers.projects_root)?;
        self.core.data_dir = expand_path(&self.core.data_dir)?;

        if !self.core.data_dir.exists() {
            fs::create_dir_all(&self.core.data_dir).map_err(|e| {
                EngineError::Config(format!("Failed to create data directory: {}", e))
            })?;
        }

        Ok(())
    }
}

/// Expand ~ in path to user's home directory
pub fn expand_path(path: &Path) -> Result<PathBuf, EngineError> {
    let path_str = path
        .to_str()
        .ok_or_else(|| EngineError::Config("Invalid UTF-8 in path".to_string()))?;

    if let Some(rest) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(rest))
    } else if path_str == "~" {
        dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))
    } else {
        Ok(path.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn minimal_toml(data_dir: &Path) -> String {
        format!("[core]\ndata_dir = \"{}\"\n", data_dir.display())
    }

    #[test]
    fn test_default_config_creation() {
        let config = Config::default_config();

        assert_eq!(config.core.log_level, "info");
        assert_eq!(config.workers.max_workers, 10);
        assert_eq!(config.containers.name_prefix, "foreman-project");
        assert_eq!(config.containers.agent_port, 8090);
        assert_eq!(config.containers.health_interval(), Duration::from_secs(2));
        assert_eq!(config.containers.health_timeout(), Duration::from_secs(60));
        assert!(config.containers.max_environments.is_none());
        assert_eq!(config.providers.len(), 2);
    }

    #[test]
    fn test_minimal_file_gets_defaults() {
        let temp = TempDir::new().unwrap();
        let config = Config::from_toml_str(&minimal_toml(temp.path())).unwrap();

        assert_eq!(config.workers.max_workers, 10);
        assert_eq!(config.containers.network, "foreman-network");
        assert!(config.providers.is_empty());
    }

    #[test]
    fn test_rejects_invalid_log_level() {
        let temp = TempDir::new().unwrap();
        let toml = format!(
            "[core]\nlog_level = \"loud\"\ndata_dir = \"{}\"\n",
            temp.path().display()
        );

        let result = Config::from_toml_str(&toml);
        assert!(matches!(result, Err(EngineError::Config(msg)) if msg.contains("log level")));
    }

    #[test]
    fn test_rejects_zero_capacity() {
        let temp = TempDir::new().unwrap();
        let toml = format!("{}[workers]\nmax_workers = 0\n", minimal_toml(temp.path()));

        assert!(Config::from_toml_str(&toml).is_err());
    }

    #[test]
    fn test_rejects_uppercase_prefix() {
        let temp = TempDir::new().unwrap();
        let toml = format!(
            "{}[containers]\nname_prefix = \"Foreman\"\n",
            minimal_toml(temp.path())
        );

        assert!(Config::from_toml_str(&toml).is_err());
    }

    #[test]
    fn test_rejects_interval_longer_than_timeout() {
        let temp = TempDir::new().unwrap();
        let toml = format!(
            "{}[containers]\nhealth_interval_secs = 30\nhealth_timeout_secs = 10\n",
            minimal_toml(temp.path())
        );

        assert!(Config::from_toml_str(&toml).is_err());
    }

    #[test]
    fn test_rejects_duplicate_provider_ids() {
        let temp = TempDir::new().unwrap();
        let provider = "[[providers]]\nid = \"a\"\nbase_url = \"http://x\"\nmodel = \"m\"\n";
        let toml = format!("{}{}{}", minimal_toml(temp.path()), provider, provider);

        let result = Config::from_toml_str(&toml);
        assert!(matches!(result, Err(EngineError::Config(msg)) if msg.contains("Duplicate")));
    }

    #[test]
    fn test_load_or_create_writes_default_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("config.toml");

        let config = Config::load_or_create_at(&path).unwrap();

        assert!(path.exists());
        assert_eq!(config.workers.max_workers, 10);
        let written = fs::read_to_string(&path).unwrap();
        assert!(written.contains("~/.foreman"));
    }

    #[test]
    fn test_expand_path_with_tilde() {
        let expanded = expand_path(&PathBuf::from("~/test")).unwrap();
        assert_eq!(expanded, dirs::home_dir().unwrap().join("test"));
    }

    #[test]
    fn test_expand_path_without_tilde() {
        let path = PathBuf::from("/absolute/path");
        assert_eq!(expand_path(&path).unwrap(), path);
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default_config();
        let toml_string = toml::to_string(&config).unwrap();

        let deserialized: Config = toml::from_str(&toml_string).unwrap();
        assert_eq!(config.core.log_level, deserialized.core.log_level);
        assert_eq!(config.providers, deserialized.providers);
    }
}
