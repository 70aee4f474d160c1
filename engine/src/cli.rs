//! CLI interface for Foreman
//!
//! This module provides the command-line interface using clap's derive API.
//! It defines all commands and global flags for driving project environments
//! and the control API.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Foreman execution substrate
///
/// Provisions isolated per-project environments and binds agents to LLM
/// providers.
#[derive(Parser, Debug)]
#[command(name = "foreman")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log: Option<String>,

    /// Specify alternate configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Build, start and health-check a project environment
    Ensure {
        /// Project ID
        project: String,

        /// Human-readable project name
        #[arg(long)]
        name: Option<String>,

        /// Base image override
        #[arg(long, value_name = "IMAGE")]
        base_image: Option<String>,

        /// Extra system package to install (repeatable)
        #[arg(long = "package", value_name = "PKG")]
        packages: Vec<String>,

        /// CPU limit, e.g. "2.0"
        #[arg(long)]
        cpus: Option<String>,

        /// Memory limit, e.g. "4g"
        #[arg(long)]
        memory: Option<String>,
    },

    /// Stop a project environment
    Stop {
        /// Project ID
        project: String,
    },

    /// List running project environments
    Ps,

    /// Tear down every project environment
    Down,

    /// Run the control API until interrupted
    Serve {
        /// Override the configured bind address
        #[arg(long, value_name = "ADDR")]
        bind: Option<String>,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Configuration management actions
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Print the configuration file path
    Path,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::parse_from(["foreman", "ps"]);
        assert!(matches!(cli.command, Command::Ps));
        assert!(!cli.json);
        assert!(cli.log.is_none());
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_global_flags() {
        let cli = Cli::parse_from(["foreman", "--json", "--log", "debug", "down"]);
        assert!(cli.json);
        assert_eq!(cli.log, Some("debug".to_string()));
        assert!(matches!(cli.command, Command::Down));
    }

    #[test]
    fn test_ensure_command() {
        let cli = Cli::parse_from([
            "foreman",
            "ensure",
            "proj1",
            "--name",
            "Project One",
            "--base-image",
            "rust:1.80",
            "--package",
            "pkg-config",
            "--package",
            "libssl-dev",
        ]);

        if let Command::Ensure {
            project,
            name,
            base_image,
            packages,
            cpus,
            ..
        } = cli.command
        {
            assert_eq!(project, "proj1");
            assert_eq!(name.as_deref(), Some("Project One"));
            assert_eq!(base_image.as_deref(), Some("rust:1.80"));
            assert_eq!(packages, vec!["pkg-config", "libssl-dev"]);
            assert!(cpus.is_none());
        } else {
            panic!("Expected Ensure command");
        }
    }

    #[test]
    fn test_stop_requires_project() {
        assert!(Cli::try_parse_from(["foreman", "stop"]).is_err());
    }

    #[test]
    fn test_config_show() {
        let cli = Cli::parse_from(["foreman", "--config", "/tmp/f.toml", "config", "show"]);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/f.toml")));
        assert!(matches!(
            cli.command,
            Command::Config {
                action: ConfigAction::Show
            }
        ));
    }
}
