// Foreman execution substrate
// Main entry point for the foreman binary

use clap::Parser;
use foreman_engine::cli::{Cli, Command, ConfigAction};
use foreman_engine::config::Config;
use foreman_engine::handlers::{
    handle_config_show, handle_down, handle_ensure, handle_ps, handle_serve, handle_stop,
    EnsureArgs, OutputFormat,
};
use foreman_engine::telemetry::{init_logging, LogFormat};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };

    // Load configuration (or use custom path if provided)
    let config = if let Some(config_path) = &cli.config {
        Config::load_or_create_at(config_path)?
    } else {
        Config::load_or_create()?
    };

    // `--log` wins over the config file; RUST_LOG wins over both
    let log_level = cli.log.as_deref().unwrap_or(&config.core.log_level);
    init_logging(log_level, LogFormat::from_json_flag(cli.json));

    tracing::info!(
        "Foreman v{} ({} - {})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_COMMIT_HASH"),
        env!("BUILD_TIMESTAMP")
    );

    match cli.command {
        Command::Ensure {
            project,
            name,
            base_image,
            packages,
            cpus,
            memory,
        } => {
            tracing::info!("Ensuring environment for project {}", project);
            let args = EnsureArgs {
                project,
                name,
                base_image,
                packages,
                cpus,
                memory,
            };
            handle_ensure(args, &config, format).await
        }

        Command::Stop { project } => {
            tracing::info!("Stopping environment for project {}", project);
            handle_stop(project, &config, format).await
        }

        Command::Ps => handle_ps(&config, format).await,

        Command::Down => {
            tracing::info!("Stopping all environments");
            handle_down(&config, format).await
        }

        Command::Serve { bind } => handle_serve(bind, &config).await,

        Command::Config { action } => match action {
            ConfigAction::Show => handle_config_show(&config, format),
            ConfigAction::Path => {
                let path = match &cli.config {
                    Some(path) => path.clone(),
                    None => Config::default_config_path()?,
                };
                println!("{}", path.display());
                Ok(())
            }
        },
    }
}
