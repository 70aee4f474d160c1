//! Log output for the `foreman` binary
//!
//! Logs always go to stderr so stdout carries only command output. With
//! `--json` every log line is a JSON object, matching the JSON results the
//! commands print, so a caller can parse both streams. Without it, lines are
//! human-readable.
//!
//! `RUST_LOG` replaces the computed filter entirely when set.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];

/// Shape of each log line on stderr
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Multi-line, for a person at a terminal
    Pretty,
    /// One JSON object per line, with the current span attached
    Json,
}

impl LogFormat {
    /// Format selected by the global `--json` flag
    pub fn from_json_flag(json: bool) -> Self {
        if json {
            LogFormat::Json
        } else {
            LogFormat::Pretty
        }
    }
}

/// Filter directives for `level`
///
/// Dependencies log at `warn` at most so that `debug` shows the engine's own
/// decisions rather than HTTP client internals. An unknown level becomes
/// `info`.
pub fn filter_directives(level: &str) -> String {
    let level = level.trim().to_ascii_lowercase();
    let level = if LEVELS.contains(&level.as_str()) {
        level
    } else {
        "info".to_string()
    };
    let deps = if level == "error" { "error" } else { "warn" };
    format!("{},foreman_engine={},sdk={}", deps, level, level)
}

/// Install the global subscriber
///
/// A second call is a no-op.
pub fn init_logging(log_level: &str, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directives(log_level)));

    let installed = match format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_writer(std::io::stderr),
            )
            .try_init(),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .pretty()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .try_init(),
    };

    if installed.is_err() {
        tracing::debug!("Log subscriber already installed");
    }
}
