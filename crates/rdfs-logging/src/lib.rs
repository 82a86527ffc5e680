//! Logging initialization for rdfs daemons and tools.
//!
//! Console output goes through a standard `tracing_subscriber` fmt layer;
//! an optional rolling file appender is added when a log directory is
//! configured. `RUST_LOG` overrides the configured level filter.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

// Re-export tracing macros for convenience.
pub use tracing::{debug, error, info, instrument, trace, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level filter (trace, debug, info, warn, error).
    pub level: String,

    /// Directory for log files. `None` disables file logging.
    pub log_dir: Option<PathBuf>,

    /// Prefix for rotated log file names.
    pub file_prefix: String,

    /// File rotation policy: "hourly", "daily", or "never".
    pub rotation: String,

    /// Whether to also log to stdout.
    pub console: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_dir: None,
            file_prefix: "rdfs".to_string(),
            rotation: "daily".to_string(),
            console: true,
        }
    }
}

fn rotation_policy(name: &str) -> Rotation {
    match name {
        "hourly" => Rotation::HOURLY,
        "never" => Rotation::NEVER,
        _ => Rotation::DAILY,
    }
}

/// Initialize the global tracing subscriber. Call once at startup.
///
/// Returns the guard for the non-blocking file writer; it must be kept
/// alive for the lifetime of the process when file logging is enabled.
pub fn init_logging(config: &LogConfig) -> Option<WorkerGuard> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let console_layer: Option<Box<dyn tracing_subscriber::Layer<_> + Send + Sync>> =
        config.console.then(|| {
            Box::new(fmt::layer()) as Box<dyn tracing_subscriber::Layer<_> + Send + Sync>
        });

    let (file_layer, guard): (
        Option<Box<dyn tracing_subscriber::Layer<_> + Send + Sync>>,
        Option<WorkerGuard>,
    ) = match config.log_dir.as_ref() {
        Some(dir) => {
            let appender = RollingFileAppender::builder()
                .rotation(rotation_policy(&config.rotation))
                .filename_prefix(&config.file_prefix)
                .filename_suffix("log")
                .build(dir)
                .expect("failed to create rolling log appender");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = Box::new(fmt::layer().with_ansi(false).with_writer(writer))
                as Box<dyn tracing_subscriber::Layer<_> + Send + Sync>;
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    guard
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = LogConfig::default();
        assert_eq!(cfg.level, "info");
        assert!(cfg.log_dir.is_none());
        assert!(cfg.console);
    }

    #[test]
    fn test_rotation_policy_fallback() {
        assert_eq!(rotation_policy("hourly"), Rotation::HOURLY);
        assert_eq!(rotation_policy("never"), Rotation::NEVER);
        assert_eq!(rotation_policy("daily"), Rotation::DAILY);
        assert_eq!(rotation_policy("weekly"), Rotation::DAILY);
    }

    #[test]
    fn test_config_toml_roundtrip() {
        let cfg = LogConfig {
            level: "debug".into(),
            log_dir: Some(PathBuf::from("/var/log/rdfs")),
            file_prefix: "coordinator".into(),
            rotation: "hourly".into(),
            console: false,
        };
        let text = toml::to_string(&cfg).unwrap();
        let back: LogConfig = toml::from_str(&text).unwrap();
        assert_eq!(back.level, "debug");
        assert_eq!(back.file_prefix, "coordinator");
        assert!(!back.console);
    }
}
