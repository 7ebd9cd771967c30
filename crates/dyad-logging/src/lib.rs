use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing_appender::rolling;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub use tracing::{debug, error, info, instrument, trace, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level filter (trace, debug, info, warn, error). `RUST_LOG` wins.
    pub level: String,

    /// Directory for log files. If None, no file logging.
    pub log_dir: Option<PathBuf>,

    pub file_prefix: String,

    /// Log rotation: "hourly", "daily", "never".
    pub rotation: String,

    pub json_format: bool,

    pub console_output: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            level: "info".into(),
            log_dir: None,
            file_prefix: "dyad".into(),
            rotation: "daily".into(),
            json_format: false,
            console_output: true,
        }
    }
}

impl LogConfig {
    /// Raise the level to `debug` when the participant runs with the debug flag.
    pub fn with_debug(mut self, debug: bool) -> Self {
        if debug && !matches!(self.level.as_str(), "trace" | "debug") {
            self.level = "debug".into();
        }
        self
    }

    fn rotation(&self) -> rolling::Rotation {
        match self.rotation.as_str() {
            "hourly" => rolling::Rotation::HOURLY,
            "never" => rolling::Rotation::NEVER,
            _ => rolling::Rotation::DAILY,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("cannot open log directory: {0}")]
    Appender(#[from] tracing_appender::rolling::InitError),

    #[error("logging already initialized: {0}")]
    AlreadyInitialized(#[from] tracing_subscriber::util::TryInitError),
}

type BoxedLayer<S> = Box<dyn tracing_subscriber::Layer<S> + Send + Sync>;

/// Initialize the global subscriber. Call once at program start and keep
/// the returned guard alive so the file writer flushes on exit.
pub fn init_logging(
    config: &LogConfig,
) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>, LoggingError> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let registry = tracing_subscriber::registry().with(env_filter);

    let console_layer: Option<BoxedLayer<_>> = match (config.console_output, config.json_format) {
        (false, _) => None,
        (true, true) => Some(Box::new(fmt::layer().json())),
        (true, false) => Some(Box::new(fmt::layer())),
    };

    let (file_layer, guard): (Option<BoxedLayer<_>>, _) = match config.log_dir {
        Some(ref log_dir) => {
            let file_appender = rolling::RollingFileAppender::builder()
                .rotation(config.rotation())
                .filename_prefix(&config.file_prefix)
                .filename_suffix("log")
                .build(log_dir)?;
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

            let layer: BoxedLayer<_> = if config.json_format {
                Box::new(fmt::layer().json().with_writer(non_blocking))
            } else {
                Box::new(fmt::layer().with_ansi(false).with_writer(non_blocking))
            };
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    registry.with(console_layer).with(file_layer).try_init()?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_toml() {
        let cfg: LogConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.level, "info");
        assert_eq!(cfg.file_prefix, "dyad");
        assert!(cfg.console_output);
        assert!(cfg.log_dir.is_none());
    }

    #[test]
    fn test_with_debug() {
        assert_eq!(LogConfig::default().with_debug(true).level, "debug");
        assert_eq!(LogConfig::default().with_debug(false).level, "info");

        let trace = LogConfig {
            level: "trace".into(),
            ..Default::default()
        };
        assert_eq!(trace.with_debug(true).level, "trace");
    }

    #[test]
    fn test_rotation_parse() {
        let cfg: LogConfig = toml::from_str("rotation = \"hourly\"").unwrap();
        assert_eq!(cfg.rotation(), rolling::Rotation::HOURLY);
        assert_eq!(LogConfig::default().rotation(), rolling::Rotation::DAILY);
    }
}
