//! Logging setup for hosts embedding the launcher
//!
//! The library itself only emits `tracing` events. Hosts that do not install
//! their own subscriber can call one of the `init_*` functions here.

use once_cell::sync::OnceCell;
use std::path::Path;
use tracing::Level;
use tracing_appender::{non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    registry::Registry,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

static LOGGER_INITIALIZED: OnceCell<()> = OnceCell::new();

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable format with timestamps
    Pretty,
    /// Compact format for production
    Compact,
    /// JSON format for structured logging
    Json,
}

/// Log output destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogOutput {
    Stdout,
    Stderr,
    /// Daily rotated file
    File { directory: String, prefix: String },
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: Level,
    pub format: LogFormat,
    pub output: LogOutput,
    /// Emit span open/close events
    pub span_events: bool,
    /// Extra filter directives (e.g., "pylauncher=debug,pyo3=warn")
    pub filter: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Pretty,
            output: LogOutput::Stderr,
            span_events: false,
            filter: None,
        }
    }
}

impl LogConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a config from `PYLAUNCHER_LOG_*` environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        // PYLAUNCHER_LOG_LEVEL: trace, debug, info, warn, error
        if let Ok(level) = std::env::var("PYLAUNCHER_LOG_LEVEL") {
            config.level = parse_level(&level).unwrap_or(Level::INFO);
        }

        if std::env::var("PYLAUNCHER_LOG_JSON").is_ok() {
            config.format = LogFormat::Json;
        }

        config.span_events = std::env::var("PYLAUNCHER_LOG_SPANS").is_ok();

        if let Ok(directory) = std::env::var("PYLAUNCHER_LOG_DIR") {
            config.output = LogOutput::File {
                directory,
                prefix: "pylauncher".to_string(),
            };
        }

        config
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_output(mut self, output: LogOutput) -> Self {
        self.output = output;
        self
    }

    pub fn with_span_events(mut self, enabled: bool) -> Self {
        self.span_events = enabled;
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }
}

fn parse_level(value: &str) -> Option<Level> {
    match value.to_lowercase().as_str() {
        "trace" => Some(Level::TRACE),
        "debug" => Some(Level::DEBUG),
        "info" => Some(Level::INFO),
        "warn" => Some(Level::WARN),
        "error" => Some(Level::ERROR),
        _ => None,
    }
}

/// Initialize the global subscriber
///
/// Returns the writer guard; keep it alive until exit so buffered lines are
/// flushed. Returns `None` if a subscriber was already installed.
pub fn init_logging(config: LogConfig) -> Option<WorkerGuard> {
    if LOGGER_INITIALIZED.set(()).is_err() {
        tracing::debug!("Logging already initialized");
        return None;
    }

    let filter = build_filter(&config);
    let span_events = span_events_config(config.span_events);

    let (writer, guard) = match &config.output {
        LogOutput::Stdout => tracing_appender::non_blocking(std::io::stdout()),
        LogOutput::Stderr => tracing_appender::non_blocking(std::io::stderr()),
        LogOutput::File { directory, prefix } => {
            tracing_appender::non_blocking(rolling::daily(directory, prefix))
        }
    };

    let layer: Box<dyn Layer<Registry> + Send + Sync> = match config.format {
        LogFormat::Pretty => fmt::layer()
            .with_writer(writer)
            .pretty()
            .with_span_events(span_events)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .with_writer(writer)
            .compact()
            .with_span_events(span_events)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .with_writer(writer)
            .json()
            .with_span_events(span_events)
            .boxed(),
    };

    match tracing_subscriber::registry().with(layer.with_filter(filter)).try_init() {
        Ok(()) => Some(guard),
        Err(e) => {
            eprintln!("pylauncher: subscriber already set by host: {}", e);
            None
        }
    }
}

fn build_filter(config: &LogConfig) -> EnvFilter {
    let base_filter = EnvFilter::from_default_env().add_directive(config.level.into());

    match &config.filter {
        Some(filter_str) => filter_str.split(',').fold(base_filter, |filter, directive| {
            match directive.parse() {
                Ok(parsed) => filter.add_directive(parsed),
                Err(_) => {
                    eprintln!("pylauncher: invalid filter directive: {}", directive);
                    filter
                }
            }
        }),
        None => base_filter,
    }
}

fn span_events_config(enabled: bool) -> FmtSpan {
    if enabled {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    }
}

pub fn init_dev_logging() -> Option<WorkerGuard> {
    init_logging(LogConfig {
        level: Level::DEBUG,
        format: LogFormat::Pretty,
        output: LogOutput::Stderr,
        span_events: false,
        filter: Some("pylauncher=debug".to_string()),
    })
}

pub fn init_prod_logging(log_dir: impl AsRef<Path>) -> Option<WorkerGuard> {
    init_logging(LogConfig {
        level: Level::INFO,
        format: LogFormat::Json,
        output: LogOutput::File {
            directory: log_dir.as_ref().to_string_lossy().to_string(),
            prefix: "pylauncher".to_string(),
        },
        span_events: false,
        filter: Some("pylauncher=info".to_string()),
    })
}
