//! Centralized logging configuration for stepwise
//!
//! Wraps `tracing` and `tracing-subscriber` so every entry point logs the
//! same way.
//!
//! # Usage
//!
//! ```rust,ignore
//! use stepwise_logging::{init, init_with_file_and_stderr, LogConfig, Level};
//!
//! // DAP over stdio: stdout carries the protocol, so logs go to stderr
//! init(LogConfig::dap(false));
//!
//! // Append-only diagnostic log plus errors on stderr
//! let _guard = init_with_file_and_stderr(
//!     LogConfig::dap(true).stderr_min_level(Level::ERROR),
//!     Path::new("/tmp/stepwise.log"),
//! )?;
//! ```
//!
//! # Re-exports
//!
//! `trace!`, `debug!`, `info!`, `warn!`, `error!`, `span!`, `Level`, `instrument`.

use std::io::IsTerminal;
use std::path::Path;
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer as _,
};

pub use tracing::{debug, error, info, span, trace, warn, Level};

pub use tracing::instrument;

pub use tracing;

pub use tracing_appender::non_blocking::WorkerGuard;

/// Output destination for logs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogOutput {
    /// Write logs to stdout (default)
    #[default]
    Stdout,
    /// Write logs to stderr (required whenever stdout carries DAP traffic)
    Stderr,
}

/// Timestamp format for log output
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TimestampFormat {
    /// Use local timezone (default)
    #[default]
    Local,
    /// Use UTC timezone
    Utc,
}

/// Configuration for logging initialization
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Enable debug-level logging (overrides default_level)
    pub debug: bool,
    /// Default log level when RUST_LOG is not set
    pub default_level: String,
    /// Console output destination
    pub output: LogOutput,
    /// Show module target in log output
    pub show_target: bool,
    /// Timestamp format (local or UTC)
    pub timestamp_format: TimestampFormat,
    /// Minimum level for stderr when combined with a log file.
    /// The file still receives everything the filter allows.
    pub stderr_min_level: Option<tracing::Level>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            debug: false,
            default_level: stepwise_config::constants::DEFAULT_LOG_LEVEL.to_string(),
            output: LogOutput::Stdout,
            show_target: false,
            timestamp_format: TimestampFormat::default(),
            stderr_min_level: None,
        }
    }
}

impl LogConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn debug(mut self, enabled: bool) -> Self {
        self.debug = enabled;
        self
    }

    /// Set the default log level (used when RUST_LOG is not set)
    pub fn default_level(mut self, level: impl Into<String>) -> Self {
        self.default_level = level.into();
        self
    }

    pub fn output(mut self, output: LogOutput) -> Self {
        self.output = output;
        self
    }

    pub fn show_target(mut self, show: bool) -> Self {
        self.show_target = show;
        self
    }

    pub fn timestamp_format(mut self, format: TimestampFormat) -> Self {
        self.timestamp_format = format;
        self
    }

    pub fn utc(self) -> Self {
        self.timestamp_format(TimestampFormat::Utc)
    }

    /// Only send logs at `level` or above to stderr when a file is also written.
    pub fn stderr_min_level(mut self, level: tracing::Level) -> Self {
        self.stderr_min_level = Some(level);
        self
    }

    /// Convenience: DAP adapter over stdio (logs to stderr)
    pub fn dap(debug: bool) -> Self {
        Self::new()
            .debug(debug)
            .output(LogOutput::Stderr)
            .show_target(true)
    }

    /// Convenience: TCP server (logs to stdout)
    pub fn server(debug: bool) -> Self {
        Self::new().debug(debug)
    }

    fn build_filter(&self) -> EnvFilter {
        if self.debug {
            EnvFilter::new("debug")
        } else {
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&self.default_level))
        }
    }
}

/// Initialize console logging.
///
/// `RUST_LOG` overrides the configured level.
///
/// # Panics
///
/// Panics if a global subscriber is already installed.
pub fn init(config: LogConfig) {
    use tracing_subscriber::fmt::time::{LocalTime, UtcTime};

    let filter = config.build_filter();

    macro_rules! with_timer_init {
        ($builder:expr, $ts_format:expr) => {
            match $ts_format {
                TimestampFormat::Utc => $builder.with_timer(UtcTime::rfc_3339()).init(),
                TimestampFormat::Local => $builder.with_timer(LocalTime::rfc_3339()).init(),
            }
        };
    }

    match config.output {
        LogOutput::Stdout => {
            let is_tty = std::io::stdout().is_terminal();
            let builder = fmt()
                .with_env_filter(filter)
                .with_target(config.show_target)
                .with_ansi(is_tty);
            with_timer_init!(builder, config.timestamp_format);
        }
        LogOutput::Stderr => {
            let is_tty = std::io::stderr().is_terminal();
            let builder = fmt()
                .with_env_filter(filter)
                .with_target(config.show_target)
                .with_writer(std::io::stderr)
                .with_ansi(is_tty);
            with_timer_init!(builder, config.timestamp_format);
        }
    }
}

/// Open the diagnostic log file in append mode, creating parents as needed.
fn open_append(log_path: &Path) -> std::io::Result<std::fs::File> {
    stepwise_config::paths::ensure_parent_dir(log_path)
        .map_err(|e| std::io::Error::other(format!("Failed to create log directory: {}", e)))?;
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
}

/// Initialize logging to an append-only file only.
///
/// The returned `WorkerGuard` must be held until exit so buffered lines
/// are flushed.
///
/// # Errors
///
/// Returns an error if the file or its parent directory cannot be created.
pub fn init_with_file(config: LogConfig, log_path: &Path) -> std::io::Result<WorkerGuard> {
    use tracing_subscriber::fmt::time::{LocalTime, UtcTime};

    let filter = config.build_filter();
    let file = open_append(log_path)?;
    let (non_blocking, guard) = tracing_appender::non_blocking(file);

    let builder = fmt()
        .with_env_filter(filter)
        .with_target(config.show_target)
        .with_writer(non_blocking)
        .with_ansi(false);

    match config.timestamp_format {
        TimestampFormat::Utc => builder.with_timer(UtcTime::rfc_3339()).init(),
        TimestampFormat::Local => builder.with_timer(LocalTime::rfc_3339()).init(),
    }

    Ok(guard)
}

/// Initialize logging to both an append-only file and stderr.
///
/// With `stderr_min_level` set, stderr only sees that level and above
/// while the file receives everything.
///
/// # Errors
///
/// Returns an error if the file or its parent directory cannot be created.
pub fn init_with_file_and_stderr(
    config: LogConfig,
    log_path: &Path,
) -> std::io::Result<WorkerGuard> {
    use tracing_subscriber::fmt::time::{LocalTime, UtcTime};

    let file = open_append(log_path)?;
    let (non_blocking, guard) = tracing_appender::non_blocking(file);

    if let Some(stderr_level) = config.stderr_min_level {
        let file_filter = config.build_filter();
        let stderr_filter = EnvFilter::new(stderr_level.as_str());

        let file_layer = fmt::layer()
            .with_target(config.show_target)
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_filter(file_filter);

        let is_tty = std::io::stderr().is_terminal();
        let stderr_layer = fmt::layer()
            .with_target(config.show_target)
            .with_writer(std::io::stderr)
            .with_ansi(is_tty)
            .with_filter(stderr_filter);

        tracing_subscriber::registry()
            .with(file_layer)
            .with(stderr_layer)
            .init();
    } else {
        use tracing_subscriber::fmt::writer::MakeWriterExt;

        let filter = config.build_filter();
        let combined_writer = non_blocking.and(std::io::stderr);

        let builder = fmt()
            .with_env_filter(filter)
            .with_target(config.show_target)
            .with_writer(combined_writer)
            .with_ansi(false);

        match config.timestamp_format {
            TimestampFormat::Utc => builder.with_timer(UtcTime::rfc_3339()).init(),
            TimestampFormat::Local => builder.with_timer(LocalTime::rfc_3339()).init(),
        }
    }

    Ok(guard)
}

/// Initialize logging for tests.
///
/// Safe to call multiple times.
pub fn init_test() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_test_writer())
        .try_init();
}
