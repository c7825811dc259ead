//! stepwise - Debug Adapter Protocol relay
//!
//! Usage:
//!   stepwise dap                       # IDE spawns us, DAP on stdin/stdout
//!   stepwise serve --listen 127.0.0.1:4711 --persist
//!   stepwise init --full

mod commands;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use commands::serve::ServeArgs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use stepwise_config::{load_or_default, Config};
use stepwise_logging::{debug, LogConfig, WorkerGuard};

#[derive(Parser, Debug)]
#[command(name = "stepwise", version, about = "Debug Adapter Protocol relay")]
struct Cli {
    /// Config file (defaults to $STEPWISE_CONFIG, then ~/.stepwise/stepwise.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Also append diagnostic logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Serve one DAP session on stdin/stdout
    Dap,

    /// Accept DAP connections over TCP
    Serve(ServeArgs),

    /// Create a configuration file
    Init {
        /// Where to write the config (defaults to ~/.stepwise/stepwise.toml)
        #[arg(long)]
        path: Option<PathBuf>,

        /// Overwrite an existing config
        #[arg(long)]
        force: bool,

        /// Write every setting instead of the minimal template
        #[arg(long)]
        full: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Init { path, force, full } => commands::init::run(path, force, full),
        Commands::Dap => {
            let config = load_config(cli.config.as_deref())?;
            // stdout carries the protocol, logs must never go there
            let logging = LogConfig::dap(cli.debug).default_level(&config.logging.level);
            let _guard = init_logging(
                logging,
                log_file(&cli.log_file, &config).as_deref(),
                FileLogging::FileOnly,
            )?;
            debug!(config = ?cli.config, "Starting stdio adapter");
            commands::dap::run(Arc::new(config)).await
        }
        Commands::Serve(args) => {
            let config = load_config(cli.config.as_deref())?;
            let logging = LogConfig::server(cli.debug).default_level(&config.logging.level);
            let _guard = init_logging(
                logging,
                log_file(&cli.log_file, &config).as_deref(),
                FileLogging::WithStderrWarnings,
            )?;
            debug!(config = ?cli.config, "Starting TCP server");
            commands::serve::run(args, Arc::new(config)).await
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    load_or_default(path).context("Failed to load configuration")
}

/// The command line flag wins over the config file.
fn log_file(flag: &Option<PathBuf>, config: &Config) -> Option<PathBuf> {
    flag.clone().or_else(|| config.logging.file.clone())
}

/// Where logs go besides a configured log file
#[derive(Debug, Clone, Copy)]
enum FileLogging {
    /// The IDE shows our stderr, keep it quiet
    FileOnly,
    /// Warnings and errors also reach the terminal
    WithStderrWarnings,
}

/// Install the global subscriber. With a log file the returned guard
/// must outlive the session so buffered lines reach disk.
fn init_logging(
    logging: LogConfig,
    log_file: Option<&Path>,
    mode: FileLogging,
) -> Result<Option<WorkerGuard>> {
    let Some(path) = log_file else {
        stepwise_logging::init(logging);
        return Ok(None);
    };
    let path = stepwise_config::paths::expand_tilde(path);
    let guard = match mode {
        FileLogging::FileOnly => stepwise_logging::init_with_file(logging, &path),
        FileLogging::WithStderrWarnings => stepwise_logging::init_with_file_and_stderr(
            logging.stderr_min_level(stepwise_logging::Level::WARN),
            &path,
        ),
    }
    .with_context(|| format!("Failed to open log file {}", path.display()))?;
    Ok(Some(guard))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_serve_with_global_flags() {
        let cli = Cli::try_parse_from([
            "stepwise",
            "serve",
            "--listen",
            "0.0.0.0:9000",
            "--persist",
            "--debug",
            "--config",
            "/tmp/s.toml",
        ])
        .unwrap();
        assert!(cli.debug);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/s.toml")));
        match cli.command {
            Commands::Serve(args) => {
                assert_eq!(args.listen, "0.0.0.0:9000");
                assert!(args.persist);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_serve_defaults() {
        let cli = Cli::try_parse_from(["stepwise", "serve"]).unwrap();
        match cli.command {
            Commands::Serve(args) => {
                assert_eq!(args.listen, stepwise_config::DEFAULT_LISTEN_ADDR);
                assert!(!args.persist);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_log_file_flag_overrides_config() {
        let mut config = Config::default();
        assert_eq!(log_file(&None, &config), None);
        config.logging.file = Some(PathBuf::from("/var/log/stepwise.log"));
        assert_eq!(
            log_file(&None, &config),
            Some(PathBuf::from("/var/log/stepwise.log"))
        );
        assert_eq!(
            log_file(&Some(PathBuf::from("/tmp/x.log")), &config),
            Some(PathBuf::from("/tmp/x.log"))
        );
    }

    #[test]
    fn test_parse_init_and_dap() {
        let cli = Cli::try_parse_from(["stepwise", "init", "--full", "--force"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Init {
                path: None,
                force: true,
                full: true
            }
        ));
        let cli = Cli::try_parse_from(["stepwise", "dap"]).unwrap();
        assert!(matches!(cli.command, Commands::Dap));
    }
}
