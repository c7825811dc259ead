//! Configuration file loading and validation
//!
//! - [`load_config`] - strict loader, errors if the file is missing
//! - [`load_or_default`] - optional file, defaults when absent
//! - [`create_config`] - writes a template without loading it

use crate::paths::{config_path_from_env, default_config_path, ensure_parent_dir, expand_tilde};
use crate::Config;
use std::path::{Path, PathBuf};
use tracing::debug;

include!(concat!(env!("OUT_DIR"), "/embedded_configs.rs"));

/// Default configuration template
pub const DEFAULT_CONFIG: &str = MINIMAL_CONFIG;

/// Which config template to use when creating a new config file
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConfigTemplate {
    /// Only the commonly changed settings, commented out
    #[default]
    Minimal,
    /// Every setting with its default value
    Full,
}

impl ConfigTemplate {
    pub fn content(&self) -> &'static str {
        match self {
            ConfigTemplate::Minimal => MINIMAL_CONFIG,
            ConfigTemplate::Full => FULL_CONFIG,
        }
    }
}

/// Errors that can occur during config loading
#[derive(Debug, thiserror::Error)]
#[allow(clippy::enum_variant_names)]
pub enum ConfigError {
    #[error("Config file not found: {0}. Run 'stepwise init' to create a default config.")]
    NotFound(PathBuf),

    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

/// Resolve the config path to use.
///
/// Resolution order:
/// 1. An explicit path (tilde-expanded)
/// 2. `STEPWISE_CONFIG`
/// 3. `~/.stepwise/stepwise.toml`
pub fn resolve_config_path(path: Option<&Path>) -> PathBuf {
    if let Some(path) = path {
        debug!(path = %path.display(), "Using explicit config path");
        return expand_tilde(path);
    }
    if let Some(path) = config_path_from_env() {
        debug!(path = %path.display(), "Using config path from environment");
        return expand_tilde(&path);
    }
    default_config_path()
}

/// Load configuration from a TOML file (strict - no side effects)
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let resolved = expand_tilde(path);
    if !resolved.exists() {
        return Err(ConfigError::NotFound(resolved));
    }

    debug!(path = %resolved.display(), "Loading config file");
    let content = std::fs::read_to_string(&resolved)?;
    load_config_from_str(&content)
}

/// Load configuration, falling back to defaults when no file exists.
///
/// An explicitly given path must exist; the implicit locations
/// (`STEPWISE_CONFIG`, home directory) are optional.
pub fn load_or_default(path: Option<&Path>) -> Result<Config, ConfigError> {
    if let Some(path) = path {
        return load_config(path);
    }
    let resolved = resolve_config_path(None);
    if resolved.exists() {
        load_config(&resolved)
    } else {
        debug!(path = %resolved.display(), "No config file, using defaults");
        Ok(Config::default())
    }
}

/// Create a configuration file at `path` from a template.
///
/// Does nothing if the file already exists.
pub fn create_config(path: &Path, template: ConfigTemplate) -> Result<PathBuf, std::io::Error> {
    let path = expand_tilde(path);
    if path.exists() {
        debug!(path = %path.display(), "Config file already exists");
        return Ok(path);
    }

    ensure_parent_dir(&path)?;
    debug!(path = %path.display(), template = ?template, "Writing config file");
    std::fs::write(&path, template.content())?;
    Ok(path)
}

/// Load configuration from a TOML string
pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let config: Config = toml::from_str(content)?;
    validate_config(&config)?;
    Ok(config)
}

/// Validate configuration values, reporting every violation at once
fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let mut all_errors = config.relay.validate();

    if config.script.tick_interval_ms == 0 {
        all_errors.push("script.tick_interval_ms must be greater than 0".to_string());
    }
    if config.python.interpreter.trim().is_empty() {
        all_errors.push("python.interpreter must not be empty".to_string());
    }
    if config.inspector.node.trim().is_empty() {
        all_errors.push("inspector.node must not be empty".to_string());
    }
    if config.inspector.connect_timeout_ms == 0 {
        all_errors.push("inspector.connect_timeout_ms must be greater than 0".to_string());
    }

    if all_errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationError(all_errors.join("; ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BackendChoice;
    use tempfile::TempDir;

    #[test]
    fn test_load_config_strict_fails_on_missing_file() {
        let result = load_config(Path::new("/nonexistent/path/stepwise.toml"));
        let err = result.unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
        assert!(err.to_string().contains("stepwise init"));
    }

    #[test]
    fn test_load_config_strict_loads_existing_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test_config.toml");

        std::fs::write(
            &config_path,
            r#"
[relay]
request_timeout_ms = 750
default_backend = "python"

[script]
tick_interval_ms = 5
"#,
        )
        .unwrap();

        let config = load_config(&config_path).unwrap();
        assert_eq!(config.relay.request_timeout_ms, 750);
        assert_eq!(config.relay.default_backend, BackendChoice::Python);
        assert_eq!(config.script.tick_interval_ms, 5);
        // untouched sections keep defaults
        assert_eq!(config.python.interpreter, "python3");
        assert!(config.inspector.forward_console);
    }

    #[test]
    fn test_explicit_missing_path_is_an_error() {
        let result = load_or_default(Some(Path::new("/nonexistent/stepwise.toml")));
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_create_config_writes_template_once() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nested").join("stepwise.toml");

        let created = create_config(&config_path, ConfigTemplate::Minimal).unwrap();
        assert_eq!(created, config_path);
        let content = std::fs::read_to_string(&config_path).unwrap();
        let _config: Config = toml::from_str(&content).unwrap();

        std::fs::write(&config_path, "[relay]\nrequest_timeout_ms = 1\n").unwrap();
        create_config(&config_path, ConfigTemplate::Full).unwrap();
        let after = std::fs::read_to_string(&config_path).unwrap();
        assert!(after.contains("request_timeout_ms = 1"));
    }

    #[test]
    fn test_embedded_templates_parse() {
        let full = load_config_from_str(FULL_CONFIG).unwrap();
        assert_eq!(full.script.tick_interval_ms, 60);
        assert_eq!(full.relay.default_backend, BackendChoice::Auto);
        load_config_from_str(MINIMAL_CONFIG).unwrap();
        assert_eq!(ConfigTemplate::default().content(), DEFAULT_CONFIG);
    }

    #[test]
    fn test_validation_collects_all_errors() {
        let result = load_config_from_str(
            r#"
[relay]
request_timeout_ms = 0

[script]
tick_interval_ms = 0
"#,
        );
        match result {
            Err(ConfigError::ValidationError(msg)) => {
                assert!(msg.contains("relay.request_timeout_ms"));
                assert!(msg.contains("script.tick_interval_ms"));
            }
            other => panic!("Expected ValidationError, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_error_reported() {
        let result = load_config_from_str("[relay\nbroken");
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }
}
