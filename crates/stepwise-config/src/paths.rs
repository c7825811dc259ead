//! Path utilities for stepwise configuration
//!
//! Home directory resolution and path helpers.
//! Unix: ~/.stepwise, Windows: %USERPROFILE%\.stepwise.

use std::path::{Path, PathBuf};

use crate::constants::{ENV_STEPWISE_CONFIG, ENV_STEPWISE_HOME};

/// Default stepwise data directory name
pub const STEPWISE_DIR_NAME: &str = ".stepwise";

/// Default log subdirectory name
pub const LOG_DIR_NAME: &str = "log";

/// Default diagnostic log filename
pub const DEFAULT_LOG_FILENAME: &str = "stepwise.log";

/// Default config filename
pub const DEFAULT_CONFIG_FILENAME: &str = "stepwise.toml";

/// Get the stepwise home directory.
///
/// Honours `STEPWISE_HOME`, otherwise `~/.stepwise`.
/// Falls back to the current directory if home cannot be determined.
pub fn stepwise_home() -> PathBuf {
    if let Ok(home) = std::env::var(ENV_STEPWISE_HOME) {
        if !home.is_empty() {
            return PathBuf::from(home);
        }
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(STEPWISE_DIR_NAME)
}

/// Get the default config file path (`~/.stepwise/stepwise.toml`).
pub fn default_config_path() -> PathBuf {
    stepwise_home().join(DEFAULT_CONFIG_FILENAME)
}

/// Get the default diagnostic log path (`~/.stepwise/log/stepwise.log`).
pub fn default_log_path() -> PathBuf {
    stepwise_home().join(LOG_DIR_NAME).join(DEFAULT_LOG_FILENAME)
}

/// Config path from the `STEPWISE_CONFIG` environment variable, if set.
pub fn config_path_from_env() -> Option<PathBuf> {
    std::env::var(ENV_STEPWISE_CONFIG)
        .ok()
        .filter(|p| !p.is_empty())
        .map(PathBuf::from)
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match dirs::home_dir() {
        Some(home) => home.join(rest),
        None => path.to_path_buf(),
    }
}

/// Create the parent directory of `path` if it does not exist.
pub fn ensure_parent_dir(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_paths_live_under_home() {
        let home = stepwise_home();
        assert!(default_config_path().starts_with(&home));
        assert!(default_log_path().starts_with(&home));
        assert!(default_log_path().ends_with("log/stepwise.log"));
    }

    #[test]
    fn test_expand_tilde_leaves_plain_paths() {
        let p = Path::new("/tmp/stepwise.log");
        assert_eq!(expand_tilde(p), PathBuf::from("/tmp/stepwise.log"));
    }

    #[test]
    fn test_expand_tilde_uses_home() {
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_tilde(Path::new("~/x.log")), home.join("x.log"));
        }
    }

    #[test]
    fn test_ensure_parent_dir_creates_nested() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("a").join("b").join("c.log");
        ensure_parent_dir(&file).unwrap();
        assert!(file.parent().unwrap().is_dir());
    }
}
