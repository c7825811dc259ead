//! Init command - create a stepwise configuration file
//!
//! Writes the minimal template by default, `--full` writes every setting.
//!
//! Path resolution priority:
//! 1. `--path <custom>`
//! 2. `STEPWISE_HOME` environment variable
//! 3. `~/.stepwise/`

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use stepwise_config::{
    constants::ENV_STEPWISE_HOME,
    create_config,
    paths::{default_config_path, expand_tilde, DEFAULT_CONFIG_FILENAME},
    ConfigTemplate,
};

pub fn run(path: Option<PathBuf>, force: bool, full: bool) -> Result<()> {
    let config_path = resolve_init_path(path.as_deref());
    let template = if full {
        ConfigTemplate::Full
    } else {
        ConfigTemplate::Minimal
    };

    let Some(created) = write_config(&config_path, template, force)? else {
        println!("Configuration file already exists at:");
        println!("  {}", config_path.display());
        println!();
        println!("Use --force to overwrite it.");
        return Ok(());
    };

    let kind = if full { "full" } else { "minimal" };
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("  Created {} configuration file:", kind);
    println!(
        "     {}",
        created
            .canonicalize()
            .unwrap_or_else(|_| created.clone())
            .display()
    );
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!();
    if !full {
        println!("For all options, run: stepwise init --full --force");
        println!();
    }
    println!("Point your IDE at the adapter with:");
    println!("  stepwise dap");
    println!("or serve it over TCP:");
    println!("  stepwise serve --listen 127.0.0.1:4711");

    Ok(())
}

/// Write `template` to `path`. Returns `None` when a file exists and
/// `force` is not set.
fn write_config(path: &Path, template: ConfigTemplate, force: bool) -> Result<Option<PathBuf>> {
    if path.exists() {
        if !force {
            return Ok(None);
        }
        std::fs::remove_file(path)
            .with_context(|| format!("Failed to remove existing config at {}", path.display()))?;
    }
    let created = create_config(path, template)
        .with_context(|| format!("Failed to create config at {}", path.display()))?;
    Ok(Some(created))
}

fn resolve_init_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return expand_tilde(path);
    }
    match std::env::var(ENV_STEPWISE_HOME) {
        Ok(home) if !home.is_empty() => PathBuf::from(home).join(DEFAULT_CONFIG_FILENAME),
        _ => default_config_path(),
    }
}
