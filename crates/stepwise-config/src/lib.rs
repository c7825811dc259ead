//! Configuration types and loading for stepwise
//!
//! This crate provides:
//! - Configuration structures for the relay and its backends
//! - Config file loading (TOML format) with validation
//! - Default constants and path helpers
//!
//! # Usage
//!
//! ```rust,ignore
//! use stepwise_config::load_or_default;
//!
//! let config = load_or_default(None)?;
//! println!("tick interval: {}ms", config.script.tick_interval_ms);
//! ```

mod loader;

pub mod constants;
pub mod paths;

mod backends;
mod logging;
mod relay;
mod types;

pub use loader::{
    create_config, load_config, load_config_from_str, load_or_default, resolve_config_path,
    ConfigError, ConfigTemplate, DEFAULT_CONFIG, FULL_CONFIG, MINIMAL_CONFIG,
};
pub use types::*;

pub use constants::{
    DEFAULT_EVENT_CHANNEL_CAPACITY, DEFAULT_LISTEN_ADDR, DEFAULT_LOG_PAYLOAD_PREVIEW_LEN,
    DEFAULT_OUTBOUND_CHANNEL_CAPACITY, DEFAULT_REQUEST_TIMEOUT_MS, DEFAULT_TICK_INTERVAL_MS,
};
