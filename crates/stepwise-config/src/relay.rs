//! Relay configuration
//!
//! Settings for the protocol state machine itself: query timeouts,
//! channel sizing and backend selection.

use crate::constants::{
    DEFAULT_EVENT_CHANNEL_CAPACITY, DEFAULT_REQUEST_TIMEOUT_MS, DEFAULT_SHUTDOWN_TIMEOUT_MS,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Backend Choice
// ============================================================================

/// Which execution backend a launch uses when the request does not name one
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendChoice {
    /// Pick by program file extension
    #[default]
    Auto,
    /// Self-hosted line interpreter
    Script,
    /// Child Python process running the runtime helper
    Python,
    /// Node process driven over the inspector protocol
    Inspector,
}

impl BackendChoice {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendChoice::Auto => "auto",
            BackendChoice::Script => "script",
            BackendChoice::Python => "python",
            BackendChoice::Inspector => "inspector",
        }
    }
}

impl fmt::Display for BackendChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendChoice {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(BackendChoice::Auto),
            "script" | "interpreter" => Ok(BackendChoice::Script),
            "python" | "py" => Ok(BackendChoice::Python),
            "inspector" | "node" | "js" => Ok(BackendChoice::Inspector),
            other => Err(format!("unknown backend '{}'", other)),
        }
    }
}

// ============================================================================
// Relay Config
// ============================================================================

/// Relay-wide settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Bounded wait for asynchronous backend queries
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Capacity of the backend event channel
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
    /// How long to wait for a killed backend to exit
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
    /// Backend used when the launch request does not name one
    #[serde(default)]
    pub default_backend: BackendChoice,
}

fn default_request_timeout_ms() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_MS
}

fn default_event_channel_capacity() -> usize {
    DEFAULT_EVENT_CHANNEL_CAPACITY
}

fn default_shutdown_timeout_ms() -> u64 {
    DEFAULT_SHUTDOWN_TIMEOUT_MS
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout_ms(),
            event_channel_capacity: default_event_channel_capacity(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
            default_backend: BackendChoice::default(),
        }
    }
}

impl RelayConfig {
    /// Collect validation errors for this section
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.request_timeout_ms == 0 {
            errors.push("relay.request_timeout_ms must be greater than 0".to_string());
        }
        if self.event_channel_capacity == 0 {
            errors.push("relay.event_channel_capacity must be greater than 0".to_string());
        }
        errors
    }
}
