//! Backend configuration
//!
//! Per-backend settings for the script interpreter, the Python runtime
//! helper and the Node inspector.

use crate::constants::{
    DEFAULT_INSPECTOR_CONNECT_TIMEOUT_MS, DEFAULT_INSPECTOR_HOST, DEFAULT_INSPECTOR_PORT,
    DEFAULT_INSPECTOR_RETRY_INTERVAL_MS, DEFAULT_NODE_EXECUTABLE, DEFAULT_PYTHON_INTERPRETER,
    DEFAULT_TICK_INTERVAL_MS,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ============================================================================
// Script Interpreter
// ============================================================================

/// Self-hosted line interpreter settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptBackendConfig {
    /// Delay between ticks while running (keeps stepping observable)
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
}

fn default_tick_interval_ms() -> u64 {
    DEFAULT_TICK_INTERVAL_MS
}

impl Default for ScriptBackendConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
        }
    }
}

// ============================================================================
// Python Runtime
// ============================================================================

/// Python child-process backend settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PythonBackendConfig {
    /// Interpreter executable
    #[serde(default = "default_python_interpreter")]
    pub interpreter: String,
    /// Custom runtime helper; the bundled helper is used when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_script: Option<PathBuf>,
}

fn default_python_interpreter() -> String {
    DEFAULT_PYTHON_INTERPRETER.to_string()
}

impl Default for PythonBackendConfig {
    fn default() -> Self {
        Self {
            interpreter: default_python_interpreter(),
            runtime_script: None,
        }
    }
}

// ============================================================================
// Node Inspector
// ============================================================================

/// Node inspector backend settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InspectorBackendConfig {
    /// Node executable
    #[serde(default = "default_node_executable")]
    pub node: String,
    /// Host the inspector listens on
    #[serde(default = "default_inspector_host")]
    pub host: String,
    /// Inspector port (0 = pick a free port per session)
    #[serde(default = "default_inspector_port")]
    pub port: u16,
    /// Overall budget for discovering and connecting to the inspector
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Initial retry interval for the websocket connect
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,
    /// Take `console.log` output from the inspector instead of node's stdout
    #[serde(default = "default_true")]
    pub forward_console: bool,
}

fn default_node_executable() -> String {
    DEFAULT_NODE_EXECUTABLE.to_string()
}

fn default_inspector_host() -> String {
    DEFAULT_INSPECTOR_HOST.to_string()
}

fn default_inspector_port() -> u16 {
    DEFAULT_INSPECTOR_PORT
}

fn default_connect_timeout_ms() -> u64 {
    DEFAULT_INSPECTOR_CONNECT_TIMEOUT_MS
}

fn default_retry_interval_ms() -> u64 {
    DEFAULT_INSPECTOR_RETRY_INTERVAL_MS
}

fn default_true() -> bool {
    true
}

impl Default for InspectorBackendConfig {
    fn default() -> Self {
        Self {
            node: default_node_executable(),
            host: default_inspector_host(),
            port: default_inspector_port(),
            connect_timeout_ms: default_connect_timeout_ms(),
            retry_interval_ms: default_retry_interval_ms(),
            forward_console: default_true(),
        }
    }
}
