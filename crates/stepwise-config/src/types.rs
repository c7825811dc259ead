//! Top-level configuration
//!
//! Sections are defined in their own modules:
//! - `relay` - protocol state machine settings
//! - `backends` - script, python and inspector backends
//! - `logging` - diagnostic logging

pub use crate::backends::{InspectorBackendConfig, PythonBackendConfig, ScriptBackendConfig};
pub use crate::logging::LoggingConfig;
pub use crate::relay::{BackendChoice, RelayConfig};

use serde::{Deserialize, Serialize};

/// Complete stepwise configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub script: ScriptBackendConfig,
    #[serde(default)]
    pub python: PythonBackendConfig,
    #[serde(default)]
    pub inspector: InspectorBackendConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}
