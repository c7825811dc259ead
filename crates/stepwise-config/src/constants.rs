//! Default constants for stepwise configuration
//!
//! Single source of truth for default values. Everything configurable
//! should be here.

// ============================================================================
// HOSTS
// ============================================================================

/// Default host the inspector backend binds to (localhost only)
pub const DEFAULT_INSPECTOR_HOST: &str = "127.0.0.1";

/// Default listen address for `stepwise serve`
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:4711";

// ============================================================================
// ENVIRONMENT VARIABLES
// ============================================================================

/// Config file path override
pub const ENV_STEPWISE_CONFIG: &str = "STEPWISE_CONFIG";

/// stepwise home directory override
pub const ENV_STEPWISE_HOME: &str = "STEPWISE_HOME";

// ============================================================================
// TIMEOUTS (milliseconds)
// ============================================================================

/// Bounded wait for a backend query (variables, inspector calls)
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 5_000;

/// Wait for a killed backend process to exit
pub const DEFAULT_SHUTDOWN_TIMEOUT_MS: u64 = 2_000;

/// Wait for the inspector websocket to accept a connection
pub const DEFAULT_INSPECTOR_CONNECT_TIMEOUT_MS: u64 = 10_000;

// ============================================================================
// INTERVALS (milliseconds)
// ============================================================================

/// Delay between interpreter ticks while running
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 60;

/// Initial retry interval when connecting to the inspector
pub const DEFAULT_INSPECTOR_RETRY_INTERVAL_MS: u64 = 100;

/// Upper bound for the inspector connect backoff
pub const DEFAULT_INSPECTOR_MAX_RETRY_INTERVAL_MS: u64 = 1_000;

// ============================================================================
// CHANNEL CAPACITIES
// ============================================================================

/// Capacity of the backend event channel
pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

/// Capacity of the outgoing IDE message channel
pub const DEFAULT_OUTBOUND_CHANNEL_CAPACITY: usize = 512;

// ============================================================================
// BACKENDS
// ============================================================================

/// Python interpreter used to run the runtime helper
pub const DEFAULT_PYTHON_INTERPRETER: &str = "python3";

/// Node executable used by the inspector backend
pub const DEFAULT_NODE_EXECUTABLE: &str = "node";

/// Inspector port (0 = pick a free port per session)
pub const DEFAULT_INSPECTOR_PORT: u16 = 0;

// ============================================================================
// LOGGING
// ============================================================================

/// Default log level when RUST_LOG is not set
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Maximum characters of a backend line echoed into debug logs
pub const DEFAULT_LOG_PAYLOAD_PREVIEW_LEN: usize = 200;
