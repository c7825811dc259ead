//! Error types for relay operations

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// The backend could not be started
    ///
    /// Surfaced to the IDE as a terminated session, never as a hang.
    #[error("Failed to start backend: {0}")]
    Spawn(String),

    /// The target program could not be resolved or read
    ///
    /// Surfaced as an error response to `launch`; the session never starts.
    #[error("Launch failed: {0}")]
    Launch(String),

    /// JSON parsing and deserialization failures
    ///
    /// Automatically converted from `serde_json::Error` via `From` impl.
    #[error("Invalid message format: {0}")]
    InvalidMessage(String),

    /// Writing a query to the backend failed
    ///
    /// Rejects the one pending request that was being dispatched.
    #[error("Failed to dispatch to backend: {0}")]
    Dispatch(String),

    /// The backend did not answer a query in time
    #[error("Query timed out after {0}ms")]
    Timeout(u64),

    /// DAP protocol state violations and message format expectations
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Process I/O, channel operations and transport failures
    #[error("Backend communication error: {0}")]
    Communication(String),

    /// Request the active backend does not model
    #[error("{0}")]
    Unsupported(String),

    /// Request needs a running backend but none was launched
    #[error("No program has been launched")]
    NotLaunched,
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::InvalidMessage(err.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Communication(err.to_string())
    }
}

impl From<std::string::FromUtf8Error> for Error {
    fn from(err: std::string::FromUtf8Error) -> Self {
        Error::Protocol(format!("Invalid UTF-8: {}", err))
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Error::Communication(format!("Inspector socket: {}", err))
    }
}
