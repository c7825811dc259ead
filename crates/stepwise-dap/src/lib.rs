//! Stepwise DAP - a Debug Adapter Protocol relay
//!
//! The relay sits between an IDE speaking DAP and one of three execution
//! backends:
//! - `script`: a self-hosted interpreter that walks the program line by
//!   line on a timer, for teaching and demos
//! - `python`: a Python runtime helper process speaking line-delimited
//!   JSON over stdin/stdout
//! - `inspector`: `node --inspect-brk` driven over its websocket endpoint
//!
//! # Architecture
//!
//! - [`transport`] frames DAP messages with Content-Length headers
//! - [`adapter::DebugAdapter`] is the protocol state machine
//! - [`backend::Backend`] is the capability interface every backend implements
//! - [`correlator::Correlator`] matches asynchronous backend replies to queries
//! - [`framing::LineFramer`] splits backend byte streams into lines
//! - [`session::SessionState`] holds the current file, line and breakpoints

pub mod adapter;
pub mod backend;
pub mod constants;
pub mod correlator;
pub mod error;
pub mod ext;
pub mod framing;
pub mod protocol;
pub mod server;
pub mod session;
pub mod transport;

pub use adapter::{DebugAdapter, Phase};
pub use backend::{Backend, BackendEvent, BackendKind, EventSink, StepKind, StopReason};
pub use correlator::Correlator;
pub use error::{Error, Result};
pub use ext::DebugResult;
pub use protocol::*;
pub use server::{serve_listener, serve_session, serve_stdio, SessionOutcome};
pub use session::{SessionState, SharedSession};
