//! DAP (Debug Adapter Protocol) message types
//!
//! Only the subset the relay consumes and produces is modelled. Messages
//! travel with Content-Length headers:
//! ```text
//! Content-Length: 62\r\n
//! \r\n
//! {"seq":3,"type":"request","command":"next","arguments":{"threadId":1}}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants::defaults;

// ============================================================
// BASE PROTOCOL MESSAGE
// ============================================================

/// Base protocol message - every DAP message is one of these
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProtocolMessage {
    /// Request message from the IDE
    Request(Request),
    /// Response message to the IDE
    Response(Response),
    /// Event notification to the IDE
    Event(Event),
}

impl ProtocolMessage {
    pub fn seq(&self) -> i64 {
        match self {
            ProtocolMessage::Request(r) => r.seq,
            ProtocolMessage::Response(r) => r.seq,
            ProtocolMessage::Event(e) => e.seq,
        }
    }

    /// Overwrite the sequence number (the writer stamps outgoing messages).
    pub fn set_seq(&mut self, seq: i64) {
        match self {
            ProtocolMessage::Request(r) => r.seq = seq,
            ProtocolMessage::Response(r) => r.seq = seq,
            ProtocolMessage::Event(e) => e.seq = seq,
        }
    }
}

// ============================================================
// REQUEST
// ============================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub seq: i64,
    pub command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Value>,
}

impl Request {
    pub fn new(seq: i64, command: impl Into<String>) -> Self {
        Self {
            seq,
            command: command.into(),
            arguments: None,
        }
    }

    pub fn with_arguments(mut self, arguments: Value) -> Self {
        self.arguments = Some(arguments);
        self
    }

    /// Deserialize the arguments into a typed struct.
    ///
    /// Missing arguments deserialize from an empty object so that
    /// all-optional argument types still succeed.
    pub fn parse_arguments<T: serde::de::DeserializeOwned>(&self) -> crate::Result<T> {
        let value = self
            .arguments
            .clone()
            .unwrap_or_else(|| Value::Object(Default::default()));
        Ok(serde_json::from_value(value)?)
    }
}

// ============================================================
// RESPONSE
// ============================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub seq: i64,
    pub request_seq: i64,
    pub command: String,
    pub success: bool,
    /// Error message if not successful
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

impl Response {
    /// Successful acknowledgement of `request`. The writer assigns `seq`.
    pub fn ack(request: &Request) -> Self {
        Self {
            seq: 0,
            request_seq: request.seq,
            command: request.command.clone(),
            success: true,
            message: None,
            body: None,
        }
    }

    /// Error response to `request`.
    pub fn error(request: &Request, message: impl Into<String>) -> Self {
        Self {
            seq: 0,
            request_seq: request.seq,
            command: request.command.clone(),
            success: false,
            message: Some(message.into()),
            body: None,
        }
    }

    pub fn with_body(mut self, body: impl Serialize) -> Self {
        self.body = serde_json::to_value(body).ok();
        self
    }
}

// ============================================================
// EVENT
// ============================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub seq: i64,
    pub event: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

impl Event {
    pub fn new(event: impl Into<String>) -> Self {
        Self {
            seq: 0,
            event: event.into(),
            body: None,
        }
    }

    pub fn with_body(mut self, body: impl Serialize) -> Self {
        self.body = serde_json::to_value(body).ok();
        self
    }
}

// ============================================================
// INITIALIZE
// ============================================================

/// Capabilities returned in the initialize response
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    pub supports_configuration_done_request: bool,
    pub supports_evaluate_for_hovers: bool,
    pub supports_step_back: bool,
    pub supports_set_variable: bool,
    pub supports_terminate_request: bool,
}

impl Capabilities {
    /// What the relay supports regardless of backend.
    pub fn relay() -> Self {
        Self {
            supports_configuration_done_request: true,
            supports_evaluate_for_hovers: true,
            supports_step_back: false,
            supports_set_variable: false,
            supports_terminate_request: true,
        }
    }
}

// ============================================================
// LAUNCH
// ============================================================

/// Launch request arguments
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchRequestArguments {
    /// Program to debug
    #[serde(default)]
    pub program: Option<String>,
    /// Halt before the first line instead of running
    #[serde(default)]
    pub stop_on_entry: bool,
    /// Explicit backend (`script`, `python`, `inspector`)
    #[serde(default)]
    pub backend: Option<String>,
    /// Launch configuration fields the relay does not interpret
    #[serde(flatten)]
    pub additional: serde_json::Map<String, Value>,
}

// ============================================================
// BREAKPOINTS
// ============================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetBreakpointsArguments {
    pub source: Source,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub breakpoints: Option<Vec<SourceBreakpoint>>,
    /// Deprecated plain line list, still sent by some clients
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lines: Option<Vec<u32>>,
}

impl SetBreakpointsArguments {
    /// Requested lines in request order, duplicates preserved.
    pub fn requested_lines(&self) -> Vec<u32> {
        match (&self.breakpoints, &self.lines) {
            (Some(bps), _) => bps.iter().map(|bp| bp.line).collect(),
            (None, Some(lines)) => lines.clone(),
            (None, None) => Vec::new(),
        }
    }
}

/// Source file reference
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Source {
    /// Source for a file path, named after its final component.
    pub fn from_path(path: &std::path::Path) -> Self {
        Self {
            path: Some(path.display().to_string()),
            name: path.file_name().map(|n| n.to_string_lossy().into_owned()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceBreakpoint {
    pub line: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
    /// Accepted for compatibility, never evaluated
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetBreakpointsResponseBody {
    pub breakpoints: Vec<Breakpoint>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Breakpoint {
    pub verified: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<Source>,
}

// ============================================================
// EVENTS
// ============================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoppedEventBody {
    /// `entry`, `breakpoint`, `step` or `pause`
    pub reason: String,
    pub thread_id: i64,
    pub all_threads_stopped: bool,
}

impl StoppedEventBody {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            thread_id: defaults::THREAD_ID,
            all_threads_stopped: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputEventBody {
    pub category: OutputCategory,
    pub output: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputCategory {
    Console,
    #[default]
    Stdout,
    Stderr,
}

// ============================================================
// THREADS / STACK TRACE
// ============================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thread {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadsResponseBody {
    pub threads: Vec<Thread>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackTraceArguments {
    #[serde(default)]
    pub thread_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_frame: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub levels: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackTraceResponseBody {
    pub stack_frames: Vec<StackFrame>,
    pub total_frames: i64,
}

/// One call-stack entry, 1-based line and column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackFrame {
    pub id: i64,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<Source>,
    pub line: i64,
    pub column: i64,
}

// ============================================================
// SCOPES / VARIABLES / EVALUATE
// ============================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopesArguments {
    pub frame_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopesResponseBody {
    pub scopes: Vec<Scope>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scope {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presentation_hint: Option<String>,
    pub variables_reference: i64,
    pub expensive: bool,
}

impl Scope {
    pub fn new(name: impl Into<String>, variables_reference: i64) -> Self {
        Self {
            name: name.into(),
            presentation_hint: None,
            variables_reference,
            expensive: false,
        }
    }

    pub fn hint(mut self, hint: impl Into<String>) -> Self {
        self.presentation_hint = Some(hint.into());
        self
    }

    pub fn expensive(mut self, expensive: bool) -> Self {
        self.expensive = expensive;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariablesArguments {
    pub variables_reference: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariablesResponseBody {
    pub variables: Vec<Variable>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Variable {
    pub name: String,
    pub value: String,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub var_type: Option<String>,
    /// Non-zero when the variable has children
    #[serde(default)]
    pub variables_reference: i64,
}

impl Variable {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            var_type: None,
            variables_reference: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateArguments {
    pub expression: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame_id: Option<i64>,
    /// `watch`, `repl` or `hover`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateResponseBody {
    pub result: String,
    pub variables_reference: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContinueResponseBody {
    pub all_threads_continued: bool,
}
