//! Execution backends
//!
//! The adapter drives every backend through the [`Backend`] trait and
//! learns about progress through [`BackendEvent`]s pushed into an
//! [`EventSink`]. Three implementations exist:
//! - [`ScriptBackend`]: self-hosted line interpreter on a timer loop
//! - [`PythonBackend`]: child Python process speaking line-delimited JSON
//! - [`InspectorBackend`]: Node process driven over the inspector websocket

mod inspector;
mod process;
mod python;
mod script;

pub use inspector::{CdpClient, InspectorBackend};
pub use process::ProcessHandle;
pub use python::{BackendCommand, BackendMessage, PythonBackend, PY_RUNTIME_SOURCE};
pub use script::ScriptBackend;

use crate::constants::{messages, stop_reasons};
use crate::error::{Error, Result};
use crate::protocol::{OutputCategory, Scope, StackFrame, Variable};
use crate::session::SharedSession;
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use stepwise_config::{BackendChoice, Config};
use tokio::sync::mpsc;
use tracing::debug;

// ============================================================
// Backend selection
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Script,
    Python,
    Inspector,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Script => "script",
            BackendKind::Python => "python",
            BackendKind::Inspector => "inspector",
        }
    }

    /// Infer the backend from a program's extension.
    pub fn from_extension(program: &Path) -> Self {
        match program.extension().and_then(|e| e.to_str()) {
            Some("py") => BackendKind::Python,
            Some("js" | "mjs" | "cjs") => BackendKind::Inspector,
            _ => BackendKind::Script,
        }
    }

    /// Resolve the backend for a launch.
    ///
    /// An explicit launch argument wins, then a pinned configured default,
    /// then the program's extension.
    pub fn select(requested: Option<&str>, configured: BackendChoice, program: &Path) -> Result<Self> {
        let choice = match requested {
            Some(name) => name.parse::<BackendChoice>().map_err(Error::Launch)?,
            None => configured,
        };
        Ok(match choice {
            BackendChoice::Auto => Self::from_extension(program),
            BackendChoice::Script => BackendKind::Script,
            BackendChoice::Python => BackendKind::Python,
            BackendChoice::Inspector => BackendKind::Inspector,
        })
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================
// Events
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    Over,
    In,
    Out,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Entry,
    Breakpoint,
    Step,
    Pause,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::Entry => stop_reasons::ENTRY,
            StopReason::Breakpoint => stop_reasons::BREAKPOINT,
            StopReason::Step => stop_reasons::STEP,
            StopReason::Pause => stop_reasons::PAUSE,
        }
    }

    /// Map a backend-supplied reason; anything unknown counts as a step.
    pub fn parse(reason: &str) -> Self {
        match reason {
            stop_reasons::ENTRY => StopReason::Entry,
            stop_reasons::BREAKPOINT => StopReason::Breakpoint,
            stop_reasons::PAUSE => StopReason::Pause,
            _ => StopReason::Step,
        }
    }
}

/// Progress reported by a backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendEvent {
    /// Execution halted; `line` is 1-based when the backend knows it
    Stopped { reason: StopReason, line: Option<u32> },
    Output { text: String, category: OutputCategory },
    Terminated,
}

/// Sending half of the backend event channel.
///
/// Cloned into every task a backend spawns. All clones share one
/// termination latch, so however many exit paths fire, `Terminated` is
/// delivered once and nothing is delivered after it.
#[derive(Clone)]
pub struct EventSink {
    tx: mpsc::Sender<BackendEvent>,
    terminated: Arc<AtomicBool>,
}

impl EventSink {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<BackendEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self {
                tx,
                terminated: Arc::new(AtomicBool::new(false)),
            },
            rx,
        )
    }

    pub async fn stopped(&self, reason: StopReason, line: Option<u32>) {
        self.send(BackendEvent::Stopped { reason, line }).await;
    }

    pub async fn output(&self, text: impl Into<String>, category: OutputCategory) {
        self.send(BackendEvent::Output {
            text: text.into(),
            category,
        })
        .await;
    }

    /// Report termination. Returns true only for the call that won the latch.
    pub async fn terminated(&self) -> bool {
        if self.terminated.swap(true, Ordering::SeqCst) {
            debug!("Duplicate termination suppressed");
            return false;
        }
        if self.tx.send(BackendEvent::Terminated).await.is_err() {
            debug!("Event receiver gone before termination was delivered");
        }
        true
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    async fn send(&self, event: BackendEvent) {
        if self.is_terminated() {
            debug!("Dropping {:?} after termination", event);
            return;
        }
        if self.tx.send(event).await.is_err() {
            debug!("Event receiver gone, dropping backend event");
        }
    }
}

/// Gate for the stop a process backend makes on its first line.
///
/// The Python runtime and `node --inspect-brk` both halt before running
/// anything. That stop is held until the adapter says (via `run`) whether
/// the user asked to stop on entry, whichever of the two happens first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) enum EntryGate {
    #[default]
    Pending,
    Held(Option<u32>),
    Released { stop_on_entry: bool },
    Done,
}

impl EntryGate {
    /// The backend reached its entry stop. Returns the decision if `run`
    /// already happened, or None if the stop is now held.
    ///
    /// An entry stop after the gate closed is reported as `Err(())`.
    pub(crate) fn arrive(&mut self, line: Option<u32>) -> std::result::Result<Option<bool>, ()> {
        match *self {
            EntryGate::Pending => {
                *self = EntryGate::Held(line);
                Ok(None)
            }
            EntryGate::Released { stop_on_entry } => {
                *self = EntryGate::Done;
                Ok(Some(stop_on_entry))
            }
            EntryGate::Held(_) | EntryGate::Done => Err(()),
        }
    }

    /// `run` was called. Returns the held entry line if the backend is
    /// already waiting at entry.
    pub(crate) fn release(&mut self, stop_on_entry: bool) -> Option<Option<u32>> {
        match *self {
            EntryGate::Held(line) => {
                *self = EntryGate::Done;
                Some(line)
            }
            EntryGate::Pending => {
                *self = EntryGate::Released { stop_on_entry };
                None
            }
            EntryGate::Released { .. } | EntryGate::Done => None,
        }
    }
}

// ============================================================
// Backend trait
// ============================================================

/// What a launch asks the backend to run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchTarget {
    /// Absolute, canonical program path
    pub program: PathBuf,
    pub stop_on_entry: bool,
}

/// Everything a backend needs from the session that owns it
#[derive(Clone)]
pub struct BackendContext {
    pub config: Arc<Config>,
    pub sink: EventSink,
    pub session: SharedSession,
}

/// Capability interface shared by the three execution backends.
///
/// `start` only brings the backend up; execution begins with `run`,
/// which the adapter calls once launch and configurationDone have both
/// arrived and queued breakpoints were flushed.
#[async_trait]
pub trait Backend: Send + Sync {
    fn kind(&self) -> BackendKind;

    async fn start(&self, target: &LaunchTarget) -> Result<()>;

    /// Replace the breakpoint set of `file` in the backend.
    async fn set_breakpoints(&self, file: &Path, lines: &BTreeSet<u32>) -> Result<()>;

    async fn run(&self, stop_on_entry: bool) -> Result<()>;

    async fn resume(&self) -> Result<()>;

    async fn step(&self, kind: StepKind) -> Result<()>;

    fn supports_pause(&self) -> bool {
        true
    }

    async fn pause(&self) -> Result<()>;

    async fn stack_frames(&self) -> Result<Vec<StackFrame>>;

    async fn scopes(&self, frame_id: i64) -> Result<Vec<Scope>>;

    async fn variables(&self, reference: i64) -> Result<Vec<Variable>>;

    async fn evaluate(&self, expression: &str, frame_id: Option<i64>) -> Result<String>;

    /// Stop the backend. Idempotent; a no-op once it already exited.
    async fn kill(&self);
}

/// Build the backend for `kind`.
pub fn create_backend(kind: BackendKind, ctx: BackendContext) -> Arc<dyn Backend> {
    match kind {
        BackendKind::Script => Arc::new(ScriptBackend::new(ctx)),
        BackendKind::Python => Arc::new(PythonBackend::new(ctx)),
        BackendKind::Inspector => Arc::new(InspectorBackend::new(ctx)),
    }
}

/// Evaluate the fixed expression vocabulary against the session.
///
/// Never fails: unknown expressions produce an explanatory string.
pub(crate) async fn evaluate_builtin(session: &SharedSession, expression: &str) -> String {
    let expr = expression.trim();
    let state = session.lock().await;
    let text = state.line_text(state.current_line().clamp(1, state.total_lines().max(1)));
    match expr {
        "line" => state.current_line().to_string(),
        "text" => text.to_string(),
        "time" => chrono::Utc::now().to_rfc3339(),
        "len(text)" => text.chars().count().to_string(),
        _ => format!("{}: {}", messages::UNSUPPORTED_EXPRESSION, expr),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionState;

    #[test]
    fn test_backend_from_extension() {
        assert_eq!(BackendKind::from_extension(Path::new("a.py")), BackendKind::Python);
        assert_eq!(BackendKind::from_extension(Path::new("a.mjs")), BackendKind::Inspector);
        assert_eq!(BackendKind::from_extension(Path::new("a.js")), BackendKind::Inspector);
        assert_eq!(BackendKind::from_extension(Path::new("notes.txt")), BackendKind::Script);
        assert_eq!(BackendKind::from_extension(Path::new("Makefile")), BackendKind::Script);
    }

    #[test]
    fn test_backend_select_precedence() {
        let program = Path::new("main.py");
        assert_eq!(
            BackendKind::select(Some("script"), BackendChoice::Inspector, program).unwrap(),
            BackendKind::Script
        );
        assert_eq!(
            BackendKind::select(None, BackendChoice::Inspector, program).unwrap(),
            BackendKind::Inspector
        );
        assert_eq!(
            BackendKind::select(None, BackendChoice::Auto, program).unwrap(),
            BackendKind::Python
        );
        assert!(matches!(
            BackendKind::select(Some("ruby"), BackendChoice::Auto, program),
            Err(Error::Launch(_))
        ));
    }

    #[test]
    fn test_stop_reason_parse() {
        assert_eq!(StopReason::parse("entry"), StopReason::Entry);
        assert_eq!(StopReason::parse("breakpoint"), StopReason::Breakpoint);
        assert_eq!(StopReason::parse("exception"), StopReason::Step);
        assert_eq!(StopReason::Pause.as_str(), "pause");
    }

    #[test]
    fn test_entry_gate_either_order() {
        let mut gate = EntryGate::default();
        assert_eq!(gate.arrive(Some(1)), Ok(None));
        assert_eq!(gate.release(true), Some(Some(1)));
        assert_eq!(gate, EntryGate::Done);
        assert_eq!(gate.arrive(Some(5)), Err(()));

        let mut gate = EntryGate::default();
        assert_eq!(gate.release(false), None);
        assert_eq!(gate.arrive(Some(1)), Ok(Some(false)));
        assert_eq!(gate.release(false), None);
    }

    #[tokio::test]
    async fn test_sink_delivers_terminated_once() {
        let (sink, mut rx) = EventSink::channel(8);
        let clone = sink.clone();

        assert!(sink.terminated().await);
        assert!(!clone.terminated().await);
        clone.output("late", OutputCategory::Stdout).await;
        drop(sink);
        drop(clone);

        assert_eq!(rx.recv().await, Some(BackendEvent::Terminated));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_evaluate_builtin_vocabulary() {
        let mut state = SessionState::new();
        state.load_program(PathBuf::from("/p.txt"), "print hi\nsecond");
        let session = state.shared();

        assert_eq!(evaluate_builtin(&session, "line").await, "1");
        assert_eq!(evaluate_builtin(&session, " text ").await, "print hi");
        assert_eq!(evaluate_builtin(&session, "len(text)").await, "8");
        assert!(!evaluate_builtin(&session, "time").await.is_empty());
        assert_eq!(
            evaluate_builtin(&session, "x + 1").await,
            "Unsupported expression: x + 1"
        );
    }
}
