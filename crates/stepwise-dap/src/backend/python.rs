//! Python child-process backend
//!
//! Spawns `python3 py_runtime.py <program>` and speaks line-delimited
//! JSON over its stdio. Variable lookups are answered asynchronously by
//! the runtime and matched back through a [`Correlator`].

use super::process::ProcessHandle;
use super::{
    evaluate_builtin, Backend, BackendContext, BackendKind, EntryGate, LaunchTarget, StepKind,
    StopReason,
};
use crate::constants::{backend_commands, defaults};
use crate::correlator::Correlator;
use crate::error::{Error, Result};
use crate::ext::DebugResult;
use crate::framing::pump_lines;
use crate::protocol::{OutputCategory, Scope, Source, StackFrame, Variable};
use crate::session::normalize_path;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Source of the runtime helper, written out at launch unless configured
pub const PY_RUNTIME_SOURCE: &str = include_str!("../../runtime/py_runtime.py");

const LOCALS_REFERENCE: i64 = 1;
const GLOBALS_REFERENCE: i64 = 2;
const LINE_CHANNEL_CAPACITY: usize = 256;

// ============================================================
// Wire format
// ============================================================

/// Command written to the runtime's stdin
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command")]
pub enum BackendCommand {
    #[serde(rename = "setBreakpoints")]
    SetBreakpoints { file: String, lines: Vec<u32> },
    #[serde(rename = "continue")]
    Continue,
    #[serde(rename = "step_over")]
    StepOver,
    #[serde(rename = "step_in")]
    StepIn,
    #[serde(rename = "step_out")]
    StepOut,
    #[serde(rename = "variables")]
    Variables {
        scope: String,
        #[serde(rename = "requestId")]
        request_id: u64,
    },
}

impl BackendCommand {
    pub fn name(&self) -> &'static str {
        match self {
            BackendCommand::SetBreakpoints { .. } => backend_commands::SET_BREAKPOINTS,
            BackendCommand::Continue => backend_commands::CONTINUE,
            BackendCommand::StepOver => backend_commands::STEP_OVER,
            BackendCommand::StepIn => backend_commands::STEP_IN,
            BackendCommand::StepOut => backend_commands::STEP_OUT,
            BackendCommand::Variables { .. } => backend_commands::VARIABLES,
        }
    }
}

/// Event read from the runtime's stdout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum BackendMessage {
    Stopped {
        #[serde(default)]
        line: Option<u32>,
        #[serde(default)]
        reason: Option<String>,
        /// Absent from older runtimes, meaning the launched program
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file: Option<String>,
    },
    Breakpoint {
        #[serde(default)]
        line: Option<u32>,
    },
    Terminated,
    Variables {
        #[serde(rename = "requestId")]
        request_id: u64,
        #[serde(default)]
        variables: Vec<Variable>,
    },
    Error {
        message: String,
    },
}

type StdinWriter = Box<dyn AsyncWrite + Send + Unpin>;
type SharedWriter = Arc<Mutex<Option<StdinWriter>>>;
/// Where the runtime last stopped when that is outside the launched program
type ForeignStop = Arc<Mutex<Option<(PathBuf, u32)>>>;

async fn send_command(writer: &SharedWriter, command: &BackendCommand) -> Result<()> {
    let mut line = serde_json::to_string(command)?;
    line.push('\n');

    let mut guard = writer.lock().await;
    let stdin = guard
        .as_mut()
        .ok_or_else(|| Error::Communication("Python runtime is not running".to_string()))?;
    stdin.write_all(line.as_bytes()).await?;
    stdin.flush().await?;
    trace!("Sent to runtime: {}", line.trim_end());
    Ok(())
}

// ============================================================
// Backend
// ============================================================

pub struct PythonBackend {
    ctx: BackendContext,
    writer: SharedWriter,
    correlator: Arc<Correlator<Vec<Variable>>>,
    entry: Arc<Mutex<EntryGate>>,
    foreign_stop: ForeignStop,
    process: Mutex<Option<ProcessHandle>>,
}

impl PythonBackend {
    pub fn new(ctx: BackendContext) -> Self {
        let timeout = Duration::from_millis(ctx.config.relay.request_timeout_ms);
        Self {
            ctx,
            writer: Arc::new(Mutex::new(None)),
            correlator: Arc::new(Correlator::new(timeout)),
            entry: Arc::new(Mutex::new(EntryGate::default())),
            foreign_stop: Arc::new(Mutex::new(None)),
            process: Mutex::new(None),
        }
    }

    /// Wire the runtime's stdout and stdin.
    ///
    /// Returns the task dispatching runtime lines. With
    /// `terminate_on_eof` the end of stdout ends the session; otherwise
    /// the process exit watcher does.
    pub async fn attach<R, W>(&self, stdout: R, stdin: W, terminate_on_eof: bool) -> JoinHandle<()>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        *self.writer.lock().await = Some(Box::new(stdin));

        let (line_tx, mut line_rx) = mpsc::channel(LINE_CHANNEL_CAPACITY);
        tokio::spawn(pump_lines(stdout, line_tx, "python stdout"));

        let dispatcher = RuntimeDispatcher {
            ctx: self.ctx.clone(),
            writer: self.writer.clone(),
            correlator: self.correlator.clone(),
            entry: self.entry.clone(),
            foreign_stop: self.foreign_stop.clone(),
        };
        tokio::spawn(async move {
            while let Some(line) = line_rx.recv().await {
                dispatcher.handle_line(&line).await;
            }
            dispatcher.correlator.fail_all("Python runtime closed stdout").await;
            if terminate_on_eof {
                dispatcher.ctx.sink.terminated().await;
            }
        })
    }

    async fn send(&self, command: BackendCommand) -> Result<()> {
        debug!(command = command.name(), "Python command");
        send_command(&self.writer, &command).await
    }

    async fn runtime_script(&self) -> Result<PathBuf> {
        if let Some(path) = &self.ctx.config.python.runtime_script {
            return Ok(stepwise_config::paths::expand_tilde(path));
        }
        let path = std::env::temp_dir().join(format!("stepwise-py-runtime-{}.py", std::process::id()));
        tokio::fs::write(&path, PY_RUNTIME_SOURCE)
            .await
            .map_err(|e| Error::Spawn(format!("Failed to write runtime helper: {}", e)))?;
        Ok(path)
    }
}

/// State the stdout dispatcher task needs
struct RuntimeDispatcher {
    ctx: BackendContext,
    writer: SharedWriter,
    correlator: Arc<Correlator<Vec<Variable>>>,
    entry: Arc<Mutex<EntryGate>>,
    foreign_stop: ForeignStop,
}

impl RuntimeDispatcher {
    async fn handle_line(&self, line: &str) {
        let sink = &self.ctx.sink;
        let message = match serde_json::from_str::<BackendMessage>(line) {
            Ok(message) => message,
            Err(_) => {
                // Program output or an event we do not model
                sink.output(format!("{}\n", line), OutputCategory::Stdout).await;
                return;
            }
        };

        match message {
            BackendMessage::Stopped { line, reason, file } => {
                let reason = StopReason::parse(reason.as_deref().unwrap_or_default());
                if reason == StopReason::Entry {
                    self.on_entry(line).await;
                } else {
                    let line = self.locate(file.as_deref(), line).await;
                    sink.stopped(reason, line).await;
                }
            }
            BackendMessage::Breakpoint { line } => {
                sink.stopped(StopReason::Breakpoint, line).await;
            }
            BackendMessage::Terminated => {
                info!("Python runtime reported termination");
                sink.terminated().await;
            }
            BackendMessage::Variables {
                request_id,
                variables,
            } => {
                self.correlator.resolve(request_id, variables).await;
            }
            BackendMessage::Error { message } => {
                warn!("Python runtime error: {}", message);
                sink.output(format!("{}\n", message), OutputCategory::Stderr).await;
            }
        }
    }

    /// Remember stops outside the launched program. Only lines of the
    /// launched program are handed on to move the session position.
    async fn locate(&self, file: Option<&str>, line: Option<u32>) -> Option<u32> {
        let stopped_in = file.map(|f| normalize_path(Path::new(f)));
        let launched = self.ctx.session.lock().await.current_file().map(Path::to_path_buf);
        let mut foreign = self.foreign_stop.lock().await;
        match (stopped_in, line) {
            (Some(path), Some(line)) if launched.as_ref() != Some(&path) => {
                trace!(file = %path.display(), line, "Stopped outside the launched program");
                *foreign = Some((path, line));
                None
            }
            _ => {
                *foreign = None;
                line
            }
        }
    }

    async fn on_entry(&self, line: Option<u32>) {
        let decision = self.entry.lock().await.arrive(line);
        match decision {
            Ok(None) => trace!("Holding entry stop until run"),
            Ok(Some(stop_on_entry)) => {
                release_entry(&self.ctx, &self.writer, stop_on_entry, line).await;
            }
            Err(()) => self.ctx.sink.stopped(StopReason::Step, line).await,
        }
    }
}

async fn release_entry(
    ctx: &BackendContext,
    writer: &SharedWriter,
    stop_on_entry: bool,
    line: Option<u32>,
) {
    if stop_on_entry {
        ctx.sink.stopped(StopReason::Entry, line).await;
    } else if let Err(e) = send_command(writer, &BackendCommand::Continue).await {
        warn!("Failed to start Python program: {}", e);
    }
}

#[async_trait]
impl Backend for PythonBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Python
    }

    async fn start(&self, target: &LaunchTarget) -> Result<()> {
        let config = &self.ctx.config;
        let runtime = self.runtime_script().await?;
        let args = vec![
            runtime.display().to_string(),
            target.program.display().to_string(),
        ];
        let (handle, pipes) = ProcessHandle::spawn(
            "python",
            &config.python.interpreter,
            &args,
            target.program.parent(),
            Duration::from_millis(config.relay.shutdown_timeout_ms),
        )?;

        let reader = self.attach(pipes.stdout, pipes.stdin, false).await;

        let (err_tx, mut err_rx) = mpsc::channel::<String>(LINE_CHANNEL_CAPACITY);
        tokio::spawn(pump_lines(pipes.stderr, err_tx, "python stderr"));
        let sink = self.ctx.sink.clone();
        let stderr_forwarder = tokio::spawn(async move {
            while let Some(line) = err_rx.recv().await {
                sink.output(format!("{}\n", line), OutputCategory::Stderr).await;
            }
        });

        handle
            .watch(self.ctx.sink.clone(), vec![reader, stderr_forwarder])
            .await;
        *self.process.lock().await = Some(handle);
        Ok(())
    }

    async fn set_breakpoints(&self, file: &Path, lines: &BTreeSet<u32>) -> Result<()> {
        self.send(BackendCommand::SetBreakpoints {
            file: file.display().to_string(),
            lines: lines.iter().copied().collect(),
        })
        .await
    }

    async fn run(&self, stop_on_entry: bool) -> Result<()> {
        if !stop_on_entry {
            self.ctx.session.lock().await.start();
        }
        let held = self.entry.lock().await.release(stop_on_entry);
        if let Some(line) = held {
            release_entry(&self.ctx, &self.writer, stop_on_entry, line).await;
        }
        Ok(())
    }

    async fn resume(&self) -> Result<()> {
        self.ctx.session.lock().await.start();
        self.send(BackendCommand::Continue).await
    }

    async fn step(&self, kind: StepKind) -> Result<()> {
        let command = match kind {
            StepKind::Over => BackendCommand::StepOver,
            StepKind::In => BackendCommand::StepIn,
            StepKind::Out => BackendCommand::StepOut,
        };
        self.ctx.session.lock().await.start();
        self.send(command).await
    }

    fn supports_pause(&self) -> bool {
        false
    }

    async fn pause(&self) -> Result<()> {
        Err(Error::Unsupported(
            "pause is not supported by the python backend".to_string(),
        ))
    }

    async fn stack_frames(&self) -> Result<Vec<StackFrame>> {
        let foreign = self.foreign_stop.lock().await.clone();
        let (source, line) = match foreign {
            Some((file, line)) => (Some(Source::from_path(&file)), line),
            None => {
                let state = self.ctx.session.lock().await;
                (state.current_file().map(Source::from_path), state.current_line())
            }
        };
        Ok(vec![StackFrame {
            id: defaults::FRAME_ID,
            name: format!("line {}", line),
            source,
            line: i64::from(line),
            column: defaults::COLUMN,
        }])
    }

    async fn scopes(&self, _frame_id: i64) -> Result<Vec<Scope>> {
        Ok(vec![
            Scope::new("Local", LOCALS_REFERENCE).hint("locals"),
            Scope::new("Globals", GLOBALS_REFERENCE)
                .hint("globals")
                .expensive(true),
        ])
    }

    async fn variables(&self, reference: i64) -> Result<Vec<Variable>> {
        let scope = match reference {
            LOCALS_REFERENCE => "locals",
            GLOBALS_REFERENCE => "globals",
            _ => return Ok(Vec::new()),
        };
        let writer = self.writer.clone();
        self.correlator
            .issue(|request_id| async move {
                let command = BackendCommand::Variables {
                    scope: scope.to_string(),
                    request_id,
                };
                send_command(&writer, &command).await
            })
            .await
    }

    async fn evaluate(&self, expression: &str, _frame_id: Option<i64>) -> Result<String> {
        Ok(evaluate_builtin(&self.ctx.session, expression).await)
    }

    async fn kill(&self) {
        if let Some(process) = self.process.lock().await.as_ref() {
            process.kill().await;
        }
        // Closing stdin also unblocks a runtime waiting for commands
        let stdin = self.writer.lock().await.take();
        if let Some(mut stdin) = stdin {
            stdin.shutdown().await.debug_ok("Closing runtime stdin");
        }
        self.correlator.fail_all("Python runtime killed").await;
    }
}
