//! Self-hosted line interpreter
//!
//! "Runs" a program by walking its lines on a timer: each tick echoes the
//! current line as output and advances, halting on breakpoints. All state
//! lives in the shared session and the `running` flag gates the loop.
//! Halting only clears the flag; a tick already in flight finishes, and
//! the halt waits for the loop to notice. Stop events carry no line since
//! the session already holds it.

use super::{
    evaluate_builtin, Backend, BackendContext, BackendKind, EventSink, LaunchTarget, StepKind,
    StopReason,
};
use crate::constants::{defaults, messages};
use crate::error::Result;
use crate::protocol::{OutputCategory, Scope, Source, StackFrame, Variable};
use crate::session::SharedSession;
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Variables reference of the single synthetic scope
const LOCALS_REFERENCE: i64 = 1;

pub struct ScriptBackend {
    session: SharedSession,
    sink: EventSink,
    tick_interval: Duration,
    /// Bound on waiting for the loop to notice a cleared flag
    halt_timeout: Duration,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

/// Outcome of one tick, decided under the session lock
enum Tick {
    Echo(String),
    Breakpoint(u32),
    Completed,
    Idle,
}

impl ScriptBackend {
    pub fn new(ctx: BackendContext) -> Self {
        Self {
            session: ctx.session,
            sink: ctx.sink,
            tick_interval: Duration::from_millis(ctx.config.script.tick_interval_ms),
            halt_timeout: Duration::from_millis(ctx.config.relay.shutdown_timeout_ms),
            ticker: Mutex::new(None),
        }
    }

    /// Start the tick loop unless it is already running.
    ///
    /// `resuming` skips the breakpoint check on the first tick so that
    /// continuing from a breakpoint executes the halted line.
    async fn continue_run(&self, resuming: bool) {
        if self.session.lock().await.is_running() {
            debug!("Tick loop already running");
            return;
        }

        let mut ticker = self.ticker.lock().await;
        if let Some(previous) = ticker.take() {
            self.wait_for(previous).await;
        }
        self.session.lock().await.start();
        *ticker = Some(tokio::spawn(tick_loop(
            self.session.clone(),
            self.sink.clone(),
            self.tick_interval,
            resuming,
        )));
    }

    /// Clear the running flag and let the loop wind down on its own.
    async fn halt_loop(&self) {
        self.session.lock().await.stop();
        let ticker = self.ticker.lock().await.take();
        if let Some(ticker) = ticker {
            self.wait_for(ticker).await;
        }
    }

    async fn wait_for(&self, ticker: JoinHandle<()>) {
        if tokio::time::timeout(self.halt_timeout, ticker).await.is_err() {
            warn!("Tick loop did not stop within {:?}", self.halt_timeout);
        }
    }

    /// Execute exactly one line and report a step stop.
    async fn step_once(&self) {
        self.halt_loop().await;

        let echoed = {
            let mut state = self.session.lock().await;
            if state.is_past_end() {
                None
            } else {
                let line = state.current_line();
                let text = format!("step {}: {}\n", line, state.current_text());
                state.advance_line();
                Some(text)
            }
        };

        match echoed {
            Some(text) => {
                self.sink.output(text, OutputCategory::Console).await;
                self.sink.stopped(StopReason::Step, None).await;
            }
            None => complete(&self.sink).await,
        }
    }
}

async fn complete(sink: &EventSink) {
    sink.output(messages::PROGRAM_COMPLETED, OutputCategory::Console)
        .await;
    sink.terminated().await;
}

async fn tick_loop(session: SharedSession, sink: EventSink, interval: Duration, resuming: bool) {
    let mut skip_check = resuming;
    loop {
        let tick = {
            let mut state = session.lock().await;
            if !state.is_running() {
                Tick::Idle
            } else if state.is_past_end() {
                state.stop();
                Tick::Completed
            } else if !skip_check && state.is_breakpoint() {
                state.stop();
                Tick::Breakpoint(state.current_line())
            } else {
                let line = state.current_line();
                let text = format!("line {}: {}\n", line, state.current_text());
                state.advance_line();
                Tick::Echo(text)
            }
        };
        skip_check = false;

        match tick {
            Tick::Idle => return,
            Tick::Completed => {
                complete(&sink).await;
                return;
            }
            Tick::Breakpoint(line) => {
                trace!(line, "Breakpoint hit");
                sink.stopped(StopReason::Breakpoint, None).await;
                return;
            }
            Tick::Echo(text) => sink.output(text, OutputCategory::Console).await,
        }

        tokio::time::sleep(interval).await;
    }
}

#[async_trait]
impl Backend for ScriptBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Script
    }

    async fn start(&self, target: &LaunchTarget) -> Result<()> {
        let total = self.session.lock().await.total_lines();
        debug!(program = %target.program.display(), total, "Script backend ready");
        Ok(())
    }

    async fn set_breakpoints(&self, file: &Path, lines: &BTreeSet<u32>) -> Result<()> {
        // The loop reads breakpoints straight from the session
        trace!(file = %file.display(), ?lines, "Script breakpoints updated");
        Ok(())
    }

    async fn run(&self, stop_on_entry: bool) -> Result<()> {
        if stop_on_entry {
            self.sink.stopped(StopReason::Entry, None).await;
        } else {
            self.continue_run(false).await;
        }
        Ok(())
    }

    async fn resume(&self) -> Result<()> {
        self.continue_run(true).await;
        Ok(())
    }

    async fn step(&self, _kind: StepKind) -> Result<()> {
        // No call stack: every step kind advances one line
        self.step_once().await;
        Ok(())
    }

    async fn pause(&self) -> Result<()> {
        self.halt_loop().await;
        self.sink.stopped(StopReason::Pause, None).await;
        Ok(())
    }

    async fn stack_frames(&self) -> Result<Vec<StackFrame>> {
        let state = self.session.lock().await;
        let line = state.current_line().clamp(1, state.total_lines().max(1));
        Ok(vec![StackFrame {
            id: defaults::FRAME_ID,
            name: defaults::THREAD_NAME.to_string(),
            source: state.current_file().map(Source::from_path),
            line: i64::from(line),
            column: defaults::COLUMN,
        }])
    }

    async fn scopes(&self, _frame_id: i64) -> Result<Vec<Scope>> {
        Ok(vec![Scope::new("Locals", LOCALS_REFERENCE)])
    }

    async fn variables(&self, reference: i64) -> Result<Vec<Variable>> {
        if reference != LOCALS_REFERENCE {
            return Ok(Vec::new());
        }
        let state = self.session.lock().await;
        let line = state.current_line();
        let text = state.line_text(line.clamp(1, state.total_lines().max(1)));
        let file = state
            .current_file()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        Ok(vec![
            Variable::new("file", file),
            Variable::new("line", line.to_string()),
            Variable::new(
                "text",
                serde_json::to_string(text).unwrap_or_else(|_| text.to_string()),
            ),
            Variable::new("time", chrono::Local::now().format("%H:%M:%S").to_string()),
        ])
    }

    async fn evaluate(&self, expression: &str, _frame_id: Option<i64>) -> Result<String> {
        Ok(evaluate_builtin(&self.session, expression).await)
    }

    async fn kill(&self) {
        self.halt_loop().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendEvent;
    use crate::session::SessionState;
    use std::path::PathBuf;
    use std::sync::Arc;
    use stepwise_config::Config;
    use tokio::sync::mpsc;

    fn backend(program: &str) -> (ScriptBackend, SharedSession, mpsc::Receiver<BackendEvent>) {
        let mut config = Config::default();
        config.script.tick_interval_ms = 1;
        let mut state = SessionState::new();
        state.load_program(PathBuf::from("/work/prog.txt"), program);
        let session = state.shared();
        let (sink, rx) = EventSink::channel(64);
        let ctx = BackendContext {
            config: Arc::new(config),
            sink,
            session: session.clone(),
        };
        (ScriptBackend::new(ctx), session, rx)
    }

    fn output(text: &str) -> BackendEvent {
        BackendEvent::Output {
            text: text.to_string(),
            category: OutputCategory::Console,
        }
    }

    #[tokio::test]
    async fn test_runs_to_completion() {
        let (script, _session, mut rx) = backend("a\nb\nc");
        script.run(false).await.unwrap();

        assert_eq!(rx.recv().await.unwrap(), output("line 1: a\n"));
        assert_eq!(rx.recv().await.unwrap(), output("line 2: b\n"));
        assert_eq!(rx.recv().await.unwrap(), output("line 3: c\n"));
        assert_eq!(rx.recv().await.unwrap(), output("Program completed.\n"));
        assert_eq!(rx.recv().await.unwrap(), BackendEvent::Terminated);
    }

    #[tokio::test]
    async fn test_halts_on_breakpoint_then_resumes_from_halted_line() {
        let (script, session, mut rx) = backend("1\n2\n3\n4\n5");
        session
            .lock()
            .await
            .set_breakpoints(PathBuf::from("/work/prog.txt"), &[3]);
        script.run(false).await.unwrap();

        assert_eq!(rx.recv().await.unwrap(), output("line 1: 1\n"));
        assert_eq!(rx.recv().await.unwrap(), output("line 2: 2\n"));
        assert_eq!(
            rx.recv().await.unwrap(),
            BackendEvent::Stopped {
                reason: StopReason::Breakpoint,
                line: None
            }
        );
        {
            let state = session.lock().await;
            assert_eq!(state.current_line(), 3);
            assert!(!state.is_running());
        }

        script.resume().await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), output("line 3: 3\n"));
        assert_eq!(rx.recv().await.unwrap(), output("line 4: 4\n"));
    }

    #[tokio::test]
    async fn test_stop_on_entry_and_step() {
        let (script, session, mut rx) = backend("first\nsecond");
        script.run(true).await.unwrap();
        assert_eq!(
            rx.recv().await.unwrap(),
            BackendEvent::Stopped {
                reason: StopReason::Entry,
                line: None
            }
        );

        script.step(StepKind::In).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), output("step 1: first\n"));
        assert_eq!(
            rx.recv().await.unwrap(),
            BackendEvent::Stopped {
                reason: StopReason::Step,
                line: None
            }
        );
        assert_eq!(session.lock().await.current_line(), 2);

        script.step(StepKind::Over).await.unwrap();
        rx.recv().await.unwrap();
        rx.recv().await.unwrap();
        script.step(StepKind::Over).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), output("Program completed.\n"));
        assert_eq!(rx.recv().await.unwrap(), BackendEvent::Terminated);
    }

    #[tokio::test]
    async fn test_pause_keeps_every_executed_line() {
        let source: Vec<String> = (1..=10_000).map(|n| n.to_string()).collect();
        let (script, session, mut rx) = backend(&source.join("\n"));
        script.run(false).await.unwrap();
        for _ in 0..3 {
            rx.recv().await.unwrap();
        }
        let collect = async {
            let mut last_echoed = 3;
            loop {
                match rx.recv().await.unwrap() {
                    BackendEvent::Output { text, .. } => {
                        let line = text
                            .strip_prefix("line ")
                            .and_then(|rest| rest.split(':').next())
                            .unwrap();
                        last_echoed = line.parse::<u32>().unwrap();
                    }
                    BackendEvent::Stopped { reason, .. } => {
                        assert_eq!(reason, StopReason::Pause);
                        return last_echoed;
                    }
                    other => panic!("unexpected {:?}", other),
                }
            }
        };
        let (paused, last_echoed) = tokio::join!(script.pause(), collect);
        paused.unwrap();

        let state = session.lock().await;
        assert!(!state.is_running());
        assert_eq!(state.current_line(), last_echoed + 1);
    }

    #[tokio::test]
    async fn test_resume_while_running_is_ignored() {
        let (script, session, _rx) = backend("a\nb");
        session.lock().await.start();
        script.resume().await.unwrap();
        assert!(script.ticker.lock().await.is_none());
    }

    #[tokio::test]
    async fn test_synthetic_variables_and_frame() {
        let (script, _session, _rx) = backend("say \"hi\"\nnext");
        let frames = script.stack_frames().await.unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].line, 1);
        assert_eq!(frames[0].name, "main");

        let scopes = script.scopes(1).await.unwrap();
        let vars = script.variables(scopes[0].variables_reference).await.unwrap();
        let names: Vec<_> = vars.iter().map(|v| v.name.as_str()).collect();
        assert_eq!(names, vec!["file", "line", "text", "time"]);
        assert_eq!(vars[2].value, r#""say \"hi\"""#);
        assert!(script.variables(99).await.unwrap().is_empty());
    }
}
