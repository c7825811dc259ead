//! DAP protocol state machine
//!
//! One [`DebugAdapter`] serves one IDE session. Requests are handled one
//! at a time; each produces exactly one response, optionally followed by
//! a [`FollowUp`] that runs only after the response is queued, so an IDE
//! always sees e.g. the `next` response before the `stopped` it causes.
//!
//! Backend events arrive on a separate pump task that updates the
//! session and the phase and forwards them as DAP events.

use crate::backend::{
    create_backend, evaluate_builtin, Backend, BackendContext, BackendEvent, BackendKind,
    EventSink, LaunchTarget, StepKind,
};
use crate::constants::{defaults, events, messages, requests};
use crate::error::{Error, Result};
use crate::ext::DebugResult;
use crate::protocol::{
    Breakpoint, Capabilities, ContinueResponseBody, EvaluateArguments, EvaluateResponseBody,
    Event, LaunchRequestArguments, OutputCategory, OutputEventBody, ProtocolMessage, Request,
    Response, ScopesArguments, ScopesResponseBody, SetBreakpointsArguments,
    SetBreakpointsResponseBody, Source, StackTraceArguments, StackTraceResponseBody,
    StoppedEventBody, Thread, ThreadsResponseBody, VariablesArguments, VariablesResponseBody,
};
use crate::session::{normalize_path, SessionState, SharedSession};
use crate::transport::Outbound;
use serde::Serialize;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use stepwise_config::Config;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn, Instrument, Span};

/// Lifecycle of a debug session as seen by the IDE
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Uninitialized,
    Initialized,
    /// Backend started, execution not begun or halted at entry
    Launched,
    Running,
    Stopped,
    /// Absorbing: only `disconnect` and `terminate` are serviced
    Terminated,
}

#[derive(Debug)]
struct AdapterState {
    phase: Phase,
    configuration_done: bool,
    /// `stopOnEntry` of a successful launch
    launched: Option<bool>,
    /// Execution has been handed to the backend
    started: bool,
}

impl AdapterState {
    fn new() -> Self {
        Self {
            phase: Phase::Uninitialized,
            configuration_done: false,
            launched: None,
            started: false,
        }
    }

    /// Execution begins once both `launch` and `configurationDone` arrived,
    /// whichever came second.
    fn begin_if_ready(&mut self) -> Option<FollowUp> {
        match self.launched {
            Some(stop_on_entry) if self.configuration_done && !self.started => {
                self.started = true;
                Some(FollowUp::Begin { stop_on_entry })
            }
            _ => None,
        }
    }
}

/// Work that must happen after the response is on its way
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FollowUp {
    Initialized,
    Begin { stop_on_entry: bool },
    Resume,
    Step(StepKind),
    Pause,
    Terminate,
}

/// Result of a request handler
struct Handled {
    body: Option<Value>,
    then: Option<FollowUp>,
}

impl Handled {
    fn ack() -> Self {
        Self {
            body: None,
            then: None,
        }
    }

    fn body(body: impl Serialize) -> Result<Self> {
        Ok(Self {
            body: Some(serde_json::to_value(body)?),
            then: None,
        })
    }

    fn then(mut self, follow_up: Option<FollowUp>) -> Self {
        self.then = follow_up;
        self
    }
}

pub struct DebugAdapter {
    config: Arc<Config>,
    outbound: Outbound,
    session: SharedSession,
    sink: EventSink,
    state: Arc<Mutex<AdapterState>>,
    backend: Mutex<Option<Arc<dyn Backend>>>,
    pump: Mutex<Option<JoinHandle<()>>>,
    span: Span,
}

impl DebugAdapter {
    /// Create an adapter writing to `outbound`. Everything it logs,
    /// including its event pump, is recorded inside `span`.
    pub fn new(config: Arc<Config>, outbound: Outbound, span: Span) -> Self {
        let session = SessionState::new().shared();
        let state = Arc::new(Mutex::new(AdapterState::new()));
        let (sink, events) = EventSink::channel(config.relay.event_channel_capacity);

        let pump = tokio::spawn(
            pump_events(events, outbound.clone(), session.clone(), state.clone())
                .instrument(span.clone()),
        );

        Self {
            config,
            outbound,
            session,
            sink,
            state,
            backend: Mutex::new(None),
            pump: Mutex::new(Some(pump)),
            span,
        }
    }

    pub async fn phase(&self) -> Phase {
        self.state.lock().await.phase
    }

    pub fn session(&self) -> &SharedSession {
        &self.session
    }

    /// Handle one request: send its response, then run its follow-up.
    ///
    /// Returns `false` once the IDE disconnected and no further requests
    /// should be read.
    pub async fn handle_request(&self, request: Request) -> bool {
        let span = self.span.clone();
        async move {
            debug!(command = %request.command, seq = request.seq, "Request");

            if let Some(rejection) = self.gate(&request).await {
                self.send_response(Response::error(&request, rejection)).await;
                return true;
            }

            let (response, follow_up) = match self.dispatch(&request).await {
                Ok(handled) => {
                    let mut response = Response::ack(&request);
                    response.body = handled.body;
                    (response, handled.then)
                }
                Err(e) => {
                    warn!(command = %request.command, "Request failed: {}", e);
                    // A backend that never started still ends the session
                    let follow_up = matches!(e, Error::Spawn(_)).then_some(FollowUp::Terminate);
                    (Response::error(&request, e.to_string()), follow_up)
                }
            };
            self.send_response(response).await;

            if let Some(follow_up) = follow_up {
                self.follow_up(follow_up).await;
            }
            request.command != requests::DISCONNECT
        }
        .instrument(span)
        .await
    }

    /// Stop the backend and flush the final `terminated` event.
    pub async fn shutdown(&self) {
        self.terminate().await;
        let pump = self.pump.lock().await.take();
        if let Some(pump) = pump {
            let budget = Duration::from_millis(self.config.relay.shutdown_timeout_ms);
            if tokio::time::timeout(budget, pump).await.is_err() {
                warn!("Event pump did not finish within {:?}", budget);
            }
        }
    }

    /// Requests the current phase does not admit.
    async fn gate(&self, request: &Request) -> Option<&'static str> {
        let phase = self.phase().await;
        match request.command.as_str() {
            requests::DISCONNECT => None,
            requests::INITIALIZE if phase != Phase::Terminated => None,
            requests::TERMINATE if phase != Phase::Uninitialized => None,
            _ if phase == Phase::Uninitialized => Some(messages::NOT_INITIALIZED),
            _ if phase == Phase::Terminated => Some(messages::SESSION_TERMINATED),
            _ => None,
        }
    }

    async fn dispatch(&self, request: &Request) -> Result<Handled> {
        match request.command.as_str() {
            requests::INITIALIZE => self.initialize().await,
            requests::CONFIGURATION_DONE => self.configuration_done().await,
            requests::LAUNCH => self.launch(request.parse_arguments()?).await,
            requests::SET_BREAKPOINTS => self.set_breakpoints(request.parse_arguments()?).await,
            requests::THREADS => Handled::body(ThreadsResponseBody {
                threads: vec![Thread {
                    id: defaults::THREAD_ID,
                    name: defaults::THREAD_NAME.to_string(),
                }],
            }),
            requests::STACK_TRACE => self.stack_trace(request.parse_arguments()?).await,
            requests::SCOPES => {
                let args: ScopesArguments = request.parse_arguments()?;
                let scopes = self.backend().await?.scopes(args.frame_id).await?;
                Handled::body(ScopesResponseBody { scopes })
            }
            requests::VARIABLES => {
                let args: VariablesArguments = request.parse_arguments()?;
                let variables = self
                    .backend()
                    .await?
                    .variables(args.variables_reference)
                    .await?;
                Handled::body(VariablesResponseBody { variables })
            }
            requests::EVALUATE => self.evaluate(request.parse_arguments()?).await,
            requests::CONTINUE => {
                self.backend().await?;
                Ok(Handled::body(ContinueResponseBody {
                    all_threads_continued: true,
                })?
                .then(Some(FollowUp::Resume)))
            }
            requests::NEXT => self.step(StepKind::Over).await,
            requests::STEP_IN => self.step(StepKind::In).await,
            requests::STEP_OUT => self.step(StepKind::Out).await,
            requests::PAUSE => {
                let backend = self.backend().await?;
                if !backend.supports_pause() {
                    return Err(Error::Unsupported(format!(
                        "pause is not supported by the {} backend",
                        backend.kind()
                    )));
                }
                Ok(Handled::ack().then(Some(FollowUp::Pause)))
            }
            requests::TERMINATE => {
                let already = self.phase().await == Phase::Terminated;
                Ok(Handled::ack().then((!already).then_some(FollowUp::Terminate)))
            }
            requests::DISCONNECT => Ok(Handled::ack().then(Some(FollowUp::Terminate))),
            other => Err(Error::Protocol(format!("Unsupported request: {}", other))),
        }
    }

    async fn initialize(&self) -> Result<Handled> {
        let mut state = self.state.lock().await;
        let first = state.phase == Phase::Uninitialized;
        if first {
            state.phase = Phase::Initialized;
            info!("Session initialized");
        }
        Ok(Handled::body(Capabilities::relay())?.then(first.then_some(FollowUp::Initialized)))
    }

    async fn configuration_done(&self) -> Result<Handled> {
        let mut state = self.state.lock().await;
        state.configuration_done = true;
        Ok(Handled::ack().then(state.begin_if_ready()))
    }

    async fn launch(&self, args: LaunchRequestArguments) -> Result<Handled> {
        if self.state.lock().await.launched.is_some() {
            return Err(Error::Protocol("A program is already launched".to_string()));
        }

        let program = args
            .program
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| Error::Launch("launch requires a program".to_string()))?;
        let program = normalize_path(Path::new(program));
        let text = tokio::fs::read_to_string(&program)
            .await
            .map_err(|e| Error::Launch(format!("Cannot read {}: {}", program.display(), e)))?;
        let kind = BackendKind::select(
            args.backend.as_deref(),
            self.config.relay.default_backend,
            &program,
        )?;

        self.session
            .lock()
            .await
            .load_program(program.clone(), &text);
        info!(program = %program.display(), backend = %kind, "Launching");

        let backend = create_backend(
            kind,
            BackendContext {
                config: self.config.clone(),
                sink: self.sink.clone(),
                session: self.session.clone(),
            },
        );
        let target = LaunchTarget {
            program,
            stop_on_entry: args.stop_on_entry,
        };
        backend.start(&target).await.map_err(|e| match e {
            Error::Spawn(_) => e,
            other => Error::Spawn(other.to_string()),
        })?;
        *self.backend.lock().await = Some(backend.clone());

        self.flush_breakpoints(backend.as_ref()).await;

        let mut state = self.state.lock().await;
        state.phase = Phase::Launched;
        state.launched = Some(target.stop_on_entry);
        Ok(Handled::ack().then(state.begin_if_ready()))
    }

    /// Push breakpoints recorded before the backend existed.
    async fn flush_breakpoints(&self, backend: &dyn Backend) {
        let pending: Vec<_> = {
            let session = self.session.lock().await;
            session
                .breakpoint_files()
                .map(|(file, lines)| (file.to_path_buf(), lines.clone()))
                .collect()
        };
        for (file, lines) in pending {
            debug!(file = %file.display(), ?lines, "Flushing queued breakpoints");
            if let Err(e) = backend.set_breakpoints(&file, &lines).await {
                warn!(file = %file.display(), "Failed to push breakpoints: {}", e);
            }
        }
    }

    async fn set_breakpoints(&self, args: SetBreakpointsArguments) -> Result<Handled> {
        let path = args
            .source
            .path
            .as_deref()
            .ok_or_else(|| Error::Protocol("setBreakpoints requires source.path".to_string()))?;
        let file = normalize_path(Path::new(path));
        let requested = args.requested_lines();

        let (active, breakpoints) = {
            let mut session = self.session.lock().await;
            let active = session.set_breakpoints(file.clone(), &requested).clone();
            let source = Source::from_path(&file);
            let breakpoints: Vec<Breakpoint> = requested
                .iter()
                .map(|&line| Breakpoint {
                    verified: session.verify_line(&file, line),
                    line: Some(line),
                    source: Some(source.clone()),
                })
                .collect();
            (active, breakpoints)
        };

        // Before launch the set stays queued in the session
        let backend = self.backend.lock().await.clone();
        if let Some(backend) = backend {
            if let Err(e) = backend.set_breakpoints(&file, &active).await {
                warn!(file = %file.display(), "Failed to push breakpoints: {}", e);
            }
        }

        Handled::body(SetBreakpointsResponseBody { breakpoints })
    }

    async fn stack_trace(&self, args: StackTraceArguments) -> Result<Handled> {
        let frames = self.backend().await?.stack_frames().await?;
        let total_frames = frames.len() as i64;
        let start = args.start_frame.unwrap_or(0).max(0) as usize;
        let stack_frames: Vec<_> = match args.levels.filter(|&levels| levels > 0) {
            Some(levels) => frames.into_iter().skip(start).take(levels as usize).collect(),
            None => frames.into_iter().skip(start).collect(),
        };
        Handled::body(StackTraceResponseBody {
            stack_frames,
            total_frames,
        })
    }

    /// Evaluation never fails at the protocol level; failures become the result text.
    async fn evaluate(&self, args: EvaluateArguments) -> Result<Handled> {
        let backend = self.backend.lock().await.clone();
        let result = match backend {
            Some(backend) => backend
                .evaluate(&args.expression, args.frame_id)
                .await
                .unwrap_or_else(|e| e.to_string()),
            None => evaluate_builtin(&self.session, &args.expression).await,
        };
        Handled::body(EvaluateResponseBody {
            result,
            variables_reference: 0,
        })
    }

    async fn step(&self, kind: StepKind) -> Result<Handled> {
        self.backend().await?;
        Ok(Handled::ack().then(Some(FollowUp::Step(kind))))
    }

    async fn backend(&self) -> Result<Arc<dyn Backend>> {
        self.backend.lock().await.clone().ok_or(Error::NotLaunched)
    }

    async fn follow_up(&self, follow_up: FollowUp) {
        debug!(?follow_up, "Follow-up");
        let outcome = match follow_up {
            FollowUp::Initialized => {
                self.send(ProtocolMessage::Event(Event::new(events::INITIALIZED)))
                    .await;
                Ok(())
            }
            FollowUp::Terminate => {
                self.terminate().await;
                Ok(())
            }
            FollowUp::Begin { stop_on_entry } => {
                if !stop_on_entry {
                    self.set_phase(Phase::Running).await;
                }
                self.with_backend(|b| async move { b.run(stop_on_entry).await })
                    .await
            }
            FollowUp::Resume => {
                self.set_phase(Phase::Running).await;
                self.with_backend(|b| async move { b.resume().await }).await
            }
            FollowUp::Step(kind) => {
                self.set_phase(Phase::Running).await;
                self.with_backend(|b| async move { b.step(kind).await })
                    .await
            }
            FollowUp::Pause => self.with_backend(|b| async move { b.pause().await }).await,
        };

        if let Err(e) = outcome {
            warn!(?follow_up, "Backend command failed: {}", e);
            self.sink
                .output(format!("{}\n", e), OutputCategory::Stderr)
                .await;
        }
    }

    async fn with_backend<F, Fut>(&self, f: F) -> Result<()>
    where
        F: FnOnce(Arc<dyn Backend>) -> Fut,
        Fut: std::future::Future<Output = Result<()>>,
    {
        f(self.backend().await?).await
    }

    /// Kill the backend if any and report the end of the session once.
    async fn terminate(&self) {
        let backend = self.backend.lock().await.clone();
        if let Some(backend) = backend {
            backend.kill().await;
        }
        self.session.lock().await.stop();
        self.set_phase(Phase::Terminated).await;
        if self.sink.terminated().await {
            info!("Session terminated");
        }
    }

    /// The phase never leaves `Terminated`.
    async fn set_phase(&self, phase: Phase) {
        let mut state = self.state.lock().await;
        if state.phase != Phase::Terminated {
            state.phase = phase;
        }
    }

    async fn send_response(&self, response: Response) {
        self.send(ProtocolMessage::Response(response)).await;
    }

    async fn send(&self, message: ProtocolMessage) {
        self.outbound
            .send(message)
            .await
            .debug_ok("IDE writer closed");
    }
}

/// Forward backend events to the IDE, keeping the session and phase in step.
async fn pump_events(
    mut events: mpsc::Receiver<BackendEvent>,
    outbound: Outbound,
    session: SharedSession,
    state: Arc<Mutex<AdapterState>>,
) {
    while let Some(event) = events.recv().await {
        let message = match event {
            BackendEvent::Stopped { reason, line } => {
                {
                    let mut session = session.lock().await;
                    if let Some(line) = line {
                        session.set_line(line);
                    }
                    session.stop();
                }
                {
                    let mut state = state.lock().await;
                    if state.phase != Phase::Terminated {
                        state.phase = Phase::Stopped;
                    }
                }
                debug!(reason = reason.as_str(), ?line, "Stopped");
                Event::new(events::STOPPED).with_body(StoppedEventBody::new(reason.as_str()))
            }
            BackendEvent::Output { text, category } => Event::new(events::OUTPUT)
                .with_body(OutputEventBody {
                    category,
                    output: text,
                }),
            BackendEvent::Terminated => {
                session.lock().await.stop();
                state.lock().await.phase = Phase::Terminated;
                outbound
                    .send(ProtocolMessage::Event(Event::new(events::TERMINATED)))
                    .await
                    .debug_ok("IDE writer closed");
                break;
            }
        };
        outbound
            .send(ProtocolMessage::Event(message))
            .await
            .debug_ok("IDE writer closed");
    }
    debug!("Event pump finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::path::PathBuf;
    use tempfile::TempDir;

    struct Harness {
        adapter: DebugAdapter,
        messages: mpsc::Receiver<ProtocolMessage>,
        seq: i64,
        _dir: TempDir,
        program: PathBuf,
    }

    impl Harness {
        fn new(source: &str) -> Self {
            Self::with_config(source, "txt", Config::default())
        }

        fn with_config(source: &str, extension: &str, mut config: Config) -> Self {
            config.script.tick_interval_ms = 1;
            let dir = TempDir::new().unwrap();
            let program = dir.path().join(format!("demo.{}", extension));
            std::fs::write(&program, source).unwrap();
            let program = normalize_path(&program);
            let (tx, messages) = mpsc::channel(1024);
            Self {
                adapter: DebugAdapter::new(Arc::new(config), tx, Span::none()),
                messages,
                seq: 0,
                _dir: dir,
                program,
            }
        }

        async fn request(&mut self, command: &str, arguments: Value) -> Response {
            self.seq += 1;
            let request = Request::new(self.seq, command).with_arguments(arguments);
            self.adapter.handle_request(request).await;
            match self.next().await {
                ProtocolMessage::Response(response) => {
                    assert_eq!(response.command, command);
                    response
                }
                other => panic!("expected {} response, got {:?}", command, other),
            }
        }

        async fn next(&mut self) -> ProtocolMessage {
            tokio::time::timeout(Duration::from_secs(5), self.messages.recv())
                .await
                .expect("timed out waiting for message")
                .expect("outbound closed")
        }

        async fn next_event(&mut self) -> Event {
            match self.next().await {
                ProtocolMessage::Event(event) => event,
                other => panic!("expected event, got {:?}", other),
            }
        }

        /// Collect events up to and including the first `name` event.
        async fn events_until(&mut self, name: &str) -> Vec<Event> {
            let mut seen = Vec::new();
            loop {
                let event = self.next_event().await;
                let done = event.event == name;
                seen.push(event);
                if done {
                    return seen;
                }
            }
        }

        async fn no_more_messages(&mut self) {
            tokio::time::sleep(Duration::from_millis(50)).await;
            assert!(
                self.messages.try_recv().is_err(),
                "unexpected message after the session ended"
            );
        }

        async fn initialize(&mut self) {
            let response = self.request(requests::INITIALIZE, json!({})).await;
            assert!(response.success);
            assert_eq!(self.next_event().await.event, events::INITIALIZED);
        }

        async fn launch(&mut self, stop_on_entry: bool, breakpoints: &[u32]) {
            self.initialize().await;
            let program = self.program.display().to_string();
            if !breakpoints.is_empty() {
                let response = self
                    .request(
                        requests::SET_BREAKPOINTS,
                        json!({"source": {"path": program}, "lines": breakpoints}),
                    )
                    .await;
                assert!(response.success);
            }
            let response = self
                .request(
                    requests::LAUNCH,
                    json!({"program": program, "stopOnEntry": stop_on_entry}),
                )
                .await;
            assert!(response.success, "launch failed: {:?}", response.message);
            let response = self.request(requests::CONFIGURATION_DONE, json!({})).await;
            assert!(response.success);
        }
    }

    fn outputs(events: &[Event]) -> Vec<String> {
        events
            .iter()
            .filter(|e| e.event == events::OUTPUT)
            .filter_map(|e| e.body.as_ref()?.get("output")?.as_str().map(String::from))
            .collect()
    }

    fn stop_reason(event: &Event) -> &str {
        event
            .body
            .as_ref()
            .and_then(|b| b.get("reason"))
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    // ========================================================================
    // Phase gating
    // ========================================================================

    #[tokio::test]
    async fn test_requests_before_initialize_are_rejected() {
        let mut h = Harness::new("a\n");
        let response = h.request(requests::THREADS, json!({})).await;
        assert!(!response.success);
        assert_eq!(response.message.as_deref(), Some(messages::NOT_INITIALIZED));
        assert_eq!(h.adapter.phase().await, Phase::Uninitialized);
    }

    #[tokio::test]
    async fn test_initialize_advertises_capabilities() {
        let mut h = Harness::new("a\n");
        let response = h.request(requests::INITIALIZE, json!({"adapterID": "stepwise"})).await;
        let body = response.body.unwrap();
        assert_eq!(body["supportsConfigurationDoneRequest"], true);
        assert_eq!(body["supportsStepBack"], false);
        assert_eq!(body["supportsSetVariable"], false);
        assert_eq!(h.next_event().await.event, events::INITIALIZED);

        // Second initialize answers again without another initialized event
        let response = h.request(requests::INITIALIZE, json!({})).await;
        assert!(response.success);
        h.no_more_messages().await;
        assert_eq!(h.adapter.phase().await, Phase::Initialized);
    }

    #[tokio::test]
    async fn test_disconnect_without_launch() {
        let mut h = Harness::new("a\n");
        h.initialize().await;
        h.seq += 1;
        let keep_going = h
            .adapter
            .handle_request(Request::new(h.seq, requests::DISCONNECT))
            .await;
        assert!(!keep_going);
        match h.next().await {
            ProtocolMessage::Response(r) => assert!(r.success),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(h.next_event().await.event, events::TERMINATED);
        h.no_more_messages().await;
    }

    #[tokio::test]
    async fn test_unknown_command_is_an_error() {
        let mut h = Harness::new("a\n");
        h.initialize().await;
        let response = h.request("restartFrame", json!({})).await;
        assert!(!response.success);
    }

    #[tokio::test]
    async fn test_step_before_launch_is_an_error() {
        let mut h = Harness::new("a\n");
        h.initialize().await;
        let response = h.request(requests::NEXT, json!({"threadId": 1})).await;
        assert!(!response.success);
        assert_eq!(
            response.message.as_deref(),
            Some("No program has been launched")
        );
    }

    // ========================================================================
    // Launch
    // ========================================================================

    #[tokio::test]
    async fn test_launch_missing_program_is_an_error_response() {
        let mut h = Harness::new("a\n");
        h.initialize().await;
        let response = h
            .request(requests::LAUNCH, json!({"program": "/definitely/not/here.txt"}))
            .await;
        assert!(!response.success);
        assert!(response.message.unwrap().starts_with("Launch failed"));
        h.no_more_messages().await;
        assert_eq!(h.adapter.phase().await, Phase::Initialized);

        // The session is still usable for a disconnect
        let response = h.request(requests::DISCONNECT, json!({})).await;
        assert!(response.success);
    }

    #[tokio::test]
    async fn test_launch_without_program() {
        let mut h = Harness::new("a\n");
        h.initialize().await;
        let response = h.request(requests::LAUNCH, json!({})).await;
        assert!(!response.success);
        assert!(response.message.unwrap().contains("requires a program"));
    }

    #[tokio::test]
    async fn test_spawn_failure_terminates_once() {
        let mut config = Config::default();
        config.python.interpreter = "/nonexistent/stepwise-python".to_string();
        let mut h = Harness::with_config("x = 1\n", "py", config);
        h.initialize().await;

        let program = h.program.display().to_string();
        let response = h.request(requests::LAUNCH, json!({"program": program})).await;
        assert!(!response.success);
        assert!(response.message.unwrap().starts_with("Failed to start backend"));
        assert_eq!(h.next_event().await.event, events::TERMINATED);
        h.no_more_messages().await;
        assert_eq!(h.adapter.phase().await, Phase::Terminated);

        let response = h.request(requests::THREADS, json!({})).await;
        assert_eq!(response.message.as_deref(), Some(messages::SESSION_TERMINATED));
        let response = h.request(requests::DISCONNECT, json!({})).await;
        assert!(response.success);
        h.no_more_messages().await;
    }

    #[tokio::test]
    async fn test_unknown_backend_name() {
        let mut h = Harness::new("a\n");
        h.initialize().await;
        let program = h.program.display().to_string();
        let response = h
            .request(requests::LAUNCH, json!({"program": program, "backend": "ruby"}))
            .await;
        assert!(!response.success);
        h.no_more_messages().await;
    }

    // ========================================================================
    // Script execution
    // ========================================================================

    #[tokio::test]
    async fn test_runs_to_completion_with_single_terminated() {
        let mut h = Harness::new("one\ntwo\nthree\nfour\nfive\n");
        h.launch(false, &[]).await;

        let seen = h.events_until(events::TERMINATED).await;
        assert_eq!(
            outputs(&seen),
            vec![
                "line 1: one\n",
                "line 2: two\n",
                "line 3: three\n",
                "line 4: four\n",
                "line 5: five\n",
                messages::PROGRAM_COMPLETED,
            ]
        );
        assert_eq!(
            seen.iter().filter(|e| e.event == events::TERMINATED).count(),
            1
        );
        h.no_more_messages().await;
        assert_eq!(h.adapter.phase().await, Phase::Terminated);
    }

    #[tokio::test]
    async fn test_breakpoint_halts_then_continue_runs_halted_line() {
        let mut h = Harness::new("a\nb\nc\nd\ne\n");
        h.launch(false, &[3]).await;

        let seen = h.events_until(events::STOPPED).await;
        assert_eq!(outputs(&seen), vec!["line 1: a\n", "line 2: b\n"]);
        assert_eq!(stop_reason(seen.last().unwrap()), "breakpoint");
        {
            let session = h.adapter.session().lock().await;
            assert_eq!(session.current_line(), 3);
            assert!(!session.is_running());
        }
        assert_eq!(h.adapter.phase().await, Phase::Stopped);

        let response = h.request(requests::CONTINUE, json!({"threadId": 1})).await;
        assert_eq!(response.body.unwrap()["allThreadsContinued"], true);
        let seen = h.events_until(events::TERMINATED).await;
        assert_eq!(
            outputs(&seen),
            vec![
                "line 3: c\n",
                "line 4: d\n",
                "line 5: e\n",
                messages::PROGRAM_COMPLETED
            ]
        );
    }

    #[tokio::test]
    async fn test_breakpoints_are_replaced_not_merged() {
        let mut h = Harness::new("1\n2\n3\n4\n5\n6\n7\n8\n");
        h.initialize().await;
        let program = h.program.display().to_string();
        h.request(
            requests::SET_BREAKPOINTS,
            json!({"source": {"path": program}, "lines": [3, 5]}),
        )
        .await;
        let response = h
            .request(
                requests::SET_BREAKPOINTS,
                json!({"source": {"path": program}, "breakpoints": [{"line": 7}]}),
            )
            .await;
        let body = response.body.unwrap();
        assert_eq!(body["breakpoints"][0]["line"], 7);
        assert_eq!(body["breakpoints"][0]["verified"], true);

        h.request(requests::LAUNCH, json!({"program": program})).await;
        h.request(requests::CONFIGURATION_DONE, json!({})).await;

        let seen = h.events_until(events::STOPPED).await;
        assert_eq!(outputs(&seen).len(), 6);
        assert_eq!(h.adapter.session().lock().await.current_line(), 7);
    }

    #[tokio::test]
    async fn test_duplicate_breakpoint_lines_act_as_a_set() {
        let mut h = Harness::new("a\nb\nc\nd\ne\n");
        h.launch(false, &[2, 2, 4]).await;

        let seen = h.events_until(events::STOPPED).await;
        assert_eq!(outputs(&seen), vec!["line 1: a\n"]);
        h.request(requests::CONTINUE, json!({})).await;
        let seen = h.events_until(events::STOPPED).await;
        assert_eq!(outputs(&seen), vec!["line 2: b\n", "line 3: c\n"]);
        assert_eq!(h.adapter.session().lock().await.current_line(), 4);
    }

    #[tokio::test]
    async fn test_breakpoint_verification_against_program_length() {
        let mut h = Harness::new("a\nb\nc\n");
        h.initialize().await;
        let program = h.program.display().to_string();
        h.request(requests::LAUNCH, json!({"program": program})).await;

        let response = h
            .request(
                requests::SET_BREAKPOINTS,
                json!({"source": {"path": program}, "lines": [2, 9]}),
            )
            .await;
        let body = response.body.unwrap();
        assert_eq!(body["breakpoints"][0]["verified"], true);
        assert_eq!(body["breakpoints"][1]["verified"], false);

        let response = h
            .request(
                requests::SET_BREAKPOINTS,
                json!({"source": {"path": "relative/elsewhere.txt"}, "lines": [400]}),
            )
            .await;
        assert_eq!(response.body.unwrap()["breakpoints"][0]["verified"], true);
    }

    #[tokio::test]
    async fn test_execution_waits_for_configuration_done() {
        let mut h = Harness::new("a\nb\n");
        h.initialize().await;
        let program = h.program.display().to_string();
        h.request(requests::LAUNCH, json!({"program": program})).await;
        h.no_more_messages().await;
        assert_eq!(h.adapter.phase().await, Phase::Launched);

        h.request(requests::CONFIGURATION_DONE, json!({})).await;
        let seen = h.events_until(events::TERMINATED).await;
        assert_eq!(outputs(&seen).len(), 3);
    }

    #[tokio::test]
    async fn test_configuration_done_before_launch() {
        let mut h = Harness::new("a\n");
        h.initialize().await;
        h.request(requests::CONFIGURATION_DONE, json!({})).await;
        h.no_more_messages().await;

        let program = h.program.display().to_string();
        h.request(requests::LAUNCH, json!({"program": program})).await;
        let seen = h.events_until(events::TERMINATED).await;
        assert_eq!(outputs(&seen), vec!["line 1: a\n", messages::PROGRAM_COMPLETED]);
    }

    // ========================================================================
    // Stepping and inspection
    // ========================================================================

    #[tokio::test]
    async fn test_stop_on_entry_then_step() {
        let mut h = Harness::new("alpha\nbeta\n");
        h.launch(true, &[]).await;

        let entry = h.next_event().await;
        assert_eq!(entry.event, events::STOPPED);
        assert_eq!(stop_reason(&entry), "entry");
        assert_eq!(entry.body.as_ref().unwrap()["threadId"], 1);

        let response = h.request(requests::STACK_TRACE, json!({"threadId": 1})).await;
        let body = response.body.unwrap();
        assert_eq!(body["totalFrames"], 1);
        assert_eq!(body["stackFrames"][0]["line"], 1);
        assert_eq!(body["stackFrames"][0]["column"], 1);

        h.request(requests::NEXT, json!({"threadId": 1})).await;
        let seen = h.events_until(events::STOPPED).await;
        assert_eq!(outputs(&seen), vec!["step 1: alpha\n"]);
        assert_eq!(stop_reason(seen.last().unwrap()), "step");

        let response = h
            .request(requests::EVALUATE, json!({"expression": "line"}))
            .await;
        assert_eq!(response.body.unwrap()["result"], "2");
        let response = h
            .request(requests::EVALUATE, json!({"expression": "len(text)"}))
            .await;
        assert_eq!(response.body.unwrap()["result"], "4");
        let response = h
            .request(requests::EVALUATE, json!({"expression": "1 + 1"}))
            .await;
        assert!(response.success);
        assert_eq!(
            response.body.unwrap()["result"],
            format!("{}: 1 + 1", messages::UNSUPPORTED_EXPRESSION)
        );

        h.request(requests::STEP_IN, json!({"threadId": 1})).await;
        h.events_until(events::STOPPED).await;
        h.request(requests::STEP_OUT, json!({"threadId": 1})).await;
        let seen = h.events_until(events::TERMINATED).await;
        assert_eq!(outputs(&seen), vec![messages::PROGRAM_COMPLETED]);
    }

    #[tokio::test]
    async fn test_threads_scopes_and_variables() {
        let mut h = Harness::new("first\nsecond\n");
        h.launch(true, &[]).await;
        h.events_until(events::STOPPED).await;

        let response = h.request(requests::THREADS, json!({})).await;
        let body = response.body.unwrap();
        assert_eq!(body["threads"][0]["id"], 1);
        assert_eq!(body["threads"][0]["name"], defaults::THREAD_NAME);

        let response = h.request(requests::SCOPES, json!({"frameId": 1})).await;
        let reference = response.body.unwrap()["scopes"][0]["variablesReference"]
            .as_i64()
            .unwrap();
        let response = h
            .request(requests::VARIABLES, json!({"variablesReference": reference}))
            .await;
        let body = response.body.unwrap();
        let names: Vec<_> = body["variables"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v["name"].as_str().unwrap().to_string())
            .collect();
        assert!(names.contains(&"line".to_string()));
        assert!(names.contains(&"text".to_string()));
    }

    #[tokio::test]
    async fn test_pause_halts_running_program() {
        let mut config = Config::default();
        config.script.tick_interval_ms = 1;
        let source: String = (1..=10_000).map(|n| format!("line {}\n", n)).collect();
        let mut h = Harness::with_config(&source, "txt", config);
        h.launch(false, &[]).await;
        assert_eq!(h.next_event().await.event, events::OUTPUT);

        let response = h.request(requests::PAUSE, json!({"threadId": 1})).await;
        assert!(response.success);
        let seen = h.events_until(events::STOPPED).await;
        assert_eq!(stop_reason(seen.last().unwrap()), "pause");
        assert!(!h.adapter.session().lock().await.is_running());
        assert_eq!(h.adapter.phase().await, Phase::Stopped);
    }

    // ========================================================================
    // Termination
    // ========================================================================

    #[tokio::test]
    async fn test_terminate_is_idempotent() {
        let mut h = Harness::new("a\nb\n");
        h.launch(true, &[]).await;
        h.events_until(events::STOPPED).await;

        let response = h.request(requests::TERMINATE, json!({})).await;
        assert!(response.success);
        assert_eq!(h.next_event().await.event, events::TERMINATED);

        let response = h.request(requests::TERMINATE, json!({})).await;
        assert!(response.success);
        let response = h.request(requests::NEXT, json!({})).await;
        assert_eq!(response.message.as_deref(), Some(messages::SESSION_TERMINATED));
        let response = h.request(requests::DISCONNECT, json!({})).await;
        assert!(response.success);
        h.no_more_messages().await;
    }

    #[tokio::test]
    async fn test_shutdown_flushes_terminated() {
        let mut h = Harness::new("a\nb\n");
        h.launch(true, &[]).await;
        h.events_until(events::STOPPED).await;

        h.adapter.shutdown().await;
        assert_eq!(h.next_event().await.event, events::TERMINATED);
        h.no_more_messages().await;
    }
}
