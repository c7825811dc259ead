//! Node inspector backend
//!
//! Launches `node --inspect-brk=<host>:<port> <program>`, picks the
//! websocket endpoint off the child's stderr and drives the program over
//! the inspector protocol. Call frames come from the last
//! `Debugger.paused` event, so this is the one backend with a real stack.

mod cdp;

pub use cdp::{CdpClient, CdpEvent};

use super::process::ProcessHandle;
use super::{
    evaluate_builtin, Backend, BackendContext, BackendKind, EntryGate, EventSink, LaunchTarget,
    StepKind, StopReason,
};
use crate::constants::{cdp as methods, defaults};
use crate::error::{Error, Result};
use crate::framing::pump_lines;
use crate::protocol::{OutputCategory, Scope, Source, StackFrame, Variable};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use stepwise_config::constants::DEFAULT_INSPECTOR_MAX_RETRY_INTERVAL_MS;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

const EVENT_CHANNEL_CAPACITY: usize = 256;
const LINE_CHANNEL_CAPACITY: usize = 256;

/// Stderr lines node prints around the inspector session
const INSPECTOR_CHATTER: &[&str] = &[
    "For help, see:",
    "Debugger attached.",
    "Waiting for the debugger to disconnect",
];

/// What the backend knows while the program is paused
#[derive(Debug, Default)]
struct PausedState {
    call_frames: Vec<Value>,
    /// variablesReference -> remote objectId, valid until the next resume
    objects: Vec<String>,
    /// Reason to report for the next pause that hit no breakpoint
    expected: Option<StopReason>,
}

impl PausedState {
    fn reference_for(&mut self, object_id: &str) -> i64 {
        if let Some(pos) = self.objects.iter().position(|id| id == object_id) {
            return pos as i64 + 1;
        }
        self.objects.push(object_id.to_string());
        self.objects.len() as i64
    }

    fn object_for(&self, reference: i64) -> Option<&str> {
        usize::try_from(reference - 1)
            .ok()
            .and_then(|idx| self.objects.get(idx))
            .map(String::as_str)
    }

    fn clear(&mut self) {
        self.call_frames.clear();
        self.objects.clear();
    }
}

pub struct InspectorBackend {
    ctx: BackendContext,
    client: Mutex<Option<Arc<CdpClient>>>,
    process: Mutex<Option<ProcessHandle>>,
    paused: Arc<Mutex<PausedState>>,
    entry: Arc<Mutex<EntryGate>>,
    breakpoint_ids: Mutex<HashMap<PathBuf, Vec<String>>>,
}

impl InspectorBackend {
    pub fn new(ctx: BackendContext) -> Self {
        Self {
            ctx,
            client: Mutex::new(None),
            process: Mutex::new(None),
            paused: Arc::new(Mutex::new(PausedState::default())),
            entry: Arc::new(Mutex::new(EntryGate::default())),
            breakpoint_ids: Mutex::new(HashMap::new()),
        }
    }

    /// Connect to an inspector endpoint and enable the domains we use.
    ///
    /// Returns the task translating inspector events.
    pub async fn attach(&self, url: &str) -> Result<JoinHandle<()>> {
        let config = &self.ctx.config;
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let client = Arc::new(
            CdpClient::connect(
                url,
                event_tx,
                Duration::from_millis(config.relay.request_timeout_ms),
                Duration::from_millis(config.inspector.connect_timeout_ms),
                Duration::from_millis(config.inspector.retry_interval_ms),
                Duration::from_millis(DEFAULT_INSPECTOR_MAX_RETRY_INTERVAL_MS),
            )
            .await?,
        );

        let translator = EventTranslator {
            ctx: self.ctx.clone(),
            client: client.clone(),
            paused: self.paused.clone(),
            entry: self.entry.clone(),
        };
        let events = tokio::spawn(translator.run(event_rx));

        client.call(methods::RUNTIME_ENABLE, json!({})).await?;
        client.call(methods::DEBUGGER_ENABLE, json!({})).await?;
        *self.client.lock().await = Some(client);
        Ok(events)
    }

    async fn client(&self) -> Result<Arc<CdpClient>> {
        self.client.lock().await.clone().ok_or(Error::NotLaunched)
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        self.client().await?.call(method, params).await
    }

    async fn resume_with(&self, method: &str, expected: Option<StopReason>) -> Result<()> {
        self.ctx.session.lock().await.start();
        {
            let mut paused = self.paused.lock().await;
            paused.clear();
            paused.expected = expected;
        }
        self.call(method, json!({})).await.map(|_| ())
    }
}

/// Spawn node and wait for it to announce its websocket endpoint.
///
/// Returns the process, the endpoint, and the output forwarding tasks.
async fn launch_node(
    ctx: &BackendContext,
    target: &LaunchTarget,
) -> Result<(ProcessHandle, String, Vec<JoinHandle<()>>)> {
    let inspector = &ctx.config.inspector;
    let args = vec![
        format!("--inspect-brk={}:{}", inspector.host, inspector.port),
        target.program.display().to_string(),
    ];
    let (handle, pipes) = ProcessHandle::spawn(
        "inspector",
        &inspector.node,
        &args,
        target.program.parent(),
        Duration::from_millis(ctx.config.relay.shutdown_timeout_ms),
    )?;

    let (out_tx, out_rx) = mpsc::channel::<String>(LINE_CHANNEL_CAPACITY);
    tokio::spawn(pump_lines(pipes.stdout, out_tx, "node stdout"));
    let stdout_forwarder = tokio::spawn(forward_stdout(
        out_rx,
        ctx.sink.clone(),
        inspector.forward_console,
    ));

    let (err_tx, mut err_rx) = mpsc::channel::<String>(LINE_CHANNEL_CAPACITY);
    tokio::spawn(pump_lines(pipes.stderr, err_tx, "node stderr"));
    let (url_tx, url_rx) = oneshot::channel::<String>();
    let sink = ctx.sink.clone();
    let stderr_forwarder = tokio::spawn(async move {
        let mut url_tx = Some(url_tx);
        while let Some(line) = err_rx.recv().await {
            if let Some(url) = listening_url(&line) {
                if let Some(tx) = url_tx.take() {
                    let _ = tx.send(url.to_string());
                }
                continue;
            }
            if INSPECTOR_CHATTER.iter().any(|c| line.starts_with(c)) {
                debug!("node: {}", line);
                continue;
            }
            sink.output(format!("{}\n", line), OutputCategory::Stderr).await;
        }
    });

    let wait = Duration::from_millis(inspector.connect_timeout_ms);
    let url = match tokio::time::timeout(wait, url_rx).await {
        Ok(Ok(url)) => url,
        Ok(Err(_)) => {
            handle.kill().await;
            return Err(Error::Spawn(
                "node exited before announcing its inspector endpoint".to_string(),
            ));
        }
        Err(_) => {
            handle.kill().await;
            return Err(Error::Spawn(format!(
                "node did not announce an inspector endpoint within {}ms",
                inspector.connect_timeout_ms
            )));
        }
    };
    info!(%url, pid = ?handle.pid(), "Node inspector listening");
    Ok((handle, url, vec![stdout_forwarder, stderr_forwarder]))
}

/// Extract the websocket URL from node's "Debugger listening on ws://..." line.
fn listening_url(line: &str) -> Option<&str> {
    line.trim().strip_prefix(methods::LISTENING_PREFIX)
        .map(str::trim)
        .filter(|url| url.starts_with("ws://") || url.starts_with("wss://"))
}

/// Forward node's stdout. With console forwarding on, `console.log` output
/// already arrives through the inspector, so the pipe is only drained.
async fn forward_stdout(mut lines: mpsc::Receiver<String>, sink: EventSink, forward_console: bool) {
    while let Some(line) = lines.recv().await {
        if forward_console {
            debug!("node stdout: {}", line);
        } else {
            sink.output(format!("{}\n", line), OutputCategory::Stdout).await;
        }
    }
}

/// Convert a script URL reported by the inspector into a file path.
fn url_to_path(url: &str) -> String {
    url.strip_prefix("file://").unwrap_or(url).to_string()
}

/// Regex matching the script URL of `file` however node spells its prefix.
fn breakpoint_url_regex(file: &Path) -> String {
    format!("{}$", regex::escape(&file.display().to_string()))
}

/// Render a remote object the way a debugger console would.
fn describe_remote(object: &Value) -> String {
    if let Some(description) = object.get("description").and_then(Value::as_str) {
        return description.to_string();
    }
    match object.get("value") {
        Some(Value::String(s)) => s.clone(),
        Some(value) => value.to_string(),
        None => object
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or("undefined")
            .to_string(),
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Turns inspector events into backend events
struct EventTranslator {
    ctx: BackendContext,
    client: Arc<CdpClient>,
    paused: Arc<Mutex<PausedState>>,
    entry: Arc<Mutex<EntryGate>>,
}

impl EventTranslator {
    async fn run(self, mut events: mpsc::Receiver<CdpEvent>) {
        while let Some(event) = events.recv().await {
            match event.method.as_str() {
                methods::EVENT_PAUSED => self.on_paused(event.params).await,
                methods::EVENT_RESUMED => self.paused.lock().await.clear(),
                methods::EVENT_CONSOLE_API_CALLED => self.on_console(&event.params).await,
                methods::EVENT_EXECUTION_CONTEXT_DESTROYED => {
                    // node --inspect-brk waits for us to hang up once the program ends
                    info!("Program finished, closing inspector session");
                    self.client.close().await;
                }
                other => trace!(method = other, "Unhandled inspector event"),
            }
        }
        debug!("Inspector event stream ended");
    }

    async fn on_paused(&self, params: Value) {
        let call_frames = params
            .get("callFrames")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let line = call_frames
            .first()
            .and_then(|f| f.pointer("/location/lineNumber"))
            .and_then(Value::as_u64)
            .map(|n| n as u32 + 1);
        let hit_breakpoint = params
            .get("hitBreakpoints")
            .and_then(Value::as_array)
            .is_some_and(|hits| !hits.is_empty());
        let break_on_start =
            params.get("reason").and_then(Value::as_str) == Some(methods::REASON_BREAK_ON_START);

        let expected = {
            let mut paused = self.paused.lock().await;
            paused.call_frames = call_frames;
            paused.objects.clear();
            paused.expected.take()
        };

        if break_on_start {
            let decision = self.entry.lock().await.arrive(line);
            match decision {
                Ok(None) => trace!("Holding entry stop until run"),
                Ok(Some(stop_on_entry)) => {
                    release_entry(&self.ctx, &self.client, &self.paused, stop_on_entry, line).await
                }
                Err(()) => self.ctx.sink.stopped(StopReason::Entry, line).await,
            }
            return;
        }

        let reason = if hit_breakpoint {
            StopReason::Breakpoint
        } else {
            expected.unwrap_or(StopReason::Breakpoint)
        };
        self.ctx.sink.stopped(reason, line).await;
    }

    async fn on_console(&self, params: &Value) {
        if !self.ctx.config.inspector.forward_console {
            return;
        }
        let text = params
            .get("args")
            .and_then(Value::as_array)
            .map(|args| args.iter().map(describe_remote).collect::<Vec<_>>().join(" "))
            .unwrap_or_default();
        let kind = params.get("type").and_then(Value::as_str).unwrap_or_default();
        if matches!(kind, "error" | "warning" | "assert" | "trace") {
            // node writes these to stderr, which is forwarded already
            trace!(kind, "Console call left to the stderr pipe: {}", text);
            return;
        }
        self.ctx
            .sink
            .output(format!("{}\n", text), OutputCategory::Stdout)
            .await;
    }
}

async fn release_entry(
    ctx: &BackendContext,
    client: &CdpClient,
    paused: &Mutex<PausedState>,
    stop_on_entry: bool,
    line: Option<u32>,
) {
    if stop_on_entry {
        ctx.sink.stopped(StopReason::Entry, line).await;
        return;
    }
    paused.lock().await.clear();
    if let Err(e) = client.call(methods::DEBUGGER_RESUME, json!({})).await {
        warn!("Failed to start node program: {}", e);
    }
}

#[async_trait]
impl Backend for InspectorBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Inspector
    }

    async fn start(&self, target: &LaunchTarget) -> Result<()> {
        let (handle, url, forwarders) = launch_node(&self.ctx, target).await?;
        let events = match self.attach(&url).await {
            Ok(events) => events,
            Err(e) => {
                handle.kill().await;
                return Err(match e {
                    Error::Spawn(_) => e,
                    other => Error::Spawn(other.to_string()),
                });
            }
        };

        let mut readers = forwarders;
        readers.push(events);
        handle.watch(self.ctx.sink.clone(), readers).await;
        *self.process.lock().await = Some(handle);
        Ok(())
    }

    async fn set_breakpoints(&self, file: &Path, lines: &BTreeSet<u32>) -> Result<()> {
        let client = self.client().await?;
        let mut ids = self.breakpoint_ids.lock().await;

        for id in ids.remove(file).unwrap_or_default() {
            if let Err(e) = client
                .call(methods::DEBUGGER_REMOVE_BREAKPOINT, json!({"breakpointId": id}))
                .await
            {
                debug!("Failed to remove breakpoint {}: {}", id, e);
            }
        }

        let url_regex = breakpoint_url_regex(file);
        let mut new_ids = Vec::with_capacity(lines.len());
        for line in lines {
            let result = client
                .call(
                    methods::DEBUGGER_SET_BREAKPOINT_BY_URL,
                    json!({"lineNumber": line.saturating_sub(1), "urlRegex": url_regex}),
                )
                .await?;
            if let Some(id) = result.get("breakpointId").and_then(Value::as_str) {
                new_ids.push(id.to_string());
            }
        }
        ids.insert(file.to_path_buf(), new_ids);
        Ok(())
    }

    async fn run(&self, stop_on_entry: bool) -> Result<()> {
        if !stop_on_entry {
            self.ctx.session.lock().await.start();
        }
        let held = self.entry.lock().await.release(stop_on_entry);
        match held {
            Some(line) => {
                let client = self.client().await?;
                release_entry(&self.ctx, &client, &self.paused, stop_on_entry, line).await;
            }
            None => {
                self.call(methods::RUNTIME_RUN_IF_WAITING, json!({})).await?;
            }
        }
        Ok(())
    }

    async fn resume(&self) -> Result<()> {
        self.resume_with(methods::DEBUGGER_RESUME, None).await
    }

    async fn step(&self, kind: StepKind) -> Result<()> {
        let method = match kind {
            StepKind::Over => methods::DEBUGGER_STEP_OVER,
            StepKind::In => methods::DEBUGGER_STEP_INTO,
            StepKind::Out => methods::DEBUGGER_STEP_OUT,
        };
        self.resume_with(method, Some(StopReason::Step)).await
    }

    async fn pause(&self) -> Result<()> {
        self.paused.lock().await.expected = Some(StopReason::Pause);
        self.call(methods::DEBUGGER_PAUSE, json!({})).await.map(|_| ())
    }

    async fn stack_frames(&self) -> Result<Vec<StackFrame>> {
        let paused = self.paused.lock().await;
        Ok(paused
            .call_frames
            .iter()
            .enumerate()
            .map(|(index, frame)| {
                let name = frame
                    .get("functionName")
                    .and_then(Value::as_str)
                    .filter(|n| !n.is_empty())
                    .unwrap_or("(anonymous)");
                let url = frame.get("url").and_then(Value::as_str).unwrap_or_default();
                let line = frame
                    .pointer("/location/lineNumber")
                    .and_then(Value::as_i64)
                    .unwrap_or(0);
                let column = frame
                    .pointer("/location/columnNumber")
                    .and_then(Value::as_i64)
                    .unwrap_or(0);
                StackFrame {
                    id: index as i64 + 1,
                    name: name.to_string(),
                    source: (!url.is_empty())
                        .then(|| Source::from_path(Path::new(&url_to_path(url)))),
                    line: line + 1,
                    column: column + 1,
                }
            })
            .collect())
    }

    async fn scopes(&self, frame_id: i64) -> Result<Vec<Scope>> {
        let mut paused = self.paused.lock().await;
        let chain = usize::try_from(frame_id - 1)
            .ok()
            .and_then(|idx| paused.call_frames.get(idx))
            .and_then(|frame| frame.get("scopeChain"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut scopes = Vec::with_capacity(chain.len());
        for scope in chain {
            let Some(object_id) = scope.pointer("/object/objectId").and_then(Value::as_str) else {
                continue;
            };
            let kind = scope.get("type").and_then(Value::as_str).unwrap_or("scope");
            let reference = paused.reference_for(object_id);
            let mut entry = Scope::new(capitalize(kind), reference);
            if kind == "local" {
                entry = entry.hint("locals");
            }
            scopes.push(entry.expensive(kind == "global"));
        }
        Ok(scopes)
    }

    async fn variables(&self, reference: i64) -> Result<Vec<Variable>> {
        let object_id = {
            let paused = self.paused.lock().await;
            match paused.object_for(reference) {
                Some(id) => id.to_string(),
                None => return Ok(Vec::new()),
            }
        };

        let result = self
            .call(
                methods::RUNTIME_GET_PROPERTIES,
                json!({"objectId": object_id, "ownProperties": true}),
            )
            .await?;

        let properties = result
            .get("result")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let mut paused = self.paused.lock().await;
        let mut variables = Vec::with_capacity(properties.len());
        for property in properties {
            let (Some(name), Some(value)) = (
                property.get("name").and_then(Value::as_str),
                property.get("value"),
            ) else {
                continue;
            };
            let mut variable = Variable::new(name, describe_remote(value));
            variable.var_type = value.get("type").and_then(Value::as_str).map(String::from);
            if let Some(child) = value.get("objectId").and_then(Value::as_str) {
                variable.variables_reference = paused.reference_for(child);
            }
            variables.push(variable);
        }
        Ok(variables)
    }

    async fn evaluate(&self, expression: &str, frame_id: Option<i64>) -> Result<String> {
        let call_frame_id = {
            let paused = self.paused.lock().await;
            let index = frame_id.unwrap_or(defaults::FRAME_ID) - 1;
            usize::try_from(index)
                .ok()
                .and_then(|idx| paused.call_frames.get(idx))
                .and_then(|frame| frame.get("callFrameId"))
                .and_then(Value::as_str)
                .map(String::from)
        };

        if let Some(call_frame_id) = call_frame_id {
            match self
                .call(
                    methods::DEBUGGER_EVALUATE_ON_CALL_FRAME,
                    json!({"callFrameId": call_frame_id, "expression": expression}),
                )
                .await
            {
                Ok(result) => {
                    if let Some(object) = result.get("result") {
                        return Ok(describe_remote(object));
                    }
                }
                Err(e) => debug!("Inspector evaluate failed: {}", e),
            }
        }
        Ok(evaluate_builtin(&self.ctx.session, expression).await)
    }

    async fn kill(&self) {
        let client = self.client.lock().await.take();
        if let Some(client) = client {
            client.close().await;
        }
        if let Some(process) = self.process.lock().await.as_ref() {
            process.kill().await;
        }
    }
}
