//! Common test infrastructure for relay integration tests
//!
//! Provides an in-memory IDE: [`DapClient`] drives a real
//! `serve_session` over duplex pipes with Content-Length framing, so the
//! tests exercise the same path an editor does.

#![allow(dead_code)]

use serde_json::Value;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use stepwise_config::Config;
use stepwise_dap::transport::{read_message, write_message};
use stepwise_dap::{serve_session, Event, ProtocolMessage, Request, Response, SessionOutcome};
use tokio::io::{duplex, BufReader, DuplexStream};
use tokio::task::JoinHandle;

const PIPE_CAPACITY: usize = 256 * 1024;
const WAIT: Duration = Duration::from_secs(10);

pub struct DapClient {
    writer: Option<DuplexStream>,
    reader: BufReader<DuplexStream>,
    seq: i64,
    /// Events received while waiting for a response
    backlog: VecDeque<Event>,
    /// Every sequence number the relay stamped, in arrival order
    pub seen_seqs: Vec<i64>,
    server: JoinHandle<stepwise_dap::Result<SessionOutcome>>,
}

impl DapClient {
    pub fn start(config: Config) -> Self {
        let (writer, relay_in) = duplex(PIPE_CAPACITY);
        let (relay_out, reader) = duplex(PIPE_CAPACITY);
        let server = tokio::spawn(serve_session(relay_in, relay_out, Arc::new(config)));
        Self {
            writer: Some(writer),
            reader: BufReader::new(reader),
            seq: 0,
            backlog: VecDeque::new(),
            seen_seqs: Vec::new(),
            server,
        }
    }

    /// Script backend with a fast tick so tests run quickly.
    pub fn start_fast() -> Self {
        let mut config = Config::default();
        config.script.tick_interval_ms = 1;
        Self::start(config)
    }

    async fn read(&mut self) -> ProtocolMessage {
        let message = tokio::time::timeout(WAIT, read_message(&mut self.reader))
            .await
            .expect("timed out waiting for the relay")
            .expect("malformed frame from the relay")
            .expect("relay closed the stream");
        self.seen_seqs.push(message.seq());
        message
    }

    /// Send a request and wait for its response, keeping events for later.
    pub async fn request(&mut self, command: &str, arguments: Value) -> Response {
        self.seq += 1;
        let seq = self.seq;
        let request = Request::new(seq, command).with_arguments(arguments);
        let writer = self.writer.as_mut().expect("client already closed");
        write_message(writer, &ProtocolMessage::Request(request))
            .await
            .expect("relay stopped reading");

        loop {
            match self.read().await {
                ProtocolMessage::Response(response) if response.request_seq == seq => {
                    return response
                }
                ProtocolMessage::Event(event) => self.backlog.push_back(event),
                other => panic!("unexpected message while waiting for {}: {:?}", command, other),
            }
        }
    }

    pub async fn next_event(&mut self) -> Event {
        if let Some(event) = self.backlog.pop_front() {
            return event;
        }
        match self.read().await {
            ProtocolMessage::Event(event) => event,
            other => panic!("expected an event, got {:?}", other),
        }
    }

    /// Events up to and including the first one named `name`.
    pub async fn events_until(&mut self, name: &str) -> Vec<Event> {
        let mut events = Vec::new();
        loop {
            let event = self.next_event().await;
            let done = event.event == name;
            events.push(event);
            if done {
                return events;
            }
        }
    }

    /// Close the IDE side and collect whatever the relay still sends.
    pub async fn finish(mut self) -> (SessionOutcome, Vec<Event>) {
        self.writer.take();
        let mut rest: Vec<Event> = self.backlog.drain(..).collect();
        while let Ok(Ok(Some(message))) =
            tokio::time::timeout(WAIT, read_message(&mut self.reader)).await
        {
            self.seen_seqs.push(message.seq());
            if let ProtocolMessage::Event(event) = message {
                rest.push(event);
            }
        }
        let outcome = tokio::time::timeout(WAIT, self.server)
            .await
            .expect("session did not end")
            .expect("session task panicked")
            .expect("session failed");
        (outcome, rest)
    }

    /// The handshake every IDE performs before launching.
    pub async fn initialize(&mut self) -> Response {
        let response = self
            .request(
                "initialize",
                serde_json::json!({"adapterID": "stepwise", "linesStartAt1": true}),
            )
            .await;
        assert!(response.success);
        let event = self.next_event().await;
        assert_eq!(event.event, "initialized");
        response
    }
}

/// Text of every output event.
pub fn outputs(events: &[Event]) -> Vec<String> {
    events
        .iter()
        .filter(|e| e.event == "output")
        .filter_map(|e| e.body.as_ref()?.get("output")?.as_str().map(String::from))
        .collect()
}

pub fn stop_reason(event: &Event) -> Option<&str> {
    event.body.as_ref()?.get("reason")?.as_str()
}

pub fn count(events: &[Event], name: &str) -> usize {
    events.iter().filter(|e| e.event == name).count()
}

/// Write a program into `dir` and return its canonical path.
pub fn write_program(dir: &Path, name: &str, source: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, source).expect("failed to write test program");
    path.canonicalize().expect("failed to canonicalize test program")
}

/// Whether `tool --version` runs. Tests needing a real interpreter skip
/// themselves when it does not.
pub fn tool_available(tool: &str) -> bool {
    let available = std::process::Command::new(tool)
        .arg("--version")
        .output()
        .map(|out| out.status.success())
        .unwrap_or(false);
    if !available {
        eprintln!("Skipping: {} is not installed", tool);
    }
    available
}
