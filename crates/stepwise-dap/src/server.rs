//! Serving debug sessions
//!
//! A session is one IDE connection: frames are read from the IDE, fed to
//! a [`DebugAdapter`] one request at a time, and everything going back is
//! written by the transport's writer task. Two front doors exist:
//!
//! - stdio, the mode IDEs use when they spawn the adapter themselves
//! - a TCP listener serving sessions one after another, optionally
//!   staying up after a client disconnects

use crate::adapter::DebugAdapter;
use crate::error::{Error, Result};
use crate::protocol::ProtocolMessage;
use crate::transport::{read_message, spawn_writer};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use stepwise_config::{Config, DEFAULT_LOG_PAYLOAD_PREVIEW_LEN, DEFAULT_OUTBOUND_CHANNEL_CAPACITY};
use stepwise_logging::{debug, error, info, trace, warn};
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::net::TcpListener;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// How a connection ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// At least one request was served and the IDE went away or disconnected
    Completed,
    /// The peer closed without sending a request (port probe, health check)
    NoSession,
}

/// Serve one session over an arbitrary byte stream pair.
pub async fn serve_session<R, W>(reader: R, writer: W, config: Arc<Config>) -> Result<SessionOutcome>
where
    R: AsyncRead + Send + Unpin,
    W: AsyncWrite + Send + Unpin + 'static,
{
    let id = NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed);
    let span = tracing::info_span!("session", id);
    let shutdown_timeout = Duration::from_millis(config.relay.shutdown_timeout_ms);

    let (outbound, writer_task) = spawn_writer(writer, DEFAULT_OUTBOUND_CHANNEL_CAPACITY);
    let adapter = DebugAdapter::new(config, outbound, span.clone());
    let mut reader = BufReader::new(reader);
    let mut established = false;

    let result = loop {
        match read_message(&mut reader).await {
            Ok(Some(ProtocolMessage::Request(request))) => {
                established = true;
                trace!(
                    parent: &span,
                    command = %request.command,
                    arguments = %preview(request.arguments.as_ref()),
                    "IDE request"
                );
                if !adapter.handle_request(request).await {
                    debug!(parent: &span, "IDE disconnected");
                    break Ok(());
                }
            }
            Ok(Some(other)) => {
                warn!(parent: &span, seq = other.seq(), "Ignoring non-request message from IDE");
            }
            Ok(None) => {
                debug!(parent: &span, "IDE closed the stream");
                break Ok(());
            }
            Err(Error::InvalidMessage(e)) => {
                // The frame was consumed, the stream is still in sync
                warn!(parent: &span, "Dropping malformed frame: {}", e);
            }
            Err(e) => break Err(e),
        }
    };

    adapter.shutdown().await;
    drop(adapter);
    if tokio::time::timeout(shutdown_timeout, writer_task)
        .await
        .is_err()
    {
        warn!(parent: &span, "Writer did not drain within {:?}", shutdown_timeout);
    }
    info!(parent: &span, established, "Session ended");

    result.map(|()| {
        if established {
            SessionOutcome::Completed
        } else {
            SessionOutcome::NoSession
        }
    })
}

/// Serve a single session on the process's stdin/stdout.
pub async fn serve_stdio(config: Arc<Config>) -> Result<SessionOutcome> {
    info!("Serving DAP on stdio");
    serve_session(tokio::io::stdin(), tokio::io::stdout(), config).await
}

/// Accept IDE connections on `listener`, one session at a time.
///
/// Without `persist` the first real session ends the server. Connections
/// that never send a request do not count.
pub async fn serve_listener(listener: TcpListener, config: Arc<Config>, persist: bool) -> Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!("Listening for DAP connections on {}", addr);
    }

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                error!(err = %e, "Failed to accept connection");
                continue;
            }
        };
        info!("Client connected from {}", peer);
        stream.set_nodelay(true).ok();
        let (read, write) = stream.into_split();

        match serve_session(read, write, config.clone()).await {
            Ok(SessionOutcome::Completed) => {
                if !persist {
                    info!("Client disconnected, shutting down");
                    return Ok(());
                }
                info!("Client disconnected, waiting for a new connection");
            }
            Ok(SessionOutcome::NoSession) => {
                debug!(%peer, "Connection closed without a DAP session");
            }
            Err(e) => {
                error!(err = %e, "Session error");
                if !persist {
                    return Err(e);
                }
            }
        }
    }
}

/// Shorten request arguments for logging.
fn preview(arguments: Option<&serde_json::Value>) -> String {
    let Some(arguments) = arguments else {
        return String::new();
    };
    let text = arguments.to_string();
    match text.char_indices().nth(DEFAULT_LOG_PAYLOAD_PREVIEW_LEN) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text,
    }
}
