//! Minimal inspector protocol client over a websocket
//!
//! Calls carry an integer `id` and are matched to their replies by a
//! [`Correlator`]; everything without an `id` is an event and goes to
//! the event channel in stream order.

use crate::correlator::Correlator;
use crate::error::{Error, Result};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace, warn};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Asynchronous notification from the inspector
#[derive(Debug, Clone, PartialEq)]
pub struct CdpEvent {
    pub method: String,
    pub params: Value,
}

/// Any frame the inspector sends
#[derive(Debug, Deserialize)]
struct Incoming {
    id: Option<u64>,
    method: Option<String>,
    #[serde(default)]
    params: Value,
    result: Option<Value>,
    error: Option<CdpError>,
}

#[derive(Debug, Deserialize)]
struct CdpError {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

pub struct CdpClient {
    write: Mutex<SplitSink<Socket, Message>>,
    correlator: Arc<Correlator<Value>>,
    reader: JoinHandle<()>,
}

impl CdpClient {
    /// Connect to `url`, retrying with exponential backoff and jitter
    /// until `connect_timeout` elapses.
    pub async fn connect(
        url: &str,
        events: mpsc::Sender<CdpEvent>,
        request_timeout: Duration,
        connect_timeout: Duration,
        retry_interval: Duration,
        max_retry_interval: Duration,
    ) -> Result<Self> {
        use rand::Rng;

        let start = std::time::Instant::now();
        let mut interval_ms = retry_interval.as_millis() as u64;
        let max_interval_ms = max_retry_interval.as_millis() as u64;
        let mut attempt = 0u32;

        loop {
            match tokio_tungstenite::connect_async(url).await {
                Ok((socket, _)) => {
                    debug!(url, attempt, "Connected to inspector");
                    return Ok(Self::from_socket(socket, events, request_timeout));
                }
                Err(e) => {
                    attempt += 1;
                    if start.elapsed() > connect_timeout {
                        return Err(Error::Spawn(format!(
                            "Timeout connecting to inspector at {} after {} attempts: {}",
                            url, attempt, e
                        )));
                    }

                    let jitter_ms = rand::rng().random_range(0..100);
                    let wait_ms = interval_ms.saturating_add(jitter_ms);
                    trace!(
                        "Inspector connection attempt {} failed, retrying in {}ms",
                        attempt,
                        wait_ms
                    );
                    tokio::time::sleep(Duration::from_millis(wait_ms)).await;
                    interval_ms = (interval_ms * 2).min(max_interval_ms);
                }
            }
        }
    }

    /// Wrap an established socket.
    pub fn from_socket(
        socket: Socket,
        events: mpsc::Sender<CdpEvent>,
        request_timeout: Duration,
    ) -> Self {
        let (write, read) = socket.split();
        let correlator = Arc::new(Correlator::new(request_timeout));
        let reader = tokio::spawn(read_loop(read, correlator.clone(), events));
        Self {
            write: Mutex::new(write),
            correlator,
            reader,
        }
    }

    /// Call `method` and wait for its result.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value> {
        debug!(method, "Inspector call");
        self.correlator
            .issue(|id| async move {
                let frame = json!({"id": id, "method": method, "params": params});
                let mut write = self.write.lock().await;
                write.send(Message::Text(frame.to_string().into())).await?;
                Ok(())
            })
            .await
    }

    /// Close the socket. Pending calls fail.
    pub async fn close(&self) {
        let _ = self.write.lock().await.send(Message::Close(None)).await;
        self.correlator.fail_all("Inspector connection closed").await;
    }
}

impl Drop for CdpClient {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn read_loop(
    mut read: SplitStream<Socket>,
    correlator: Arc<Correlator<Value>>,
    events: mpsc::Sender<CdpEvent>,
) {
    while let Some(frame) = read.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                debug!("Inspector socket error: {}", e);
                break;
            }
        };

        let incoming: Incoming = match serde_json::from_str(text.as_str()) {
            Ok(incoming) => incoming,
            Err(e) => {
                warn!("Ignoring malformed inspector frame: {}", e);
                continue;
            }
        };

        match (incoming.id, incoming.method) {
            (Some(id), _) => match incoming.error {
                Some(err) => {
                    let message = format!("{} ({})", err.message, err.code);
                    correlator.reject(id, Error::Protocol(message)).await;
                }
                None => {
                    correlator
                        .resolve(id, incoming.result.unwrap_or(Value::Null))
                        .await;
                }
            },
            (None, Some(method)) => {
                trace!(%method, "Inspector event");
                let event = CdpEvent {
                    method,
                    params: incoming.params,
                };
                if events.send(event).await.is_err() {
                    break;
                }
            }
            (None, None) => debug!("Inspector frame with neither id nor method"),
        }
    }
    correlator.fail_all("Inspector disconnected").await;
    debug!("Inspector reader finished");
}
