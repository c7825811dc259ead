//! Content-Length framed transport towards the IDE
//!
//! Incoming frames are read on the session task; outgoing messages are
//! funnelled through one writer task which stamps sequence numbers, so
//! responses and events never interleave mid-frame.

use crate::error::{Error, Result};
use crate::protocol::ProtocolMessage;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

const CONTENT_LENGTH: &str = "Content-Length:";

/// Read one frame body. Returns `Ok(None)` on a clean EOF between frames.
pub async fn read_frame<R>(reader: &mut BufReader<R>) -> Result<Option<String>>
where
    R: AsyncRead + Unpin,
{
    let mut content_length: Option<usize> = None;
    let mut line = String::new();

    loop {
        line.clear();
        let bytes_read = reader.read_line(&mut line).await?;

        if bytes_read == 0 {
            return Ok(None);
        }

        let header = line.trim();
        if header.is_empty() {
            if content_length.is_some() {
                break;
            }
            // Stray blank line between frames
            continue;
        }

        if let Some(length_str) = header.strip_prefix(CONTENT_LENGTH) {
            let length_str = length_str.trim();
            content_length = Some(length_str.parse().map_err(|_| {
                Error::Protocol(format!("Invalid Content-Length: {}", length_str))
            })?);
        }
    }

    let length =
        content_length.ok_or_else(|| Error::Protocol("Missing Content-Length header".into()))?;

    let mut buffer = vec![0u8; length];
    reader.read_exact(&mut buffer).await?;
    let content = String::from_utf8(buffer)?;
    trace!("Received frame: {}", content);
    Ok(Some(content))
}

/// Read and parse one message. Parse failures are returned as
/// `Error::InvalidMessage` with the frame already consumed.
pub async fn read_message<R>(reader: &mut BufReader<R>) -> Result<Option<ProtocolMessage>>
where
    R: AsyncRead + Unpin,
{
    match read_frame(reader).await? {
        Some(content) => Ok(Some(serde_json::from_str(&content)?)),
        None => Ok(None),
    }
}

/// Serialize and write one framed message.
pub async fn write_message<W>(writer: &mut W, message: &ProtocolMessage) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let json = serde_json::to_string(message)?;
    let content = format!("{} {}\r\n\r\n{}", CONTENT_LENGTH, json.len(), json);
    writer.write_all(content.as_bytes()).await?;
    writer.flush().await?;
    trace!("Sent message: {}", json);
    Ok(())
}

/// Handle for queueing messages to the IDE.
pub type Outbound = mpsc::Sender<ProtocolMessage>;

/// Spawn the writer task. Sequence numbers start at 1 and increase by one
/// per message written. The task ends when every `Outbound` is dropped or
/// the IDE stops reading.
pub fn spawn_writer<W>(mut writer: W, capacity: usize) -> (Outbound, JoinHandle<()>)
where
    W: AsyncWrite + Send + Unpin + 'static,
{
    let (tx, mut rx) = mpsc::channel::<ProtocolMessage>(capacity);
    let handle = tokio::spawn(async move {
        let mut seq: i64 = 0;
        while let Some(mut message) = rx.recv().await {
            seq += 1;
            message.set_seq(seq);
            if let Err(e) = write_message(&mut writer, &message).await {
                warn!("Failed to write to IDE, closing writer: {}", e);
                break;
            }
        }
        debug!("Writer task finished after {} messages", seq);
    });
    (tx, handle)
}
