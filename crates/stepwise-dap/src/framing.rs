//! Line framing for backend byte streams
//!
//! Backends write newline-delimited messages, but reads hand back
//! arbitrary chunks. [`LineFramer`] keeps the trailing partial line
//! between chunks and yields only complete, non-blank lines. Line text is
//! passed on as written apart from the line ending, so indentation in
//! program output survives.

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tracing::{debug, trace};

const READ_CHUNK_SIZE: usize = 4096;

/// Accumulates text chunks and splits them into complete lines.
#[derive(Debug, Default)]
pub struct LineFramer {
    carry: Vec<u8>,
}

impl LineFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk, returning every line completed by it.
    ///
    /// A trailing `\r` is removed; whitespace-only lines are dropped.
    /// Bytes after the last
    /// `\n` stay buffered until a later chunk completes them. Splitting
    /// on bytes keeps multi-byte characters intact across chunk borders.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.carry.extend_from_slice(chunk);

        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.carry[start..].iter().position(|b| *b == b'\n') {
            let end = start + offset;
            if let Some(line) = complete_line(&self.carry[start..end]) {
                lines.push(line);
            }
            start = end + 1;
        }
        self.carry.drain(..start);
        lines
    }

    /// Bytes held back waiting for a delimiter.
    pub fn pending(&self) -> usize {
        self.carry.len()
    }

    /// Take the unterminated remainder at end of stream.
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.carry);
        complete_line(&rest)
    }
}

fn complete_line(bytes: &[u8]) -> Option<String> {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    let line = String::from_utf8_lossy(bytes);
    if line.trim().is_empty() {
        None
    } else {
        Some(line.into_owned())
    }
}

/// Read `reader` to EOF, sending each complete line to `tx`.
///
/// A final line without a trailing newline is still delivered. Returns
/// when the stream ends, fails, or the receiver is dropped.
pub async fn pump_lines<R>(mut reader: R, tx: mpsc::Sender<String>, label: &'static str)
where
    R: AsyncRead + Unpin,
{
    let mut framer = LineFramer::new();
    let mut buf = vec![0u8; READ_CHUNK_SIZE];

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                debug!("{} read failed: {}", label, e);
                break;
            }
        };
        for line in framer.push(&buf[..n]) {
            trace!("{} line: {}", label, line);
            if tx.send(line).await.is_err() {
                return;
            }
        }
    }

    if let Some(rest) = framer.finish() {
        let _ = tx.send(rest).await;
    }
    debug!("{} stream closed", label);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[test]
    fn test_whole_lines_in_one_chunk() {
        let mut framer = LineFramer::new();
        let lines = framer.push(b"{\"event\":\"stopped\"}\n{\"event\":\"terminated\"}\n");
        assert_eq!(lines, vec![r#"{"event":"stopped"}"#, r#"{"event":"terminated"}"#]);
        assert_eq!(framer.pending(), 0);
    }

    #[test]
    fn test_partial_line_is_carried_over() {
        let mut framer = LineFramer::new();
        assert!(framer.push(b"{\"event\":\"sto").is_empty());
        assert_eq!(framer.pending(), 13);

        let lines = framer.push(b"pped\"}\nhello");
        assert_eq!(lines, vec![r#"{"event":"stopped"}"#]);

        let lines = framer.push(b" world\n");
        assert_eq!(lines, vec!["hello world"]);
    }

    #[test]
    fn test_blank_lines_are_dropped() {
        let mut framer = LineFramer::new();
        let lines = framer.push(b"\n   \r\nx\r\n\n");
        assert_eq!(lines, vec!["x"]);
    }

    #[test]
    fn test_indentation_is_kept() {
        let mut framer = LineFramer::new();
        let lines = framer.push(b"    *\n   ***\r\n  *****  \n");
        assert_eq!(lines, vec!["    *", "   ***", "  *****  "]);

        framer.push(b"\t tail");
        assert_eq!(framer.finish().as_deref(), Some("\t tail"));
    }

    #[test]
    fn test_multibyte_split_across_chunks() {
        let mut framer = LineFramer::new();
        let text = "héllo\n".as_bytes();
        assert!(framer.push(&text[..2]).is_empty());
        assert_eq!(framer.push(&text[2..]), vec!["héllo"]);
    }

    #[test]
    fn test_finish_returns_unterminated_tail() {
        let mut framer = LineFramer::new();
        framer.push(b"a\nb");
        assert_eq!(framer.finish().as_deref(), Some("b"));
        assert!(framer.finish().is_none());
    }

    #[tokio::test]
    async fn test_pump_lines_preserves_order() {
        let (mut writer, reader) = tokio::io::duplex(64);
        let (tx, mut rx) = mpsc::channel(16);
        let pump = tokio::spawn(pump_lines(reader, tx, "test"));

        writer.write_all(b"one\ntw").await.unwrap();
        writer.write_all(b"o\nthree").await.unwrap();
        drop(writer);

        assert_eq!(rx.recv().await.as_deref(), Some("one"));
        assert_eq!(rx.recv().await.as_deref(), Some("two"));
        assert_eq!(rx.recv().await.as_deref(), Some("three"));
        assert!(rx.recv().await.is_none());
        pump.await.unwrap();
    }
}
