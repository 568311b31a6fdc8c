//! Async line channel over any tokio byte stream.
//!
//! [`LineChannel::recv_line`] is cancel-safe: bytes already read from the
//! stream are kept in the channel's own buffer, so wrapping a call in
//! `tokio::time::timeout` and retrying never drops a partial line.

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::framing::{decode_line, encode_line, FramingError};

const READ_CHUNK: usize = 4096;

/// Errors raised by a [`LineChannel`].
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("framing error: {0}")]
    Framing(#[from] FramingError),

    #[error("stream I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer closed the stream in the middle of a line.
    #[error("stream closed with {0} bytes of an unterminated line buffered")]
    TruncatedLine(usize),
}

/// Line-oriented reader and writer wrapping a byte stream.
#[derive(Debug)]
pub struct LineChannel<S> {
    stream: S,
    buf: Vec<u8>,
}

impl<S> LineChannel<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            buf: Vec::with_capacity(READ_CHUNK),
        }
    }

    /// Receives the next line, without its terminator.
    ///
    /// Returns `Ok(None)` when the peer closed the stream cleanly between
    /// lines.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Framing`] for an oversized or non-UTF-8 line,
    /// [`ChannelError::TruncatedLine`] if the stream ends mid-line, and
    /// [`ChannelError::Io`] for transport failures.
    pub async fn recv_line(&mut self) -> Result<Option<String>, ChannelError> {
        loop {
            if let Some((line, consumed)) = decode_line(&self.buf)? {
                self.buf.drain(..consumed);
                return Ok(Some(line));
            }

            let mut chunk = [0u8; READ_CHUNK];
            let n = self.stream.read(&mut chunk).await?;
            if n == 0 {
                return if self.buf.is_empty() {
                    Ok(None)
                } else {
                    Err(ChannelError::TruncatedLine(self.buf.len()))
                };
            }
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }

    /// Sends `line` followed by a newline and flushes the stream.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Framing`] if the line cannot be framed and
    /// [`ChannelError::Io`] if the write fails.
    pub async fn send_line(&mut self, line: &str) -> Result<(), ChannelError> {
        let bytes = encode_line(line)?;
        self.stream.write_all(&bytes).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Shuts down the write side of the stream.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Io`] if the shutdown fails.
    pub async fn shutdown(&mut self) -> Result<(), ChannelError> {
        self.stream.shutdown().await?;
        Ok(())
    }

    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::duplex;

    #[tokio::test]
    async fn test_send_then_recv_line_across_duplex() {
        // Arrange
        let (a, b) = duplex(1024);
        let mut left = LineChannel::new(a);
        let mut right = LineChannel::new(b);

        // Act
        left.send_line("hello").await.unwrap();
        let line = right.recv_line().await.unwrap();

        // Assert
        assert_eq!(line.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn test_recv_line_splits_coalesced_lines() {
        let (mut raw, b) = duplex(1024);
        let mut channel = LineChannel::new(b);
        raw.write_all(b"one\r\ntwo\n").await.unwrap();

        assert_eq!(channel.recv_line().await.unwrap().as_deref(), Some("one"));
        assert_eq!(channel.recv_line().await.unwrap().as_deref(), Some("two"));
    }

    #[tokio::test]
    async fn test_recv_line_returns_none_on_clean_close() {
        let (raw, b) = duplex(64);
        let mut channel = LineChannel::new(b);
        drop(raw);
        assert!(channel.recv_line().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_recv_line_reports_truncated_line_on_close() {
        let (mut raw, b) = duplex(64);
        let mut channel = LineChannel::new(b);
        raw.write_all(b"half").await.unwrap();
        drop(raw);
        assert!(matches!(
            channel.recv_line().await,
            Err(ChannelError::TruncatedLine(4))
        ));
    }

    #[tokio::test]
    async fn test_recv_line_survives_timeout_cancellation() {
        // Arrange: the first half of a line arrives before the timeout
        let (mut raw, b) = duplex(64);
        let mut channel = LineChannel::new(b);
        raw.write_all(b"par").await.unwrap();

        // Act: the pending read is cancelled, then the rest arrives
        let first = tokio::time::timeout(Duration::from_millis(50), channel.recv_line()).await;
        raw.write_all(b"tial\n").await.unwrap();
        let second = channel.recv_line().await.unwrap();

        // Assert
        assert!(first.is_err(), "first call must time out");
        assert_eq!(second.as_deref(), Some("partial"));
    }

    #[tokio::test]
    async fn test_send_line_rejects_embedded_newline() {
        let (a, _b) = duplex(64);
        let mut channel = LineChannel::new(a);
        assert!(matches!(
            channel.send_line("a\nb").await,
            Err(ChannelError::Framing(FramingError::EmbeddedNewline))
        ));
    }
}
