//! Newline framing for the session transport.
//!
//! Wire format:
//! ```text
//! <ascii payload>\n
//! ```
//! A `\r` immediately before the `\n` is stripped on decode, so peers that
//! write CRLF are accepted.  Lines longer than [`MAX_LINE_LEN`] bytes
//! (excluding the terminator) are rejected.

use thiserror::Error;

/// Longest line accepted in either direction, excluding the terminator.
pub const MAX_LINE_LEN: usize = 16 * 1024;

/// Errors that can occur while framing or unframing a line.
#[derive(Debug, Error, PartialEq)]
pub enum FramingError {
    /// The line exceeds [`MAX_LINE_LEN`].
    #[error("line of {len} bytes exceeds the {MAX_LINE_LEN}-byte limit")]
    LineTooLong { len: usize },

    /// A line to send contains a line terminator of its own.
    #[error("line payload contains a line terminator")]
    EmbeddedNewline,

    /// The received line is not valid UTF-8.
    #[error("line is not valid UTF-8")]
    InvalidUtf8,
}

/// Frames `line` for sending by appending `\n`.
///
/// # Errors
///
/// Returns [`FramingError::EmbeddedNewline`] if `line` contains `\n` or `\r`,
/// and [`FramingError::LineTooLong`] if it exceeds [`MAX_LINE_LEN`].
///
/// # Examples
///
/// ```rust
/// use airpoint_core::protocol::{decode_line, encode_line};
///
/// let bytes = encode_line("ping").unwrap();
/// let (line, consumed) = decode_line(&bytes).unwrap().unwrap();
/// assert_eq!(line, "ping");
/// assert_eq!(consumed, bytes.len());
/// ```
pub fn encode_line(line: &str) -> Result<Vec<u8>, FramingError> {
    if line.len() > MAX_LINE_LEN {
        return Err(FramingError::LineTooLong { len: line.len() });
    }
    if line.bytes().any(|b| b == b'\n' || b == b'\r') {
        return Err(FramingError::EmbeddedNewline);
    }
    let mut buf = Vec::with_capacity(line.len() + 1);
    buf.extend_from_slice(line.as_bytes());
    buf.push(b'\n');
    Ok(buf)
}

/// Decodes one line from the beginning of `buf`.
///
/// Returns `Ok(None)` when `buf` does not yet hold a complete line, otherwise
/// the line (terminator stripped) and the number of bytes consumed including
/// the terminator, so the caller can advance its read cursor.
///
/// # Errors
///
/// Returns [`FramingError::LineTooLong`] as soon as more than
/// [`MAX_LINE_LEN`] bytes are buffered without a terminator, or when the
/// complete line is too long, and [`FramingError::InvalidUtf8`] for
/// non-UTF-8 content.
pub fn decode_line(buf: &[u8]) -> Result<Option<(String, usize)>, FramingError> {
    let Some(newline) = buf.iter().position(|&b| b == b'\n') else {
        if buf.len() > MAX_LINE_LEN + 1 {
            return Err(FramingError::LineTooLong { len: buf.len() });
        }
        return Ok(None);
    };

    let mut line = &buf[..newline];
    if let [head @ .., b'\r'] = line {
        line = head;
    }
    if line.len() > MAX_LINE_LEN {
        return Err(FramingError::LineTooLong { len: line.len() });
    }

    let text = std::str::from_utf8(line).map_err(|_| FramingError::InvalidUtf8)?;
    Ok(Some((text.to_string(), newline + 1)))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_line_appends_newline() {
        assert_eq!(encode_line("abc").unwrap(), b"abc\n");
    }

    #[test]
    fn test_encode_line_rejects_embedded_newline() {
        assert_eq!(encode_line("a\nb"), Err(FramingError::EmbeddedNewline));
        assert_eq!(encode_line("a\rb"), Err(FramingError::EmbeddedNewline));
    }

    #[test]
    fn test_encode_line_rejects_oversized_line() {
        let line = "a".repeat(MAX_LINE_LEN + 1);
        assert_eq!(
            encode_line(&line),
            Err(FramingError::LineTooLong {
                len: MAX_LINE_LEN + 1
            })
        );
    }

    #[test]
    fn test_encode_line_accepts_line_at_limit() {
        let line = "a".repeat(MAX_LINE_LEN);
        assert_eq!(encode_line(&line).unwrap().len(), MAX_LINE_LEN + 1);
    }

    #[test]
    fn test_decode_line_returns_none_for_partial_line() {
        assert_eq!(decode_line(b"MFkwEw").unwrap(), None);
    }

    #[test]
    fn test_decode_line_returns_none_for_empty_buffer() {
        assert_eq!(decode_line(b"").unwrap(), None);
    }

    #[test]
    fn test_decode_line_strips_carriage_return() {
        // Arrange
        let buf = b"hello\r\nrest";

        // Act
        let (line, consumed) = decode_line(buf).unwrap().unwrap();

        // Assert
        assert_eq!(line, "hello");
        assert_eq!(consumed, 7);
    }

    #[test]
    fn test_decode_line_consumes_only_first_line() {
        // Arrange
        let buf = b"one\ntwo\n";

        // Act
        let (first, n) = decode_line(buf).unwrap().unwrap();
        let (second, m) = decode_line(&buf[n..]).unwrap().unwrap();

        // Assert
        assert_eq!(first, "one");
        assert_eq!(second, "two");
        assert_eq!(n + m, buf.len());
    }

    #[test]
    fn test_decode_line_accepts_empty_line() {
        assert_eq!(decode_line(b"\n").unwrap(), Some((String::new(), 1)));
    }

    #[test]
    fn test_decode_line_rejects_unterminated_overflow() {
        let buf = vec![b'a'; MAX_LINE_LEN + 2];
        assert!(matches!(
            decode_line(&buf),
            Err(FramingError::LineTooLong { .. })
        ));
    }

    #[test]
    fn test_decode_line_rejects_terminated_overflow() {
        let mut buf = vec![b'a'; MAX_LINE_LEN + 1];
        buf.push(b'\n');
        assert_eq!(
            decode_line(&buf),
            Err(FramingError::LineTooLong {
                len: MAX_LINE_LEN + 1
            })
        );
    }

    #[test]
    fn test_decode_line_rejects_invalid_utf8() {
        assert_eq!(decode_line(&[0xFF, 0xFE, b'\n']), Err(FramingError::InvalidUtf8));
    }
}
