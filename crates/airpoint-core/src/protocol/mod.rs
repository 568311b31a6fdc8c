//! Session transport framing.
//!
//! The session transport is a stream of newline-terminated lines.  The first
//! line from the client carries its public key; every later line in either
//! direction is a base64 AEAD ciphertext.

pub mod framing;

#[cfg(feature = "io")]
pub mod channel;

pub use framing::{decode_line, encode_line, FramingError, MAX_LINE_LEN};

#[cfg(feature = "io")]
pub use channel::{ChannelError, LineChannel};
