//! Network infrastructure for the server.
//!
//! # Sub-modules
//!
//! - **`broadcaster`** – Sends the advertisement datagram to the discovery
//!   port on every tick until stopped.
//!
//! - **`acceptor`** – Accepts session connections, registers each one, and
//!   spawns its session worker.
//!
//! - **`session_worker`** – Runs the pairing handshake on one connection, then
//!   relays encrypted messages to the session handler until stopped or
//!   disconnected.

pub mod acceptor;
pub mod broadcaster;
pub mod session_worker;

use std::net::SocketAddr;

use thiserror::Error;

/// Error type for socket setup.
#[derive(Debug, Error)]
pub enum NetworkError {
    /// A socket could not be bound.
    #[error("bind failed on {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// A socket option could not be applied.
    #[error("failed to configure socket: {0}")]
    Configure(#[source] std::io::Error),
}

/// Returns `true` for OS timeout / would-block errors that should be retried.
pub(crate) fn is_transient(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::WouldBlock
            | std::io::ErrorKind::TimedOut
            | std::io::ErrorKind::Interrupted
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::ConnectionReset
    )
}
