//! Boundary between the session transport and whatever consumes its messages.
//!
//! A session worker decrypts each inbound line and hands the plaintext to a
//! [`SessionHandler`].  The pointer transformation that turns sensor readings
//! into cursor motion lives behind this trait and is not part of this crate.

use std::net::SocketAddr;

use tracing::{debug, info};

/// Consumer of decrypted session messages.
///
/// Implementations are shared by every session and called from their tasks,
/// so they must be `Send + Sync` and should not block.
#[cfg_attr(test, mockall::automock)]
pub trait SessionHandler: Send + Sync {
    /// Called once the peer has completed the handshake.
    fn on_paired(&self, _peer: SocketAddr) {}

    /// Handles one decrypted message.
    ///
    /// A returned string is encrypted and sent back to the peer.
    fn on_message(&self, peer: SocketAddr, plaintext: &str) -> Option<String>;

    /// Called once after the session has closed, however it ended.
    fn on_closed(&self, _peer: SocketAddr) {}
}

/// Handler that logs every message and answers `ping` with `pong`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHandler;

impl SessionHandler for LoggingHandler {
    fn on_paired(&self, peer: SocketAddr) {
        info!(%peer, "peer paired");
    }

    fn on_message(&self, peer: SocketAddr, plaintext: &str) -> Option<String> {
        debug!(%peer, len = plaintext.len(), "message received");
        (plaintext == "ping").then(|| "pong".to_string())
    }

    fn on_closed(&self, peer: SocketAddr) {
        info!(%peer, "peer session closed");
    }
}
