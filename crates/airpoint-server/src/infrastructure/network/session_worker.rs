//! Per-connection session worker.
//!
//! # Protocol
//!
//! ```text
//! client                                   server
//! ──────                                   ──────
//! <base64 SPKI public key>\n      ──►      pair_with(code, key)
//! <base64 ciphertext>\n           ──►      decrypt → handler
//!                                 ◄──      <base64 ciphertext>\n   (optional reply)
//! ...
//! ```
//!
//! The pairing code never crosses the wire; the server uses the code that was
//! live when the connection was accepted.
//!
//! # States
//!
//! `Handshake → Serving → Closing`, with `Handshake → Closing` when the key is
//! unusable, the peer hangs up, or the handshake times out.  Every wait on
//! the socket, reads and reply writes alike, is bounded by the poll period so
//! the stop flag is checked at least once per period; a stop is therefore
//! observed within one period and the worker's timeout budget is sized from
//! it.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use airpoint_core::protocol::{ChannelError, LineChannel};
use airpoint_core::{DecryptionError, EncryptionError, HandshakeError, KeyExchangeEngine};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::application::lifecycle::{budget_for, SessionState, StatusCell, StopFlag, Stoppable};
use crate::application::session_handler::SessionHandler;
use crate::application::session_registry::{SessionEntry, SessionRegistry};

/// Why a session ended abnormally.
///
/// None of these escape the session's own task.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeError),

    #[error("peer sent no public key within {0:?}")]
    HandshakeTimeout(Duration),

    #[error("peer closed the connection during the handshake")]
    ClosedDuringHandshake,

    #[error("message could not be decrypted: {0}")]
    Decryption(#[from] DecryptionError),

    #[error("reply could not be encrypted: {0}")]
    Encryption(#[from] EncryptionError),

    #[error("transport error: {0}")]
    Transport(#[from] ChannelError),
}

/// How a session ended when it ended cleanly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The stop flag was observed.
    Stopped,
    /// The peer closed the connection between messages.
    PeerClosed,
}

/// Timing shared by every session the acceptor spawns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTiming {
    /// Longest single wait on the socket before re-checking the stop flag.
    pub poll: Duration,
    /// Longest time a new connection may take to send its public key.
    pub handshake_timeout: Duration,
}

enum Inbound {
    Line(String),
    Closed,
    Stopped,
}

/// Worker serving one accepted connection.
pub struct SessionWorker {
    peer: SocketAddr,
    engine: Arc<KeyExchangeEngine>,
    pairing_code: String,
    handler: Arc<dyn SessionHandler>,
    registry: SessionRegistry,
    timing: SessionTiming,
    stop: StopFlag,
    state: StatusCell<SessionState>,
    entry: SessionEntry,
}

impl SessionWorker {
    pub fn new(
        peer: SocketAddr,
        engine: Arc<KeyExchangeEngine>,
        pairing_code: String,
        handler: Arc<dyn SessionHandler>,
        registry: SessionRegistry,
        timing: SessionTiming,
    ) -> Self {
        let stop = StopFlag::new();
        let state = StatusCell::new(SessionState::Handshake);
        let entry = SessionEntry::new(peer, stop.clone(), state.clone(), budget_for(timing.poll));
        Self {
            peer,
            engine,
            pairing_code,
            handler,
            registry,
            timing,
            stop,
            state,
            entry,
        }
    }

    /// Control handle to register before the worker runs.
    pub fn entry(&self) -> &SessionEntry {
        &self.entry
    }

    /// Serves `stream` until stopped, disconnected, or failed, then releases
    /// it, publishes [`SessionState::Closing`], and removes its own registry
    /// entry.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] describing an abnormal end.  The error has
    /// already been logged; callers may ignore it.
    pub async fn run<S>(self, stream: S) -> Result<CloseReason, SessionError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut channel = LineChannel::new(stream);
        let outcome = self.serve(&mut channel).await;
        match &outcome {
            Ok(reason) => info!(peer = %self.peer, ?reason, "session closed"),
            Err(e) => warn!(peer = %self.peer, "session terminated: {e}"),
        }

        if let Err(e) = channel.shutdown().await {
            debug!(peer = %self.peer, "shutdown after close failed: {e}");
        }
        drop(channel);

        self.state.set(SessionState::Closing);
        self.handler.on_closed(self.peer);
        self.registry.remove_session(&self.peer, self.entry.id());
        outcome
    }

    async fn serve<S>(&self, channel: &mut LineChannel<S>) -> Result<CloseReason, SessionError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        self.state.set(SessionState::Handshake);
        let deadline = Instant::now() + self.timing.handshake_timeout;
        let peer_key = match self.next_line(channel, Some(deadline)).await? {
            Inbound::Line(key) => key,
            Inbound::Closed => return Err(SessionError::ClosedDuringHandshake),
            Inbound::Stopped => return Ok(CloseReason::Stopped),
        };

        let pairing = self.engine.pair_with(&self.pairing_code, &peer_key)?;
        self.state.set(SessionState::Serving);
        self.handler.on_paired(self.peer);
        info!(peer = %self.peer, "session paired");

        loop {
            let line = match self.next_line(channel, None).await? {
                Inbound::Line(line) => line,
                Inbound::Closed => return Ok(CloseReason::PeerClosed),
                Inbound::Stopped => return Ok(CloseReason::Stopped),
            };

            let plaintext = pairing.decrypt_from_base64(&line)?;
            debug!(peer = %self.peer, len = plaintext.len(), "message decrypted");

            if let Some(reply) = self.handler.on_message(self.peer, &plaintext) {
                let sealed = pairing.encrypt_to_base64(&reply)?;
                if !self.send_reply(channel, &sealed).await? {
                    return Ok(CloseReason::Stopped);
                }
            }
        }
    }

    /// Sends one line, re-checking the stop flag every poll period while the
    /// peer is not reading.  Returns `false` if the stop flag won.
    ///
    /// The same write future is polled across periods, so a partly written
    /// line is never restarted.
    async fn send_reply<S>(
        &self,
        channel: &mut LineChannel<S>,
        line: &str,
    ) -> Result<bool, SessionError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let send = channel.send_line(line);
        tokio::pin!(send);
        loop {
            if self.stop.is_set() {
                return Ok(false);
            }
            match tokio::time::timeout(self.timing.poll, &mut send).await {
                Err(_) => continue,
                Ok(result) => return result.map(|()| true).map_err(SessionError::from),
            }
        }
    }

    /// Waits for the next line, re-checking the stop flag every poll period.
    async fn next_line<S>(
        &self,
        channel: &mut LineChannel<S>,
        deadline: Option<Instant>,
    ) -> Result<Inbound, SessionError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        loop {
            if self.stop.is_set() {
                return Ok(Inbound::Stopped);
            }

            let wait = match deadline {
                Some(deadline) => {
                    let left = deadline.saturating_duration_since(Instant::now());
                    if left.is_zero() {
                        return Err(SessionError::HandshakeTimeout(self.timing.handshake_timeout));
                    }
                    left.min(self.timing.poll)
                }
                None => self.timing.poll,
            };

            match tokio::time::timeout(wait, channel.recv_line()).await {
                Err(_) => continue,
                Ok(Ok(Some(line))) => return Ok(Inbound::Line(line)),
                Ok(Ok(None)) => return Ok(Inbound::Closed),
                Ok(Err(e)) => return Err(e.into()),
            }
        }
    }
}

impl Stoppable for SessionWorker {
    fn stop(&self) {
        self.stop.stop();
    }

    fn clear_stop(&self) {
        self.stop.clear();
    }

    fn timeout_budget(&self) -> Duration {
        self.entry.timeout_budget()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
