//! Paired, encrypted session with a server.
//!
//! Pairing needs three things the client already has before it connects:
//! its own identity (held by the [`KeyExchangeEngine`]), the server's public
//! key (from the advertisement), and the pairing code the user read off the
//! server.  The only handshake traffic is the client's public key; both
//! sides then derive the same key and nonce on their own.

use std::net::SocketAddr;
use std::time::Duration;

use airpoint_core::protocol::{ChannelError, LineChannel};
use airpoint_core::{
    AdvertisementRecord, DecryptionError, EncryptionError, HandshakeError, KeyExchangeEngine,
    PairingContext,
};
use thiserror::Error;
use tokio::net::TcpStream;
use tracing::{debug, info};

/// Error type for a client session.
#[derive(Debug, Error)]
pub enum ClientConnectionError {
    /// The TCP connection could not be established.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// The advertisement carries no address to connect to.
    #[error("advertisement has no source address")]
    NoAddress,

    #[error("pairing failed: {0}")]
    Handshake(#[from] HandshakeError),

    #[error("message could not be encrypted: {0}")]
    Encryption(#[from] EncryptionError),

    /// The server's reply did not decrypt; usually a wrong pairing code.
    #[error("reply could not be decrypted: {0}")]
    Decryption(#[from] DecryptionError),

    #[error("transport error: {0}")]
    Transport(#[from] ChannelError),

    #[error("no reply within {0:?}")]
    Timeout(Duration),

    /// The server closed the connection.
    #[error("server closed the connection")]
    Closed,
}

/// Client end of a paired session.
pub struct PairedConnection {
    server: SocketAddr,
    channel: LineChannel<TcpStream>,
    pairing: PairingContext,
}

impl PairedConnection {
    /// Connects to `server`, sends the client's public key, and derives the
    /// session key from `server_key_base64` and `pairing_code`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientConnectionError::Handshake`] if the server key is
    /// unusable (checked before connecting), and
    /// [`ClientConnectionError::Connect`] / [`ClientConnectionError::Transport`]
    /// for network failures.
    pub async fn connect(
        server: SocketAddr,
        engine: &KeyExchangeEngine,
        server_key_base64: &str,
        pairing_code: &str,
    ) -> Result<Self, ClientConnectionError> {
        let pairing = engine.pair_with(pairing_code, server_key_base64)?;

        let stream = TcpStream::connect(server)
            .await
            .map_err(|source| ClientConnectionError::Connect {
                addr: server,
                source,
            })?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!("could not disable Nagle: {e}");
        }

        let mut channel = LineChannel::new(stream);
        channel.send_line(&engine.public_key_base64()).await?;
        info!(%server, "paired session opened");

        Ok(Self {
            server,
            channel,
            pairing,
        })
    }

    /// Connects to the server described by a discovered advertisement.
    ///
    /// # Errors
    ///
    /// Returns [`ClientConnectionError::NoAddress`] for a record that was not
    /// received over the network, otherwise see [`PairedConnection::connect`].
    pub async fn connect_advertised(
        record: &AdvertisementRecord,
        session_port: u16,
        engine: &KeyExchangeEngine,
        pairing_code: &str,
    ) -> Result<Self, ClientConnectionError> {
        let ip = record.address().ok_or(ClientConnectionError::NoAddress)?;
        Self::connect(
            SocketAddr::new(ip, session_port),
            engine,
            record.public_key(),
            pairing_code,
        )
        .await
    }

    pub fn server(&self) -> SocketAddr {
        self.server
    }

    /// Local address of the connection, as the server sees it.
    ///
    /// # Errors
    ///
    /// Returns the socket error if the address is unavailable.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.channel.get_ref().local_addr()
    }

    /// Encrypts and sends one message.
    ///
    /// # Errors
    ///
    /// Returns [`ClientConnectionError::Encryption`] or
    /// [`ClientConnectionError::Transport`].
    pub async fn send(&mut self, text: &str) -> Result<(), ClientConnectionError> {
        let sealed = self.pairing.encrypt_to_base64(text)?;
        self.channel.send_line(&sealed).await?;
        debug!(server = %self.server, len = text.len(), "message sent");
        Ok(())
    }

    /// Receives and decrypts the next message.
    ///
    /// Returns `Ok(None)` when the server has closed the connection.
    ///
    /// # Errors
    ///
    /// Returns [`ClientConnectionError::Decryption`] or
    /// [`ClientConnectionError::Transport`].
    pub async fn recv(&mut self) -> Result<Option<String>, ClientConnectionError> {
        match self.channel.recv_line().await? {
            Some(line) => Ok(Some(self.pairing.decrypt_from_base64(&line)?)),
            None => Ok(None),
        }
    }

    /// Sends `text` and waits up to `wait` for the reply.
    ///
    /// # Errors
    ///
    /// Returns [`ClientConnectionError::Timeout`] if no reply arrives,
    /// [`ClientConnectionError::Closed`] if the server hangs up instead, and
    /// the errors of [`PairedConnection::send`] / [`PairedConnection::recv`].
    pub async fn request(
        &mut self,
        text: &str,
        wait: Duration,
    ) -> Result<String, ClientConnectionError> {
        self.send(text).await?;
        match tokio::time::timeout(wait, self.recv()).await {
            Err(_) => Err(ClientConnectionError::Timeout(wait)),
            Ok(reply) => reply?.ok_or(ClientConnectionError::Closed),
        }
    }

    /// Closes the write side so the server sees an orderly hang-up.
    ///
    /// # Errors
    ///
    /// Returns [`ClientConnectionError::Transport`] if the shutdown fails.
    pub async fn close(mut self) -> Result<(), ClientConnectionError> {
        self.channel.shutdown().await?;
        info!(server = %self.server, "paired session closed");
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
