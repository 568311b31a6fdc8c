//! # airpoint-core
//!
//! Shared library for AirPoint containing the server identity material, the
//! pairing key exchange, the discovery advertisement record, and the line
//! framing used on the session transport.
//!
//! This crate is used by both the server and client applications.
//! It has no dependencies on OS APIs or network sockets; the optional `io`
//! feature adds an async line channel generic over any tokio stream.
//!
//! # Architecture overview
//!
//! AirPoint lets a handheld client drive the pointer of a desktop server.
//! The server announces itself on the LAN, a human reads a short pairing
//! code off the server and types it on the client, and from then on every
//! message between the two is encrypted under a key both sides derived on
//! their own.
//!
//! - **`crypto`** – The explicit [`CryptoContext`], the persisted server
//!   [`Identity`], the ECDH [`KeyExchangeEngine`] that turns an identity, a
//!   peer key and a pairing code into a [`PairingContext`], and pairing code
//!   generation.
//!
//! - **`discovery`** – The [`AdvertisementRecord`] broadcast by the server and
//!   its fixed-size datagram codec.
//!
//! - **`protocol`** – Newline framing for the session transport, plus the
//!   async `LineChannel` when the `io` feature is enabled.

pub mod crypto;
pub mod discovery;
pub mod protocol;

pub use crypto::{
    context::{CryptoContext, SecureRng},
    identity::{Identity, KeyProvisioningError},
    key_exchange::{
        derive_nonce, DecryptionError, EncryptionError, HandshakeError, KeyExchangeEngine,
        PairingContext,
    },
    pairing_code::generate_pairing_code,
};
pub use discovery::advertisement::{AdvertisementError, AdvertisementRecord, ADVERTISEMENT_LEN};
pub use protocol::framing::{decode_line, encode_line, FramingError, MAX_LINE_LEN};

/// Default TCP port of the session transport.
pub const DEFAULT_SESSION_PORT: u16 = 1234;

/// Default UDP port discovery datagrams are broadcast to.
pub const DEFAULT_DISCOVERY_PORT: u16 = 1235;
