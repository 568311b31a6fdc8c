//! Cryptographic building blocks for pairing.
//!
//! - **`context`** – [`CryptoContext`](context::CryptoContext): the random
//!   source and signature algorithm, created once and passed explicitly to
//!   everything that needs them.
//! - **`identity`** – the server's long-lived P-256 keypair and its
//!   self-signed certificate.
//! - **`key_exchange`** – ECDH agreement plus the pairing-code nonce, and the
//!   AES-256-GCM channel built from them.
//! - **`pairing_code`** – the short human-presentable code shown on the
//!   server and typed on the client.

pub mod context;
pub mod identity;
pub mod key_exchange;
pub mod pairing_code;
