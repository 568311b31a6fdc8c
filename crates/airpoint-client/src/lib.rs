//! airpoint-client library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the binary entry point in `main.rs` share the same module tree.
//!
//! The client:
//!
//! 1. Listens on the discovery port and keeps a deduplicated list of the
//!    servers it hears.
//! 2. Lets the user select one of them.
//! 3. Connects, sends its public key, and derives the session key from the
//!    advertised server key and the pairing code the user typed in.
//! 4. Exchanges encrypted messages with the server.

/// Application layer: the discovered server list.
pub mod application;

/// Infrastructure layer: discovery socket and the paired session.
pub mod infrastructure;
