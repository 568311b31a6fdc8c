//! Storage infrastructure for the server.
//!
//! - **`config`** – TOML configuration at the platform config path.
//! - **`identity_store`** – PEM files holding the server's keypair and
//!   certificate.

pub mod config;
pub mod identity_store;
