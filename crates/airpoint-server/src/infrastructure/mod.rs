//! Infrastructure layer for the server.
//!
//! Contains OS-facing adapters: the discovery broadcaster, the session
//! acceptor and workers, and file-system storage for configuration and the
//! server identity.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `airpoint_core`, but MUST NOT be imported by the `application` layer.

pub mod network;
pub mod storage;
