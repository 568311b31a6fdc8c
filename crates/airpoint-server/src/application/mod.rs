//! Application layer for the server.
//!
//! Nothing here opens a socket or touches the file system.  The types in
//! this layer are the shared vocabulary the network workers and the
//! orchestrator agree on.
//!
//! # Sub-modules
//!
//! - **`lifecycle`** – Stop flags, the [`lifecycle::Stoppable`] contract and
//!   observable worker status.
//!
//! - **`session_registry`** – Live mapping from peer address to the control
//!   handle of its session worker.
//!
//! - **`session_handler`** – Trait consuming decrypted session messages.
//!
//! - **`pairing_code`** – The pairing code currently offered to users.

pub mod lifecycle;
pub mod pairing_code;
pub mod session_handler;
pub mod session_registry;
