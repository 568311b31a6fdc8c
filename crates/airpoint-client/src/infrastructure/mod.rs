//! Infrastructure layer for the client.
//!
//! - **`discovery`** – UDP listener turning advertisement datagrams into
//!   records.
//! - **`connection`** – TCP session paired with one server.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `airpoint_core`, but MUST NOT be imported by the `application` layer.

pub mod connection;
pub mod discovery;
