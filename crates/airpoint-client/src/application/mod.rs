//! Application layer for the client.
//!
//! - **`server_list`** – Servers heard on the discovery port, deduplicated by
//!   address, with a single user selection.

pub mod server_list;
