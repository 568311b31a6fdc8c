//! Discovery advertisement broadcast by the server.

pub mod advertisement;

pub use advertisement::{AdvertisementError, AdvertisementRecord, ADVERTISEMENT_LEN};
