//! The record a server broadcasts to announce itself, and its datagram codec.
//!
//! Wire format: a UTF-8 JSON object, zero-padded to exactly
//! [`ADVERTISEMENT_LEN`] bytes.
//!
//! ```text
//! {"server_pub_key":"MFkwEwYHKoZIzj0CAQYIKoZIzj0DAQcDQgAE...","server_info":"studio-pc"}\0\0\0...
//! ```
//!
//! The address is never carried in the payload; the receiver binds it from
//! the datagram's source.  The `stopped` and `selected` flags are local state
//! on either end and are not serialized either.
//!
//! Two records are the same server when their addresses match, whatever their
//! keys, labels, or flags say.  Client-side lists rely on this to collapse
//! repeated broadcasts into one entry.

use std::hash::{Hash, Hasher};
use std::net::IpAddr;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Exact size of a discovery datagram in bytes.
pub const ADVERTISEMENT_LEN: usize = 600;

/// Errors produced while encoding or decoding an advertisement.
#[derive(Debug, Error, PartialEq)]
pub enum AdvertisementError {
    /// The serialized record does not fit in one datagram.
    #[error("advertisement is {len} bytes, limit is {ADVERTISEMENT_LEN}")]
    TooLarge { len: usize },

    /// The datagram held nothing but padding.
    #[error("advertisement datagram is empty")]
    Empty,

    /// The payload is not the expected JSON object.
    #[error("malformed advertisement: {0}")]
    Malformed(String),

    /// The advertised public key is not valid base64.
    #[error("advertised public key is not valid base64")]
    InvalidKey,
}

/// A server's announcement of itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvertisementRecord {
    /// Base64 SubjectPublicKeyInfo of the server identity.
    #[serde(rename = "server_pub_key")]
    public_key: String,

    /// Human-readable host label shown in client server lists.
    #[serde(rename = "server_info")]
    host_label: String,

    #[serde(skip)]
    address: Option<IpAddr>,

    #[serde(skip)]
    stopped: bool,

    #[serde(skip)]
    selected: bool,
}

impl AdvertisementRecord {
    pub fn new(public_key_base64: impl Into<String>, host_label: impl Into<String>) -> Self {
        Self {
            public_key: public_key_base64.into(),
            host_label: host_label.into(),
            address: None,
            stopped: false,
            selected: false,
        }
    }

    pub fn public_key(&self) -> &str {
        &self.public_key
    }

    /// Decoded SubjectPublicKeyInfo bytes of the advertised key.
    ///
    /// # Errors
    ///
    /// Returns [`AdvertisementError::InvalidKey`] if the key is not base64.
    pub fn public_key_der(&self) -> Result<Vec<u8>, AdvertisementError> {
        STANDARD
            .decode(&self.public_key)
            .map_err(|_| AdvertisementError::InvalidKey)
    }

    pub fn host_label(&self) -> &str {
        &self.host_label
    }

    pub fn address(&self) -> Option<IpAddr> {
        self.address
    }

    pub fn set_address(&mut self, address: IpAddr) {
        self.address = Some(address);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Marks the broadcaster owning this record as stopped.
    pub fn set_stopped(&mut self) {
        self.stopped = true;
    }

    pub fn clear_stopped(&mut self) {
        self.stopped = false;
    }

    pub fn is_selected(&self) -> bool {
        self.selected
    }

    pub fn set_selected(&mut self, selected: bool) {
        self.selected = selected;
    }

    /// Serializes the record into a zero-padded datagram of exactly
    /// [`ADVERTISEMENT_LEN`] bytes.
    ///
    /// # Errors
    ///
    /// Returns [`AdvertisementError::TooLarge`] if the JSON form is longer
    /// than a datagram.
    pub fn encode_datagram(&self) -> Result<Vec<u8>, AdvertisementError> {
        let json =
            serde_json::to_vec(self).map_err(|e| AdvertisementError::Malformed(e.to_string()))?;
        if json.len() > ADVERTISEMENT_LEN {
            return Err(AdvertisementError::TooLarge { len: json.len() });
        }
        let mut datagram = json;
        datagram.resize(ADVERTISEMENT_LEN, 0);
        Ok(datagram)
    }

    /// Parses a received datagram and binds `source` as the record's address.
    ///
    /// Trailing NUL padding is ignored, so datagrams shorter than
    /// [`ADVERTISEMENT_LEN`] are accepted.
    ///
    /// # Errors
    ///
    /// Returns [`AdvertisementError`] if the datagram is empty, oversized,
    /// not the expected JSON object, or carries a key that is not base64.
    pub fn decode_datagram(datagram: &[u8], source: IpAddr) -> Result<Self, AdvertisementError> {
        if datagram.len() > ADVERTISEMENT_LEN {
            return Err(AdvertisementError::TooLarge {
                len: datagram.len(),
            });
        }
        let end = datagram
            .iter()
            .rposition(|&b| b != 0)
            .map_or(0, |last| last + 1);
        if end == 0 {
            return Err(AdvertisementError::Empty);
        }

        let mut record: Self = serde_json::from_slice(&datagram[..end])
            .map_err(|e| AdvertisementError::Malformed(e.to_string()))?;
        record.public_key_der()?;
        record.address = Some(source);
        Ok(record)
    }
}

impl PartialEq for AdvertisementRecord {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
    }
}

impl Eq for AdvertisementRecord {}

impl Hash for AdvertisementRecord {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.address.hash(state);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
