//! Servers heard on the discovery port.
//!
//! Every datagram is decoded into an [`AdvertisementRecord`] whose address is
//! the datagram's source IP.  Records are deduplicated by address: a second
//! advertisement from the same host refreshes the stored one (key and label
//! may have changed) but keeps the user's selection.  At most one server is
//! selected at a time.
//!
//! A server that has not been heard from for a while is marked stopped
//! rather than dropped, so a list shown to the user does not flicker when a
//! few datagrams are lost.

use std::net::IpAddr;
use std::time::{Duration, Instant};

use airpoint_core::AdvertisementRecord;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ServerListError {
    /// No advertisement has been received from the address.
    #[error("no server discovered at {0}")]
    UnknownServer(IpAddr),

    /// The record carries no source address.
    #[error("advertisement has no source address")]
    MissingAddress,
}

#[derive(Debug, Clone)]
struct Entry {
    record: AdvertisementRecord,
    last_seen: Instant,
}

/// Deduplicated, selectable list of discovered servers in discovery order.
#[derive(Debug, Default)]
pub struct DiscoveredServers {
    entries: Vec<Entry>,
}

impl DiscoveredServers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `record`, or refreshes the entry with the same address.
    ///
    /// Returns `true` if the address had not been seen before.
    ///
    /// # Errors
    ///
    /// Returns [`ServerListError::MissingAddress`] for a record that was not
    /// decoded from a datagram.
    pub fn upsert(&mut self, mut record: AdvertisementRecord) -> Result<bool, ServerListError> {
        if record.address().is_none() {
            return Err(ServerListError::MissingAddress);
        }

        let now = Instant::now();
        if let Some(entry) = self.entries.iter_mut().find(|e| e.record == record) {
            record.set_selected(entry.record.is_selected());
            entry.record = record;
            entry.last_seen = now;
            return Ok(false);
        }

        self.entries.push(Entry {
            record,
            last_seen: now,
        });
        Ok(true)
    }

    /// Marks every server not heard from within `silence` as stopped.
    ///
    /// Returns how many servers were newly marked.
    pub fn mark_silent(&mut self, silence: Duration) -> usize {
        let mut marked = 0;
        for entry in &mut self.entries {
            if !entry.record.is_stopped() && entry.last_seen.elapsed() >= silence {
                entry.record.set_stopped();
                marked += 1;
            }
        }
        marked
    }

    /// Selects the server at `address` and deselects every other one.
    ///
    /// # Errors
    ///
    /// Returns [`ServerListError::UnknownServer`] if no server has been
    /// discovered at `address`; the current selection is kept.
    pub fn select(&mut self, address: IpAddr) -> Result<&AdvertisementRecord, ServerListError> {
        let index = self
            .entries
            .iter()
            .position(|e| e.record.address() == Some(address))
            .ok_or(ServerListError::UnknownServer(address))?;

        for (i, entry) in self.entries.iter_mut().enumerate() {
            entry.record.set_selected(i == index);
        }
        Ok(&self.entries[index].record)
    }

    pub fn selected(&self) -> Option<&AdvertisementRecord> {
        self.entries
            .iter()
            .map(|e| &e.record)
            .find(|r| r.is_selected())
    }

    pub fn get(&self, address: IpAddr) -> Option<&AdvertisementRecord> {
        self.entries
            .iter()
            .map(|e| &e.record)
            .find(|r| r.address() == Some(address))
    }

    /// Removes the server at `address`, if present.
    pub fn remove(&mut self, address: IpAddr) -> Option<AdvertisementRecord> {
        let index = self
            .entries
            .iter()
            .position(|e| e.record.address() == Some(address))?;
        Some(self.entries.remove(index).record)
    }

    pub fn records(&self) -> impl Iterator<Item = &AdvertisementRecord> {
        self.entries.iter().map(|e| &e.record)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn heard(ip: &str, key: &str, label: &str) -> AdvertisementRecord {
        let mut record = AdvertisementRecord::new(key, label);
        record.set_address(ip.parse().unwrap());
        record
    }

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_upsert_deduplicates_by_address() {
        // Arrange
        let mut servers = DiscoveredServers::new();

        // Act
        let first = servers.upsert(heard("192.168.1.10", "a2V5MQ==", "desk")).unwrap();
        let again = servers.upsert(heard("192.168.1.10", "a2V5Mg==", "desk-renamed")).unwrap();
        let other = servers.upsert(heard("192.168.1.11", "a2V5MQ==", "desk")).unwrap();

        // Assert
        assert!(first);
        assert!(!again);
        assert!(other);
        assert_eq!(servers.len(), 2);
    }

    #[test]
    fn test_upsert_refreshes_label_and_keeps_selection() {
        // Arrange
        let mut servers = DiscoveredServers::new();
        servers.upsert(heard("10.0.0.5", "a2V5MQ==", "old")).unwrap();
        servers.select(ip("10.0.0.5")).unwrap();

        // Act
        servers.upsert(heard("10.0.0.5", "a2V5Mg==", "new")).unwrap();

        // Assert
        let record = servers.get(ip("10.0.0.5")).unwrap();
        assert_eq!(record.host_label(), "new");
        assert_eq!(record.public_key(), "a2V5Mg==");
        assert!(record.is_selected());
    }

    #[test]
    fn test_upsert_without_address_is_rejected() {
        let mut servers = DiscoveredServers::new();

        let result = servers.upsert(AdvertisementRecord::new("a2V5MQ==", "nowhere"));

        assert_eq!(result, Err(ServerListError::MissingAddress));
        assert!(servers.is_empty());
    }

    #[test]
    fn test_select_keeps_a_single_selection() {
        // Arrange
        let mut servers = DiscoveredServers::new();
        servers.upsert(heard("10.0.0.1", "a2V5MQ==", "one")).unwrap();
        servers.upsert(heard("10.0.0.2", "a2V5Mg==", "two")).unwrap();

        // Act
        servers.select(ip("10.0.0.1")).unwrap();
        servers.select(ip("10.0.0.2")).unwrap();

        // Assert
        assert_eq!(servers.records().filter(|r| r.is_selected()).count(), 1);
        assert_eq!(servers.selected().unwrap().host_label(), "two");
    }

    #[test]
    fn test_select_unknown_keeps_previous_selection() {
        // Arrange
        let mut servers = DiscoveredServers::new();
        servers.upsert(heard("10.0.0.1", "a2V5MQ==", "one")).unwrap();
        servers.select(ip("10.0.0.1")).unwrap();

        // Act
        let result = servers.select(ip("10.0.0.99"));

        // Assert
        assert!(matches!(result, Err(ServerListError::UnknownServer(_))));
        assert_eq!(servers.selected().unwrap().host_label(), "one");
    }

    #[test]
    fn test_mark_silent_flags_stale_servers_and_upsert_revives_them() {
        // Arrange
        let mut servers = DiscoveredServers::new();
        servers.upsert(heard("10.0.0.1", "a2V5MQ==", "one")).unwrap();

        // Act
        let marked = servers.mark_silent(Duration::ZERO);
        let stale = servers.get(ip("10.0.0.1")).unwrap().is_stopped();
        servers.upsert(heard("10.0.0.1", "a2V5MQ==", "one")).unwrap();

        // Assert
        assert_eq!(marked, 1);
        assert!(stale);
        assert!(!servers.get(ip("10.0.0.1")).unwrap().is_stopped());
        assert_eq!(servers.mark_silent(Duration::from_secs(60)), 0);
    }

    #[test]
    fn test_remove_drops_only_that_server() {
        let mut servers = DiscoveredServers::new();
        servers.upsert(heard("10.0.0.1", "a2V5MQ==", "one")).unwrap();
        servers.upsert(heard("10.0.0.2", "a2V5Mg==", "two")).unwrap();

        let removed = servers.remove(ip("10.0.0.1"));

        assert_eq!(removed.unwrap().host_label(), "one");
        assert_eq!(servers.len(), 1);
        assert!(servers.remove(ip("10.0.0.1")).is_none());
    }
}
