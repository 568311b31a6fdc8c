//! Session registry: the live mapping from peer address to its session.
//!
//! The acceptor inserts an entry for every accepted connection before the
//! session worker starts.  Entries leave the registry either when the
//! orchestrator has drained them (stop / disconnect) or when the session
//! closes on its own.
//!
//! The map sits behind a mutex that is never held across an `.await`; every
//! operation is a single short critical section, and iteration always goes
//! through a cloned snapshot.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use thiserror::Error;
use uuid::Uuid;

use super::lifecycle::{SessionState, StatusCell, StopFlag, Stoppable};

/// Errors returned by registry lookups.
#[derive(Debug, Error, PartialEq)]
pub enum RegistryError {
    /// No session is registered for the address.
    #[error("no session registered for {0}")]
    NotFound(SocketAddr),
}

/// Control handle for one session worker.
///
/// Cheap to clone; every clone controls the same worker.
#[derive(Debug, Clone)]
pub struct SessionEntry {
    id: Uuid,
    peer: SocketAddr,
    connected_at: Instant,
    stop: StopFlag,
    state: StatusCell<SessionState>,
    budget: Duration,
}

impl SessionEntry {
    pub fn new(
        peer: SocketAddr,
        stop: StopFlag,
        state: StatusCell<SessionState>,
        budget: Duration,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            peer,
            connected_at: Instant::now(),
            stop,
            state,
            budget,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn state(&self) -> SessionState {
        self.state.get()
    }

    /// Waits up to the timeout budget for the worker to reach
    /// [`SessionState::Closing`]. Returns `false` if it did not.
    pub async fn wait_closed(&self) -> bool {
        self.state.wait_for(SessionState::Closing, self.budget).await
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            id: self.id,
            peer: self.peer,
            state: self.state.get(),
            connected_for: self.connected_at.elapsed(),
        }
    }
}

impl Stoppable for SessionEntry {
    fn stop(&self) {
        self.stop.stop();
    }

    fn clear_stop(&self) {
        self.stop.clear();
    }

    fn timeout_budget(&self) -> Duration {
        self.budget
    }
}

/// Point-in-time view of one session, for display.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub id: Uuid,
    pub peer: SocketAddr,
    pub state: SessionState,
    pub connected_for: Duration,
}

/// Shared registry of live sessions.
///
/// Clones share the same underlying map.
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<Mutex<HashMap<SocketAddr, SessionEntry>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SocketAddr, SessionEntry>> {
        // Every critical section leaves the map consistent, so a poisoned
        // lock still guards valid data.
        self.sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Registers `entry` under its peer address, returning any entry it
    /// replaced.
    pub fn insert(&self, entry: SessionEntry) -> Option<SessionEntry> {
        self.lock().insert(entry.peer(), entry)
    }

    /// Removes the entry for `peer`. Removing an absent address is a no-op.
    pub fn remove(&self, peer: &SocketAddr) -> Option<SessionEntry> {
        self.lock().remove(peer)
    }

    /// Removes the entry for `peer` only if it is still the session `id`.
    ///
    /// A session closing on its own uses this so it never evicts a newer
    /// session that reused the address.
    pub fn remove_session(&self, peer: &SocketAddr, id: Uuid) -> Option<SessionEntry> {
        let mut sessions = self.lock();
        if sessions.get(peer).is_some_and(|entry| entry.id() == id) {
            sessions.remove(peer)
        } else {
            None
        }
    }

    /// Returns the entry for `peer`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] if no session is registered for
    /// the address.
    pub fn lookup(&self, peer: &SocketAddr) -> Result<SessionEntry, RegistryError> {
        self.lock()
            .get(peer)
            .cloned()
            .ok_or(RegistryError::NotFound(*peer))
    }

    /// Snapshot of every registered entry.
    pub fn all_entries(&self) -> Vec<SessionEntry> {
        self.lock().values().cloned().collect()
    }

    /// Display snapshot of every registered session, oldest first.
    pub fn snapshot(&self) -> Vec<SessionSnapshot> {
        let mut snapshots: Vec<_> = self.lock().values().map(SessionEntry::snapshot).collect();
        snapshots.sort_by(|a, b| b.connected_for.cmp(&a.connected_for));
        snapshots
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
