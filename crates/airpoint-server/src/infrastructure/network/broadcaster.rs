//! Periodic UDP broadcast of the server's advertisement.
//!
//! On every tick the broadcaster encodes its [`AdvertisementRecord`] into a
//! fixed-size datagram and sends it to the discovery target (by default
//! `255.255.255.255:1235`).  Clients listening on the discovery port learn
//! the server's public key and label from the payload and its address from
//! the datagram source.
//!
//! The loop checks its stop flag once per tick, so a stop is observed within
//! one broadcast interval.  The broadcaster outlives a stop: the orchestrator
//! re-arms it with [`Stoppable::clear_stop`] and spawns it again on restart.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use airpoint_core::AdvertisementRecord;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::NetworkError;
use crate::application::lifecycle::{budget_for, StatusCell, StopFlag, Stoppable, WorkerStatus};

/// Repeating sender of the discovery datagram.
#[derive(Debug)]
pub struct DiscoveryBroadcaster {
    record: Mutex<AdvertisementRecord>,
    target: SocketAddr,
    interval: Duration,
    stop: StopFlag,
    status: StatusCell<WorkerStatus>,
    // Bumped on every spawn so a loop left over from a previous run exits
    // instead of resuming when the flag is cleared.
    generation: AtomicU64,
}

impl DiscoveryBroadcaster {
    pub fn new(record: AdvertisementRecord, target: SocketAddr, interval: Duration) -> Self {
        Self {
            record: Mutex::new(record),
            target,
            interval,
            stop: StopFlag::new(),
            status: StatusCell::new(WorkerStatus::Starting),
            generation: AtomicU64::new(0),
        }
    }

    fn lock_record(&self) -> MutexGuard<'_, AdvertisementRecord> {
        self.record
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Copy of the record as it would be broadcast now.
    pub fn record(&self) -> AdvertisementRecord {
        self.lock_record().clone()
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }

    pub fn status(&self) -> &StatusCell<WorkerStatus> {
        &self.status
    }

    /// Binds an ephemeral UDP socket with broadcast enabled.
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError::BindFailed`] if the socket cannot be bound and
    /// [`NetworkError::Configure`] if broadcasting cannot be enabled.
    pub async fn bind_socket() -> Result<UdpSocket, NetworkError> {
        let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0));
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|source| NetworkError::BindFailed { addr, source })?;
        socket.set_broadcast(true).map_err(NetworkError::Configure)?;
        Ok(socket)
    }

    /// Starts the broadcast loop on `socket` as a tokio task.
    pub fn spawn(self: &Arc<Self>, socket: UdpSocket) -> JoinHandle<()> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.status.set(WorkerStatus::Starting);
        tokio::spawn(Arc::clone(self).run(socket, generation))
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    async fn run(self: Arc<Self>, socket: UdpSocket, generation: u64) {
        self.status.set(WorkerStatus::Running);
        info!(dest = %self.target, interval = ?self.interval, "discovery broadcast started");

        while !self.stop.is_set() && self.is_current(generation) {
            let datagram = self.lock_record().encode_datagram();
            match datagram {
                Ok(bytes) => match socket.send_to(&bytes, self.target).await {
                    Ok(_) => debug!(dest = %self.target, "advertisement sent"),
                    Err(e) => warn!(dest = %self.target, "advertisement send failed: {e}"),
                },
                Err(e) => {
                    error!("advertisement cannot be encoded, broadcast aborted: {e}");
                    break;
                }
            }
            tokio::time::sleep(self.interval).await;
        }

        if self.is_current(generation) {
            self.lock_record().set_stopped();
            self.status.set(WorkerStatus::Stopped);
            info!("discovery broadcast stopped");
        }
    }
}

impl Stoppable for DiscoveryBroadcaster {
    fn stop(&self) {
        self.stop.stop();
    }

    fn clear_stop(&self) {
        self.stop.clear();
        self.lock_record().clear_stopped();
    }

    fn timeout_budget(&self) -> Duration {
        budget_for(self.interval)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
