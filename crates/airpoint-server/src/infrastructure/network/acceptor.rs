//! TCP acceptor for the session transport.
//!
//! For every accepted connection the acceptor:
//!
//! 1. Reads the pairing code that is live at that moment.
//! 2. Builds a [`SessionWorker`] and inserts its entry into the registry.
//! 3. Spawns the worker as its own task.
//!
//! Registration happens on the acceptor's task before the worker starts, so
//! once the acceptor reports [`WorkerStatus::Stopped`] no further entries
//! can appear.  Stopping the acceptor does not touch sessions it already
//! spawned; draining them is the orchestrator's job.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use airpoint_core::KeyExchangeEngine;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::session_worker::{SessionTiming, SessionWorker};
use super::{is_transient, NetworkError};
use crate::application::lifecycle::{budget_for, StatusCell, StopFlag, Stoppable, WorkerStatus};
use crate::application::pairing_code::PairingCodeSlot;
use crate::application::session_handler::SessionHandler;
use crate::application::session_registry::SessionRegistry;

/// Accepts session connections until stopped.
pub struct ConnectionAcceptor {
    engine: Arc<KeyExchangeEngine>,
    pairing_code: PairingCodeSlot,
    handler: Arc<dyn SessionHandler>,
    registry: SessionRegistry,
    accept_poll: Duration,
    session_timing: SessionTiming,
    stop: StopFlag,
    status: StatusCell<WorkerStatus>,
}

impl ConnectionAcceptor {
    pub fn new(
        engine: Arc<KeyExchangeEngine>,
        pairing_code: PairingCodeSlot,
        handler: Arc<dyn SessionHandler>,
        registry: SessionRegistry,
        accept_poll: Duration,
        session_timing: SessionTiming,
    ) -> Self {
        Self {
            engine,
            pairing_code,
            handler,
            registry,
            accept_poll,
            session_timing,
            stop: StopFlag::new(),
            status: StatusCell::new(WorkerStatus::Starting),
        }
    }

    pub fn status(&self) -> &StatusCell<WorkerStatus> {
        &self.status
    }

    /// Binds the session listener.
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError::BindFailed`] if the address cannot be bound.
    pub async fn bind(addr: SocketAddr) -> Result<TcpListener, NetworkError> {
        TcpListener::bind(addr)
            .await
            .map_err(|source| NetworkError::BindFailed { addr, source })
    }

    /// Starts the accept loop on `listener` as a tokio task.
    pub fn spawn(self: &Arc<Self>, listener: TcpListener) -> JoinHandle<()> {
        tokio::spawn(Arc::clone(self).run(listener))
    }

    async fn run(self: Arc<Self>, listener: TcpListener) {
        self.status.set(WorkerStatus::Running);
        match listener.local_addr() {
            Ok(addr) => info!(%addr, "session acceptor listening"),
            Err(e) => debug!("listener address unavailable: {e}"),
        }

        while !self.stop.is_set() {
            match tokio::time::timeout(self.accept_poll, listener.accept()).await {
                Err(_) => continue,
                Ok(Ok((stream, peer))) => self.start_session(stream, peer),
                Ok(Err(e)) if is_transient(&e) => {
                    debug!("transient accept error: {e}");
                }
                Ok(Err(e)) => {
                    error!("accept failed, acceptor exiting: {e}");
                    break;
                }
            }
        }

        drop(listener);
        self.status.set(WorkerStatus::Stopped);
        info!("session acceptor stopped");
    }

    fn start_session(&self, stream: TcpStream, peer: SocketAddr) {
        if let Err(e) = stream.set_nodelay(true) {
            debug!(%peer, "could not disable Nagle: {e}");
        }

        let worker = SessionWorker::new(
            peer,
            Arc::clone(&self.engine),
            self.pairing_code.current(),
            Arc::clone(&self.handler),
            self.registry.clone(),
            self.session_timing,
        );
        if let Some(previous) = self.registry.insert(worker.entry().clone()) {
            warn!(%peer, "replacing stale session {}", previous.id());
            previous.stop();
        }
        info!(%peer, "connection accepted");

        tokio::spawn(async move {
            // The worker logs its own outcome.
            let _ = worker.run(stream).await;
        });
    }
}

impl Stoppable for ConnectionAcceptor {
    fn stop(&self) {
        self.stop.stop();
    }

    fn clear_stop(&self) {
        self.stop.clear();
    }

    fn timeout_budget(&self) -> Duration {
        budget_for(self.accept_poll)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
