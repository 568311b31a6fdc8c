//! Server lifecycle: start, stop, and per-peer disconnect.
//!
//! The orchestrator is the composition root of the server.  It owns the
//! session registry and the pairing code, builds the broadcaster and the
//! acceptor from [`ServerConfig`], and drives them through the cooperative
//! stop protocol in [`crate::application::lifecycle`].
//!
//! # Start
//!
//! ```text
//! ensure_identity ──► bind TCP + UDP ──► spawn acceptor, broadcaster
//!                                    ──► wait until both report Running
//! ```
//!
//! A missing or damaged identity fails `start` before anything is bound, so
//! a server that cannot prove who it is never advertises itself.
//!
//! # Stop
//!
//! ```text
//! broadcaster.stop  ─ wait budget
//! acceptor.stop     ─ wait budget
//! for each session: stop ─ wait budget ─ remove
//! ```
//!
//! Every wait is bounded by the worker's own timeout budget.  A worker that
//! misses its budget is logged and its entry is removed regardless, so the
//! registry is empty when `stop` returns.

use std::net::SocketAddr;
use std::sync::Arc;

use airpoint_core::{
    generate_pairing_code, AdvertisementRecord, CryptoContext, KeyExchangeEngine,
    KeyProvisioningError,
};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::application::lifecycle::{StatusCell, Stoppable, WorkerStatus};
use crate::application::pairing_code::PairingCodeSlot;
use crate::application::session_handler::SessionHandler;
use crate::application::session_registry::{
    RegistryError, SessionEntry, SessionRegistry, SessionSnapshot,
};
use crate::infrastructure::network::acceptor::ConnectionAcceptor;
use crate::infrastructure::network::broadcaster::DiscoveryBroadcaster;
use crate::infrastructure::network::session_worker::SessionTiming;
use crate::infrastructure::network::NetworkError;
use crate::infrastructure::storage::config::{ConfigError, ServerConfig};
use crate::infrastructure::storage::identity_store::IdentityStore;

/// Errors surfaced by the management operations.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// The server identity could not be created or loaded.
    #[error("server identity unavailable: {0}")]
    KeyProvisioning(#[from] KeyProvisioningError),

    /// The configuration holds an unusable value.
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// A socket could not be set up.
    #[error("transport error: {0}")]
    Transport(#[from] NetworkError),

    /// A worker was spawned but never reported that it was running.
    #[error("{0} did not report running")]
    NotReady(&'static str),

    /// No session is registered for the address.
    #[error("no session for {0}")]
    NotFound(SocketAddr),

    #[error("server is already running")]
    AlreadyRunning,

    #[error("server is not running")]
    NotRunning,
}

impl From<RegistryError> for OrchestratorError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::NotFound(peer) => OrchestratorError::NotFound(peer),
        }
    }
}

/// Workers of one run, between a `start` and the matching `stop`.
struct ActiveRun {
    engine: Arc<KeyExchangeEngine>,
    acceptor: Arc<ConnectionAcceptor>,
    session_addr: SocketAddr,
}

#[derive(Default)]
struct RunState {
    // Kept across runs and re-armed on the next start.
    broadcaster: Option<Arc<DiscoveryBroadcaster>>,
    active: Option<ActiveRun>,
}

/// Owner of the server's workers and session registry.
pub struct Orchestrator {
    config: ServerConfig,
    ctx: Arc<CryptoContext>,
    handler: Arc<dyn SessionHandler>,
    registry: SessionRegistry,
    pairing_code: PairingCodeSlot,
    state: Mutex<RunState>,
}

impl Orchestrator {
    /// Creates a stopped orchestrator with a freshly generated pairing code.
    pub fn new(
        config: ServerConfig,
        ctx: Arc<CryptoContext>,
        handler: Arc<dyn SessionHandler>,
    ) -> Self {
        let pairing_code = PairingCodeSlot::new(generate_pairing_code(&ctx));
        Self {
            config,
            ctx,
            handler,
            registry: SessionRegistry::new(),
            pairing_code,
            state: Mutex::new(RunState::default()),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Provisions the identity and starts the acceptor and the broadcaster.
    ///
    /// Returns once both workers have reported [`WorkerStatus::Running`].
    ///
    /// # Errors
    ///
    /// - [`OrchestratorError::AlreadyRunning`] if a run is active.
    /// - [`OrchestratorError::KeyProvisioning`] if no usable identity exists;
    ///   nothing has been bound or spawned in that case.
    /// - [`OrchestratorError::Config`] / [`OrchestratorError::Transport`] for
    ///   unusable addresses or sockets.
    /// - [`OrchestratorError::NotReady`] if a worker failed to come up; both
    ///   workers have been stopped again.
    pub async fn start(&self) -> Result<(), OrchestratorError> {
        let mut state = self.state.lock().await;
        if state.active.is_some() {
            return Err(OrchestratorError::AlreadyRunning);
        }

        let bind_addr = self.config.network.session_addr()?;
        let target = self.config.network.broadcast_target()?;
        let store = IdentityStore::new(self.config.identity_dir()?);
        let identity = store.ensure_identity(&self.ctx)?;
        let engine = Arc::new(KeyExchangeEngine::new(
            Arc::clone(&self.ctx),
            Arc::new(identity),
        ));

        let listener = ConnectionAcceptor::bind(bind_addr).await?;
        let session_addr = listener.local_addr().map_err(NetworkError::Configure)?;
        let socket = DiscoveryBroadcaster::bind_socket().await?;

        let broadcaster = self.prepare_broadcaster(&mut state, &engine, target);
        let timing = &self.config.timing;
        let acceptor = Arc::new(ConnectionAcceptor::new(
            Arc::clone(&engine),
            self.pairing_code.clone(),
            Arc::clone(&self.handler),
            self.registry.clone(),
            timing.accept_poll(),
            SessionTiming {
                poll: timing.session_poll(),
                handshake_timeout: timing.handshake_timeout(),
            },
        ));

        acceptor.spawn(listener);
        broadcaster.spawn(socket);

        let acceptor_up = acceptor
            .status()
            .wait_for(WorkerStatus::Running, acceptor.timeout_budget())
            .await;
        let broadcaster_up = broadcaster
            .status()
            .wait_for(WorkerStatus::Running, broadcaster.timeout_budget())
            .await;
        if !(acceptor_up && broadcaster_up) {
            halt("acceptor", &*acceptor, acceptor.status()).await;
            halt("broadcaster", &*broadcaster, broadcaster.status()).await;
            let worker = if acceptor_up { "broadcaster" } else { "acceptor" };
            return Err(OrchestratorError::NotReady(worker));
        }

        info!(
            %session_addr,
            dest = %target,
            key = %engine.public_key_base64(),
            "server started"
        );
        state.active = Some(ActiveRun {
            engine,
            acceptor,
            session_addr,
        });
        Ok(())
    }

    /// Reuses the broadcaster from an earlier run when it still advertises
    /// the current key; otherwise builds a new one.
    fn prepare_broadcaster(
        &self,
        state: &mut RunState,
        engine: &KeyExchangeEngine,
        target: SocketAddr,
    ) -> Arc<DiscoveryBroadcaster> {
        let key = engine.public_key_base64();
        if let Some(existing) = &state.broadcaster {
            let record = existing.record();
            if record.public_key() == key && existing.target() == target {
                existing.clear_stop();
                return Arc::clone(existing);
            }
        }

        let record = AdvertisementRecord::new(key, self.config.server.host_label.as_str());
        let broadcaster = Arc::new(DiscoveryBroadcaster::new(
            record,
            target,
            self.config.timing.broadcast_interval(),
        ));
        state.broadcaster = Some(Arc::clone(&broadcaster));
        broadcaster
    }

    /// Stops broadcasting and accepting, then drains every session.
    ///
    /// Returns after each worker has reported its terminal status or used
    /// up its timeout budget.  The registry is empty on return.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::NotRunning`] if no run is active.
    pub async fn stop(&self) -> Result<(), OrchestratorError> {
        let mut state = self.state.lock().await;
        let active = state.active.take().ok_or(OrchestratorError::NotRunning)?;

        if let Some(broadcaster) = &state.broadcaster {
            halt("broadcaster", &**broadcaster, broadcaster.status()).await;
        }
        halt("acceptor", &*active.acceptor, active.acceptor.status()).await;

        // An acceptor that missed its budget may still register a late
        // connection, so drain until the registry stays empty.
        loop {
            let entries = self.registry.all_entries();
            if entries.is_empty() {
                break;
            }
            for entry in entries {
                self.drain(&entry).await;
            }
        }

        info!(session_addr = %active.session_addr, "server stopped");
        Ok(())
    }

    /// Stops the session of `peer` and waits for it to close.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::NotFound`] if no session is registered
    /// for `peer`; the registry is left unchanged.
    pub async fn disconnect(&self, peer: SocketAddr) -> Result<(), OrchestratorError> {
        let entry = self.registry.lookup(&peer)?;
        self.drain(&entry).await;
        info!(%peer, "session disconnected");
        Ok(())
    }

    async fn drain(&self, entry: &SessionEntry) {
        entry.stop();
        if !entry.wait_closed().await {
            warn!(
                peer = %entry.peer(),
                budget = ?entry.timeout_budget(),
                "session missed its stop budget"
            );
        }
        self.registry.remove_session(&entry.peer(), entry.id());
    }

    /// Sessions currently registered, oldest first.
    pub fn registry_snapshot(&self) -> Vec<SessionSnapshot> {
        self.registry.snapshot()
    }

    /// The code a user must enter on the client to pair.
    pub fn pairing_code(&self) -> String {
        self.pairing_code.current()
    }

    /// Replaces the pairing code.  Sessions already accepted keep the code
    /// they were accepted with.
    pub fn regenerate_pairing_code(&self) -> String {
        let code = generate_pairing_code(&self.ctx);
        self.pairing_code.replace(code.as_str());
        info!("pairing code rotated");
        code
    }

    pub async fn is_running(&self) -> bool {
        self.state.lock().await.active.is_some()
    }

    /// Address the session listener is bound to, while running.
    pub async fn local_session_addr(&self) -> Option<SocketAddr> {
        self.state
            .lock()
            .await
            .active
            .as_ref()
            .map(|active| active.session_addr)
    }

    /// Public key clients pair against, while running.
    pub async fn public_key_base64(&self) -> Option<String> {
        self.state
            .lock()
            .await
            .active
            .as_ref()
            .map(|active| active.engine.public_key_base64())
    }
}

/// Stops `worker` and waits up to its timeout budget for `status` to
/// report [`WorkerStatus::Stopped`].
async fn halt<W>(name: &str, worker: &W, status: &StatusCell<WorkerStatus>)
where
    W: Stoppable + ?Sized,
{
    worker.stop();
    if !status
        .wait_for(WorkerStatus::Stopped, worker.timeout_budget())
        .await
    {
        warn!("{name} missed its stop budget");
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
