//! Cooperative stop signalling and observable worker status.
//!
//! Workers are never aborted.  A controller sets a worker's [`StopFlag`]; the
//! worker observes it at its next loop boundary, publishes its terminal
//! status through a [`StatusCell`], and exits.  The controller waits at most
//! the worker's [`Stoppable::timeout_budget`] for that status.
//!
//! ```text
//! broadcaster / acceptor:  Starting ──► Running ──► Stopped
//! session worker:          Handshake ──► Serving ──► Closing
//!                              └──────────────────────▲
//! ```

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use tokio::sync::watch;

/// Slack added on top of two loop periods when sizing a stop budget.
pub const STOP_GRACE: Duration = Duration::from_millis(250);

/// Stop budget for a worker that checks its flag once per `period`.
pub fn budget_for(period: Duration) -> Duration {
    period * 2 + STOP_GRACE
}

/// Shared, toggle-able stop signal.
///
/// Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raises the flag.
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Lowers the flag so the owner can be restarted.
    pub fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A worker that can be asked to stop.
pub trait Stoppable {
    /// Signals the worker to stop at its next loop boundary.
    fn stop(&self);

    /// Clears a previous stop signal.
    fn clear_stop(&self);

    /// How long a controller should wait after [`Stoppable::stop`] before
    /// assuming the worker has finished.
    fn timeout_budget(&self) -> Duration;
}

/// Status published by the broadcaster and the acceptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStatus {
    Starting,
    Running,
    Stopped,
}

/// Status published by a session worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for the peer's public key.
    Handshake,
    /// Paired; relaying encrypted messages.
    Serving,
    /// Terminal: the connection has been released.
    Closing,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            SessionState::Handshake => "handshake",
            SessionState::Serving => "serving",
            SessionState::Closing => "closing",
        };
        f.write_str(label)
    }
}

/// Latest status of a worker, observable by any number of controllers.
///
/// Clones publish to and read from the same cell.
#[derive(Debug, Clone)]
pub struct StatusCell<T> {
    tx: Arc<watch::Sender<T>>,
}

impl<T> StatusCell<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    pub fn new(initial: T) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx: Arc::new(tx) }
    }

    /// Publishes `status`, waking every waiter.
    pub fn set(&self, status: T) {
        self.tx.send_replace(status);
    }

    pub fn get(&self) -> T {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<T> {
        self.tx.subscribe()
    }

    /// Waits up to `budget` for the status to equal `target`.
    ///
    /// Returns `true` if it did within the budget.
    pub async fn wait_for(&self, target: T, budget: Duration) -> bool {
        let mut rx = self.tx.subscribe();
        let reached = tokio::time::timeout(budget, rx.wait_for(|status| *status == target))
            .await
            .map(|result| result.is_ok());
        matches!(reached, Ok(true))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
