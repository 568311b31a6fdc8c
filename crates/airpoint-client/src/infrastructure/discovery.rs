//! Listener for server advertisements.
//!
//! Servers broadcast a fixed-size advertisement datagram to the discovery
//! port (default 1235) once per interval.  The listener binds that port,
//! decodes every datagram into an [`AdvertisementRecord`] carrying the
//! sender's IP, and forwards it on a channel.  Deduplication is left to the
//! receiver (see `application::server_list`).
//!
//! The socket is blocking with a short read timeout and lives on a dedicated
//! thread; after every timeout the loop re-checks the `running` flag, so the
//! thread exits within one timeout of the flag being cleared or of the
//! receiver being dropped.  A receive error that is neither a timeout nor
//! transient ends the thread, which the receiver sees as a closed channel.

use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use airpoint_core::{AdvertisementRecord, ADVERTISEMENT_LEN};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

/// Longest a single `recv_from` blocks before the flag is re-checked.
const READ_TIMEOUT: Duration = Duration::from_millis(250);

/// Error type for the discovery listener.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The UDP socket could not be bound.
    #[error("failed to bind discovery socket on {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// The socket could not be configured.
    #[error("failed to configure discovery socket: {0}")]
    Configure(std::io::Error),

    /// The listener thread could not be started.
    #[error("failed to spawn discovery thread: {0}")]
    Spawn(std::io::Error),
}

/// A running discovery listener.
#[derive(Debug)]
pub struct DiscoveryListener {
    local_addr: SocketAddr,
    events: mpsc::Receiver<AdvertisementRecord>,
}

impl DiscoveryListener {
    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Next advertisement, or `None` once the listener thread has exited.
    pub async fn recv(&mut self) -> Option<AdvertisementRecord> {
        self.events.recv().await
    }
}

/// Binds UDP `port` on all interfaces and starts listening for
/// advertisements.  Pass `0` to let the OS pick a port.
///
/// # Errors
///
/// Returns [`DiscoveryError::BindFailed`] if the port cannot be bound.
pub fn start_discovery_listener(
    port: u16,
    running: Arc<AtomicBool>,
) -> Result<DiscoveryListener, DiscoveryError> {
    listen_on(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)), running)
}

/// Like [`start_discovery_listener`] with an explicit bind address.
///
/// # Errors
///
/// See [`start_discovery_listener`].
pub fn listen_on(
    addr: SocketAddr,
    running: Arc<AtomicBool>,
) -> Result<DiscoveryListener, DiscoveryError> {
    let socket =
        UdpSocket::bind(addr).map_err(|source| DiscoveryError::BindFailed { addr, source })?;
    socket
        .set_read_timeout(Some(READ_TIMEOUT))
        .map_err(DiscoveryError::Configure)?;
    let local_addr = socket.local_addr().map_err(DiscoveryError::Configure)?;

    let (tx, rx) = mpsc::channel(64);
    std::thread::Builder::new()
        .name("airpoint-discovery".to_string())
        .spawn(move || listen_loop(|buf| socket.recv_from(buf), tx, running))
        .map_err(DiscoveryError::Spawn)?;

    info!("discovery listener on UDP {local_addr}");
    Ok(DiscoveryListener {
        local_addr,
        events: rx,
    })
}

/// Receives datagrams with `recv` until the flag is cleared, the receiver
/// is dropped, or `recv` fails with a non-transient error.
fn listen_loop<R>(mut recv: R, tx: mpsc::Sender<AdvertisementRecord>, running: Arc<AtomicBool>)
where
    R: FnMut(&mut [u8]) -> std::io::Result<(usize, SocketAddr)>,
{
    // One spare byte so oversize datagrams are detected, not truncated.
    let mut buf = vec![0u8; ADVERTISEMENT_LEN + 1];

    while running.load(Ordering::Relaxed) && !tx.is_closed() {
        let (len, src) = match recv(&mut buf) {
            Ok(pair) => pair,
            Err(e) if is_timeout_error(&e) => continue,
            Err(e) if is_transient(&e) => {
                debug!("transient discovery recv error: {e}");
                continue;
            }
            Err(e) => {
                error!("discovery recv failed, listener exiting: {e}");
                break;
            }
        };

        if len > ADVERTISEMENT_LEN {
            debug!("oversize discovery datagram from {src} ignored");
            continue;
        }

        match AdvertisementRecord::decode_datagram(&buf[..len], src.ip()) {
            Ok(record) => {
                debug!("advertisement from {src}: label={}", record.host_label());
                if tx.blocking_send(record).is_err() {
                    break;
                }
            }
            Err(e) => debug!("undecodable discovery datagram from {src}: {e}"),
        }
    }

    info!("discovery listener stopped");
}

/// Returns `true` for OS timeout / would-block errors that should be retried.
fn is_timeout_error(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
    )
}

/// Returns `true` for errors a later `recv_from` may not repeat, such as an
/// ICMP unreachable reported against the socket.
fn is_transient(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::Interrupted
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionRefused
    )
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "MFkwEwYHKoZIzj0CAQYIKoZIzj0DAQcDQgAE";

    fn loopback_listener() -> (DiscoveryListener, Arc<AtomicBool>) {
        let running = Arc::new(AtomicBool::new(true));
        let listener = listen_on("127.0.0.1:0".parse().unwrap(), Arc::clone(&running)).unwrap();
        (listener, running)
    }

    async fn next(listener: &mut DiscoveryListener) -> Option<AdvertisementRecord> {
        tokio::time::timeout(Duration::from_secs(2), listener.recv())
            .await
            .expect("event within timeout")
    }

    #[test]
    fn test_is_timeout_error_recognises_would_block() {
        let e = std::io::Error::new(std::io::ErrorKind::WouldBlock, "would block");
        assert!(is_timeout_error(&e));
    }

    #[test]
    fn test_is_timeout_error_returns_false_for_other_errors() {
        let e = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        assert!(!is_timeout_error(&e));
    }

    #[tokio::test]
    async fn test_listener_decodes_advertisement_with_source_address() {
        // Arrange
        let (mut listener, running) = loopback_listener();
        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        let datagram = AdvertisementRecord::new(KEY, "studio-pc")
            .encode_datagram()
            .unwrap();

        // Act
        sender.send_to(&datagram, listener.local_addr()).unwrap();
        let record = next(&mut listener).await.unwrap();

        // Assert
        assert_eq!(record.host_label(), "studio-pc");
        assert_eq!(record.public_key(), KEY);
        assert_eq!(record.address(), Some("127.0.0.1".parse().unwrap()));
        running.store(false, Ordering::Relaxed);
    }

    #[tokio::test]
    async fn test_listener_skips_garbage_and_keeps_listening() {
        // Arrange
        let (mut listener, running) = loopback_listener();
        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        let good = AdvertisementRecord::new(KEY, "after-garbage")
            .encode_datagram()
            .unwrap();

        // Act
        sender.send_to(b"not json", listener.local_addr()).unwrap();
        sender
            .send_to(&vec![b'{'; ADVERTISEMENT_LEN + 10], listener.local_addr())
            .unwrap();
        sender.send_to(&good, listener.local_addr()).unwrap();
        let record = next(&mut listener).await.unwrap();

        // Assert
        assert_eq!(record.host_label(), "after-garbage");
        running.store(false, Ordering::Relaxed);
    }

    #[tokio::test]
    async fn test_listener_thread_exits_when_flag_cleared() {
        // Arrange
        let (mut listener, running) = loopback_listener();

        // Act
        running.store(false, Ordering::Relaxed);
        let end = next(&mut listener).await;

        // Assert: the sender side was dropped by the exiting thread
        assert!(end.is_none());
    }

    #[test]
    fn test_is_transient_recognises_connection_reset() {
        let e = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        assert!(is_transient(&e));
    }

    #[test]
    fn test_listen_loop_exits_on_fatal_recv_error() {
        // Arrange: a source that always fails; the flag is cleared after a
        // few calls so a loop that keeps retrying still terminates
        let running = Arc::new(AtomicBool::new(true));
        let (tx, mut rx) = mpsc::channel(1);
        let mut calls = 0;
        let flag = Arc::clone(&running);
        let recv = |_: &mut [u8]| -> std::io::Result<(usize, SocketAddr)> {
            calls += 1;
            if calls >= 50 {
                flag.store(false, Ordering::Relaxed);
            }
            Err(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "socket unusable",
            ))
        };

        // Act
        listen_loop(recv, tx, Arc::clone(&running));

        // Assert
        assert_eq!(calls, 1, "a fatal error must end the loop at once");
        assert!(rx.try_recv().is_err(), "sender dropped, nothing queued");
    }

    #[test]
    fn test_listen_loop_retries_transient_recv_errors() {
        // Arrange
        let running = Arc::new(AtomicBool::new(true));
        let (tx, _rx) = mpsc::channel(1);
        let mut calls = 0;
        let flag = Arc::clone(&running);
        let recv = |_: &mut [u8]| -> std::io::Result<(usize, SocketAddr)> {
            calls += 1;
            if calls == 3 {
                flag.store(false, Ordering::Relaxed);
            }
            Err(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "reset",
            ))
        };

        // Act
        listen_loop(recv, tx, Arc::clone(&running));

        // Assert
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_bind_conflict_is_reported() {
        let taken = UdpSocket::bind("127.0.0.1:0").unwrap();
        let addr = taken.local_addr().unwrap();

        let result = listen_on(addr, Arc::new(AtomicBool::new(true)));

        assert!(matches!(result, Err(DiscoveryError::BindFailed { .. })));
    }
}
