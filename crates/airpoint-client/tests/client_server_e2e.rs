//! End-to-end tests: a real server and the client library over loopback.
//!
//! ```text
//! Orchestrator ── advertisement ──► DiscoveryListener ──► DiscoveredServers
//!      ▲                                                         │ select
//!      └──────────── PairedConnection (key, then ciphertext) ◄───┘
//! ```

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use airpoint_client::application::server_list::DiscoveredServers;
use airpoint_client::infrastructure::connection::{ClientConnectionError, PairedConnection};
use airpoint_client::infrastructure::discovery::listen_on;
use airpoint_core::{CryptoContext, Identity, KeyExchangeEngine};
use airpoint_server::application::session_handler::LoggingHandler;
use airpoint_server::infrastructure::storage::config::ServerConfig;
use airpoint_server::Orchestrator;
use tokio_test::assert_ok;
use uuid::Uuid;

const WAIT: Duration = Duration::from_secs(2);

fn client_engine() -> KeyExchangeEngine {
    let ctx = Arc::new(CryptoContext::new());
    let identity = Identity::generate(&ctx).unwrap();
    KeyExchangeEngine::new(ctx, Arc::new(identity))
}

fn server_config(discovery_port: u16) -> ServerConfig {
    let mut config = ServerConfig::default();
    config.server.host_label = "e2e-server".to_string();
    config.server.identity_dir =
        Some(std::env::temp_dir().join(format!("airpoint_e2e_{}", Uuid::new_v4())));
    config.network.bind_address = "127.0.0.1".to_string();
    config.network.session_port = 0;
    config.network.broadcast_address = "127.0.0.1".to_string();
    config.network.discovery_port = discovery_port;
    config.timing.broadcast_interval_ms = 30;
    config.timing.accept_poll_ms = 20;
    config.timing.session_poll_ms = 20;
    config
}

#[tokio::test]
async fn test_discovered_server_pairs_and_answers_ping() {
    // Arrange: client listens, server broadcasts to it
    let running = Arc::new(AtomicBool::new(true));
    let mut listener = listen_on("127.0.0.1:0".parse().unwrap(), Arc::clone(&running)).unwrap();
    let config = server_config(listener.local_addr().port());
    let identity_dir = config.server.identity_dir.clone();
    let server = Orchestrator::new(config, Arc::new(CryptoContext::new()), Arc::new(LoggingHandler));
    assert_ok!(server.start().await);
    let session_port = server.local_session_addr().await.unwrap().port();

    // Act: discover, select, pair with the code read "off the screen"
    let advertised = tokio::time::timeout(WAIT, listener.recv())
        .await
        .expect("advertisement within timeout")
        .unwrap();
    running.store(false, Ordering::Relaxed);
    let mut servers = DiscoveredServers::new();
    let ip = advertised.address().unwrap();
    servers.upsert(advertised).unwrap();
    let selected = servers.select(ip).unwrap().clone();

    let engine = client_engine();
    let mut conn =
        PairedConnection::connect_advertised(&selected, session_port, &engine, &server.pairing_code())
            .await
            .unwrap();
    let reply = conn.request("ping", WAIT).await.unwrap();

    // Assert
    assert_eq!(selected.host_label(), "e2e-server");
    assert_eq!(reply, "pong");
    assert_eq!(server.registry_snapshot().len(), 1);

    conn.close().await.unwrap();
    assert_ok!(server.stop().await);
    if let Some(dir) = identity_dir {
        std::fs::remove_dir_all(dir).ok();
    }
}

#[tokio::test]
async fn test_server_disconnect_is_seen_by_client() {
    // Arrange
    let config = server_config(9);
    let identity_dir = config.server.identity_dir.clone();
    let server = Orchestrator::new(config, Arc::new(CryptoContext::new()), Arc::new(LoggingHandler));
    assert_ok!(server.start().await);
    let addr = server.local_session_addr().await.unwrap();
    let key = server.public_key_base64().await.unwrap();
    let engine = client_engine();
    let mut conn = PairedConnection::connect(addr, &engine, &key, &server.pairing_code())
        .await
        .unwrap();
    assert_eq!(conn.request("ping", WAIT).await.unwrap(), "pong");

    // Act
    assert_ok!(server.disconnect(conn.local_addr().unwrap()).await);

    // Assert
    let after = conn.request("ping", WAIT).await;
    assert!(matches!(
        after,
        Err(ClientConnectionError::Closed) | Err(ClientConnectionError::Transport(_))
    ));
    assert!(server.registry_snapshot().is_empty());

    assert_ok!(server.stop().await);
    if let Some(dir) = identity_dir {
        std::fs::remove_dir_all(dir).ok();
    }
}

#[tokio::test]
async fn test_stale_pairing_code_yields_no_reply() {
    // Arrange: client uses the code from before a rotation
    let config = server_config(9);
    let identity_dir = config.server.identity_dir.clone();
    let server = Orchestrator::new(config, Arc::new(CryptoContext::new()), Arc::new(LoggingHandler));
    assert_ok!(server.start().await);
    let stale = server.pairing_code();
    server.regenerate_pairing_code();
    let addr = server.local_session_addr().await.unwrap();
    let key = server.public_key_base64().await.unwrap();

    // Act
    let mut conn = PairedConnection::connect(addr, &client_engine(), &key, &stale)
        .await
        .unwrap();
    let result = conn.request("ping", WAIT).await;

    // Assert
    assert!(result.is_err());
    assert_ok!(server.stop().await);
    if let Some(dir) = identity_dir {
        std::fs::remove_dir_all(dir).ok();
    }
}
