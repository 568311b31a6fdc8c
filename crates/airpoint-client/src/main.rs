//! AirPoint client entry point.
//!
//! Listens for server advertisements, selects a server, pairs with it using
//! the code shown on the server, sends one message, and prints the reply.
//!
//! # Usage
//!
//! ```text
//! airpoint-client [OPTIONS]
//!
//! Options:
//!   --server         <IP>     Server to pair with [default: first discovered]
//!   --code           <CODE>   Pairing code [default: read from stdin]
//!   --message        <TEXT>   Message to send [default: ping]
//!   --discovery-port <PORT>   UDP discovery port [default: 1235]
//!   --session-port   <PORT>   TCP session port [default: 1234]
//!   --discover-secs  <SECS>   How long to listen for servers [default: 5]
//! ```

use std::net::IpAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::Instant;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use airpoint_client::application::server_list::DiscoveredServers;
use airpoint_client::infrastructure::connection::PairedConnection;
use airpoint_client::infrastructure::discovery::{start_discovery_listener, DiscoveryListener};
use airpoint_core::{
    AdvertisementRecord, CryptoContext, Identity, KeyExchangeEngine, DEFAULT_DISCOVERY_PORT,
    DEFAULT_SESSION_PORT,
};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// AirPoint client.
#[derive(Debug, Parser)]
#[command(
    name = "airpoint-client",
    about = "Discover an AirPoint server and exchange an encrypted message",
    version
)]
struct Cli {
    /// Server to pair with; the first one heard when omitted.
    #[arg(long, env = "AIRPOINT_SERVER")]
    server: Option<IpAddr>,

    /// Pairing code shown by the server; prompted for when omitted.
    #[arg(long, env = "AIRPOINT_PAIRING_CODE")]
    code: Option<String>,

    /// Message to send once paired.
    #[arg(long, default_value = "ping")]
    message: String,

    /// UDP port to listen for advertisements on.
    #[arg(long, default_value_t = DEFAULT_DISCOVERY_PORT, env = "AIRPOINT_DISCOVERY_PORT")]
    discovery_port: u16,

    /// TCP port of the server's session listener.
    #[arg(long, default_value_t = DEFAULT_SESSION_PORT, env = "AIRPOINT_SESSION_PORT")]
    session_port: u16,

    /// Seconds to listen for advertisements before giving up.
    #[arg(long, default_value_t = 5)]
    discover_secs: u64,

    /// Seconds to wait for the reply.
    #[arg(long, default_value_t = 5)]
    reply_secs: u64,
}

/// Listens until the wanted server (or any, when `wanted` is `None`) has
/// been heard, or `window` has passed.
async fn discover(
    listener: &mut DiscoveryListener,
    wanted: Option<IpAddr>,
    window: Duration,
) -> anyhow::Result<AdvertisementRecord> {
    let mut servers = DiscoveredServers::new();
    let deadline = Instant::now() + window;

    loop {
        let found = match wanted {
            Some(ip) => servers.get(ip).and_then(|r| r.address()),
            None => servers.records().next().and_then(|r| r.address()),
        };
        if let Some(ip) = found {
            return Ok(servers.select(ip)?.clone());
        }

        match tokio::time::timeout_at(deadline, listener.recv()).await {
            Ok(Some(record)) => {
                let label = record.host_label().to_string();
                if servers.upsert(record)? {
                    info!("discovered server {label}");
                }
            }
            Ok(None) => bail!("discovery listener stopped"),
            Err(_) => match wanted {
                Some(ip) => bail!("server {ip} not heard within {window:?}"),
                None => bail!("no server heard within {window:?}"),
            },
        }
    }
}

async fn read_code() -> anyhow::Result<String> {
    println!("Enter the pairing code shown on the server:");
    let mut line = String::new();
    BufReader::new(tokio::io::stdin())
        .read_line(&mut line)
        .await
        .context("failed to read pairing code")?;
    let code = line.trim().to_string();
    if code.is_empty() {
        bail!("no pairing code entered");
    }
    Ok(code)
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    info!("AirPoint client starting");

    let running = Arc::new(AtomicBool::new(true));
    let mut listener = start_discovery_listener(cli.discovery_port, Arc::clone(&running))
        .context("failed to start discovery")?;
    let record = discover(
        &mut listener,
        cli.server,
        Duration::from_secs(cli.discover_secs),
    )
    .await;
    running.store(false, Ordering::Relaxed);
    let record = record?;
    println!("Selected server: {}", record.host_label());

    let code = match cli.code {
        Some(code) => code,
        None => read_code().await?,
    };

    let ctx = Arc::new(CryptoContext::new());
    let identity = Identity::generate(&ctx).context("failed to generate client key")?;
    let engine = KeyExchangeEngine::new(ctx, Arc::new(identity));
    debug!("client key: {}", engine.public_key_base64());

    let mut conn = PairedConnection::connect_advertised(&record, cli.session_port, &engine, &code)
        .await
        .context("failed to pair with server")?;
    let reply = conn
        .request(&cli.message, Duration::from_secs(cli.reply_secs))
        .await
        .context("no usable reply; check the pairing code")?;
    println!("Reply: {reply}");

    conn.close().await?;
    info!("AirPoint client stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
