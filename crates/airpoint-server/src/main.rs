//! AirPoint server entry point.
//!
//! Loads the configuration, applies command-line overrides, starts the
//! [`Orchestrator`], prints the pairing code, and runs until Ctrl+C.
//!
//! # Usage
//!
//! ```text
//! airpoint-server [OPTIONS]
//!
//! Options:
//!   --config         <PATH>   Config file [default: platform config path]
//!   --host-label     <LABEL>  Name shown to clients in discovery
//!   --session-port   <PORT>   TCP session port
//!   --discovery-port <PORT>   UDP discovery port
//!   --identity-dir   <DIR>    Directory holding identity.key / identity.crt
//!   --log-level      <LEVEL>  Log filter used when RUST_LOG is unset
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use airpoint_core::CryptoContext;
use airpoint_server::application::session_handler::LoggingHandler;
use airpoint_server::infrastructure::storage::config::{load_config, load_config_from, ServerConfig};
use airpoint_server::Orchestrator;

// ── CLI argument definitions ──────────────────────────────────────────────────

/// AirPoint server.
///
/// Advertises itself on the LAN and accepts paired, encrypted sessions.
#[derive(Debug, Parser)]
#[command(
    name = "airpoint-server",
    about = "Discovery broadcast and encrypted pairing sessions for AirPoint",
    version
)]
struct Cli {
    /// Config file to load instead of the platform default.
    #[arg(long, env = "AIRPOINT_CONFIG")]
    config: Option<PathBuf>,

    /// Name advertised to clients.
    #[arg(long, env = "AIRPOINT_HOST_LABEL")]
    host_label: Option<String>,

    /// TCP port for sessions.
    #[arg(long, env = "AIRPOINT_SESSION_PORT")]
    session_port: Option<u16>,

    /// UDP port discovery datagrams are sent to.
    #[arg(long, env = "AIRPOINT_DISCOVERY_PORT")]
    discovery_port: Option<u16>,

    /// Directory holding the server identity.
    #[arg(long, env = "AIRPOINT_IDENTITY_DIR")]
    identity_dir: Option<PathBuf>,

    /// Log filter used when `RUST_LOG` is not set.
    #[arg(long, env = "AIRPOINT_LOG_LEVEL")]
    log_level: Option<String>,
}

impl Cli {
    /// Loads the config file and applies every override given on the
    /// command line.
    fn into_server_config(self) -> anyhow::Result<ServerConfig> {
        let mut config = match &self.config {
            Some(path) => load_config_from(path)
                .with_context(|| format!("failed to load config from {}", path.display()))?,
            None => load_config().context("failed to load config")?,
        };

        if let Some(label) = self.host_label {
            config.server.host_label = label;
        }
        if let Some(port) = self.session_port {
            config.network.session_port = port;
        }
        if let Some(port) = self.discovery_port {
            config.network.discovery_port = port;
        }
        if let Some(dir) = self.identity_dir {
            config.server.identity_dir = Some(dir);
        }
        if let Some(level) = self.log_level {
            config.server.log_level = level;
        }
        Ok(config)
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Cli::parse().into_server_config()?;

    // `RUST_LOG` wins over the configured level.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.server.log_level)),
        )
        .init();

    info!(
        "AirPoint server starting: label={}, session port={}, discovery port={}",
        config.server.host_label, config.network.session_port, config.network.discovery_port
    );

    let orchestrator = Orchestrator::new(
        config,
        Arc::new(CryptoContext::new()),
        Arc::new(LoggingHandler),
    );
    orchestrator
        .start()
        .await
        .context("server failed to start")?;

    println!("Pairing code: {}", orchestrator.pairing_code());
    info!("AirPoint server ready.  Press Ctrl-C to exit.");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl+C")?;
    info!("shutdown signal received");

    orchestrator.stop().await.context("server failed to stop")?;
    info!("AirPoint server stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
