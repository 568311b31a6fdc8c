//! TOML-based configuration for the server.
//!
//! Reads and writes [`ServerConfig`] at the platform-appropriate path:
//! - Windows:  `%APPDATA%\AirPoint\config.toml`
//! - Linux:    `~/.config/airpoint/config.toml`
//! - macOS:    `~/Library/Application Support/AirPoint/config.toml`
//!
//! Every field carries a serde default, so a missing file, a missing section,
//! or a missing key all fall back to the built-in values:
//!
//! ```toml
//! [server]
//! host_label = "studio-pc"
//!
//! [network]
//! session_port = 1234
//! discovery_port = 1235
//!
//! [timing]
//! broadcast_interval_ms = 1000
//! ```

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use airpoint_core::{DEFAULT_DISCOVERY_PORT, DEFAULT_SESSION_PORT};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// A field holds a value that cannot be used.
    #[error("invalid value for {field}: {value:?}")]
    InvalidValue { field: &'static str, value: String },
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level server configuration stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ServerConfig {
    #[serde(default)]
    pub server: GeneralConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub timing: TimingConfig,
}

/// Identity and presentation settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeneralConfig {
    /// Label advertised to clients; defaults to the machine's host name.
    #[serde(default = "default_host_label")]
    pub host_label: String,
    /// `tracing` level used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Directory holding `identity.key` and `identity.crt`.  Defaults to the
    /// config directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_dir: Option<PathBuf>,
}

/// Socket settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkConfig {
    /// Address the session listener binds to.  `"0.0.0.0"` binds all interfaces.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// TCP port of the session transport.
    #[serde(default = "default_session_port")]
    pub session_port: u16,
    /// UDP port discovery datagrams are sent to.
    #[serde(default = "default_discovery_port")]
    pub discovery_port: u16,
    /// Destination address of discovery datagrams.
    #[serde(default = "default_broadcast_address")]
    pub broadcast_address: String,
}

/// Loop periods and timeouts, in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimingConfig {
    #[serde(default = "default_broadcast_interval_ms")]
    pub broadcast_interval_ms: u64,
    /// How often the acceptor wakes to check its stop flag.
    #[serde(default = "default_accept_poll_ms")]
    pub accept_poll_ms: u64,
    /// How often a session wakes to check its stop flag.
    #[serde(default = "default_session_poll_ms")]
    pub session_poll_ms: u64,
    /// How long a new connection may take to send its public key.
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_host_label() -> String {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_else(|_| "airpoint-server".to_string())
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}
fn default_session_port() -> u16 {
    DEFAULT_SESSION_PORT
}
fn default_discovery_port() -> u16 {
    DEFAULT_DISCOVERY_PORT
}
fn default_broadcast_address() -> String {
    "255.255.255.255".to_string()
}
fn default_broadcast_interval_ms() -> u64 {
    1000
}
fn default_accept_poll_ms() -> u64 {
    200
}
fn default_session_poll_ms() -> u64 {
    500
}
fn default_handshake_timeout_ms() -> u64 {
    10_000
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            host_label: default_host_label(),
            log_level: default_log_level(),
            identity_dir: None,
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            session_port: default_session_port(),
            discovery_port: default_discovery_port(),
            broadcast_address: default_broadcast_address(),
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            broadcast_interval_ms: default_broadcast_interval_ms(),
            accept_poll_ms: default_accept_poll_ms(),
            session_poll_ms: default_session_poll_ms(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
        }
    }
}

// ── Resolved accessors ────────────────────────────────────────────────────────

impl NetworkConfig {
    /// Socket address of the session listener.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] if `bind_address` is not an IP.
    pub fn session_addr(&self) -> Result<SocketAddr, ConfigError> {
        let ip = parse_ip("network.bind_address", &self.bind_address)?;
        Ok(SocketAddr::new(ip, self.session_port))
    }

    /// Destination of discovery datagrams.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] if `broadcast_address` is not an IP.
    pub fn broadcast_target(&self) -> Result<SocketAddr, ConfigError> {
        let ip = parse_ip("network.broadcast_address", &self.broadcast_address)?;
        Ok(SocketAddr::new(ip, self.discovery_port))
    }
}

fn parse_ip(field: &'static str, value: &str) -> Result<IpAddr, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        field,
        value: value.to_string(),
    })
}

impl TimingConfig {
    pub fn broadcast_interval(&self) -> Duration {
        Duration::from_millis(self.broadcast_interval_ms.max(1))
    }

    pub fn accept_poll(&self) -> Duration {
        Duration::from_millis(self.accept_poll_ms.max(1))
    }

    pub fn session_poll(&self) -> Duration {
        Duration::from_millis(self.session_poll_ms.max(1))
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms.max(1))
    }
}

impl ServerConfig {
    /// Directory for the identity files: the configured one, else the
    /// platform config directory.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NoPlatformConfigDir`] when neither is available.
    pub fn identity_dir(&self) -> Result<PathBuf, ConfigError> {
        match &self.server.identity_dir {
            Some(dir) => Ok(dir.clone()),
            None => config_dir(),
        }
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Determines the platform-appropriate directory for the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] when the platform config base
/// directory cannot be determined from the environment.
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    platform_config_dir().ok_or(ConfigError::NoPlatformConfigDir)
}

/// Resolves the full path to the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] if the base directory cannot be
/// determined.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.toml"))
}

/// Loads the config from the platform path, returning defaults if the file
/// does not yet exist.
///
/// # Errors
///
/// See [`load_config_from`].
pub fn load_config() -> Result<ServerConfig, ConfigError> {
    load_config_from(&config_file_path()?)
}

/// Loads the config from `path`, returning defaults if the file does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config_from(path: &Path) -> Result<ServerConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ServerConfig::default()),
        Err(e) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Persists `config` to `path`, creating the parent directory if needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config_to(config: &ServerConfig, path: &Path) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Resolves the platform config directory, including the `AirPoint` leaf.
fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("AirPoint"))
    }

    #[cfg(target_os = "linux")]
    {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("airpoint"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("AirPoint")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
