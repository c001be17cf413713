//! TOML-based configuration for the node.
//!
//! Reads and writes `NodeConfig` to the platform-appropriate config file:
//! - Windows:  `%APPDATA%\Swoosh\config.toml`
//! - Linux:    `~/.config/swoosh/config.toml`
//! - macOS:    `~/Library/Application Support/Swoosh/config.toml`
//!
//! An explicit path (from `--config`) replaces the platform path.
//!
//! ```toml
//! [node]
//! name = "alice"
//! interface = "eth0"
//!
//! [discovery]
//! port = 9999
//! sentinel = "0.1.1.1"
//!
//! [transport]
//! mode = "session"
//! ```
//!
//! Every field has a `#[serde(default = "...")]` helper, so a missing file,
//! an empty file or a file with only some sections all load.

use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use swoosh_core::protocol::discovery::{DEFAULT_DISCOVERY_PORT, DEFAULT_SENTINEL};
use thiserror::Error;

use crate::infrastructure::network::legacy::DEFAULT_LEGACY_PORT;
use crate::infrastructure::network::session_manager::DEFAULT_SESSION_PORT;

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

    /// The values parse but cannot work together.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level node configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NodeConfig {
    #[serde(default)]
    pub node: NodeSection,
    #[serde(default)]
    pub discovery: DiscoverySection,
    #[serde(default)]
    pub session: SessionSection,
    #[serde(default)]
    pub transport: TransportSection,
}

/// Identity and logging.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeSection {
    /// Display name; sent as 16 ASCII bytes, longer names are truncated.
    #[serde(default = "default_name")]
    pub name: String,
    /// Interface to announce and capture on.  Empty means "not configured".
    #[serde(default)]
    pub interface: String,
    /// `tracing` filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Link-layer discovery settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiscoverySection {
    /// UDP port identity responses are sent to and received on.
    #[serde(default = "default_discovery_port")]
    pub port: u16,
    /// Address every probe targets.  Must be unassigned on the LAN.
    #[serde(default = "default_sentinel")]
    pub sentinel: Ipv4Addr,
    #[serde(default = "default_announce_interval_secs")]
    pub announce_interval_secs: u64,
}

/// TCP session settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionSection {
    #[serde(default = "default_session_port")]
    pub port: u16,
    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,
    #[serde(default = "default_handshake_timeout_secs")]
    pub handshake_timeout_secs: u64,
}

/// Which encrypted transport the node runs.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    /// TCP sessions with a fresh key per connection.
    #[default]
    Session,
    /// UDP datagrams with one key per peer address.
    Legacy,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransportSection {
    #[serde(default)]
    pub mode: TransportMode,
    #[serde(default = "default_legacy_port")]
    pub legacy_port: u16,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_name() -> String {
    "swoosh".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_discovery_port() -> u16 {
    DEFAULT_DISCOVERY_PORT
}
fn default_sentinel() -> Ipv4Addr {
    DEFAULT_SENTINEL
}
fn default_announce_interval_secs() -> u64 {
    3
}
fn default_session_port() -> u16 {
    DEFAULT_SESSION_PORT
}
fn default_bind_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}
fn default_handshake_timeout_secs() -> u64 {
    10
}
fn default_legacy_port() -> u16 {
    DEFAULT_LEGACY_PORT
}

impl Default for NodeSection {
    fn default() -> Self {
        Self {
            name: default_name(),
            interface: String::new(),
            log_level: default_log_level(),
        }
    }
}

impl Default for DiscoverySection {
    fn default() -> Self {
        Self {
            port: default_discovery_port(),
            sentinel: default_sentinel(),
            announce_interval_secs: default_announce_interval_secs(),
        }
    }
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            port: default_session_port(),
            bind_address: default_bind_address(),
            handshake_timeout_secs: default_handshake_timeout_secs(),
        }
    }
}

impl Default for TransportSection {
    fn default() -> Self {
        Self {
            mode: TransportMode::default(),
            legacy_port: default_legacy_port(),
        }
    }
}

impl NodeConfig {
    /// Checks cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if the legacy channel would share the
    /// discovery port or if an interval is zero.  Port 0 asks the OS for a
    /// free port and never conflicts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.transport.mode == TransportMode::Legacy
            && self.transport.legacy_port != 0
            && self.transport.legacy_port == self.discovery.port
        {
            return Err(ConfigError::Invalid(format!(
                "legacy_port {} must differ from the discovery port",
                self.transport.legacy_port
            )));
        }
        if self.discovery.announce_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "announce_interval_secs must be at least 1".to_string(),
            ));
        }
        if self.session.handshake_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "handshake_timeout_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn announce_interval(&self) -> Duration {
        Duration::from_secs(self.discovery.announce_interval_secs)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.session.handshake_timeout_secs)
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
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.toml"))
}

/// Loads `NodeConfig` from `path` (or the platform path when `None`),
/// returning defaults if the file does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config(path: Option<&Path>) -> Result<NodeConfig, ConfigError> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => config_file_path()?,
    };

    match std::fs::read_to_string(&path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(NodeConfig::default()),
        Err(source) => Err(ConfigError::Io { path, source }),
    }
}

/// Writes `config` to `path` (or the platform path when `None`), creating
/// the directory if needed.  Returns the path written.
pub fn save_config(config: &NodeConfig, path: Option<&Path>) -> Result<PathBuf, ConfigError> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => config_file_path()?,
    };

    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(&path, content).map_err(|source| ConfigError::Io {
        path: path.clone(),
        source,
    })?;
    Ok(path)
}

fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("Swoosh"))
    }

    #[cfg(target_os = "linux")]
    {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("swoosh"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("Swoosh")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
