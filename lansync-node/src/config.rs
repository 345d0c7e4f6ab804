//! Load config from file and environment.

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use lansync_core::DEFAULT_BLOCK_SIZE;
use serde::Deserialize;

/// Node configuration. File: ~/.config/lansync/config.toml or /etc/lansync/config.toml.
/// Env overrides: LANSYNC_SHARED_DIR, LANSYNC_BLOCK_SIZE, LANSYNC_MULTICAST_GROUP,
/// LANSYNC_MULTICAST_PORT, LANSYNC_PEER_PORT, LANSYNC_SYNC_INTERVAL, LANSYNC_SCAN_INTERVAL.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Shared directory (default "shared").
    #[serde(default = "default_shared_dir")]
    pub shared_dir: PathBuf,
    /// Transfer and hashing block size in bytes (default 1 MiB).
    #[serde(default = "default_block_size")]
    pub block_size: u64,
    /// Discovery multicast group (default 239.255.255.250).
    #[serde(default = "default_multicast_group")]
    pub multicast_group: Ipv4Addr,
    /// Discovery UDP port (default 5007).
    #[serde(default = "default_multicast_port")]
    pub multicast_port: u16,
    /// Peer TCP port (default 5005).
    #[serde(default = "default_peer_port")]
    pub peer_port: u16,
    /// Seconds between reconciliation cycles (default 10).
    #[serde(default = "default_sync_interval")]
    pub sync_interval_secs: u64,
    /// Seconds a directory scan stays fresh (default 5).
    #[serde(default = "default_scan_interval")]
    pub scan_interval_secs: u64,
}

fn default_shared_dir() -> PathBuf {
    PathBuf::from("shared")
}
fn default_block_size() -> u64 {
    DEFAULT_BLOCK_SIZE
}
fn default_multicast_group() -> Ipv4Addr {
    Ipv4Addr::new(239, 255, 255, 250)
}
fn default_multicast_port() -> u16 {
    5007
}
fn default_peer_port() -> u16 {
    5005
}
fn default_sync_interval() -> u64 {
    10
}
fn default_scan_interval() -> u64 {
    5
}

impl Default for Config {
    fn default() -> Self {
        Self {
            shared_dir: default_shared_dir(),
            block_size: default_block_size(),
            multicast_group: default_multicast_group(),
            multicast_port: default_multicast_port(),
            peer_port: default_peer_port(),
            sync_interval_secs: default_sync_interval(),
            scan_interval_secs: default_scan_interval(),
        }
    }
}

impl Config {
    /// At least one second, so a zero setting cannot spin the reconciliation loop.
    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs.max(1))
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs)
    }

    /// Block size with 0 mapped to the default.
    pub fn block_size(&self) -> u64 {
        lansync_core::chunk::effective_block_size(self.block_size)
    }
}

/// Error reading an explicitly named config file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Load config: merge default, then config file (if present), then env vars.
/// An explicit `path` must exist and parse; the default search paths are best effort.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let mut c = match path {
        Some(p) => read_file(p)?,
        None => load_file().unwrap_or_default(),
    };
    apply_env(&mut c, |key| std::env::var(key).ok());
    Ok(c)
}

/// Apply `LANSYNC_*` overrides from `lookup`. Unparseable values are ignored.
fn apply_env(c: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(s) = lookup("LANSYNC_SHARED_DIR") {
        if !s.is_empty() {
            c.shared_dir = PathBuf::from(s);
        }
    }
    if let Some(v) = lookup("LANSYNC_BLOCK_SIZE").and_then(|s| s.parse().ok()) {
        c.block_size = v;
    }
    if let Some(v) = lookup("LANSYNC_MULTICAST_GROUP").and_then(|s| s.parse().ok()) {
        c.multicast_group = v;
    }
    if let Some(v) = lookup("LANSYNC_MULTICAST_PORT").and_then(|s| s.parse().ok()) {
        c.multicast_port = v;
    }
    if let Some(v) = lookup("LANSYNC_PEER_PORT").and_then(|s| s.parse().ok()) {
        c.peer_port = v;
    }
    if let Some(v) = lookup("LANSYNC_SYNC_INTERVAL").and_then(|s| s.parse().ok()) {
        c.sync_interval_secs = v;
    }
    if let Some(v) = lookup("LANSYNC_SCAN_INTERVAL").and_then(|s| s.parse().ok()) {
        c.scan_interval_secs = v;
    }
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/lansync/config.toml"));
    }
    out.push(PathBuf::from("/etc/lansync/config.toml"));
    out
}

fn load_file() -> Option<Config> {
    for p in config_paths() {
        if p.exists() {
            match read_file(&p) {
                Ok(c) => return Some(c),
                Err(e) => tracing::warn!(error = %e, "ignoring config file"),
            }
            break;
        }
    }
    None
}

fn read_file(path: &Path) -> Result<Config, ConfigError> {
    let s = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str::<Config>(&s).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}
