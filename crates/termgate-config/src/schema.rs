//! Raw configuration schema (as parsed from TOML)

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::IpAddr;
use std::path::PathBuf;

use crate::CURRENT_CONFIG_VERSION;

/// Raw configuration as parsed from TOML
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawConfig {
    /// Config schema version
    pub config_version: u32,

    #[serde(default)]
    pub server: RawServerConfig,

    #[serde(default)]
    pub auth: RawAuthConfig,

    #[serde(default)]
    pub ledger: RawLedgerConfig,

    #[serde(default)]
    pub shell: RawShellConfig,

    #[serde(default)]
    pub audit: RawAuditConfig,
}

impl Default for RawConfig {
    fn default() -> Self {
        Self {
            config_version: CURRENT_CONFIG_VERSION,
            server: Default::default(),
            auth: Default::default(),
            ledger: Default::default(),
            shell: Default::default(),
            audit: Default::default(),
        }
    }
}

/// Listener settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawServerConfig {
    /// Address to bind (default: 0.0.0.0)
    pub bind: Option<IpAddr>,

    /// TCP port (default: 6060)
    pub port: Option<u32>,
}

/// Handshake and ban settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawAuthConfig {
    /// Shared token; absent means open mode
    pub token: Option<String>,

    /// Time allowed to present a token
    pub timeout_ms: Option<u64>,

    /// Failures from one origin before it is banned
    pub max_failures: Option<u32>,

    /// Ban length
    pub ban_seconds: Option<u64>,

    /// Delay between a failure acknowledgment and the close
    pub failure_grace_ms: Option<u64>,
}

/// Security ledger housekeeping
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawLedgerConfig {
    pub sweep_interval_seconds: Option<u64>,

    /// Records idle this long (and not banned) are forgotten
    pub idle_eviction_seconds: Option<u64>,
}

/// Shell spawned for each authenticated session
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawShellConfig {
    /// Program to run (default: $SHELL, else bash)
    pub program: Option<String>,

    #[serde(default)]
    pub args: Vec<String>,

    pub cols: Option<u16>,

    pub rows: Option<u16>,

    /// Working directory; `~` expands to the user's home
    pub cwd: Option<PathBuf>,

    /// Extra environment on top of the inherited one
    #[serde(default)]
    pub env: HashMap<String, String>,
}

/// Audit sink selection
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawAuditConfig {
    pub enabled: Option<bool>,

    pub backend: Option<AuditBackend>,

    /// Log file or database path
    pub path: Option<PathBuf>,
}

/// Where audit events are written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditBackend {
    /// Append-only text log, one line per event
    #[default]
    File,
    /// SQLite table of JSON events
    Sqlite,
}
