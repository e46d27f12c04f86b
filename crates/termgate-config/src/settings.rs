//! Validated configuration structures

use crate::schema::{
    AuditBackend, RawAuditConfig, RawAuthConfig, RawConfig, RawLedgerConfig, RawServerConfig,
    RawShellConfig,
};
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use termgate_util::home_dir;

pub const DEFAULT_PORT: u16 = 6060;
pub const DEFAULT_AUTH_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_MAX_FAILURES: u32 = 5;
pub const DEFAULT_BAN_SECONDS: u64 = 300;
pub const DEFAULT_FAILURE_GRACE_MS: u64 = 500;
pub const DEFAULT_SWEEP_INTERVAL_SECONDS: u64 = 60;
pub const DEFAULT_IDLE_EVICTION_SECONDS: u64 = 3600;
pub const DEFAULT_COLS: u16 = 80;
pub const DEFAULT_ROWS: u16 = 24;

/// Validated configuration ready for the gateway
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub ledger: LedgerConfig,
    pub shell: ShellConfig,
    pub audit: AuditConfig,
}

impl Config {
    /// Convert from raw config (after validation)
    pub fn from_raw(raw: RawConfig) -> Self {
        Self {
            server: ServerConfig::from_raw(raw.server),
            auth: AuthConfig::from_raw(raw.auth),
            ledger: LedgerConfig::from_raw(raw.ledger),
            shell: ShellConfig::from_raw(raw.shell),
            audit: AuditConfig::from_raw(raw.audit),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_raw(RawConfig::default())
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: IpAddr,
    pub port: u16,
}

impl ServerConfig {
    fn from_raw(raw: RawServerConfig) -> Self {
        Self {
            bind: raw.bind.unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED)),
            port: raw
                .port
                .and_then(|p| u16::try_from(p).ok())
                .unwrap_or(DEFAULT_PORT),
        }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }
}

/// Handshake and ban policy
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// None runs the gateway in open mode
    pub token: Option<String>,
    pub timeout: Duration,
    pub max_failures: u32,
    pub ban_duration: Duration,
    pub failure_grace: Duration,
}

impl AuthConfig {
    fn from_raw(raw: RawAuthConfig) -> Self {
        Self {
            token: raw.token,
            timeout: Duration::from_millis(raw.timeout_ms.unwrap_or(DEFAULT_AUTH_TIMEOUT_MS)),
            max_failures: raw.max_failures.unwrap_or(DEFAULT_MAX_FAILURES),
            ban_duration: Duration::from_secs(raw.ban_seconds.unwrap_or(DEFAULT_BAN_SECONDS)),
            failure_grace: Duration::from_millis(
                raw.failure_grace_ms.unwrap_or(DEFAULT_FAILURE_GRACE_MS),
            ),
        }
    }

    pub fn is_open(&self) -> bool {
        self.token.is_none()
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self::from_raw(RawAuthConfig::default())
    }
}

#[derive(Debug, Clone)]
pub struct LedgerConfig {
    pub sweep_interval: Duration,
    pub idle_eviction: Duration,
}

impl LedgerConfig {
    fn from_raw(raw: RawLedgerConfig) -> Self {
        Self {
            sweep_interval: Duration::from_secs(
                raw.sweep_interval_seconds
                    .unwrap_or(DEFAULT_SWEEP_INTERVAL_SECONDS),
            ),
            idle_eviction: Duration::from_secs(
                raw.idle_eviction_seconds
                    .unwrap_or(DEFAULT_IDLE_EVICTION_SECONDS),
            ),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ShellConfig {
    pub program: String,
    pub args: Vec<String>,
    pub cols: u16,
    pub rows: u16,
    pub cwd: PathBuf,
    pub env: HashMap<String, String>,
}

impl ShellConfig {
    fn from_raw(raw: RawShellConfig) -> Self {
        Self {
            program: raw.program.unwrap_or_else(default_shell_program),
            args: raw.args,
            cols: raw.cols.unwrap_or(DEFAULT_COLS),
            rows: raw.rows.unwrap_or(DEFAULT_ROWS),
            cwd: raw.cwd.map(|p| expand_home(&p)).unwrap_or_else(home_dir),
            env: raw.env,
        }
    }
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self::from_raw(RawShellConfig::default())
    }
}

#[derive(Debug, Clone)]
pub struct AuditConfig {
    pub enabled: bool,
    pub backend: AuditBackend,
    /// None means "pick a timestamped default at startup"
    pub path: Option<PathBuf>,
}

impl AuditConfig {
    fn from_raw(raw: RawAuditConfig) -> Self {
        Self {
            enabled: raw.enabled.unwrap_or(true),
            backend: raw.backend.unwrap_or_default(),
            path: raw.path,
        }
    }
}

/// The login shell from `$SHELL`, else a platform default
pub fn default_shell_program() -> String {
    if cfg!(windows) {
        return "powershell.exe".into();
    }

    std::env::var("SHELL")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| "bash".into())
}

fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => home_dir().join(rest),
        Err(_) => path.to_path_buf(),
    }
}
