//! Default paths for termgate components
//!
//! - Config: `$XDG_CONFIG_HOME/termgate/config.toml` or `~/.config/termgate/config.toml`
//! - Audit log: `./logs/terminal-<timestamp>.log`
//! - Shell working directory: the user's home

use chrono::{DateTime, Local};
use std::path::PathBuf;

use crate::file_timestamp;

/// Environment variable for overriding the config path
pub const TERMGATE_CONFIG_ENV: &str = "TERMGATE_CONFIG";

/// Application subdirectory name
const APP_DIR: &str = "termgate";

/// Get the default config file path.
///
/// Order of precedence:
/// 1. `$TERMGATE_CONFIG` environment variable (if set)
/// 2. The platform config dir (`$XDG_CONFIG_HOME` or `~/.config` on Linux)
/// 3. `~/.config/termgate/config.toml`
pub fn default_config_path() -> PathBuf {
    if let Ok(path) = std::env::var(TERMGATE_CONFIG_ENV) {
        return PathBuf::from(path);
    }

    dirs::config_dir()
        .unwrap_or_else(|| home_dir().join(".config"))
        .join(APP_DIR)
        .join("config.toml")
}

/// Audit log path used when none is configured: a fresh file per run under
/// `logs/` in the current directory.
pub fn default_audit_log_path(started_at: &DateTime<Local>) -> PathBuf {
    let base = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    base.join("logs")
        .join(format!("terminal-{}.log", file_timestamp(started_at)))
}

/// The user's home directory, falling back to the current directory.
pub fn home_dir() -> PathBuf {
    dirs::home_dir()
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_path_contains_app_dir() {
        if std::env::var(TERMGATE_CONFIG_ENV).is_ok() {
            return;
        }
        let path = default_config_path();
        assert!(path.to_string_lossy().contains("termgate"));
        assert!(path.to_string_lossy().ends_with("config.toml"));
    }

    #[test]
    fn audit_log_path_is_timestamped() {
        let path = default_audit_log_path(&crate::now());
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("terminal-"));
        assert!(name.ends_with(".log"));
        assert_eq!(path.parent().unwrap().file_name().unwrap(), "logs");
    }
}
