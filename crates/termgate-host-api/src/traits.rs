//! Shell host traits

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use termgate_util::SessionId;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::{ExitStatus, ShellHandle};

/// Errors from shell host operations
#[derive(Debug, Error)]
pub enum HostError {
    #[error("Spawn failed: {0}")]
    SpawnFailed(String),

    #[error("Stop failed: {0}")]
    StopFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type HostResult<T> = Result<T, HostError>;

/// Options for spawning an interactive shell
#[derive(Debug, Clone)]
pub struct SpawnOptions {
    pub program: String,
    pub args: Vec<String>,
    pub cols: u16,
    pub rows: u16,

    /// Working directory; the host's default when `None`
    pub cwd: Option<PathBuf>,

    /// Added on top of the inherited environment
    pub env: HashMap<String, String>,
}

impl Default for SpawnOptions {
    fn default() -> Self {
        Self {
            program: "bash".into(),
            args: Vec::new(),
            cols: 80,
            rows: 24,
            cwd: None,
            env: HashMap::new(),
        }
    }
}

/// Events a running shell reports to its session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellEvent {
    /// A chunk of terminal output, in order
    Output(Vec<u8>),

    /// The shell ended. Sent at most once, and always last.
    Exited(ExitStatus),
}

/// Control surface of a running shell
pub trait ShellControl: Send + Sync {
    /// Write bytes verbatim to the shell's input. A no-op once it has exited.
    fn write(&self, data: &[u8]) -> HostResult<()>;

    /// Kill the shell immediately. Idempotent; an already-dead shell is success.
    fn kill(&self) -> HostResult<()>;

    fn has_exited(&self) -> bool;
}

/// A spawned shell: its handle, control surface and event stream
pub struct ShellProcess {
    pub handle: ShellHandle,
    pub control: Arc<dyn ShellControl>,
    pub events: mpsc::UnboundedReceiver<ShellEvent>,
}

impl std::fmt::Debug for ShellProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShellProcess")
            .field("handle", &self.handle)
            .field("exited", &self.control.has_exited())
            .finish()
    }
}

/// Shell host trait - implemented by platform-specific hosts
#[async_trait]
pub trait ShellHost: Send + Sync {
    /// Spawn a new interactive shell for a session
    async fn spawn(
        &self,
        session_id: SessionId,
        options: SpawnOptions,
    ) -> HostResult<ShellProcess>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spawn_options_default_geometry() {
        let opts = SpawnOptions::default();
        assert_eq!((opts.cols, opts.rows), (80, 24));
        assert!(opts.cwd.is_none());
    }
}
