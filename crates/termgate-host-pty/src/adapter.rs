//! PTY shell host implementation

use async_trait::async_trait;
use std::sync::Arc;
use termgate_host_api::{
    HostError, HostResult, ShellHandle, ShellHost, ShellProcess, SpawnOptions,
};
use termgate_util::SessionId;
use tokio::sync::mpsc;
use tracing::info;

use crate::process::PtyProcess;

/// Shell host that runs each shell inside its own pseudo-terminal
#[derive(Debug, Default)]
pub struct PtyHost;

impl PtyHost {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ShellHost for PtyHost {
    async fn spawn(
        &self,
        session_id: SessionId,
        options: SpawnOptions,
    ) -> HostResult<ShellProcess> {
        let (tx, rx) = mpsc::unbounded_channel();

        // Opening a PTY and forking are blocking syscalls
        let spawn_id = session_id.clone();
        let process =
            tokio::task::spawn_blocking(move || PtyProcess::spawn(&spawn_id, &options, tx))
                .await
                .map_err(|e| HostError::Internal(e.to_string()))??;

        info!(session_id = %session_id, pid = ?process.pid, "Shell spawned");

        Ok(ShellProcess {
            handle: ShellHandle::new(session_id, process.pid),
            control: Arc::new(process),
            events: rx,
        })
    }
}
