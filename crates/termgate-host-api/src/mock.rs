//! Mock shell host for testing

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use termgate_util::SessionId;
use tokio::sync::mpsc;

use crate::{
    ExitStatus, HostError, HostResult, ShellControl, ShellEvent, ShellHandle, ShellHost,
    ShellProcess, SpawnOptions,
};

/// A fake shell: records writes and lets tests drive output and exit
pub struct MockShell {
    pub session_id: SessionId,
    pub options: SpawnOptions,
    event_tx: Mutex<Option<mpsc::UnboundedSender<ShellEvent>>>,
    written: Mutex<Vec<u8>>,
    exited: AtomicBool,
    kills: AtomicUsize,
}

impl MockShell {
    fn new(
        session_id: SessionId,
        options: SpawnOptions,
    ) -> (Self, mpsc::UnboundedReceiver<ShellEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let shell = Self {
            session_id,
            options,
            event_tx: Mutex::new(Some(tx)),
            written: Mutex::new(Vec::new()),
            exited: AtomicBool::new(false),
            kills: AtomicUsize::new(0),
        };
        (shell, rx)
    }

    /// Push an output chunk as if the shell printed it
    pub fn emit_output(&self, data: impl Into<Vec<u8>>) {
        let guard = self.event_tx.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(tx) = guard.as_ref() {
            let _ = tx.send(ShellEvent::Output(data.into()));
        }
    }

    /// Simulate the shell exiting on its own
    pub fn simulate_exit(&self, status: ExitStatus) {
        self.finish(Some(status));
    }

    /// Everything written to the shell's input so far
    pub fn written(&self) -> Vec<u8> {
        self.written
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn written_string(&self) -> String {
        String::from_utf8_lossy(&self.written()).into_owned()
    }

    /// Number of times `kill` was called
    pub fn kill_count(&self) -> usize {
        self.kills.load(Ordering::SeqCst)
    }

    fn finish(&self, status: Option<ExitStatus>) {
        if self.exited.swap(true, Ordering::SeqCst) {
            return;
        }
        let tx = self
            .event_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let (Some(tx), Some(status)) = (tx, status) {
            let _ = tx.send(ShellEvent::Exited(status));
        }
    }
}

impl ShellControl for MockShell {
    fn write(&self, data: &[u8]) -> HostResult<()> {
        if self.has_exited() {
            return Ok(());
        }
        self.written
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(data);
        Ok(())
    }

    fn kill(&self) -> HostResult<()> {
        self.kills.fetch_add(1, Ordering::SeqCst);
        self.finish(None);
        Ok(())
    }

    fn has_exited(&self) -> bool {
        self.exited.load(Ordering::SeqCst)
    }
}

/// Mock shell host for unit/integration testing
pub struct MockHost {
    next_pid: AtomicU32,
    shells: Mutex<HashMap<SessionId, Arc<MockShell>>>,
    spawn_notify: Mutex<Option<mpsc::UnboundedSender<SessionId>>>,

    /// Configure spawn to fail
    pub fail_spawn: AtomicBool,
}

impl MockHost {
    pub fn new() -> Self {
        Self {
            next_pid: AtomicU32::new(1000),
            shells: Mutex::new(HashMap::new()),
            spawn_notify: Mutex::new(None),
            fail_spawn: AtomicBool::new(false),
        }
    }

    pub fn set_fail_spawn(&self, fail: bool) {
        self.fail_spawn.store(fail, Ordering::SeqCst);
    }

    /// Receive the session id of every shell spawned from now on
    pub fn subscribe_spawns(&self) -> mpsc::UnboundedReceiver<SessionId> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self
            .spawn_notify
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(tx);
        rx
    }

    /// All shells spawned so far
    pub fn shells(&self) -> Vec<Arc<MockShell>> {
        self.shells
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    pub fn shell(&self, session_id: &SessionId) -> Option<Arc<MockShell>> {
        self.shells
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(session_id)
            .cloned()
    }

    pub fn spawn_count(&self) -> usize {
        self.shells
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Default for MockHost {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ShellHost for MockHost {
    async fn spawn(
        &self,
        session_id: SessionId,
        options: SpawnOptions,
    ) -> HostResult<ShellProcess> {
        if self.fail_spawn.load(Ordering::SeqCst) {
            return Err(HostError::SpawnFailed("Mock spawn failure".into()));
        }

        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
        let (shell, events) = MockShell::new(session_id.clone(), options);
        let shell = Arc::new(shell);

        self.shells
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(session_id.clone(), shell.clone());

        if let Some(tx) = self
            .spawn_notify
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            let _ = tx.send(session_id.clone());
        }

        Ok(ShellProcess {
            handle: ShellHandle::new(session_id, Some(pid)),
            control: shell,
            events,
        })
    }
}
