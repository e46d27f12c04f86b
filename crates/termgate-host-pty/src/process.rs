//! PTY-backed shell process

use portable_pty::{ChildKiller, CommandBuilder, MasterPty, PtySize, native_pty_system};
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, mpsc as std_mpsc};
use std::thread;
use termgate_host_api::{
    ExitStatus, HostError, HostResult, ShellControl, ShellEvent, SpawnOptions,
};
use termgate_util::SessionId;
use tokio::sync::mpsc;
use tracing::{debug, warn};

const READ_BUFFER_BYTES: usize = 4096;
const TERM: &str = "xterm-256color";

/// A shell running inside a pseudo-terminal
pub struct PtyProcess {
    pub pid: Option<u32>,
    input_tx: Mutex<Option<std_mpsc::Sender<Vec<u8>>>>,
    killer: Mutex<Box<dyn ChildKiller + Send + Sync>>,
    exited: Arc<AtomicBool>,
    killed: AtomicBool,
    // Dropping the master closes the terminal
    _master: Mutex<Box<dyn MasterPty + Send>>,
}

impl PtyProcess {
    /// Spawn `options.program` in a fresh PTY.
    ///
    /// Output chunks and the final exit status are sent on `events`.
    pub fn spawn(
        session_id: &SessionId,
        options: &SpawnOptions,
        events: mpsc::UnboundedSender<ShellEvent>,
    ) -> HostResult<Self> {
        let pair = native_pty_system()
            .openpty(PtySize {
                rows: options.rows,
                cols: options.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| HostError::SpawnFailed(format!("Failed to open PTY: {}", e)))?;

        let mut cmd = CommandBuilder::new(&options.program);
        cmd.args(&options.args);
        let cwd = options.cwd.clone().unwrap_or_else(termgate_util::home_dir);
        cmd.cwd(cwd);
        for (key, value) in &options.env {
            cmd.env(key, value);
        }
        cmd.env("TERM", TERM);

        let mut child = pair.slave.spawn_command(cmd).map_err(|e| {
            HostError::SpawnFailed(format!("Failed to spawn '{}': {}", options.program, e))
        })?;
        // The child holds its own copy of the slave side
        drop(pair.slave);

        let pid = child.process_id();
        let killer = child.clone_killer();

        let mut reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| HostError::SpawnFailed(format!("Failed to clone PTY reader: {}", e)))?;
        let mut writer = pair
            .master
            .take_writer()
            .map_err(|e| HostError::SpawnFailed(format!("Failed to take PTY writer: {}", e)))?;

        let exited = Arc::new(AtomicBool::new(false));

        let (input_tx, input_rx) = std_mpsc::channel::<Vec<u8>>();
        thread::Builder::new()
            .name(format!("termgate-in-{}", session_id.short()))
            .spawn(move || {
                for data in input_rx {
                    if writer.write_all(&data).and_then(|_| writer.flush()).is_err() {
                        break;
                    }
                }
            })
            .map_err(HostError::Io)?;

        let exited_flag = exited.clone();
        let thread_session = session_id.clone();
        thread::Builder::new()
            .name(format!("termgate-out-{}", session_id.short()))
            .spawn(move || {
                let mut buf = vec![0u8; READ_BUFFER_BYTES];
                loop {
                    match reader.read(&mut buf) {
                        Ok(0) => break,
                        Ok(n) => {
                            if events.send(ShellEvent::Output(buf[..n].to_vec())).is_err() {
                                break;
                            }
                        }
                        Err(_) => break,
                    }
                }

                let status = match child.wait() {
                    Ok(status) => {
                        let signal = status.signal().map(str::to_string);
                        let code = if signal.is_some() {
                            None
                        } else {
                            i32::try_from(status.exit_code()).ok()
                        };
                        ExitStatus { code, signal }
                    }
                    Err(e) => {
                        warn!(session_id = %thread_session, error = %e, "Failed to reap shell");
                        ExitStatus::default()
                    }
                };

                if !exited_flag.swap(true, Ordering::SeqCst) {
                    debug!(
                        session_id = %thread_session,
                        code = ?status.code,
                        signal = ?status.signal,
                        "Shell exited"
                    );
                    let _ = events.send(ShellEvent::Exited(status));
                }
            })
            .map_err(HostError::Io)?;

        Ok(Self {
            pid,
            input_tx: Mutex::new(Some(input_tx)),
            killer: Mutex::new(killer),
            exited,
            killed: AtomicBool::new(false),
            _master: Mutex::new(pair.master),
        })
    }
}

impl ShellControl for PtyProcess {
    fn write(&self, data: &[u8]) -> HostResult<()> {
        if self.has_exited() {
            return Ok(());
        }
        let guard = self.input_tx.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(tx) = guard.as_ref() {
            // A closed channel means the writer thread saw the PTY go away
            let _ = tx.send(data.to_vec());
        }
        Ok(())
    }

    fn kill(&self) -> HostResult<()> {
        if self.killed.swap(true, Ordering::SeqCst) || self.has_exited() {
            return Ok(());
        }

        self.input_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let result = self
            .killer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .kill();

        match result {
            Ok(()) => {
                debug!(pid = ?self.pid, "Killed shell");
                Ok(())
            }
            Err(_) if self.has_exited() => Ok(()),
            Err(e) if is_already_gone(&e) => Ok(()),
            Err(e) => Err(HostError::StopFailed(format!("Failed to kill shell: {}", e))),
        }
    }

    fn has_exited(&self) -> bool {
        self.exited.load(Ordering::SeqCst)
    }
}

#[cfg(unix)]
fn is_already_gone(e: &std::io::Error) -> bool {
    e.raw_os_error() == Some(nix::errno::Errno::ESRCH as i32)
}

#[cfg(not(unix))]
fn is_already_gone(_e: &std::io::Error) -> bool {
    false
}
