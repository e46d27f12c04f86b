//! Shell handle and exit status

use serde::{Deserialize, Serialize};
use termgate_util::SessionId;

/// Identifies a running shell on the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShellHandle {
    /// Session that owns the shell
    pub session_id: SessionId,

    /// Process ID, when the host exposes one
    pub pid: Option<u32>,
}

impl ShellHandle {
    pub fn new(session_id: SessionId, pid: Option<u32>) -> Self {
        Self { session_id, pid }
    }
}

/// How a shell ended
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExitStatus {
    /// Exit code if the process exited normally
    pub code: Option<i32>,

    /// Signal name if the process was killed by one
    pub signal: Option<String>,
}

impl ExitStatus {
    pub fn success() -> Self {
        Self::with_code(0)
    }

    pub fn with_code(code: i32) -> Self {
        Self {
            code: Some(code),
            signal: None,
        }
    }

    pub fn signaled(signal: impl Into<String>) -> Self {
        Self {
            code: None,
            signal: Some(signal.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == Some(0)
    }
}
