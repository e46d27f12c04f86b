//! Session error taxonomy

use termgate_api::CloseCode;
use thiserror::Error;

/// Why a session failed. Always local to one session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("authentication failed")]
    AuthFailed,

    #[error("authentication timed out")]
    AuthTimeout,

    #[error("origin is banned")]
    Banned {
        /// Refused at connect rather than banned by this session's failure
        on_connect: bool,
    },

    #[error("shell spawn failed: {0}")]
    SpawnFailed(String),

    #[error("relay error: {0}")]
    RelayError(String),
}

/// How a session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The peer closed or dropped the connection
    ClientClosed,
    /// The shell exited on its own
    ShellExited,
    /// The gateway is shutting down
    Shutdown,
    Failed(SessionError),
}

impl CloseReason {
    pub fn close_code(&self) -> CloseCode {
        match self {
            CloseReason::ClientClosed | CloseReason::ShellExited => CloseCode::Normal,
            CloseReason::Shutdown => CloseCode::GoingAway,
            CloseReason::Failed(err) => match err {
                SessionError::AuthFailed => CloseCode::Failed,
                SessionError::AuthTimeout => CloseCode::AuthTimeout,
                SessionError::Banned { on_connect: false } => CloseCode::BannedNow,
                SessionError::Banned { on_connect: true } => CloseCode::BannedOnConnect,
                SessionError::SpawnFailed(_) | SessionError::RelayError(_) => {
                    CloseCode::InternalError
                }
            },
        }
    }
}

impl From<SessionError> for CloseReason {
    fn from(err: SessionError) -> Self {
        CloseReason::Failed(err)
    }
}
