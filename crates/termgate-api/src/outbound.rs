//! Server -> client frames

use serde::{Deserialize, Serialize};
use termgate_util::SessionId;

/// Outcome carried by an auth acknowledgment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthStatus {
    Success,
    Failed,
    Timeout,
}

/// Structured frames sent by the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Result of the handshake
    Auth {
        status: AuthStatus,
        message: String,
        #[serde(rename = "sessionId", default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        /// Present (true) only when the server has no token configured
        #[serde(rename = "noAuth", default, skip_serializing_if = "Option::is_none")]
        no_auth: Option<bool>,
    },

    /// The shell behind an authenticated session terminated
    ShellExit {
        #[serde(rename = "exitCode")]
        exit_code: Option<i32>,
        signal: Option<String>,
    },
}

impl ServerMessage {
    pub fn auth_success(session_id: &SessionId) -> Self {
        ServerMessage::Auth {
            status: AuthStatus::Success,
            message: "Authentication successful".into(),
            session_id: Some(session_id.to_string()),
            no_auth: None,
        }
    }

    /// Success in open mode: accepted because no gate exists
    pub fn auth_open(session_id: &SessionId) -> Self {
        ServerMessage::Auth {
            status: AuthStatus::Success,
            message: "Connected (no authentication required)".into(),
            session_id: Some(session_id.to_string()),
            no_auth: Some(true),
        }
    }

    pub fn auth_failed() -> Self {
        ServerMessage::Auth {
            status: AuthStatus::Failed,
            message: "Invalid authentication token".into(),
            session_id: None,
            no_auth: None,
        }
    }

    pub fn auth_timeout() -> Self {
        ServerMessage::Auth {
            status: AuthStatus::Timeout,
            message: "Authentication timeout".into(),
            session_id: None,
            no_auth: None,
        }
    }

    pub fn shell_exit(exit_code: Option<i32>, signal: Option<String>) -> Self {
        ServerMessage::ShellExit { exit_code, signal }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
