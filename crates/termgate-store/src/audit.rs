//! Audit event types

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use termgate_util::SessionId;

/// Types of audit events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEventType {
    /// Gateway is accepting connections
    ServerStarted { listen: String, auth_required: bool },

    /// Gateway stopped accepting connections
    ServerStopped { reason: String },

    /// Connection accepted and a session created
    ClientConnected { session_id: SessionId, origin: IpAddr },

    /// Connection refused because the origin is banned
    BannedOnConnect { origin: IpAddr },

    /// A credential frame arrived
    AuthAttempt {
        session_id: SessionId,
        origin: IpAddr,
        /// JSON auth envelope rather than a bare token
        structured: bool,
    },

    AuthSucceeded {
        session_id: SessionId,
        origin: IpAddr,
        /// Accepted only because no token is configured
        no_auth: bool,
    },

    AuthFailed {
        session_id: SessionId,
        origin: IpAddr,
        failures: u32,
        /// Masked prefix of the presented token
        token_hint: String,
    },

    /// Origin crossed the failure threshold
    OriginBanned {
        session_id: SessionId,
        origin: IpAddr,
        failures: u32,
        ban_seconds: u64,
    },

    AuthTimedOut { session_id: SessionId, origin: IpAddr },

    ShellSpawned {
        session_id: SessionId,
        program: String,
        pid: Option<u32>,
    },

    SpawnFailed { session_id: SessionId, error: String },

    /// One completed input line
    Command {
        session_id: SessionId,
        origin: IpAddr,
        line: String,
    },

    /// Interrupt / end-of-transmission / suspend typed by the user
    ControlKey { session_id: SessionId, key: String },

    ShellExited {
        session_id: SessionId,
        code: Option<i32>,
        signal: Option<String>,
    },

    ShellKilled { session_id: SessionId },

    /// Sending to the peer failed after authentication
    RelayError { session_id: SessionId, error: String },

    Disconnected {
        session_id: SessionId,
        origin: IpAddr,
        code: u16,
        authenticated: bool,
    },
}

impl AuditEventType {
    /// Coarse category used as the line-log tag
    pub fn category(&self) -> &'static str {
        match self {
            AuditEventType::ServerStarted { .. }
            | AuditEventType::ServerStopped { .. }
            | AuditEventType::ClientConnected { .. }
            | AuditEventType::ShellSpawned { .. }
            | AuditEventType::ShellExited { .. }
            | AuditEventType::ShellKilled { .. }
            | AuditEventType::Disconnected { .. } => "INFO",
            AuditEventType::BannedOnConnect { .. } | AuditEventType::OriginBanned { .. } => {
                "SECURITY"
            }
            AuditEventType::AuthAttempt { .. }
            | AuditEventType::AuthSucceeded { .. }
            | AuditEventType::AuthFailed { .. } => "AUTH",
            AuditEventType::AuthTimedOut { .. } => "WARN",
            AuditEventType::Command { .. } => "CMD",
            AuditEventType::ControlKey { .. } => "INPUT",
            AuditEventType::SpawnFailed { .. } | AuditEventType::RelayError { .. } => "ERROR",
        }
    }

    /// Session the event belongs to, if any
    pub fn session_id(&self) -> Option<&SessionId> {
        match self {
            AuditEventType::ServerStarted { .. }
            | AuditEventType::ServerStopped { .. }
            | AuditEventType::BannedOnConnect { .. } => None,
            AuditEventType::ClientConnected { session_id, .. }
            | AuditEventType::AuthAttempt { session_id, .. }
            | AuditEventType::AuthSucceeded { session_id, .. }
            | AuditEventType::AuthFailed { session_id, .. }
            | AuditEventType::OriginBanned { session_id, .. }
            | AuditEventType::AuthTimedOut { session_id, .. }
            | AuditEventType::ShellSpawned { session_id, .. }
            | AuditEventType::SpawnFailed { session_id, .. }
            | AuditEventType::Command { session_id, .. }
            | AuditEventType::ControlKey { session_id, .. }
            | AuditEventType::ShellExited { session_id, .. }
            | AuditEventType::ShellKilled { session_id }
            | AuditEventType::RelayError { session_id, .. }
            | AuditEventType::Disconnected { session_id, .. } => Some(session_id),
        }
    }
}

impl fmt::Display for AuditEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuditEventType::ServerStarted { listen, auth_required } => {
                write!(f, "Server started on {} auth_required={}", listen, auth_required)
            }
            AuditEventType::ServerStopped { reason } => write!(f, "Server stopped ({})", reason),
            AuditEventType::ClientConnected { origin, .. } => {
                write!(f, "Client connected from {}", origin)
            }
            AuditEventType::BannedOnConnect { origin } => {
                write!(f, "Banned IP {} rejected", origin)
            }
            AuditEventType::AuthAttempt {
                origin, structured, ..
            } => {
                let form = if *structured { "envelope" } else { "bare token" };
                write!(f, "Attempt from {} ({})", origin, form)
            }
            AuditEventType::AuthSucceeded { no_auth: true, .. } => {
                write!(f, "ACCEPTED (no-auth-configured)")
            }
            AuditEventType::AuthSucceeded { .. } => write!(f, "SUCCESS"),
            AuditEventType::AuthFailed { failures, token_hint, .. } => write!(
                f,
                "FAILED - Invalid token (received: {}) attempt={}",
                token_hint, failures
            ),
            AuditEventType::OriginBanned {
                origin,
                failures,
                ban_seconds,
                ..
            } => write!(
                f,
                "IP {} banned for {}s ({} fails)",
                origin, ban_seconds, failures
            ),
            AuditEventType::AuthTimedOut { origin, .. } => {
                write!(f, "Authentication timeout for {}", origin)
            }
            AuditEventType::ShellSpawned { program, pid, .. } => match pid {
                Some(pid) => write!(f, "Spawned shell {} PID={}", program, pid),
                None => write!(f, "Spawned shell {}", program),
            },
            AuditEventType::SpawnFailed { error, .. } => write!(f, "Shell spawn failed: {}", error),
            AuditEventType::Command { origin, line, .. } => {
                if line.is_empty() {
                    write!(f, "{} CMD: <EMPTY_LINE>", origin)
                } else {
                    write!(f, "{} CMD: {}", origin, line)
                }
            }
            AuditEventType::ControlKey { key, .. } => write!(f, "{}", key),
            AuditEventType::ShellExited { code, signal, .. } => write!(
                f,
                "Shell exited code={} signal={}",
                code.map(|c| c.to_string()).unwrap_or_else(|| "none".into()),
                signal.as_deref().unwrap_or("none")
            ),
            AuditEventType::ShellKilled { .. } => write!(f, "Shell process killed"),
            AuditEventType::RelayError { error, .. } => write!(f, "Send failed: {}", error),
            AuditEventType::Disconnected {
                code, authenticated, ..
            } => write!(
                f,
                "Disconnected code={} authenticated={}",
                code, authenticated
            ),
        }
    }
}

/// Full audit event with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Unique event ID (assigned by stores that number events)
    pub id: i64,

    /// Event timestamp
    pub timestamp: DateTime<Local>,

    /// Event type and details
    pub event: AuditEventType,
}

impl AuditEvent {
    pub fn new(event: AuditEventType) -> Self {
        Self {
            id: 0,
            timestamp: termgate_util::now(),
            event,
        }
    }

    /// Render as a single log line: `<rfc3339> <CATEGORY> [<session>] <detail>`
    pub fn to_line(&self) -> String {
        let ts = self.timestamp.to_rfc3339();
        match self.event.session_id() {
            Some(id) => format!("{} {} [{}] {}", ts, self.event.category(), id.short(), self.event),
            None => format!("{} {} {}", ts, self.event.category(), self.event),
        }
    }
}
