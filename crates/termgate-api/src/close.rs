//! Application-level close codes

use serde::{Deserialize, Serialize};
use std::fmt;

/// Why the server closed a connection.
///
/// Each cause has a distinct numeric code so a client can branch on it
/// without parsing the reason string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CloseCode {
    /// Session ended normally (shell exited, client left)
    Normal,
    /// Server is shutting down
    GoingAway,
    /// Server-side failure (shell could not be started)
    InternalError,
    /// No token arrived before the deadline
    AuthTimeout,
    /// Wrong token; reconnecting is allowed
    Failed,
    /// This failure pushed the origin over the threshold
    BannedNow,
    /// Origin was already banned when it connected
    BannedOnConnect,
}

impl CloseCode {
    pub fn code(self) -> u16 {
        match self {
            CloseCode::Normal => 1000,
            CloseCode::GoingAway => 1001,
            CloseCode::InternalError => 1011,
            CloseCode::AuthTimeout => 4001,
            CloseCode::Failed => 4003,
            CloseCode::BannedNow => 4004,
            CloseCode::BannedOnConnect => 4005,
        }
    }

    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            1000 => Some(CloseCode::Normal),
            1001 => Some(CloseCode::GoingAway),
            1011 => Some(CloseCode::InternalError),
            4001 => Some(CloseCode::AuthTimeout),
            4003 => Some(CloseCode::Failed),
            4004 => Some(CloseCode::BannedNow),
            4005 => Some(CloseCode::BannedOnConnect),
            _ => None,
        }
    }

    /// Human-readable reason sent alongside the code
    pub fn reason(self) -> &'static str {
        match self {
            CloseCode::Normal => "Session ended",
            CloseCode::GoingAway => "Server shutting down",
            CloseCode::InternalError => "Shell could not be started",
            CloseCode::AuthTimeout => "Authentication timeout",
            CloseCode::Failed => "Authentication failed",
            CloseCode::BannedNow => "Too many failed attempts - IP banned",
            CloseCode::BannedOnConnect => "IP temporarily banned",
        }
    }
}

impl fmt::Display for CloseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.code(), self.reason())
    }
}
