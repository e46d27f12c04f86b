//! WebSocket gatekeeper for termgate
//!
//! Provides:
//! - TCP listener and WebSocket upgrade
//! - Ban check before any session exists
//! - One driver task per session (handshake, relay, teardown)
//! - Registry of live sessions for out-of-band command injection

mod driver;
mod registry;
mod server;

pub use registry::*;
pub use server::*;

use thiserror::Error;

/// Gateway errors
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Gateway not started")]
    NotStarted,

    #[error("No such authenticated session")]
    SessionNotFound,

    #[error("Session is closing")]
    SessionClosed,
}

pub type GatewayResult<T> = Result<T, GatewayError>;
