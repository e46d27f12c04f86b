//! Security ledger and session state machine for termgate
//!
//! This crate is the gatekeeping core, containing:
//! - The per-origin failure and ban ledger, shared by every session
//! - Token verification (constant-time) and token masking for logs
//! - Session state machine (AwaitingAuth -> Authenticated -> Closed)
//! - The command tap that turns relayed keystrokes into audit lines
//! - The session error taxonomy and its mapping to close codes
//!
//! Nothing here touches the network; the gateway drives sessions.

mod audit;
mod auth;
mod error;
mod ledger;
mod session;
mod tap;

pub use audit::*;
pub use auth::*;
pub use error::*;
pub use ledger::*;
pub use session::*;
pub use tap::*;
