//! Shell host interfaces for termgate
//!
//! This crate defines the contract between a session and the interactive
//! shell it supervises. It contains no platform code itself; see
//! `termgate-host-pty` for the pseudo-terminal implementation.

mod handle;
mod mock;
mod traits;

pub use handle::*;
pub use mock::*;
pub use traits::*;
