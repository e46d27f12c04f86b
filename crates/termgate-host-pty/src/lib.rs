//! Pseudo-terminal shell host for termgate
//!
//! Provides:
//! - Interactive shell spawning inside a PTY (`TERM=xterm-256color`)
//! - Output relay as ordered chunks, input relay through a writer thread
//! - Idempotent kill
//! - Exit observation, reported once

mod adapter;
mod process;

pub use adapter::*;
pub use process::*;
