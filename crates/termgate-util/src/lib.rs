//! Shared utilities for termgate
//!
//! This crate provides:
//! - ID types (SessionId)
//! - Time utilities (monotonic time for bans and deadlines, wall-clock for logs)
//! - Default paths for config, audit log, and shell working directory

mod ids;
mod paths;
mod time;

pub use ids::*;
pub use paths::*;
pub use time::*;
