//! Wire protocol for termgate
//!
//! Everything exchanged over an established connection is a UTF-8 text frame:
//! - Inbound auth frames (client -> server, before authentication)
//! - Outbound acknowledgments and the shell exit notice (server -> client)
//! - Application close codes carried by the transport's close frame
//!
//! After authentication all other traffic is raw terminal bytes and never
//! passes through this crate.

mod close;
mod inbound;
mod outbound;

pub use close::*;
pub use inbound::*;
pub use outbound::*;
