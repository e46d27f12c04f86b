//! Audit sink trait

use crate::{AuditEvent, StoreResult};

/// Destination for audit events.
///
/// Writes are best-effort: callers log a failed append and carry on, so a
/// full disk never takes a session down.
pub trait AuditSink: Send + Sync {
    /// Append an audit event
    fn append(&self, event: AuditEvent) -> StoreResult<()>;

    /// Flush buffered events, if the sink buffers
    fn flush(&self) -> StoreResult<()> {
        Ok(())
    }

    /// Where events go, for the startup banner
    fn describe(&self) -> String;
}
