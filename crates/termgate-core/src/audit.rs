//! Best-effort audit recording

use std::sync::Arc;
use termgate_store::{AuditEvent, AuditEventType, AuditSink, NullAuditSink};
use tracing::warn;

/// Cloneable handle sessions use to append audit events.
///
/// A failed append is logged and dropped; auditing never fails a session.
#[derive(Clone)]
pub struct Auditor {
    sink: Arc<dyn AuditSink>,
}

impl Auditor {
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self { sink }
    }

    pub fn disabled() -> Self {
        Self::new(Arc::new(NullAuditSink))
    }

    pub fn record(&self, event: AuditEventType) {
        if let Err(e) = self.sink.append(AuditEvent::new(event)) {
            warn!(error = %e, "Failed to append audit event");
        }
    }

    pub fn flush(&self) {
        if let Err(e) = self.sink.flush() {
            warn!(error = %e, "Failed to flush audit sink");
        }
    }

    pub fn describe(&self) -> String {
        self.sink.describe()
    }
}

impl std::fmt::Debug for Auditor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Auditor")
            .field("sink", &self.sink.describe())
            .finish()
    }
}
