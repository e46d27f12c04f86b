//! In-memory and no-op sinks

use std::sync::{Mutex, PoisonError};

use crate::{AuditEvent, AuditEventType, AuditSink, StoreResult};

/// Keeps every event in memory (for tests)
#[derive(Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of recorded event bodies, oldest first
    pub fn events(&self) -> Vec<AuditEventType> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|e| e.event.clone())
            .collect()
    }

    pub fn count_where(&self, pred: impl Fn(&AuditEventType) -> bool) -> usize {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|e| pred(&e.event))
            .count()
    }
}

impl AuditSink for MemoryAuditSink {
    fn append(&self, mut event: AuditEvent) -> StoreResult<()> {
        let mut events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        event.id = events.len() as i64 + 1;
        events.push(event);
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

/// Discards everything (`--no-log`)
#[derive(Debug, Default, Clone, Copy)]
pub struct NullAuditSink;

impl AuditSink for NullAuditSink {
    fn append(&self, _event: AuditEvent) -> StoreResult<()> {
        Ok(())
    }

    fn describe(&self) -> String {
        "disabled".to_string()
    }
}
