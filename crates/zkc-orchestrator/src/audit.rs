//! Append-only audit log of orchestration activity. Every state
//! transition, retry, and terminal outcome lands here; entries are only
//! removed by an explicit operator `clear`.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// One recorded orchestration event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub timestamp: DateTime<Utc>,
    pub event: String,
    pub details: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

/// In-memory append-only log.
#[derive(Default)]
pub struct AuditLog {
    entries: Mutex<Vec<AuditLogEntry>>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, event: impl Into<String>, details: serde_json::Value) {
        self.append_timed(event, details, None);
    }

    pub fn append_timed(
        &self,
        event: impl Into<String>,
        details: serde_json::Value,
        duration_ms: Option<u64>,
    ) {
        self.entries.lock().push(AuditLogEntry {
            timestamp: Utc::now(),
            event: event.into(),
            details,
            duration_ms,
        });
    }

    pub fn entries(&self) -> Vec<AuditLogEntry> {
        self.entries.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Operator escape hatch; the log is never cleared implicitly.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn entries_accumulate_in_order() {
        let log = AuditLog::new();
        log.append("state_transition", json!({ "from": "idle", "to": "planning" }));
        log.append_timed("stage_completed", json!({ "stage": "generating" }), Some(42));

        let entries = log.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].event, "state_transition");
        assert_eq!(entries[1].duration_ms, Some(42));

        log.clear();
        assert!(log.is_empty());
    }
}
