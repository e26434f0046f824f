use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::state::WorkflowStatus;

/// One step recorded while a workflow runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub step: WorkflowStatus,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Append-only audit log. Entries cannot be edited or removed once pushed,
/// and timestamps never go backwards even if the wall clock does.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuditTrail {
    entries: Vec<AuditEntry>,
}

impl AuditTrail {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, step: WorkflowStatus, message: impl Into<String>) {
        let now = Utc::now();
        let timestamp = match self.entries.last() {
            Some(last) if last.timestamp > now => last.timestamp,
            _ => now,
        };
        self.entries.push(AuditEntry {
            step,
            message: message.into(),
            timestamp,
        });
    }

    /// Appends entries carried over from an earlier execution, keeping their
    /// original order and timestamps.
    pub fn extend_from(&mut self, earlier: &AuditTrail) {
        for entry in &earlier.entries {
            let mut entry = entry.clone();
            if let Some(last) = self.entries.last() {
                entry.timestamp = entry.timestamp.max(last.timestamp);
            }
            self.entries.push(entry);
        }
    }

    pub fn entries(&self) -> &[AuditEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last(&self) -> Option<&AuditEntry> {
        self.entries.last()
    }

    pub fn into_entries(self) -> Vec<AuditEntry> {
        self.entries
    }
}
