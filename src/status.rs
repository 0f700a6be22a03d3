//! Session status record (C17): a small, frequently-read snapshot of overall
//! session health, refreshed by the supervisor on every subsystem transition.

use crate::error::{DropError, ErrorKind};
use crate::types::SessionState;
use serde::{Deserialize, Serialize};
use std::sync::RwLock;

/// A point-in-time snapshot of session status.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub state: SessionState,
    pub last_error_kind: Option<ErrorKind>,
    pub degraded_subsystems: Vec<String>,
}

impl Default for StatusRecord {
    fn default() -> Self {
        Self {
            state: SessionState::Initialized,
            last_error_kind: None,
            degraded_subsystems: Vec::new(),
        }
    }
}

/// Shared, lock-protected status record. Reads never block behind an
/// in-flight write for longer than the copy itself takes (`RwLock` favors
/// concurrent readers, and a `StatusRecord` clone is cheap).
pub struct StatusPublisher {
    record: RwLock<StatusRecord>,
}

impl StatusPublisher {
    pub fn new() -> Self {
        Self {
            record: RwLock::new(StatusRecord::default()),
        }
    }

    pub fn snapshot(&self) -> StatusRecord {
        self.record.read().expect("status lock poisoned").clone()
    }

    /// Serializes the current snapshot to JSON, for a CLI status dump or a
    /// future status endpoint.
    pub fn snapshot_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.snapshot())
    }

    pub fn set_state(&self, state: SessionState) {
        self.record.write().expect("status lock poisoned").state = state;
    }

    pub fn record_error(&self, err: &DropError) {
        self.record.write().expect("status lock poisoned").last_error_kind = Some(err.kind());
    }

    pub fn clear_error(&self) {
        self.record.write().expect("status lock poisoned").last_error_kind = None;
    }

    pub fn mark_degraded(&self, subsystem: impl Into<String>) {
        let mut record = self.record.write().expect("status lock poisoned");
        let subsystem = subsystem.into();
        if !record.degraded_subsystems.contains(&subsystem) {
            record.degraded_subsystems.push(subsystem);
        }
    }

    pub fn clear_degraded(&self, subsystem: &str) {
        self.record
            .write()
            .expect("status lock poisoned")
            .degraded_subsystems
            .retain(|s| s != subsystem);
    }
}

impl Default for StatusPublisher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;

    #[test]
    fn test_default_snapshot_is_initialized_with_no_errors() {
        let publisher = StatusPublisher::new();
        let snapshot = publisher.snapshot();
        assert_eq!(snapshot.state, SessionState::Initialized);
        assert!(snapshot.last_error_kind.is_none());
        assert!(snapshot.degraded_subsystems.is_empty());
    }

    #[test]
    fn test_record_error_sets_kind_and_clear_resets_it() {
        let publisher = StatusPublisher::new();
        publisher.record_error(&DropError::Transport(TransportError::InvalidFraming));
        assert_eq!(publisher.snapshot().last_error_kind, Some(ErrorKind::Transport));
        publisher.clear_error();
        assert!(publisher.snapshot().last_error_kind.is_none());
    }

    #[test]
    fn test_mark_degraded_is_idempotent() {
        let publisher = StatusPublisher::new();
        publisher.mark_degraded("detector");
        publisher.mark_degraded("detector");
        assert_eq!(publisher.snapshot().degraded_subsystems, vec!["detector".to_string()]);
        publisher.clear_degraded("detector");
        assert!(publisher.snapshot().degraded_subsystems.is_empty());
    }

    #[test]
    fn test_state_transition_visible_immediately() {
        let publisher = StatusPublisher::new();
        publisher.set_state(SessionState::Armed);
        assert_eq!(publisher.snapshot().state, SessionState::Armed);
    }

    #[test]
    fn test_snapshot_json_round_trips_through_serde_json() {
        let publisher = StatusPublisher::new();
        publisher.set_state(SessionState::Running);
        let json = publisher.snapshot_json().unwrap();
        let decoded: StatusRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, publisher.snapshot());
    }
}
