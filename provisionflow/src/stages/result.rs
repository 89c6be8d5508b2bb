//! Per-stage records kept in the provisioning report.

use crate::core::{Criticality, StageOutcome};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of one stage plus where and when it ran.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRecord {
    /// Stage name.
    pub name: String,
    /// Resource kind the stage provisions.
    pub resource_kind: String,
    /// Stage criticality.
    pub criticality: Criticality,
    /// What happened.
    pub outcome: StageOutcome,
    /// When the stage started.
    pub started_at: DateTime<Utc>,
    /// When the stage ended.
    pub ended_at: DateTime<Utc>,
}

impl StageRecord {
    /// Creates a record ending now.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        resource_kind: impl Into<String>,
        criticality: Criticality,
        outcome: StageOutcome,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            name: name.into(),
            resource_kind: resource_kind.into(),
            criticality,
            outcome,
            started_at,
            ended_at: Utc::now(),
        }
    }

    /// Returns the duration in milliseconds.
    #[must_use]
    pub fn duration_ms(&self) -> i64 {
        (self.ended_at - self.started_at).num_milliseconds()
    }

    /// Returns true if this record stops the pipeline.
    #[must_use]
    pub fn is_fatal_failure(&self) -> bool {
        self.outcome.is_failure() && self.criticality == Criticality::Fatal
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ResourceHandle;

    #[test]
    fn test_fatal_failure_detection() {
        let started = Utc::now();
        let fatal = StageRecord::new("a", "project", Criticality::Fatal, StageOutcome::fail("x"), started);
        let tolerated = StageRecord::new("b", "dns", Criticality::NonFatal, StageOutcome::fail("x"), started);
        let ok = StageRecord::new(
            "c",
            "branch",
            Criticality::Fatal,
            StageOutcome::success(ResourceHandle::with_id("br")),
            started,
        );

        assert!(fatal.is_fatal_failure());
        assert!(!tolerated.is_fatal_failure());
        assert!(!ok.is_fatal_failure());
    }

    #[test]
    fn test_duration() {
        let started = Utc::now();
        std::thread::sleep(std::time::Duration::from_millis(10));
        let record = StageRecord::new("a", "project", Criticality::Fatal, StageOutcome::SkippedAlreadyDone, started);

        assert!(record.duration_ms() >= 10);
    }

    #[test]
    fn test_serialization() {
        let record = StageRecord::new(
            "dns",
            "dns",
            Criticality::NonFatal,
            StageOutcome::skipped("no domain"),
            Utc::now(),
        );

        let json = serde_json::to_string(&record).unwrap();
        let back: StageRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(record, back);
    }
}
