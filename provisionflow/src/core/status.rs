//! Report status and stage criticality enums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Whether a stage failure stops the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Criticality {
    /// Failure halts the remainder of the pipeline.
    #[default]
    Fatal,
    /// Failure is recorded and degrades the report to partial.
    NonFatal,
}

impl fmt::Display for Criticality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fatal => write!(f, "fatal"),
            Self::NonFatal => write!(f, "non_fatal"),
        }
    }
}

/// Overall status of a provisioning run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    /// Every stage succeeded or was already done.
    Complete,
    /// At least one non-fatal stage failed.
    Partial,
    /// A fatal stage failed and the pipeline stopped.
    Failed,
    /// The run was aborted externally.
    Cancelled,
}

impl fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Complete => write!(f, "complete"),
            Self::Partial => write!(f, "partial"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl ReportStatus {
    /// Process exit code for this status. Zero only for `Complete`.
    #[must_use]
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Complete => 0,
            Self::Partial => 2,
            Self::Failed => 3,
            Self::Cancelled => 4,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_criticality_default_is_fatal() {
        assert_eq!(Criticality::default(), Criticality::Fatal);
    }

    #[test]
    fn test_report_status_display() {
        assert_eq!(ReportStatus::Complete.to_string(), "complete");
        assert_eq!(ReportStatus::Partial.to_string(), "partial");
        assert_eq!(ReportStatus::Failed.to_string(), "failed");
        assert_eq!(ReportStatus::Cancelled.to_string(), "cancelled");
    }

    #[test]
    fn test_exit_codes_are_distinct() {
        let codes = [
            ReportStatus::Complete.exit_code(),
            ReportStatus::Partial.exit_code(),
            ReportStatus::Failed.exit_code(),
            ReportStatus::Cancelled.exit_code(),
        ];

        assert_eq!(codes[0], 0);
        for (i, a) in codes.iter().enumerate() {
            for b in &codes[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_report_status_serialize() {
        let json = serde_json::to_string(&ReportStatus::Partial).unwrap();
        assert_eq!(json, r#""partial""#);

        let criticality: Criticality = serde_json::from_str(r#""non_fatal""#).unwrap();
        assert_eq!(criticality, Criticality::NonFatal);
    }
}
