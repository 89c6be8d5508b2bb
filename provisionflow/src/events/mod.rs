//! Run lifecycle events.
//!
//! The orchestrator reports progress through an injected [`EventSink`]
//! rather than a process-wide one, so concurrent runs for different tenants
//! can report to different places.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

use crate::core::ReportStatus;
use crate::errors::ErrorKind;
use serde::{Deserialize, Serialize};

/// A lifecycle event emitted during a provisioning run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProvisionEvent {
    /// A run began.
    RunStarted {
        /// Tenant name.
        tenant: String,
        /// Run id.
        run_id: String,
        /// Number of stages in the pipeline.
        stages: usize,
    },
    /// A stage is about to execute.
    StageStarted {
        /// Stage name.
        stage: String,
    },
    /// A stage produced its resource.
    StageCompleted {
        /// Stage name.
        stage: String,
        /// Resource kind recorded.
        resource_kind: String,
        /// Wall time in milliseconds.
        duration_ms: i64,
    },
    /// A stage did not execute its action.
    StageSkipped {
        /// Stage name.
        stage: String,
        /// Why it was skipped.
        reason: String,
    },
    /// A stage failed.
    StageFailed {
        /// Stage name.
        stage: String,
        /// Classification of the failure.
        error_kind: ErrorKind,
        /// Collaborator message.
        message: String,
    },
    /// The run stopped because of cancellation.
    RunCancelled {
        /// Cancellation reason.
        reason: String,
    },
    /// The run produced its report.
    RunFinished {
        /// Final status.
        status: ReportStatus,
    },
}

impl ProvisionEvent {
    /// Dotted event type name, e.g. `stage.started`.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::RunStarted { .. } => "run.started",
            Self::StageStarted { .. } => "stage.started",
            Self::StageCompleted { .. } => "stage.completed",
            Self::StageSkipped { .. } => "stage.skipped",
            Self::StageFailed { .. } => "stage.failed",
            Self::RunCancelled { .. } => "run.cancelled",
            Self::RunFinished { .. } => "run.finished",
        }
    }
}
