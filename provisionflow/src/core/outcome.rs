//! Stage outcome type with factory methods.

use super::ResourceHandle;
use crate::errors::{ErrorKind, ProvisionError};
use serde::{Deserialize, Serialize};

/// The result of running (or not running) a stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StageOutcome {
    /// The stage produced a resource handle.
    Success {
        /// Handle fields to merge under the stage's resource kind.
        data: ResourceHandle,
    },
    /// The resource already existed; nothing was created.
    SkippedAlreadyDone,
    /// The stage does not apply to this run.
    Skipped {
        /// Why the stage was skipped.
        reason: String,
    },
    /// The stage failed.
    Failed {
        /// Classification of the failure.
        error_kind: ErrorKind,
        /// Collaborator message, verbatim.
        message: String,
        /// Whether waiting could resolve the failure.
        retriable: bool,
    },
}

impl StageOutcome {
    /// Creates a success outcome.
    #[must_use]
    pub fn success(data: ResourceHandle) -> Self {
        Self::Success { data }
    }

    /// Creates a conditional-skip outcome.
    #[must_use]
    pub fn skipped(reason: impl Into<String>) -> Self {
        Self::Skipped {
            reason: reason.into(),
        }
    }

    /// Creates a failure outcome from a classified error.
    ///
    /// Timeouts are never retriable here: once the poll budget is spent a
    /// human has to look at the resource.
    #[must_use]
    pub fn from_error(err: &ProvisionError) -> Self {
        Self::Failed {
            error_kind: err.kind(),
            message: err.message(),
            retriable: err.is_retriable(),
        }
    }

    /// Creates a permanent failure outcome.
    #[must_use]
    pub fn fail(message: impl Into<String>) -> Self {
        Self::Failed {
            error_kind: ErrorKind::Permanent,
            message: message.into(),
            retriable: false,
        }
    }

    /// Returns true if the stage produced or found its resource.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. } | Self::SkippedAlreadyDone)
    }

    /// Returns true if the stage failed.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    /// Returns true if the stage did not execute its action.
    #[must_use]
    pub fn is_skip(&self) -> bool {
        matches!(self, Self::SkippedAlreadyDone | Self::Skipped { .. })
    }

    /// Returns the error kind if failed.
    #[must_use]
    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Failed { error_kind, .. } => Some(*error_kind),
            _ => None,
        }
    }

    /// Short label for logs and text rendering.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Success { .. } => "success",
            Self::SkippedAlreadyDone => "already_done",
            Self::Skipped { .. } => "skipped",
            Self::Failed { .. } => "failed",
        }
    }
}

impl From<Result<ResourceHandle, ProvisionError>> for StageOutcome {
    fn from(result: Result<ResourceHandle, ProvisionError>) -> Self {
        match result {
            Ok(data) => Self::success(data),
            Err(err) => Self::from_error(&err),
        }
    }
}
