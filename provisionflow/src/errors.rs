//! Error types for the provisioning orchestrator.
//!
//! Every collaborator failure is classified into one of four kinds before it
//! reaches the orchestrator: transient, permanent, timeout or cancelled. The
//! orchestrator only ever inspects the classification, never the payload.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Classification of a provisioning failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Network blip, 5xx, rate limit, resource still provisioning.
    Transient,
    /// Bad request, auth failure, conflicting resource state.
    Permanent,
    /// Poll budget exhausted.
    Timeout,
    /// The run was aborted externally.
    Cancelled,
}

impl ErrorKind {
    /// Returns true if waiting and trying again can resolve the failure.
    #[must_use]
    pub fn is_retriable(self) -> bool {
        matches!(self, Self::Transient)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transient => write!(f, "transient"),
            Self::Permanent => write!(f, "permanent"),
            Self::Timeout => write!(f, "timeout"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// The main error type for provisioning operations.
#[derive(Debug, Clone, Error)]
pub enum ProvisionError {
    /// A retriable collaborator failure.
    #[error("transient collaborator error: {message}")]
    Transient {
        /// Collaborator message.
        message: String,
    },

    /// A non-retriable collaborator failure.
    #[error("permanent collaborator error: {message}")]
    Permanent {
        /// Collaborator message.
        message: String,
    },

    /// A readiness wait ran out of attempts.
    #[error("{0}")]
    Timeout(#[from] TimeoutError),

    /// The run was cancelled.
    #[error("provisioning cancelled: {reason}")]
    Cancelled {
        /// Why the run was cancelled.
        reason: String,
    },
}

impl ProvisionError {
    /// Creates a transient error.
    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }

    /// Creates a permanent error.
    #[must_use]
    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent {
            message: message.into(),
        }
    }

    /// Creates a cancellation error.
    #[must_use]
    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self::Cancelled {
            reason: reason.into(),
        }
    }

    /// Returns the classification of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transient { .. } => ErrorKind::Transient,
            Self::Permanent { .. } => ErrorKind::Permanent,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
        }
    }

    /// Returns true if the error may clear up on its own.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        self.kind().is_retriable()
    }

    /// Returns true if this is a cancellation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Returns the collaborator-facing message without the kind prefix.
    #[must_use]
    pub fn message(&self) -> String {
        match self {
            Self::Transient { message } | Self::Permanent { message } => message.clone(),
            Self::Timeout(err) => err.to_string(),
            Self::Cancelled { reason } => reason.clone(),
        }
    }
}

/// What the poller saw on its final attempt before giving up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "detail", rename_all = "snake_case")]
pub enum LastObservation {
    /// The resource reported it was still provisioning.
    NotReady(String),
    /// The probe failed with a transient error.
    TransientError(String),
}

/// Error raised when a readiness wait exhausts its attempt budget.
#[derive(Debug, Clone, Error)]
#[error("timed out waiting for {label} after {attempts} attempts ({waited:?}): {last:?}")]
pub struct TimeoutError {
    /// What was being awaited.
    pub label: String,
    /// Number of probe invocations made.
    pub attempts: u32,
    /// Total time spent sleeping between probes.
    pub waited: Duration,
    /// The final observation before giving up.
    pub last: LastObservation,
}

impl TimeoutError {
    /// Returns true if the resource was still reporting progress when the
    /// budget ran out, as opposed to failing outright.
    #[must_use]
    pub fn still_provisioning(&self) -> bool {
        matches!(self.last, LastObservation::NotReady(_))
    }
}

/// Error raised before a run starts: bad tenant names, missing credentials.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("missing required environment variable {0}")]
    MissingEnv(String),

    /// An environment variable could not be parsed.
    #[error("invalid value for {name}: {reason}")]
    InvalidEnv {
        /// The variable name.
        name: String,
        /// Why the value was rejected.
        reason: String,
    },

    /// The tenant name is not usable as a resource name.
    #[error("invalid tenant name '{name}': {reason}")]
    InvalidTenant {
        /// The rejected name.
        name: String,
        /// Why the name was rejected.
        reason: String,
    },
}

/// Error raised when a pipeline definition is unusable.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct PipelineValidationError {
    /// The error message.
    pub message: String,
    /// The stages involved in the error.
    pub stages: Vec<String>,
}

impl PipelineValidationError {
    /// Creates a new pipeline validation error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stages: Vec::new(),
        }
    }

    /// Sets the stages involved.
    #[must_use]
    pub fn with_stages(mut self, stages: Vec<String>) -> Self {
        self.stages = stages;
        self
    }
}

/// Error raised when writing a resource kind that is already recorded.
#[derive(Debug, Clone, Error)]
#[error("resource conflict: kind '{kind}' was already recorded by an earlier stage")]
pub struct ResourceConflictError {
    /// The conflicting resource kind.
    pub kind: String,
}

impl ResourceConflictError {
    /// Creates a new resource conflict error.
    #[must_use]
    pub fn new(kind: impl Into<String>) -> Self {
        Self { kind: kind.into() }
    }
}
