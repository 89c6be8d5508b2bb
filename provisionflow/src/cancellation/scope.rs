//! Run-level cancellation scope: an abort token plus an optional deadline.

use super::CancellationToken;
use crate::errors::ProvisionError;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Reason recorded when the run deadline passes.
pub const DEADLINE_EXCEEDED: &str = "run deadline exceeded";

/// The cancellation signal a run observes at its suspension points.
///
/// Cheap to clone; all clones observe the same token.
#[derive(Debug, Clone, Default)]
pub struct CancelScope {
    token: Arc<CancellationToken>,
    deadline: Option<Instant>,
}

impl CancelScope {
    /// Creates a scope observing the given token.
    #[must_use]
    pub fn new(token: Arc<CancellationToken>) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    /// Sets an absolute deadline.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Sets a deadline relative to now.
    ///
    /// A timeout past the clock's range leaves the scope without a deadline.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Instant::now().checked_add(timeout);
        self
    }

    /// Returns the underlying token.
    #[must_use]
    pub fn token(&self) -> &Arc<CancellationToken> {
        &self.token
    }

    /// Returns the deadline, if any.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Returns the cancellation reason if the run should stop.
    #[must_use]
    pub fn reason(&self) -> Option<String> {
        if let Some(reason) = self.token.reason() {
            return Some(reason);
        }
        if self.token.is_cancelled() {
            return Some("cancelled".to_string());
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(DEADLINE_EXCEEDED.to_string()),
            _ => None,
        }
    }

    /// Returns true if the run should stop.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.reason().is_some()
    }

    /// Fails with `Cancelled` if the run should stop.
    ///
    /// Call before every HTTP request and poll sleep.
    pub fn checkpoint(&self) -> Result<(), ProvisionError> {
        match self.reason() {
            Some(reason) => Err(ProvisionError::cancelled(reason)),
            None => Ok(()),
        }
    }

    /// Resolves when the token fires or the deadline passes.
    pub async fn cancelled(&self) {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    () = self.token.cancelled() => {}
                    () = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => self.token.cancelled().await,
        }
    }
}
