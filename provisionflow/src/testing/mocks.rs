//! Scripted stages, sinks and sleepers for testing.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::cancellation::CancellationToken;
use crate::context::{ContextSnapshot, ProvisioningContext};
use crate::core::{Criticality, ResourceHandle, StageOutcome};
use crate::errors::ProvisionError;
use crate::events::{EventSink, ProvisionEvent};
use crate::polling::Sleeper;
use crate::stages::Stage;

/// Call tracking shared between a [`ScriptedStage`] and the test holding it.
#[derive(Debug, Default)]
pub struct StageCalls {
    executions: AtomicUsize,
    discoveries: AtomicUsize,
    snapshots: Mutex<Vec<ContextSnapshot>>,
}

impl StageCalls {
    /// Number of `execute` calls.
    #[must_use]
    pub fn executions(&self) -> usize {
        self.executions.load(Ordering::SeqCst)
    }

    /// Number of `discover` calls.
    #[must_use]
    pub fn discoveries(&self) -> usize {
        self.discoveries.load(Ordering::SeqCst)
    }

    /// Context snapshots seen by each `execute` call.
    #[must_use]
    pub fn snapshots(&self) -> Vec<ContextSnapshot> {
        self.snapshots.lock().clone()
    }
}

/// A stage whose behavior is fixed up front.
///
/// Records every call so tests can assert on collaborator side effects
/// without a real collaborator.
pub struct ScriptedStage {
    name: String,
    kind: String,
    criticality: Criticality,
    outcome: StageOutcome,
    discovered: Option<ResourceHandle>,
    requires: Vec<String>,
    always_execute: bool,
    cancel: Option<Arc<CancellationToken>>,
    delay: Option<Duration>,
    calls: Arc<StageCalls>,
}

impl ScriptedStage {
    /// Creates a stage returning the given outcome.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: impl Into<String>, outcome: StageOutcome) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            criticality: Criticality::Fatal,
            outcome,
            discovered: None,
            requires: Vec::new(),
            always_execute: false,
            cancel: None,
            delay: None,
            calls: Arc::new(StageCalls::default()),
        }
    }

    /// Succeeds with a handle whose id is `{name}-out`.
    #[must_use]
    pub fn succeeding(name: impl Into<String>, kind: impl Into<String>) -> Self {
        let name = name.into();
        let handle = ResourceHandle::with_id(format!("{name}-out"));
        Self::new(name, kind, StageOutcome::success(handle))
    }

    /// Fails permanently with `{name} failed`.
    #[must_use]
    pub fn failing(name: impl Into<String>, kind: impl Into<String>) -> Self {
        let name = name.into();
        let outcome = StageOutcome::fail(format!("{name} failed"));
        Self::new(name, kind, outcome)
    }

    /// Returns the given error as its outcome.
    #[must_use]
    pub fn erroring(name: impl Into<String>, kind: impl Into<String>, err: &ProvisionError) -> Self {
        Self::new(name, kind, StageOutcome::from_error(err))
    }

    /// Skips with a reason.
    #[must_use]
    pub fn skipping(name: impl Into<String>, kind: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(name, kind, StageOutcome::skipped(reason))
    }

    /// Marks the stage non-fatal.
    #[must_use]
    pub fn non_fatal(mut self) -> Self {
        self.criticality = Criticality::NonFatal;
        self
    }

    /// Makes `discover` return this handle.
    #[must_use]
    pub fn with_discovered(mut self, handle: ResourceHandle) -> Self {
        self.discovered = Some(handle);
        self
    }

    /// Fails at execution time unless `kind` is already recorded.
    #[must_use]
    pub fn requiring(mut self, kind: impl Into<String>) -> Self {
        self.requires.push(kind.into());
        self
    }

    /// Ignores the idempotency check and always executes.
    #[must_use]
    pub fn always_execute(mut self) -> Self {
        self.always_execute = true;
        self
    }

    /// Cancels `token` while executing, before returning the outcome.
    #[must_use]
    pub fn cancelling(mut self, token: Arc<CancellationToken>) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Sleeps on the tokio timer before returning.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Returns the shared call tracker.
    #[must_use]
    pub fn calls(&self) -> Arc<StageCalls> {
        Arc::clone(&self.calls)
    }
}

impl fmt::Debug for ScriptedStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptedStage")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("outcome", &self.outcome.label())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Stage for ScriptedStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn resource_kind(&self) -> &str {
        &self.kind
    }

    fn criticality(&self) -> Criticality {
        self.criticality
    }

    fn already_satisfied(&self, ctx: &ProvisioningContext) -> bool {
        !self.always_execute && ctx.resources().contains(&self.kind)
    }

    async fn discover(&self, _ctx: &ProvisioningContext) -> Result<Option<ResourceHandle>, ProvisionError> {
        self.calls.discoveries.fetch_add(1, Ordering::SeqCst);
        Ok(self.discovered.clone())
    }

    async fn execute(&self, ctx: &ProvisioningContext) -> StageOutcome {
        self.calls.executions.fetch_add(1, Ordering::SeqCst);
        self.calls.snapshots.lock().push(ctx.snapshot());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        for kind in &self.requires {
            if !ctx.resources().contains(kind) {
                return StageOutcome::fail(format!("missing '{kind}' handle"));
            }
        }
        if let Some(token) = &self.cancel {
            token.cancel("cancelled mid-stage");
        }

        self.outcome.clone()
    }
}

/// A sink that cancels a token once a matching event is seen.
///
/// Lets tests raise cancellation exactly between two stages.
pub struct CancellingSink {
    token: Arc<CancellationToken>,
    trigger: Box<dyn Fn(&ProvisionEvent) -> bool + Send + Sync>,
    reason: String,
}

impl CancellingSink {
    /// Cancels after the named stage's outcome has been recorded.
    #[must_use]
    pub fn after_stage(token: Arc<CancellationToken>, stage: impl Into<String>) -> Self {
        let stage = stage.into();
        Self {
            token,
            trigger: Box::new(move |event| match event {
                ProvisionEvent::StageCompleted { stage: s, .. }
                | ProvisionEvent::StageSkipped { stage: s, .. }
                | ProvisionEvent::StageFailed { stage: s, .. } => *s == stage,
                _ => false,
            }),
            reason: "cancelled by test".to_string(),
        }
    }
}

impl EventSink for CancellingSink {
    fn emit(&self, event: &ProvisionEvent) {
        if (self.trigger)(event) {
            self.token.cancel(self.reason.clone());
        }
    }
}

/// A sleeper that records requested durations and returns at once.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    sleeps: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    /// Creates a new recording sleeper.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Durations requested so far.
    #[must_use]
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().clone()
    }

    /// Number of sleeps requested.
    #[must_use]
    pub fn count(&self) -> usize {
        self.sleeps.lock().len()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().push(duration);
        tokio::task::yield_now().await;
    }
}
