//! Stage trait and implementations.
//!
//! Stages are the fundamental units of work in a provisioning pipeline. A
//! stage knows how to create one kind of remote resource; it knows nothing
//! about ordering, retries or reporting.

mod result;

pub use result::StageRecord;

use crate::context::ProvisioningContext;
use crate::core::{Criticality, ResourceHandle, StageOutcome};
use crate::errors::ProvisionError;
use async_trait::async_trait;
use std::fmt::Debug;
use std::future::Future;
use std::marker::PhantomData;

/// Trait for provisioning stages.
///
/// Implementations are thin adapters: build a request from the context and
/// static config, call the collaborator, map the response into a
/// [`ResourceHandle`]. Every collaborator failure must be classified into a
/// [`ProvisionError`] kind before it is returned.
#[async_trait]
pub trait Stage: Send + Sync + Debug {
    /// Returns the name of the stage, unique within a pipeline.
    fn name(&self) -> &str;

    /// The resource kind this stage's handle is recorded under.
    fn resource_kind(&self) -> &str;

    /// Whether a failure here stops the pipeline.
    fn criticality(&self) -> Criticality {
        Criticality::Fatal
    }

    /// Idempotency check: true if the resource is already recorded.
    ///
    /// Must not call collaborators.
    fn already_satisfied(&self, ctx: &ProvisioningContext) -> bool {
        ctx.resources().contains(self.resource_kind())
    }

    /// Looks up a resource created by an earlier run under its
    /// deterministic name. A found handle is adopted instead of creating a
    /// new resource.
    async fn discover(
        &self,
        _ctx: &ProvisioningContext,
    ) -> Result<Option<ResourceHandle>, ProvisionError> {
        Ok(None)
    }

    /// Creates the resource.
    ///
    /// # Arguments
    ///
    /// * `ctx` - Read-only view of the run so far
    ///
    /// # Returns
    ///
    /// The stage outcome indicating success, failure or skip.
    async fn execute(&self, ctx: &ProvisioningContext) -> StageOutcome;
}

/// A stage backed by an async closure.
///
/// The closure receives a snapshot of the context, so it can be `'static`.
pub struct FnStage<F, Fut>
where
    F: Fn(crate::context::ContextSnapshot) -> Fut + Send + Sync,
    Fut: Future<Output = StageOutcome> + Send,
{
    name: String,
    kind: String,
    criticality: Criticality,
    func: F,
    _phantom: PhantomData<fn() -> Fut>,
}

impl<F, Fut> FnStage<F, Fut>
where
    F: Fn(crate::context::ContextSnapshot) -> Fut + Send + Sync,
    Fut: Future<Output = StageOutcome> + Send,
{
    /// Creates a new closure-backed stage.
    pub fn new(name: impl Into<String>, kind: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            criticality: Criticality::Fatal,
            func,
            _phantom: PhantomData,
        }
    }

    /// Marks the stage as non-fatal.
    #[must_use]
    pub fn non_fatal(mut self) -> Self {
        self.criticality = Criticality::NonFatal;
        self
    }
}

impl<F, Fut> Debug for FnStage<F, Fut>
where
    F: Fn(crate::context::ContextSnapshot) -> Fut + Send + Sync,
    Fut: Future<Output = StageOutcome> + Send,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnStage")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("criticality", &self.criticality)
            .finish()
    }
}

#[async_trait]
impl<F, Fut> Stage for FnStage<F, Fut>
where
    F: Fn(crate::context::ContextSnapshot) -> Fut + Send + Sync,
    Fut: Future<Output = StageOutcome> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn resource_kind(&self) -> &str {
        &self.kind
    }

    fn criticality(&self) -> Criticality {
        self.criticality
    }

    async fn execute(&self, ctx: &ProvisioningContext) -> StageOutcome {
        (self.func)(ctx.snapshot()).await
    }
}
