//! Test fixtures for provisioning runs.
//!
//! Fixtures panic on invalid input instead of returning errors.

#![allow(clippy::expect_used)]

use crate::context::{ProvisioningContext, TenantIdentity};
use crate::core::ResourceHandle;
use crate::pipeline::{Pipeline, PipelineBuilder};
use crate::testing::ScriptedStage;

/// Returns a validated tenant identity.
///
/// # Panics
///
/// Panics if `name` is not a valid tenant name.
#[must_use]
pub fn tenant(name: &str) -> TenantIdentity {
    TenantIdentity::new(name).expect("fixture tenant name must be valid")
}

/// Returns a fresh context for a tenant.
#[must_use]
pub fn context(name: &str) -> ProvisioningContext {
    ProvisioningContext::new(tenant(name))
}

/// Returns a context with a handle recorded for every kind.
///
/// # Panics
///
/// Panics if `kinds` repeats a kind.
#[must_use]
pub fn provisioned_context(name: &str, kinds: &[&str]) -> ProvisioningContext {
    kinds.iter().fold(context(name), |ctx, kind| {
        ctx.with_resource(*kind, ResourceHandle::with_id(format!("existing-{kind}")))
            .expect("fixture kinds must be unique")
    })
}

/// A pipeline of scripted stages with their call trackers.
pub struct ScriptedPipeline {
    /// The built pipeline.
    pub pipeline: Pipeline,
    /// Call trackers, in stage order.
    pub calls: Vec<std::sync::Arc<crate::testing::StageCalls>>,
}

impl ScriptedPipeline {
    /// Builds a pipeline from scripted stages.
    ///
    /// # Panics
    ///
    /// Panics if the stages do not form a valid pipeline.
    #[must_use]
    pub fn new(stages: Vec<ScriptedStage>) -> Self {
        let calls = stages.iter().map(ScriptedStage::calls).collect();
        let pipeline = stages
            .into_iter()
            .try_fold(PipelineBuilder::new("scripted"), PipelineBuilder::stage)
            .and_then(PipelineBuilder::build)
            .expect("fixture pipeline must be valid");

        Self { pipeline, calls }
    }

    /// Total `execute` calls across all stages.
    #[must_use]
    pub fn total_executions(&self) -> usize {
        self.calls.iter().map(|c| c.executions()).sum()
    }
}
