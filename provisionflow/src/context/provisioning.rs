//! The single-owner context threaded through one provisioning run.

use super::{ContextSnapshot, ResourceMap, TenantIdentity};
use crate::cancellation::CancelScope;
use crate::core::{ResourceHandle, StageOutcome};
use crate::errors::{ProvisionError, ResourceConflictError};

/// Mutable run state: tenant identity, per-stage outcomes, resource
/// handles and warnings.
///
/// Owned exclusively by the orchestrator for the lifetime of a run. Stages
/// only ever see it through a shared reference; every mutation happens in
/// the orchestrator between stages.
#[derive(Debug)]
pub struct ProvisioningContext {
    tenant: TenantIdentity,
    outcomes: Vec<(String, StageOutcome)>,
    resources: ResourceMap,
    warnings: Vec<String>,
    cancel: CancelScope,
}

impl ProvisioningContext {
    /// Creates a fresh context for a tenant.
    #[must_use]
    pub fn new(tenant: TenantIdentity) -> Self {
        Self {
            tenant,
            outcomes: Vec::new(),
            resources: ResourceMap::new(),
            warnings: Vec::new(),
            cancel: CancelScope::default(),
        }
    }

    /// Sets the cancellation scope observed by this run.
    #[must_use]
    pub fn with_cancel_scope(mut self, cancel: CancelScope) -> Self {
        self.cancel = cancel;
        self
    }

    /// Pre-populates a resource handle, for re-runs against known resources.
    ///
    /// # Errors
    ///
    /// Returns `ResourceConflictError` if the kind is already recorded.
    pub fn with_resource(
        mut self,
        kind: impl Into<String>,
        handle: ResourceHandle,
    ) -> Result<Self, ResourceConflictError> {
        self.resources.insert(kind, handle)?;
        Ok(self)
    }

    /// Returns the tenant identity.
    #[must_use]
    pub fn tenant(&self) -> &TenantIdentity {
        &self.tenant
    }

    /// Returns the recorded resource handles.
    #[must_use]
    pub fn resources(&self) -> &ResourceMap {
        &self.resources
    }

    /// Returns the handle for a kind.
    #[must_use]
    pub fn resource(&self, kind: &str) -> Option<&ResourceHandle> {
        self.resources.get(kind)
    }

    /// Returns a field of an earlier stage's handle.
    ///
    /// A missing handle means the pipeline was assembled out of order, which
    /// waiting will not fix.
    pub fn require(&self, kind: &str, field: &str) -> Result<&str, ProvisionError> {
        self.resources
            .get(kind)
            .ok_or_else(|| {
                ProvisionError::permanent(format!("no '{kind}' resource recorded by an earlier stage"))
            })?
            .get(field)
            .ok_or_else(|| {
                ProvisionError::permanent(format!("'{kind}' resource has no '{field}' field"))
            })
    }

    /// Returns per-stage outcomes in execution order.
    #[must_use]
    pub fn outcomes(&self) -> &[(String, StageOutcome)] {
        &self.outcomes
    }

    /// Returns the outcome recorded for a stage.
    #[must_use]
    pub fn outcome(&self, stage: &str) -> Option<&StageOutcome> {
        self.outcomes
            .iter()
            .find(|(name, _)| name == stage)
            .map(|(_, outcome)| outcome)
    }

    /// Returns the accumulated warnings.
    #[must_use]
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// Returns the cancellation scope.
    #[must_use]
    pub fn cancel_scope(&self) -> &CancelScope {
        &self.cancel
    }

    /// Fails with `Cancelled` if the run should stop.
    pub fn checkpoint(&self) -> Result<(), ProvisionError> {
        self.cancel.checkpoint()
    }

    /// Captures an immutable view of the current state.
    #[must_use]
    pub fn snapshot(&self) -> ContextSnapshot {
        ContextSnapshot {
            tenant: self.tenant.clone(),
            resources: self.resources.clone(),
            completed_stages: self.outcomes.iter().map(|(name, _)| name.clone()).collect(),
        }
    }

    pub(crate) fn record_outcome(&mut self, stage: impl Into<String>, outcome: StageOutcome) {
        self.outcomes.push((stage.into(), outcome));
    }

    pub(crate) fn insert_resource(
        &mut self,
        kind: impl Into<String>,
        handle: ResourceHandle,
    ) -> Result<(), ResourceConflictError> {
        self.resources.insert(kind, handle)
    }

    pub(crate) fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    pub(crate) fn into_parts(self) -> (TenantIdentity, Vec<(String, StageOutcome)>, ResourceMap, Vec<String>) {
        (self.tenant, self.outcomes, self.resources, self.warnings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::fields;

    fn tenant() -> TenantIdentity {
        TenantIdentity::new("acme").unwrap()
    }

    #[test]
    fn test_new_context_is_empty() {
        let ctx = ProvisioningContext::new(tenant());

        assert_eq!(ctx.tenant().name, "acme");
        assert!(ctx.resources().is_empty());
        assert!(ctx.outcomes().is_empty());
        assert!(ctx.warnings().is_empty());
    }

    #[test]
    fn test_require_field() {
        let ctx = ProvisioningContext::new(tenant())
            .with_resource("project", ResourceHandle::with_id("p-1"))
            .unwrap();

        assert_eq!(ctx.require("project", fields::ID).unwrap(), "p-1");
        assert!(!ctx.require("project", fields::HOST).unwrap_err().is_retriable());
        assert!(ctx.require("branch", fields::ID).is_err());
    }

    #[test]
    fn test_outcomes_keep_execution_order() {
        let mut ctx = ProvisioningContext::new(tenant());
        ctx.record_outcome("b", StageOutcome::SkippedAlreadyDone);
        ctx.record_outcome("a", StageOutcome::fail("boom"));

        let names: Vec<_> = ctx.outcomes().iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["b", "a"]);
        assert!(ctx.outcome("a").unwrap().is_failure());
    }

    #[test]
    fn test_snapshot_is_detached() {
        let mut ctx = ProvisioningContext::new(tenant());
        let before = ctx.snapshot();

        ctx.insert_resource("project", ResourceHandle::with_id("p-1")).unwrap();

        assert!(before.resources.is_empty());
        assert!(ctx.snapshot().resources.contains("project"));
    }
}
