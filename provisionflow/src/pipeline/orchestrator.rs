//! Sequential stage execution with idempotency, degrade and cancellation.

use super::{Pipeline, ProvisioningReport};
use crate::cancellation::{CancelScope, CancellationToken};
use crate::context::{ProvisioningContext, TenantIdentity};
use crate::core::{ReportStatus, ResourceHandle, StageOutcome};
use crate::errors::ErrorKind;
use crate::events::{EventSink, NoOpEventSink, ProvisionEvent};
use crate::stages::{Stage, StageRecord};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Per-run orchestrator settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Run deadline in seconds. `None` means no deadline.
    #[serde(default)]
    pub deadline_secs: Option<u64>,
    /// Whether stages may adopt resources left by an earlier run.
    #[serde(default = "default_discover_existing")]
    pub discover_existing: bool,
}

fn default_discover_existing() -> bool {
    true
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            deadline_secs: None,
            discover_existing: default_discover_existing(),
        }
    }
}

impl OrchestratorConfig {
    /// Creates a default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the run deadline.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline_secs = Some(deadline.as_secs());
        self
    }

    /// Enables or disables discovery of existing resources.
    #[must_use]
    pub fn with_discovery(mut self, enabled: bool) -> Self {
        self.discover_existing = enabled;
        self
    }

    /// Returns the run deadline.
    #[must_use]
    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_secs.map(Duration::from_secs)
    }
}

/// What a single stage step produced, before it is merged.
enum Step {
    AlreadyDone,
    Adopted(ResourceHandle),
    Ran(StageOutcome),
}

/// How the run ended early, if it did.
enum Halt {
    Fatal,
    Cancelled {
        reason: String,
        stage: Option<String>,
    },
}

/// Runs pipelines for tenants.
///
/// The orchestrator is stateless between runs; each call to [`run`] owns a
/// fresh [`ProvisioningContext`], so one orchestrator can serve concurrent
/// tenants from separate tasks.
///
/// [`run`]: Orchestrator::run
pub struct Orchestrator {
    config: OrchestratorConfig,
    sink: Arc<dyn EventSink>,
    token: Arc<CancellationToken>,
}

impl Default for Orchestrator {
    fn default() -> Self {
        Self::new(OrchestratorConfig::default())
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.config)
            .field("cancelled", &self.token.is_cancelled())
            .finish()
    }
}

impl Orchestrator {
    /// Creates an orchestrator with no event sink and a fresh token.
    #[must_use]
    pub fn new(config: OrchestratorConfig) -> Self {
        Self {
            config,
            sink: Arc::new(NoOpEventSink),
            token: Arc::new(CancellationToken::new()),
        }
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Sets the cancellation token observed by [`Orchestrator::run`].
    #[must_use]
    pub fn with_cancellation_token(mut self, token: Arc<CancellationToken>) -> Self {
        self.token = token;
        self
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Returns the token that aborts runs started with [`Orchestrator::run`].
    #[must_use]
    pub fn cancellation_token(&self) -> &Arc<CancellationToken> {
        &self.token
    }

    /// Provisions a tenant from scratch.
    pub async fn run(&self, tenant: TenantIdentity, pipeline: &Pipeline) -> ProvisioningReport {
        let mut scope = CancelScope::new(Arc::clone(&self.token));
        if let Some(deadline) = self.config.deadline() {
            scope = scope.with_timeout(deadline);
        }
        let ctx = ProvisioningContext::new(tenant).with_cancel_scope(scope);
        self.run_with_context(ctx, pipeline).await
    }

    /// Runs a pipeline against a pre-populated context.
    ///
    /// The context's own cancellation scope is observed; the orchestrator's
    /// token and deadline are not applied.
    pub async fn run_with_context(
        &self,
        mut ctx: ProvisioningContext,
        pipeline: &Pipeline,
    ) -> ProvisioningReport {
        let started_at = Utc::now();
        let tenant = ctx.tenant().name.clone();

        info!(tenant = %tenant, run_id = %ctx.tenant().run_id, pipeline = pipeline.name(), "Provisioning run started");
        self.sink.emit(&ProvisionEvent::RunStarted {
            tenant: tenant.clone(),
            run_id: ctx.tenant().run_id.to_string(),
            stages: pipeline.len(),
        });

        let mut records = Vec::with_capacity(pipeline.len());
        let mut degraded = false;
        let mut halt = None;

        for stage in pipeline.stages() {
            if let Some(reason) = ctx.cancel_scope().reason() {
                halt = Some(Halt::Cancelled { reason, stage: None });
                break;
            }

            let stage_started = Utc::now();
            let step = self.step(&ctx, stage.as_ref()).await;

            // Anything produced after cancellation is discarded unmerged.
            let cancelled = match &step {
                Step::Ran(outcome) if outcome.error_kind() == Some(ErrorKind::Cancelled) => ctx
                    .cancel_scope()
                    .reason()
                    .or_else(|| failure_message(outcome)),
                _ => ctx.cancel_scope().reason(),
            };
            if let Some(reason) = cancelled {
                halt = Some(Halt::Cancelled {
                    reason,
                    stage: Some(stage.name().to_string()),
                });
                break;
            }

            let record = self.merge(&mut ctx, stage.as_ref(), step, stage_started);
            let fatal = record.is_fatal_failure();
            if record.outcome.is_failure() {
                degraded = true;
            }
            records.push(record);

            if fatal {
                halt = Some(Halt::Fatal);
                break;
            }
        }

        self.finish(ctx, pipeline, records, degraded, halt, started_at)
    }

    async fn step(&self, ctx: &ProvisioningContext, stage: &dyn Stage) -> Step {
        if stage.already_satisfied(ctx) {
            return Step::AlreadyDone;
        }

        if self.config.discover_existing {
            match stage.discover(ctx).await {
                Ok(Some(handle)) => return Step::Adopted(handle),
                Ok(None) => {}
                Err(err) => return Step::Ran(StageOutcome::from_error(&err)),
            }
        }

        self.sink.emit(&ProvisionEvent::StageStarted {
            stage: stage.name().to_string(),
        });
        debug!(tenant = %ctx.tenant().name, stage = stage.name(), "Executing stage");
        Step::Ran(stage.execute(ctx).await)
    }

    fn merge(
        &self,
        ctx: &mut ProvisioningContext,
        stage: &dyn Stage,
        step: Step,
        started_at: DateTime<Utc>,
    ) -> StageRecord {
        let name = stage.name();
        let kind = stage.resource_kind();
        let tenant = ctx.tenant().name.clone();

        let outcome = match step {
            Step::AlreadyDone => StageOutcome::SkippedAlreadyDone,
            Step::Adopted(handle) => {
                info!(tenant = %tenant, stage = name, kind, "Adopted existing resource");
                self.insert_or_warn(ctx, name, kind, handle);
                StageOutcome::SkippedAlreadyDone
            }
            Step::Ran(outcome) => {
                if let StageOutcome::Success { data } = &outcome {
                    self.insert_or_warn(ctx, name, kind, data.clone());
                }
                outcome
            }
        };

        let record = StageRecord::new(name, kind, stage.criticality(), outcome.clone(), started_at);
        ctx.record_outcome(name, outcome);

        match &record.outcome {
            StageOutcome::Success { .. } => {
                info!(tenant = %tenant, stage = name, duration_ms = record.duration_ms(), "Stage completed");
                self.sink.emit(&ProvisionEvent::StageCompleted {
                    stage: name.to_string(),
                    resource_kind: kind.to_string(),
                    duration_ms: record.duration_ms(),
                });
            }
            StageOutcome::SkippedAlreadyDone => {
                info!(tenant = %tenant, stage = name, "Stage already satisfied");
                self.sink.emit(&ProvisionEvent::StageSkipped {
                    stage: name.to_string(),
                    reason: "already done".to_string(),
                });
            }
            StageOutcome::Skipped { reason } => {
                info!(tenant = %tenant, stage = name, reason = %reason, "Stage skipped");
                self.sink.emit(&ProvisionEvent::StageSkipped {
                    stage: name.to_string(),
                    reason: reason.clone(),
                });
            }
            StageOutcome::Failed {
                error_kind, message, ..
            } => {
                warn!(
                    tenant = %tenant,
                    stage = name,
                    error_kind = %error_kind,
                    criticality = %record.criticality,
                    "Stage failed: {}",
                    message
                );
                self.sink.emit(&ProvisionEvent::StageFailed {
                    stage: name.to_string(),
                    error_kind: *error_kind,
                    message: message.clone(),
                });
            }
        }

        record
    }

    fn insert_or_warn(&self, ctx: &mut ProvisioningContext, stage: &str, kind: &str, handle: ResourceHandle) {
        if let Err(err) = ctx.insert_resource(kind, handle) {
            warn!(tenant = %ctx.tenant().name, stage, kind, "Kept existing handle: {}", err);
            ctx.warn(format!("stage '{stage}': {err}; kept the existing handle"));
        }
    }

    fn finish(
        &self,
        ctx: ProvisioningContext,
        pipeline: &Pipeline,
        stages: Vec<StageRecord>,
        degraded: bool,
        halt: Option<Halt>,
        started_at: DateTime<Utc>,
    ) -> ProvisioningReport {
        let (status, cancel_reason, interrupted_stage) = match halt {
            Some(Halt::Fatal) => (ReportStatus::Failed, None, None),
            Some(Halt::Cancelled { reason, stage }) => (ReportStatus::Cancelled, Some(reason), stage),
            None if degraded => (ReportStatus::Partial, None, None),
            None => (ReportStatus::Complete, None, None),
        };

        if let Some(reason) = &cancel_reason {
            warn!(tenant = %ctx.tenant().name, stage = ?interrupted_stage, "Run cancelled: {}", reason);
            self.sink.emit(&ProvisionEvent::RunCancelled {
                reason: reason.clone(),
            });
        }

        let (tenant, _, resources, warnings) = ctx.into_parts();
        info!(tenant = %tenant.name, status = %status, stages = stages.len(), "Provisioning run finished");
        self.sink.emit(&ProvisionEvent::RunFinished { status });

        ProvisioningReport {
            run_id: tenant.run_id,
            tenant: tenant.name,
            domain: tenant.domain,
            pipeline: pipeline.name().to_string(),
            status,
            resources,
            stages,
            warnings,
            started_at,
            finished_at: Utc::now(),
            cancel_reason,
            interrupted_stage,
        }
    }
}

fn failure_message(outcome: &StageOutcome) -> Option<String> {
    match outcome {
        StageOutcome::Failed { message, .. } => Some(message.clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::CollectingEventSink;
    use crate::pipeline::PipelineBuilder;
    use crate::testing::{fixtures, ScriptedStage};
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_all_success_is_complete() {
        let pipeline = PipelineBuilder::new("p")
            .stage(ScriptedStage::succeeding("a", "project"))
            .unwrap()
            .stage(ScriptedStage::succeeding("b", "branch"))
            .unwrap()
            .build()
            .unwrap();

        let report = Orchestrator::default().run(fixtures::tenant("acme"), &pipeline).await;

        assert_eq!(report.status, ReportStatus::Complete);
        assert_eq!(report.resources.kinds(), vec!["branch".to_string(), "project".to_string()]);
        assert_eq!(report.stages.len(), 2);
        assert_eq!(report.tenant, "acme");
    }

    #[tokio::test]
    async fn test_conditional_skip_keeps_complete() {
        let pipeline = PipelineBuilder::new("p")
            .stage(ScriptedStage::succeeding("a", "project"))
            .unwrap()
            .stage(ScriptedStage::skipping("dns", "dns", "no domain configured"))
            .unwrap()
            .build()
            .unwrap();

        let report = Orchestrator::default().run(fixtures::tenant("acme"), &pipeline).await;

        assert_eq!(report.status, ReportStatus::Complete);
        assert!(report.resource("dns").is_none());
        assert!(report.stage("dns").unwrap().outcome.is_skip());
    }

    #[tokio::test]
    async fn test_discovered_resource_is_adopted() {
        let stage = ScriptedStage::succeeding("a", "project")
            .with_discovered(ResourceHandle::with_id("existing"));
        let calls = stage.calls();
        let pipeline = PipelineBuilder::new("p").stage(stage).unwrap().build().unwrap();

        let report = Orchestrator::default().run(fixtures::tenant("acme"), &pipeline).await;

        assert_eq!(report.status, ReportStatus::Complete);
        assert_eq!(report.stage("a").unwrap().outcome, StageOutcome::SkippedAlreadyDone);
        assert_eq!(report.resource("project").unwrap().id(), Some("existing"));
        assert_eq!(calls.executions(), 0);
    }

    #[tokio::test]
    async fn test_discovery_can_be_disabled() {
        let stage = ScriptedStage::succeeding("a", "project")
            .with_discovered(ResourceHandle::with_id("existing"));
        let calls = stage.calls();
        let pipeline = PipelineBuilder::new("p").stage(stage).unwrap().build().unwrap();

        let orchestrator = Orchestrator::new(OrchestratorConfig::new().with_discovery(false));
        let report = orchestrator.run(fixtures::tenant("acme"), &pipeline).await;

        assert_eq!(calls.executions(), 1);
        assert_eq!(report.resource("project").unwrap().id(), Some("a-out"));
    }

    #[tokio::test]
    async fn test_conflicting_write_becomes_warning() {
        // Re-executes even though "project" is recorded, then tries to overwrite it.
        let stage = ScriptedStage::succeeding("again", "project").always_execute();
        let pipeline = PipelineBuilder::new("p").stage(stage).unwrap().build().unwrap();
        let ctx = fixtures::context("acme")
            .with_resource("project", ResourceHandle::with_id("original"))
            .unwrap();

        let report = Orchestrator::default().run_with_context(ctx, &pipeline).await;

        assert_eq!(report.resource("project").unwrap().id(), Some("original"));
        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].contains("project"));
    }

    #[tokio::test]
    async fn test_event_sequence() {
        let sink = Arc::new(CollectingEventSink::new());
        let pipeline = PipelineBuilder::new("p")
            .stage(ScriptedStage::succeeding("a", "project"))
            .unwrap()
            .stage(ScriptedStage::failing("b", "dns").non_fatal())
            .unwrap()
            .build()
            .unwrap();

        let report = Orchestrator::default()
            .with_event_sink(sink.clone())
            .run(fixtures::tenant("acme"), &pipeline)
            .await;

        assert_eq!(report.status, ReportStatus::Partial);
        assert_eq!(
            sink.event_types(),
            vec![
                "run.started",
                "stage.started",
                "stage.completed",
                "stage.started",
                "stage.failed",
                "run.finished",
            ]
        );
    }

    #[tokio::test]
    async fn test_pre_cancelled_run_executes_nothing() {
        let stage = ScriptedStage::succeeding("a", "project");
        let calls = stage.calls();
        let pipeline = PipelineBuilder::new("p").stage(stage).unwrap().build().unwrap();

        let orchestrator = Orchestrator::default();
        orchestrator.cancellation_token().cancel("operator abort");
        let report = orchestrator.run(fixtures::tenant("acme"), &pipeline).await;

        assert_eq!(report.status, ReportStatus::Cancelled);
        assert_eq!(report.cancel_reason.as_deref(), Some("operator abort"));
        assert!(report.stages.is_empty());
        assert_eq!(calls.executions(), 0);
    }

    #[tokio::test]
    async fn test_in_flight_result_discarded_on_cancel() {
        let token = Arc::new(CancellationToken::new());
        let stage = ScriptedStage::succeeding("a", "project").cancelling(Arc::clone(&token));
        let pipeline = PipelineBuilder::new("p").stage(stage).unwrap().build().unwrap();

        let report = Orchestrator::default()
            .with_cancellation_token(token)
            .run(fixtures::tenant("acme"), &pipeline)
            .await;

        assert_eq!(report.status, ReportStatus::Cancelled);
        assert_eq!(report.interrupted_stage.as_deref(), Some("a"));
        assert!(report.resources.is_empty());
        assert!(report.stages.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_cancels_run() {
        let pipeline = PipelineBuilder::new("p")
            .stage(ScriptedStage::succeeding("a", "project").with_delay(Duration::from_secs(5)))
            .unwrap()
            .stage(ScriptedStage::succeeding("b", "branch"))
            .unwrap()
            .build()
            .unwrap();

        let orchestrator = Orchestrator::new(OrchestratorConfig::new().with_deadline(Duration::from_secs(1)));
        let report = orchestrator.run(fixtures::tenant("acme"), &pipeline).await;

        assert_eq!(report.status, ReportStatus::Cancelled);
        assert_eq!(report.cancel_reason.as_deref(), Some(crate::cancellation::DEADLINE_EXCEEDED));
        assert!(report.stage("b").is_none());
    }

    #[tokio::test]
    async fn test_huge_deadline_runs_to_completion() {
        let pipeline = PipelineBuilder::new("p")
            .stage(ScriptedStage::succeeding("a", "project"))
            .unwrap()
            .build()
            .unwrap();

        let orchestrator =
            Orchestrator::new(OrchestratorConfig::new().with_deadline(Duration::from_secs(u64::MAX)));
        let report = orchestrator.run(fixtures::tenant("acme"), &pipeline).await;

        assert_eq!(report.status, ReportStatus::Complete);
        assert!(report.cancel_reason.is_none());
    }

    #[test]
    fn test_config_serde_defaults() {
        let config: OrchestratorConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, OrchestratorConfig::default());
        assert!(config.discover_existing);
        assert_eq!(config.deadline(), None);
    }
}
