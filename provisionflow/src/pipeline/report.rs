//! The structured result of a provisioning run.

use crate::context::ResourceMap;
use crate::core::{ConnectionDescriptor, ReportStatus, ResourceHandle};
use crate::stages::StageRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Everything a caller needs after a run: status, every handle created so
/// far (for use or manual cleanup), per-stage records and warnings.
///
/// Returned for every run, including total failure and cancellation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisioningReport {
    /// Run id.
    pub run_id: Uuid,
    /// Tenant name.
    pub tenant: String,
    /// Tenant domain, if one was given.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    /// Pipeline name.
    pub pipeline: String,
    /// Overall status.
    pub status: ReportStatus,
    /// Final resource-handle map.
    pub resources: ResourceMap,
    /// Per-stage records in execution order.
    pub stages: Vec<StageRecord>,
    /// Warnings raised during the run.
    #[serde(default)]
    pub warnings: Vec<String>,
    /// Run start.
    pub started_at: DateTime<Utc>,
    /// Run end.
    pub finished_at: DateTime<Utc>,
    /// Why the run was cancelled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancel_reason: Option<String>,
    /// Stage that was in flight when cancellation took effect.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interrupted_stage: Option<String>,
}

impl ProvisioningReport {
    /// Returns the record for a stage.
    #[must_use]
    pub fn stage(&self, name: &str) -> Option<&StageRecord> {
        self.stages.iter().find(|r| r.name == name)
    }

    /// Returns the names of stages that failed.
    #[must_use]
    pub fn failed_stages(&self) -> Vec<&str> {
        self.stages
            .iter()
            .filter(|r| r.outcome.is_failure())
            .map(|r| r.name.as_str())
            .collect()
    }

    /// Returns the handle for a resource kind.
    #[must_use]
    pub fn resource(&self, kind: &str) -> Option<&ResourceHandle> {
        self.resources.get(kind)
    }

    /// Process exit code for this report.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        self.status.exit_code()
    }

    /// Wall time of the whole run in milliseconds.
    #[must_use]
    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }

    /// Connection descriptor built from the handle recorded under `kind`.
    #[must_use]
    pub fn connection(&self, kind: &str) -> Option<ConnectionDescriptor> {
        self.resources.get(kind).and_then(ConnectionDescriptor::from_handle)
    }

    /// Returns a copy with secret-bearing handle fields masked.
    #[must_use]
    pub fn redacted(&self) -> Self {
        Self {
            resources: self.resources.redacted(),
            stages: self
                .stages
                .iter()
                .map(|r| {
                    let mut r = r.clone();
                    if let crate::core::StageOutcome::Success { data } = &mut r.outcome {
                        *data = data.redacted();
                    }
                    r
                })
                .collect(),
            ..self.clone()
        }
    }

    /// Serializes the report as pretty JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Renders a human-readable summary.
    #[must_use]
    pub fn to_text(&self) -> String {
        let mut out = format!(
            "tenant {} ({}): {} in {}ms\n",
            self.tenant,
            self.run_id,
            self.status,
            self.duration_ms()
        );
        for record in &self.stages {
            out.push_str(&format!(
                "  {:<20} {:<12} {}ms",
                record.name,
                record.outcome.label(),
                record.duration_ms()
            ));
            match &record.outcome {
                crate::core::StageOutcome::Failed { error_kind, message, .. } => {
                    out.push_str(&format!("  [{error_kind}] {message}"));
                }
                crate::core::StageOutcome::Skipped { reason } => {
                    out.push_str(&format!("  ({reason})"));
                }
                _ => {}
            }
            out.push('\n');
        }
        if let Some(reason) = &self.cancel_reason {
            out.push_str(&format!("  cancelled: {reason}"));
            if let Some(stage) = &self.interrupted_stage {
                out.push_str(&format!(" during {stage}"));
            }
            out.push('\n');
        }
        for warning in &self.warnings {
            out.push_str(&format!("  warning: {warning}\n"));
        }
        for (kind, handle) in self.resources.iter() {
            let fields: Vec<String> = handle.iter().map(|(k, v)| format!("{k}={v}")).collect();
            out.push_str(&format!("  {kind}: {}\n", fields.join(" ")));
        }
        out
    }
}
