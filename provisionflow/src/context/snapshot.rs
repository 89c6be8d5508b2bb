//! Immutable context snapshots.

use super::{ResourceMap, TenantIdentity};
use serde::{Deserialize, Serialize};

/// A detached copy of a run's state at one point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextSnapshot {
    /// The tenant being provisioned.
    pub tenant: TenantIdentity,
    /// Resource handles recorded so far.
    pub resources: ResourceMap,
    /// Stages that have an outcome, in execution order.
    pub completed_stages: Vec<String>,
}
