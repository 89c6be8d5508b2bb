//! Context management for provisioning runs.
//!
//! This module provides:
//! - Tenant identity and name validation
//! - The write-once resource handle map
//! - The single-owner provisioning context and its snapshots

mod identity;
mod provisioning;
mod resources;
mod snapshot;

pub use identity::TenantIdentity;
pub use provisioning::ProvisioningContext;
pub use resources::ResourceMap;
pub use snapshot::ContextSnapshot;
