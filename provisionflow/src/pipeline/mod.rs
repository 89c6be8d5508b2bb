//! Pipeline building and execution.
//!
//! This module provides:
//! - Validated, strictly ordered pipelines
//! - The orchestrator that runs them
//! - The provisioning report it returns

mod builder;
mod orchestrator;
mod report;

pub use builder::{Pipeline, PipelineBuilder};
pub use orchestrator::{Orchestrator, OrchestratorConfig};
pub use report::ProvisioningReport;
