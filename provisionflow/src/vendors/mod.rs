//! Vendor adapters and the standard tenant pipeline.
//!
//! This module provides:
//! - A shared JSON HTTP client that classifies every failure
//! - One stage per remote resource kind (Neon, Postgres, Railway, Vercel, Namecheap)
//! - Environment-driven configuration
//! - [`standard_pipeline`], which wires them in dependency order

mod bootstrap;
mod config;
pub mod http;
mod namecheap;
mod neon;
mod railway;
mod readiness;
mod vercel;

use async_trait::async_trait;
use std::sync::Arc;

pub use bootstrap::{admin, hash_password, quote_ident, quote_literal, BootstrapDatabaseStage};
pub use config::{
    BootstrapConfig, HttpConfig, NamecheapConfig, NeonConfig, ProvisionConfig, RailwayConfig,
    ReadinessConfig, VercelConfig, NAMECHEAP_SANDBOX_ENDPOINT,
};
pub use namecheap::{merge_hosts, record, CreateDnsRecordStage, DomainParts, HostRecord};
pub use neon::{CreateBranchStage, CreateDatabaseStage, CreateProjectStage, NeonClient, APP_BRANCH};
pub use railway::DeployBackendStage;
pub use readiness::AwaitBackendStage;
pub use vercel::{repo_slug, DeployFrontendStage};

use crate::context::ProvisioningContext;
use crate::core::{Criticality, StageOutcome};
use crate::errors::{PipelineValidationError, ProvisionError};
use crate::pipeline::{Pipeline, PipelineBuilder};
use crate::polling::Poller;
use crate::stages::Stage;

/// Resource kinds recorded by the standard pipeline.
pub mod kinds {
    /// Neon project.
    pub const PROJECT: &str = "project";
    /// Neon application branch.
    pub const BRANCH: &str = "branch";
    /// Tenant database.
    pub const DATABASE: &str = "database";
    /// Application role and seeded schema.
    pub const USER: &str = "user";
    /// Railway backend deployment.
    pub const BACKEND: &str = "backend";
    /// Backend answering HTTP.
    pub const BACKEND_READY: &str = "backend_ready";
    /// Vercel frontend project.
    pub const FRONTEND: &str = "frontend";
    /// DNS record for the tenant domain.
    pub const DNS: &str = "dns";
}

/// Name of the pipeline built by [`standard_pipeline`].
pub const STANDARD_PIPELINE: &str = "tenant";

/// Errors raised while assembling the standard pipeline.
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    /// A vendor client could not be built.
    #[error(transparent)]
    Client(#[from] ProvisionError),
    /// The stage list is invalid.
    #[error(transparent)]
    Pipeline(#[from] PipelineValidationError),
}

/// Stands in for a stage whose vendor has no credentials configured.
///
/// Always non-fatal; always skips.
#[derive(Debug, Clone)]
pub struct UnconfiguredStage {
    name: String,
    kind: String,
    reason: String,
}

impl UnconfiguredStage {
    /// Creates a placeholder for `name` explaining which setting is missing.
    pub fn new(name: impl Into<String>, kind: impl Into<String>, missing: &str) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            reason: format!("{missing} not configured"),
        }
    }
}

#[async_trait]
impl Stage for UnconfiguredStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn resource_kind(&self) -> &str {
        &self.kind
    }

    fn criticality(&self) -> Criticality {
        Criticality::NonFatal
    }

    async fn execute(&self, _ctx: &ProvisioningContext) -> StageOutcome {
        StageOutcome::skipped(self.reason.clone())
    }
}

/// Builds the full tenant pipeline:
///
/// `create-project → create-branch → create-database → bootstrap-database →
/// deploy-backend → await-backend → deploy-frontend → create-dns-record`
///
/// The database stages are fatal. The downstream stages are non-fatal and
/// skip when their vendor is not configured.
pub fn standard_pipeline(config: &ProvisionConfig, poller: &Poller) -> Result<Pipeline, SetupError> {
    let neon = Arc::new(NeonClient::new(config.neon.clone(), &config.http, poller.clone())?);

    let backend: Arc<dyn Stage> = match &config.railway {
        Some(railway) => Arc::new(DeployBackendStage::new(railway.clone(), &config.http)?),
        None => Arc::new(UnconfiguredStage::new("deploy-backend", kinds::BACKEND, "RAILWAY_API_KEY")),
    };
    let frontend: Arc<dyn Stage> = match &config.vercel {
        Some(vercel) => Arc::new(DeployFrontendStage::new(vercel.clone(), &config.http)?),
        None => Arc::new(UnconfiguredStage::new("deploy-frontend", kinds::FRONTEND, "VERCEL_TOKEN")),
    };
    let dns: Arc<dyn Stage> = match &config.namecheap {
        Some(namecheap) => Arc::new(CreateDnsRecordStage::new(namecheap.clone(), &config.http)?),
        None => Arc::new(UnconfiguredStage::new("create-dns-record", kinds::DNS, "NAMECHEAP_API_USER")),
    };

    let pipeline = PipelineBuilder::new(STANDARD_PIPELINE)
        .stage(CreateProjectStage::new(Arc::clone(&neon)))?
        .stage(CreateBranchStage::new(Arc::clone(&neon)))?
        .stage(CreateDatabaseStage::new(Arc::clone(&neon)))?
        .stage(BootstrapDatabaseStage::new(neon, config.bootstrap.clone(), poller.clone()))?
        .stage_arc(backend)?
        .stage(AwaitBackendStage::new(config.readiness.clone(), &config.http, poller.clone())?)?
        .stage_arc(frontend)?
        .stage_arc(dns)?
        .build()?;
    Ok(pipeline)
}
