//! # Provisionflow
//!
//! Stage-based provisioning of isolated tenant environments.
//!
//! Given a tenant identity, provisionflow creates a database, application
//! credentials and downstream deployments across several vendors, and
//! returns a structured report with every handle it created:
//!
//! - **Strictly ordered stages**: each stage creates one kind of resource
//! - **Idempotent re-runs**: recorded or discoverable resources are never recreated
//! - **Graceful degradation**: non-fatal stages taint the run to `partial`
//! - **Bounded readiness polling**: one poller replaces every retry loop
//! - **Cancellation**: an external token or a run deadline stops the run at
//!   the next suspension point
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use provisionflow::prelude::*;
//!
//! let config = ProvisionConfig::from_env()?;
//! let pipeline = standard_pipeline(&config, &Poller::new())?;
//!
//! let tenant = TenantIdentity::new("acme")?.with_domain("acme.example.com");
//! let report = Orchestrator::new(config.orchestrator.clone())
//!     .run(tenant, &pipeline)
//!     .await;
//!
//! println!("{}", report.to_text());
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod context;
pub mod core;
pub mod credentials;
pub mod errors;
pub mod events;
pub mod pipeline;
pub mod polling;
pub mod stages;
pub mod testing;

#[cfg(feature = "vendors")]
pub mod vendors;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::{CancelScope, CancellationToken};
    pub use crate::context::{ContextSnapshot, ProvisioningContext, ResourceMap, TenantIdentity};
    pub use crate::core::{
        fields, ConnectionDescriptor, Criticality, ReportStatus, ResourceHandle, StageOutcome,
    };
    pub use crate::credentials::{username_for, Credential, CredentialGenerator, Secret};
    pub use crate::errors::{
        ConfigError, ErrorKind, PipelineValidationError, ProvisionError, ResourceConflictError,
        TimeoutError,
    };
    pub use crate::events::{
        CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink, ProvisionEvent,
    };
    pub use crate::pipeline::{
        Orchestrator, OrchestratorConfig, Pipeline, PipelineBuilder, ProvisioningReport,
    };
    pub use crate::polling::{PollConfig, PollSpec, Poller, ProbeResult, Sleeper};
    pub use crate::stages::{FnStage, Stage, StageRecord};
    #[cfg(feature = "vendors")]
    pub use crate::vendors::{kinds, standard_pipeline, ProvisionConfig, SetupError};
}
