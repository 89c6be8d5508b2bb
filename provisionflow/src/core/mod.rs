//! Core domain model types.
//!
//! This module contains the fundamental types used throughout the crate:
//! - Stage criticality and report status enums
//! - Stage outcome type with factory methods
//! - Resource handles and connection descriptors

mod connection;
mod handle;
mod outcome;
mod status;

pub use connection::{ConnectionDescriptor, DEFAULT_PORT};
pub use handle::{fields, ResourceHandle};
pub use outcome::StageOutcome;
pub use status::{Criticality, ReportStatus};
