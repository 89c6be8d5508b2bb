//! Testing utilities for provisioning pipelines.
//!
//! This module provides:
//! - Scripted stages with call tracking
//! - A recording sleeper and a cancelling event sink
//! - Fixtures and report assertions

mod assertions;
pub mod fixtures;
mod mocks;

pub use assertions::{
    assert_has_resource, assert_report_status, assert_stage_failed, assert_stage_not_run,
    assert_stage_succeeded,
};
pub use fixtures::ScriptedPipeline;
pub use mocks::{CancellingSink, RecordingSleeper, ScriptedStage, StageCalls};
