//! Test assertions for provisioning reports.

use crate::core::ReportStatus;
use crate::pipeline::ProvisioningReport;

/// Asserts that the report has the expected status.
pub fn assert_report_status(report: &ProvisioningReport, expected: ReportStatus) {
    assert_eq!(
        report.status, expected,
        "Expected status {:?}, got {:?}. Stages: {:?}",
        expected,
        report.status,
        report.stages.iter().map(|r| (&r.name, r.outcome.label())).collect::<Vec<_>>()
    );
}

/// Asserts that the named stage succeeded or was already done.
pub fn assert_stage_succeeded(report: &ProvisioningReport, stage: &str) {
    let record = report
        .stage(stage)
        .unwrap_or_else(|| panic!("Expected a record for stage '{stage}'"));
    assert!(
        record.outcome.is_success(),
        "Expected stage '{}' to succeed, got {:?}",
        stage,
        record.outcome
    );
}

/// Asserts that the named stage failed.
pub fn assert_stage_failed(report: &ProvisioningReport, stage: &str) {
    let record = report
        .stage(stage)
        .unwrap_or_else(|| panic!("Expected a record for stage '{stage}'"));
    assert!(
        record.outcome.is_failure(),
        "Expected stage '{}' to fail, got {:?}",
        stage,
        record.outcome
    );
}

/// Asserts that the named stage never ran.
pub fn assert_stage_not_run(report: &ProvisioningReport, stage: &str) {
    assert!(
        report.stage(stage).is_none(),
        "Expected stage '{stage}' not to run, but it has a record"
    );
}

/// Asserts that a handle is recorded for the kind.
pub fn assert_has_resource(report: &ProvisioningReport, kind: &str) {
    assert!(
        report.resource(kind).is_some(),
        "Expected a '{}' handle. Kinds: {:?}",
        kind,
        report.resources.kinds()
    );
}
