//! Resize policy validation
//!
//! Thresholds, steps, limits and rate limits must be well formed, and a
//! cluster whose WAL shares the data volume must acknowledge the risk of
//! growing that volume before enabling data resize.

use super::{ValidationContext, ValidationResult};
use crate::controller::validation::{MISSING_WAL_RISK_ACKNOWLEDGEMENT, validate_storage};

pub fn validate_autoresize(ctx: &ValidationContext) -> ValidationResult {
    let report = validate_storage(&ctx.cluster.spec);

    if report.is_valid() {
        return ValidationResult::allowed().with_warnings(report.warnings);
    }

    let reason = if report.has_code(MISSING_WAL_RISK_ACKNOWLEDGEMENT) {
        "MissingWALRiskAcknowledgement"
    } else {
        "InvalidResizePolicy"
    };
    ValidationResult::denied(reason, &report.summary()).with_warnings(report.warnings)
}
