//! Admission webhook policies
//!
//! Each policy module exports a `validate` function that checks specific rules.

pub mod autoresize;
pub mod immutability;

pub use autoresize::validate_autoresize;
pub use immutability::validate_immutability;

use crate::crd::PostgresCluster;

/// Result of a policy validation
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub allowed: bool,
    pub reason: Option<String>,
    pub message: Option<String>,
    /// Returned to the client even when the request is admitted
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn allowed() -> Self {
        Self {
            allowed: true,
            ..Default::default()
        }
    }

    pub fn denied(reason: &str, message: &str) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.to_string()),
            message: Some(message.to_string()),
            warnings: Vec::new(),
        }
    }

    pub fn with_warnings(mut self, warnings: Vec<String>) -> Self {
        self.warnings = warnings;
        self
    }
}

/// Context for validation including old object for UPDATE operations
pub struct ValidationContext<'a> {
    pub cluster: &'a PostgresCluster,
    pub old_cluster: Option<&'a PostgresCluster>,
}

impl<'a> ValidationContext<'a> {
    pub fn new(cluster: &'a PostgresCluster, old_cluster: Option<&'a PostgresCluster>) -> Self {
        Self { cluster, old_cluster }
    }

    /// Check if this is a CREATE operation (no old object)
    pub fn is_create(&self) -> bool {
        self.old_cluster.is_none()
    }
}

/// Run all validation policies and return the first failure
///
/// Warnings from every policy that ran are kept on the result.
pub fn validate_all(ctx: &ValidationContext) -> ValidationResult {
    let policies: [fn(&ValidationContext) -> ValidationResult; 2] =
        [validate_autoresize, validate_immutability];

    let mut warnings = Vec::new();
    for policy in policies {
        let result = policy(ctx);
        warnings.extend(result.warnings.iter().cloned());
        if !result.allowed {
            return result.with_warnings(warnings);
        }
    }

    ValidationResult::allowed().with_warnings(warnings)
}
