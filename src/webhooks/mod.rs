//! Admission webhooks for PostgresCluster validation
//!
//! Rejects resize policies the controller could not act on, volume
//! shrinks and storage layout changes before they reach etcd. Problems
//! that are legal but likely mistakes come back as admission warnings.

pub mod policies;
mod server;

pub use policies::{ValidationContext, ValidationResult, validate_all};
pub use server::{
    AdmissionRequest, AdmissionResponse, AdmissionReview, AdmissionReviewResponse, WebhookError,
    run_webhook_server,
};
