pub mod context;
pub mod error;
pub mod reconciler;
pub mod status;
pub mod validation;

pub use context::Context;
pub use error::{BackoffConfig, Error, ErrorContext, Result};
pub use reconciler::{error_policy, reconcile};
pub use status::{ConditionBuilder, StatusManager, StatusUpdate, spec_changed};
pub use validation::{FieldError, ValidationReport, validate_spec, validate_storage};
