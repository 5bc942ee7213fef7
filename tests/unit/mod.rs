//! Unit tests for the PostgreSQL storage operator
//!
//! This module contains unit tests for:
//! - Resize cycles against in-memory volumes
//! - Validation logic
//! - Status management
//! - Admission webhook policies

#[path = "../common/mod.rs"]
mod common;

mod autoresize;
mod status;
mod validation;
