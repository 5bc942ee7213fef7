//! Immutability policies
//!
//! - Storage class of every volume cannot be changed after creation
//! - Volume sizes can only grow
//! - A dedicated WAL volume cannot be added or removed

use super::{ValidationContext, ValidationResult};
use crate::autoresize::quantity::parse_quantity;
use crate::crd::{PostgresClusterSpec, StorageSpec};

/// Validate immutable storage fields
///
/// Only applies to UPDATE. Tablespaces are matched by name; added
/// tablespaces are free to choose their class and size.
pub fn validate_immutability(ctx: &ValidationContext) -> ValidationResult {
    // Only apply immutability checks on UPDATE, not CREATE
    let old_cluster = match ctx.old_cluster {
        Some(c) => c,
        None => return ValidationResult::allowed(),
    };
    let old = &old_cluster.spec;
    let new = &ctx.cluster.spec;

    if old.has_dedicated_wal() != new.has_dedicated_wal() {
        return ValidationResult::denied(
            "WALStorageImmutable",
            "walStorage cannot be added or removed after creation. Delete and recreate the cluster to change the WAL layout.",
        );
    }

    for (field, old_storage, new_storage) in paired_volumes(old, new) {
        if old_storage.storage_class != new_storage.storage_class {
            return ValidationResult::denied(
                "StorageClassImmutable",
                &format!(
                    "{}.storageClass cannot be changed after creation. Delete and recreate the cluster to use a different storage class.",
                    field
                ),
            );
        }

        // unparseable sizes are reported by the resize policy check
        if let (Ok(old_size), Ok(new_size)) =
            (parse_quantity(&old_storage.size), parse_quantity(&new_storage.size))
            && new_size < old_size
        {
            return ValidationResult::denied(
                "VolumeShrinkNotAllowed",
                &format!(
                    "{}.size cannot be reduced. Current size: {}, requested: {}",
                    field, old_storage.size, new_storage.size
                ),
            );
        }
    }

    ValidationResult::allowed()
}

/// Volumes present in both the old and the new spec
fn paired_volumes<'a>(
    old: &'a PostgresClusterSpec,
    new: &'a PostgresClusterSpec,
) -> Vec<(String, &'a StorageSpec, &'a StorageSpec)> {
    let mut pairs = vec![("spec.storage".to_string(), &old.storage, &new.storage)];
    if let (Some(o), Some(n)) = (&old.wal_storage, &new.wal_storage) {
        pairs.push(("spec.walStorage".to_string(), o, n));
    }
    for (i, ts) in new.tablespaces.iter().enumerate() {
        if let Some(o) = old.tablespace(&ts.name) {
            pairs.push((format!("spec.tablespaces[{}].storage", i), &o.storage, &ts.storage));
        }
    }
    pairs
}
