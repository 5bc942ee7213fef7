//! Cluster disk status aggregation
//!
//! Folds one cycle of collection results into the persisted per-instance
//! status. Failed collections keep the previous value flagged stale, and
//! instances that no longer exist are dropped.

use std::collections::{BTreeMap, BTreeSet};

use super::CollectionError;
use crate::autoresize::volume::VolumeRole;
use crate::crd::{InstanceDiskStatus, VolumeUsageSample, WalHealthStatus};

/// What was collected from one instance in one cycle
#[derive(Debug)]
pub struct InstanceCollection {
    pub instance: String,
    pub volumes: Vec<(VolumeRole, Result<VolumeUsageSample, CollectionError>)>,
    /// `None` for instances that are not the primary
    pub wal_health: Option<Result<WalHealthStatus, CollectionError>>,
}

/// A collection failure, for logging and metrics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionFailure {
    pub instance: String,
    /// Volume role, or "wal-health"
    pub source: String,
    pub kind: &'static str,
    pub message: String,
}

/// Result of folding a cycle into the status
#[derive(Debug, Default)]
pub struct MergedDiskStatus {
    pub instances: BTreeMap<String, InstanceDiskStatus>,
    pub failures: Vec<CollectionFailure>,
}

impl MergedDiskStatus {
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }
}

/// Merge collection results into the previous status
pub fn merge(
    previous: &BTreeMap<String, InstanceDiskStatus>,
    collections: Vec<InstanceCollection>,
    now: &str,
) -> MergedDiskStatus {
    let mut merged = MergedDiskStatus::default();

    for collection in collections {
        let mut status = previous
            .get(&collection.instance)
            .cloned()
            .unwrap_or_default();
        let mut refreshed = false;

        let roles: BTreeSet<VolumeRole> = collection
            .volumes
            .iter()
            .map(|(role, _)| role.clone())
            .collect();
        retain_roles(&mut status, &roles);

        for (role, result) in collection.volumes {
            match result {
                Ok(sample) => {
                    status.set_sample(&role, sample);
                    refreshed = true;
                }
                Err(err) => {
                    status.mark_stale(&role);
                    merged.failures.push(CollectionFailure {
                        instance: collection.instance.clone(),
                        source: role.to_string(),
                        kind: err.kind(),
                        message: err.to_string(),
                    });
                }
            }
        }

        match collection.wal_health {
            Some(Ok(health)) => {
                status.wal_health = Some(health);
                refreshed = true;
            }
            Some(Err(err)) => {
                if let Some(health) = status.wal_health.as_mut() {
                    health.stale = true;
                }
                merged.failures.push(CollectionFailure {
                    instance: collection.instance.clone(),
                    source: "wal-health".to_string(),
                    kind: err.kind(),
                    message: err.to_string(),
                });
            }
            None => status.wal_health = None,
        }

        if refreshed {
            status.last_updated = Some(now.to_string());
        }
        merged.instances.insert(collection.instance, status);
    }

    merged
}

/// Drop samples for volume roles the instance no longer has
fn retain_roles(status: &mut InstanceDiskStatus, roles: &BTreeSet<VolumeRole>) {
    if !roles.contains(&VolumeRole::Data) {
        status.data_volume = None;
    }
    if !roles.contains(&VolumeRole::Wal) {
        status.wal_volume = None;
    }
    status
        .tablespaces
        .retain(|name, _| roles.contains(&VolumeRole::Tablespace(name.clone())));
}

/// WAL health reported by the primary, if any
pub fn primary_wal_health<'a>(
    instances: &'a BTreeMap<String, InstanceDiskStatus>,
    primary: Option<&str>,
) -> Option<&'a WalHealthStatus> {
    instances.get(primary?)?.wal_health.as_ref()
}
