//! Status and conditions management for PostgresCluster resources
//!
//! The status is written with a merge patch that carries the
//! `resourceVersion` it was computed from. When another writer got there
//! first the API server answers 409, the cluster is read again and the same
//! update is reapplied on top of the fresh status.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use kube::api::{Patch, PatchParams};
use kube::{Api, ResourceExt};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::autoresize::actuator::FIELD_MANAGER;
use crate::autoresize::rate_limit::{append_event, format_timestamp, prune};
use crate::controller::error::{Error, Result};
use crate::crd::{AutoResizeEvent, Condition, InstanceDiskStatus, PostgresCluster, PostgresClusterStatus};

/// Attempts made when the status write conflicts
pub const MAX_STATUS_ATTEMPTS: u32 = 3;

/// Standard condition types following Kubernetes conventions
pub mod condition_types {
    /// Disk usage was collected from every instance this cycle
    pub const READY: &str = "Ready";
    /// No volume is blocked or stuck at its limit
    pub const AUTO_RESIZE_HEALTHY: &str = "AutoResizeHealthy";
    /// Resize configuration is valid
    pub const CONFIG_VALID: &str = "ConfigurationValid";
}

/// Condition status values
pub mod condition_status {
    pub const TRUE: &str = "True";
    pub const FALSE: &str = "False";
}

/// Builder for creating and updating status conditions
pub struct ConditionBuilder {
    conditions: Vec<Condition>,
    generation: Option<i64>,
    now: String,
}

impl ConditionBuilder {
    /// Create a new condition builder
    pub fn new(generation: Option<i64>) -> Self {
        Self::from_existing(Vec::new(), generation)
    }

    /// Create from existing conditions
    pub fn from_existing(existing: Vec<Condition>, generation: Option<i64>) -> Self {
        Self {
            conditions: existing,
            generation,
            now: format_timestamp(Utc::now()),
        }
    }

    /// Use `now` as the transition time for changed conditions
    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = format_timestamp(now);
        self
    }

    /// Set a condition, updating if it exists or adding if it doesn't
    pub fn set_condition(mut self, type_: &str, status: &str, reason: &str, message: &str) -> Self {
        if let Some(existing) = self.conditions.iter_mut().find(|c| c.type_ == type_) {
            // transition time only moves when the status flips
            if existing.status != status {
                existing.status = status.to_string();
                existing.last_transition_time = self.now.clone();
            }
            existing.reason = reason.to_string();
            existing.message = message.to_string();
            existing.observed_generation = self.generation;
        } else {
            self.conditions.push(Condition {
                type_: type_.to_string(),
                status: status.to_string(),
                reason: reason.to_string(),
                message: message.to_string(),
                last_transition_time: self.now.clone(),
                observed_generation: self.generation,
            });
        }
        self
    }

    /// Set a boolean condition
    pub fn flag(self, type_: &str, value: bool, reason: &str, message: &str) -> Self {
        let status = if value {
            condition_status::TRUE
        } else {
            condition_status::FALSE
        };
        self.set_condition(type_, status, reason, message)
    }

    /// Set the Ready condition
    pub fn ready(self, is_ready: bool, reason: &str, message: &str) -> Self {
        self.flag(condition_types::READY, is_ready, reason, message)
    }

    pub fn auto_resize_healthy(self, healthy: bool, reason: &str, message: &str) -> Self {
        self.flag(condition_types::AUTO_RESIZE_HEALTHY, healthy, reason, message)
    }

    pub fn config_valid(self, valid: bool, reason: &str, message: &str) -> Self {
        self.flag(condition_types::CONFIG_VALID, valid, reason, message)
    }

    /// Build the conditions list
    pub fn build(self) -> Vec<Condition> {
        self.conditions
    }
}

/// A condition to set as part of a status update
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionUpdate {
    pub type_: &'static str,
    pub value: bool,
    pub reason: String,
    pub message: String,
}

impl ConditionUpdate {
    pub fn new(type_: &'static str, value: bool, reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            type_,
            value,
            reason: reason.into(),
            message: message.into(),
        }
    }
}

/// What one reconcile cycle changes in the status
///
/// Disk status and the primary are replaced. Events are appended to
/// whatever history the latest status holds.
#[derive(Debug, Clone, Default)]
pub struct StatusUpdate {
    pub primary_pod: Option<String>,
    pub disk_status: Option<BTreeMap<String, InstanceDiskStatus>>,
    pub new_events: Vec<AutoResizeEvent>,
    pub conditions: Vec<ConditionUpdate>,
}

impl StatusUpdate {
    /// Apply on top of `existing`
    pub fn apply(
        &self,
        existing: Option<&PostgresClusterStatus>,
        generation: Option<i64>,
        now: DateTime<Utc>,
    ) -> PostgresClusterStatus {
        let mut status = existing.cloned().unwrap_or_default();

        if let Some(disk_status) = &self.disk_status {
            status.disk_status = disk_status.clone();
            status.primary_pod = self.primary_pod.clone();
        }

        for event in &self.new_events {
            append_event(&mut status.auto_resize_events, event.clone(), now);
        }
        prune(&mut status.auto_resize_events, now);

        let mut builder = ConditionBuilder::from_existing(std::mem::take(&mut status.conditions), generation).at(now);
        for c in &self.conditions {
            builder = builder.flag(c.type_, c.value, &c.reason, &c.message);
        }
        status.conditions = builder.build();
        status.observed_generation = generation;
        status
    }
}

/// Merge patch that turns `old` into `new`
///
/// Members missing from `new` are set to null so the server removes them.
/// Arrays and scalars are replaced wholesale.
pub fn merge_patch_diff(old: &Value, new: &Value) -> Value {
    match (old, new) {
        (Value::Object(old), Value::Object(new)) => {
            let mut patch = Map::new();
            for key in old.keys() {
                if !new.contains_key(key) {
                    patch.insert(key.clone(), Value::Null);
                }
            }
            for (key, new_value) in new {
                match old.get(key) {
                    Some(old_value) if old_value == new_value => {}
                    Some(old_value) => {
                        patch.insert(key.clone(), merge_patch_diff(old_value, new_value));
                    }
                    None => {
                        patch.insert(key.clone(), new_value.clone());
                    }
                }
            }
            Value::Object(patch)
        }
        _ => new.clone(),
    }
}

/// Build the status patch for `cluster`, guarded by its resourceVersion
pub fn status_patch(cluster: &PostgresCluster, update: &StatusUpdate, now: DateTime<Utc>) -> Result<Value> {
    let old = serde_json::to_value(cluster.status.clone().unwrap_or_default())?;
    let new = serde_json::to_value(update.apply(cluster.status.as_ref(), cluster.metadata.generation, now))?;

    let mut patch = serde_json::json!({ "status": merge_patch_diff(&old, &new) });
    if let Some(rv) = cluster.resource_version() {
        patch["metadata"] = serde_json::json!({ "resourceVersion": rv });
    }
    Ok(patch)
}

/// Status manager for PostgresCluster resources
pub struct StatusManager {
    api: Api<PostgresCluster>,
}

impl StatusManager {
    pub fn new(api: Api<PostgresCluster>) -> Self {
        Self { api }
    }

    /// Write `update` on top of the latest status, retrying on conflicts
    ///
    /// Returns `None` when the cluster no longer exists.
    pub async fn update(
        &self,
        cluster: &PostgresCluster,
        update: &StatusUpdate,
        now: DateTime<Utc>,
    ) -> Result<Option<PostgresCluster>> {
        let name = cluster.name_any();
        let mut current = cluster.clone();

        for attempt in 1..=MAX_STATUS_ATTEMPTS {
            let patch = status_patch(&current, update, now)?;
            match self
                .api
                .patch_status(&name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
                .await
                .map_err(Error::from)
            {
                Ok(updated) => return Ok(Some(updated)),
                Err(e) if e.is_conflict() && attempt < MAX_STATUS_ATTEMPTS => {
                    debug!(cluster = %name, attempt, "Status write conflicted, re-reading");
                    match self.api.get_opt(&name).await? {
                        Some(fresh) => current = fresh,
                        None => return Ok(None),
                    }
                }
                Err(e) if e.is_not_found() => return Ok(None),
                Err(e) => {
                    warn!(cluster = %name, attempt, error = %e, "Failed to update status");
                    return Err(e);
                }
            }
        }

        Err(Error::TransientError(format!(
            "status of {} kept conflicting after {} attempts",
            name, MAX_STATUS_ATTEMPTS
        )))
    }
}

/// Check if the cluster spec has changed since `observed`
pub fn spec_changed(observed: &PostgresCluster, latest: &PostgresCluster) -> bool {
    match (observed.metadata.generation, latest.metadata.generation) {
        (Some(a), Some(b)) => a != b,
        _ => observed.metadata.uid != latest.metadata.uid,
    }
}
