//! Validation of storage and resize policy configuration
//!
//! Shared by the admission webhook, which rejects bad configurations
//! before they are stored, and the reconciler, which refuses to act on
//! configurations that reached the API server some other way.
//!
//! All problems across data, WAL and tablespace volumes are collected in
//! one report. Disabled resize configurations are not checked.

use std::fmt;
use std::str::FromStr;

use crate::autoresize::quantity::{Step, parse_quantity};
use crate::autoresize::volume::VolumeRole;
use crate::controller::error::{Error, Result};
use crate::crd::{PostgresCluster, PostgresClusterSpec, ResizeConfiguration, StorageSpec};

/// Error code for a single-volume cluster without WAL risk acknowledgement
pub const MISSING_WAL_RISK_ACKNOWLEDGEMENT: &str = "missing-wal-risk-acknowledgement";

pub const MIN_USAGE_THRESHOLD: i32 = 1;
pub const MAX_USAGE_THRESHOLD: i32 = 99;

/// A rejected field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    /// JSON path of the offending field, e.g. `spec.walStorage.resize.expansion.step`
    pub field: String,
    pub code: &'static str,
    pub message: String,
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Outcome of validating a cluster spec
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub errors: Vec<FieldError>,
    /// Admitted, but probably not what the user meant
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn has_code(&self, code: &str) -> bool {
        self.errors.iter().any(|e| e.code == code)
    }

    /// All errors joined into one message
    pub fn summary(&self) -> String {
        self.errors
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ")
    }

    fn error(&mut self, field: String, code: &'static str, message: impl Into<String>) {
        self.errors.push(FieldError {
            field,
            code,
            message: message.into(),
        });
    }
}

/// Validate the cluster spec, returning the first-class error used by
/// the reconciler
pub fn validate_spec(cluster: &PostgresCluster) -> Result<ValidationReport> {
    let report = validate_storage(&cluster.spec);
    if report.is_valid() {
        Ok(report)
    } else {
        Err(Error::ValidationError(report.summary()))
    }
}

/// Validate sizes and resize policies of every volume role
pub fn validate_storage(spec: &PostgresClusterSpec) -> ValidationReport {
    let mut report = ValidationReport::default();

    let mut volumes: Vec<(String, VolumeRole, &StorageSpec)> =
        vec![("spec.storage".to_string(), VolumeRole::Data, &spec.storage)];
    if let Some(wal) = &spec.wal_storage {
        volumes.push(("spec.walStorage".to_string(), VolumeRole::Wal, wal));
    }
    for (i, ts) in spec.tablespaces.iter().enumerate() {
        volumes.push((
            format!("spec.tablespaces[{}].storage", i),
            VolumeRole::Tablespace(ts.name.clone()),
            &ts.storage,
        ));
    }

    let mut seen = std::collections::BTreeSet::new();
    for ts in &spec.tablespaces {
        if !seen.insert(ts.name.as_str()) {
            report.error(
                "spec.tablespaces".to_string(),
                "duplicate-tablespace",
                format!("tablespace {} is declared more than once", ts.name),
            );
        }
    }

    for (path, role, storage) in volumes {
        let size = match parse_quantity(&storage.size) {
            Ok(size) if size > 0 => Some(size),
            Ok(_) => {
                report.error(format!("{}.size", path), "invalid-size", "size must be greater than zero");
                None
            }
            Err(e) => {
                report.error(format!("{}.size", path), "invalid-size", e.to_string());
                None
            }
        };
        if let Some(config) = storage.enabled_resize() {
            validate_resize(
                &mut report,
                &format!("{}.resize", path),
                &role,
                config,
                size,
                spec,
            );
        }
    }

    report
}

fn validate_resize(
    report: &mut ValidationReport,
    path: &str,
    role: &VolumeRole,
    config: &ResizeConfiguration,
    current_size: Option<u64>,
    spec: &PostgresClusterSpec,
) {
    let has_dedicated_wal = spec.has_dedicated_wal();
    let policy = config.wal_safety_policy();
    let acknowledged = policy.and_then(|p| p.acknowledge_wal_risk).unwrap_or(false);

    if *role == VolumeRole::Data && !has_dedicated_wal && !acknowledged {
        report.error(
            format!("{}.strategy.walSafetyPolicy.acknowledgeWALRisk", path),
            MISSING_WAL_RISK_ACKNOWLEDGEMENT,
            "the data volume also holds WAL on clusters without walStorage; set acknowledgeWALRisk: true to enable automatic resize",
        );
    }
    if *role == VolumeRole::Data && has_dedicated_wal && policy.and_then(|p| p.acknowledge_wal_risk).is_some() {
        report
            .warnings
            .push(format!("{}: acknowledgeWALRisk has no effect on clusters with walStorage", path));
    }

    if let Some(threshold) = config.triggers.as_ref().and_then(|t| t.usage_threshold)
        && !(MIN_USAGE_THRESHOLD..=MAX_USAGE_THRESHOLD).contains(&threshold)
    {
        report.error(
            format!("{}.triggers.usageThreshold", path),
            "invalid-threshold",
            format!(
                "usageThreshold must be between {} and {}, got {}",
                MIN_USAGE_THRESHOLD, MAX_USAGE_THRESHOLD, threshold
            ),
        );
    }
    if let Some(min_available) = config.triggers.as_ref().and_then(|t| t.min_available.as_deref()) {
        quantity(report, &format!("{}.triggers.minAvailable", path), min_available);
    }

    let expansion = config.expansion.clone().unwrap_or_default();
    let step = match expansion.step.as_deref().map(Step::from_str) {
        Some(Ok(step)) => Some(step),
        Some(Err(e)) => {
            report.error(format!("{}.expansion.step", path), "invalid-step", e.to_string());
            None
        }
        None => None,
    };
    let min_step = expansion
        .min_step
        .as_deref()
        .and_then(|v| quantity(report, &format!("{}.expansion.minStep", path), v));
    let max_step = expansion
        .max_step
        .as_deref()
        .and_then(|v| quantity(report, &format!("{}.expansion.maxStep", path), v));
    let limit = expansion
        .limit
        .as_deref()
        .and_then(|v| quantity(report, &format!("{}.expansion.limit", path), v));

    if let (Some(min), Some(max)) = (min_step, max_step)
        && min > max
    {
        report.error(
            format!("{}.expansion.minStep", path),
            "step-bounds",
            format!(
                "minStep ({}) must not exceed maxStep ({})",
                expansion.min_step.as_deref().unwrap_or_default(),
                expansion.max_step.as_deref().unwrap_or_default()
            ),
        );
    }

    if let (Some(limit), Some(size)) = (limit.filter(|l| *l > 0), current_size) {
        if limit <= size {
            report.warnings.push(format!(
                "{}: limit {} is not above the current size {}, the volume will not grow",
                path,
                expansion.limit.as_deref().unwrap_or_default(),
                spec_size(role, spec)
            ));
        } else if let Some(Step::Absolute(step)) = step
            && step > limit - size
        {
            report.warnings.push(format!(
                "{}: step is larger than the headroom to limit, the next expansion stops at the limit",
                path
            ));
        }
    }

    if let Some(max) = config.max_actions_per_day()
        && max < 1
    {
        report.error(
            format!("{}.strategy.maxActionsPerDay", path),
            "invalid-rate-limit",
            format!("maxActionsPerDay must be at least 1, got {}", max),
        );
    }

    if let Some(policy) = policy {
        if policy.max_pending_wal_files.is_some_and(|v| v < 0) {
            report.error(
                format!("{}.strategy.walSafetyPolicy.maxPendingWALFiles", path),
                "invalid-wal-policy",
                "maxPendingWALFiles must not be negative",
            );
        }
        if policy.max_slot_retention_bytes.is_some_and(|v| v < 0) {
            report.error(
                format!("{}.strategy.walSafetyPolicy.maxSlotRetentionBytes", path),
                "invalid-wal-policy",
                "maxSlotRetentionBytes must not be negative",
            );
        }
        if policy.require_archive_healthy == Some(true) && spec.backup.is_none() {
            report.warnings.push(format!(
                "{}: requireArchiveHealthy is set but no backup is configured, archiving may never report healthy",
                path
            ));
        }
    }
}

fn quantity(report: &mut ValidationReport, field: &str, value: &str) -> Option<u64> {
    match parse_quantity(value) {
        Ok(bytes) => Some(bytes),
        Err(e) => {
            report.error(field.to_string(), "invalid-quantity", e.to_string());
            None
        }
    }
}

fn spec_size<'a>(role: &VolumeRole, spec: &'a PostgresClusterSpec) -> &'a str {
    role.storage(spec).map(|s| s.size.as_str()).unwrap_or_default()
}
