//! WAL safety gate
//!
//! Growing a volume that holds WAL hides WAL-driven disk pressure. On
//! clusters without a dedicated WAL volume, expansions of the data and
//! tablespace volumes are gated on archiver health, the archive backlog
//! and inactive slot retention. A dedicated WAL volume is only gated on
//! slot retention; data and tablespace volumes of such clusters bypass
//! the gate.

use super::volume::VolumeRole;
use crate::crd::{BlockReason, WalHealthStatus, WalSafetyPolicy};

pub const DEFAULT_MAX_PENDING_WAL_FILES: i32 = 100;

/// Gate verdict for one proposed expansion
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    /// Gate does not apply to this volume
    Bypassed,
    /// All applicable checks passed. `stale` is set when they were
    /// evaluated against last known health.
    Permit { stale: bool },
    Deny { reason: BlockReason, message: String },
}

impl GateDecision {
    pub fn is_permitted(&self) -> bool {
        !matches!(self, GateDecision::Deny { .. })
    }

    fn deny(reason: BlockReason, message: impl Into<String>) -> Self {
        GateDecision::Deny {
            reason,
            message: message.into(),
        }
    }
}

/// Checks that apply to one volume under a policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct Checks {
    archive: bool,
    pending_wal: Option<i32>,
    slot_retention: Option<i64>,
}

impl Checks {
    fn any(&self) -> bool {
        self.archive || self.pending_wal.is_some() || self.slot_retention.is_some()
    }
}

fn applicable_checks(role: &VolumeRole, policy: Option<&WalSafetyPolicy>) -> Checks {
    let slot_retention = policy
        .and_then(|p| p.max_slot_retention_bytes)
        .filter(|max| *max > 0);

    if *role == VolumeRole::Wal {
        // growing the WAL volume is the remedy for an archive backlog
        return Checks {
            slot_retention,
            ..Default::default()
        };
    }

    let archive = policy
        .and_then(|p| p.require_archive_healthy)
        .unwrap_or(true);
    let pending_wal = Some(
        policy
            .and_then(|p| p.max_pending_wal_files)
            .unwrap_or(DEFAULT_MAX_PENDING_WAL_FILES),
    )
    .filter(|max| *max > 0);

    Checks {
        archive,
        pending_wal,
        slot_retention,
    }
}

/// Decide whether an expansion of `role` may proceed
pub fn evaluate(
    role: &VolumeRole,
    has_dedicated_wal: bool,
    policy: Option<&WalSafetyPolicy>,
    health: Option<&WalHealthStatus>,
) -> GateDecision {
    if has_dedicated_wal && *role != VolumeRole::Wal {
        return GateDecision::Bypassed;
    }

    if *role == VolumeRole::Data
        && !has_dedicated_wal
        && !policy.and_then(|p| p.acknowledge_wal_risk).unwrap_or(false)
    {
        return GateDecision::deny(
            BlockReason::WalRiskNotAcknowledged,
            "data volume holds WAL and acknowledgeWALRisk is not set",
        );
    }

    let checks = applicable_checks(role, policy);
    if !checks.any() {
        return GateDecision::Permit { stale: false };
    }

    let Some(health) = health else {
        return GateDecision::deny(
            BlockReason::WalHealthUnavailable,
            "WAL health has not been observed on the primary yet",
        );
    };

    if checks.archive && !health.archive_healthy {
        return GateDecision::deny(
            BlockReason::ArchiveUnhealthy,
            format!(
                "WAL archiving is failing (last failed {}, last archived {})",
                health.last_failed_time.as_deref().unwrap_or("unknown"),
                health.last_archived_time.as_deref().unwrap_or("never"),
            ),
        );
    }

    if let Some(max) = checks.pending_wal
        && health.pending_wal_files > max
    {
        return GateDecision::deny(
            BlockReason::PendingWalExceeded,
            format!(
                "{} WAL files pending archive, threshold {}",
                health.pending_wal_files, max
            ),
        );
    }

    if let Some(max) = checks.slot_retention
        && let Some(slot) = health
            .inactive_slots
            .iter()
            .find(|s| s.retention_bytes > max)
    {
        return GateDecision::deny(
            BlockReason::SlotRetentionExceeded,
            format!(
                "inactive slot {} retains {} bytes of WAL, threshold {}",
                slot.slot_name, slot.retention_bytes, max
            ),
        );
    }

    GateDecision::Permit {
        stale: health.stale,
    }
}
