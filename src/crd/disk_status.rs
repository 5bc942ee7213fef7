//! Status types written by the storage controller.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Filesystem utilization of one mounted volume
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VolumeUsageSample {
    /// Used space as a percentage of the usable space (0-100)
    pub percent_used: i32,

    /// Bytes available to unprivileged writers
    pub available_bytes: i64,

    /// Filesystem size in bytes
    pub total_bytes: i64,

    /// When the sample was taken (RFC3339)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collected_at: Option<String>,

    /// Set when the latest collection failed and this is the last known value
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub stale: bool,
}

/// Disk usage and WAL health of one instance
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InstanceDiskStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_volume: Option<VolumeUsageSample>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wal_volume: Option<VolumeUsageSample>,

    /// Tablespace name to usage
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tablespaces: BTreeMap<String, VolumeUsageSample>,

    /// Only reported for the primary
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wal_health: Option<WalHealthStatus>,

    /// Last time any value for this instance was refreshed (RFC3339)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<String>,
}

/// WAL archiver and replication slot health
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WalHealthStatus {
    /// False when the last archive failure is newer than the last success
    pub archive_healthy: bool,

    /// WAL segments waiting to be archived
    #[serde(default)]
    pub pending_wal_files: i32,

    /// Inactive replication slots and the WAL they retain
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inactive_slots: Vec<InactiveSlot>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_archived_time: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_failed_time: Option<String>,

    /// When the health was observed (RFC3339)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_at: Option<String>,

    /// Set when the latest query failed and this is the last known value
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub stale: bool,
}

/// A replication slot with no connected consumer
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InactiveSlot {
    pub slot_name: String,

    /// Bytes between the current WAL position and the slot's restart position
    pub retention_bytes: i64,
}

/// Volume type recorded in resize events
#[derive(Serialize, Deserialize, Clone, Copy, Debug, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum VolumeType {
    Data,
    Wal,
    Tablespace,
}

impl std::fmt::Display for VolumeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VolumeType::Data => write!(f, "data"),
            VolumeType::Wal => write!(f, "wal"),
            VolumeType::Tablespace => write!(f, "tablespace"),
        }
    }
}

/// Outcome recorded for a resize attempt
#[derive(Serialize, Deserialize, Clone, Copy, Debug, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ResizeResult {
    Success,
    Blocked,
}

/// Why a triggered resize did not go ahead
#[derive(Serialize, Deserialize, Clone, Copy, Debug, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum BlockReason {
    ArchiveUnhealthy,
    PendingWalExceeded,
    SlotRetentionExceeded,
    WalRiskNotAcknowledged,
    WalHealthUnavailable,
    RateLimitExceeded,
}

impl BlockReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockReason::ArchiveUnhealthy => "archive-unhealthy",
            BlockReason::PendingWalExceeded => "pending-wal-exceeded",
            BlockReason::SlotRetentionExceeded => "slot-retention-exceeded",
            BlockReason::WalRiskNotAcknowledged => "wal-risk-not-acknowledged",
            BlockReason::WalHealthUnavailable => "wal-health-unavailable",
            BlockReason::RateLimitExceeded => "rate-limit-exceeded",
        }
    }
}

impl std::fmt::Display for BlockReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of the automatic resize audit log
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AutoResizeEvent {
    /// RFC3339 timestamp, non-decreasing per instance and volume
    pub timestamp: String,

    pub instance: String,

    pub volume_type: VolumeType,

    /// Set for tablespace volumes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tablespace: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pvc_name: Option<String>,

    pub result: ResizeResult,

    /// Present exactly when `result` is blocked
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_reason: Option<BlockReason>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_size: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_size: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}
