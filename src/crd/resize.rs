//! Automatic volume expansion policy attached to each storage role.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Per-volume automatic resize policy
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResizeConfiguration {
    /// Enable automatic expansion of this volume
    #[serde(default)]
    pub enabled: bool,

    /// Conditions that start an expansion
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub triggers: Option<ResizeTriggers>,

    /// How much to grow on each expansion
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expansion: Option<ExpansionPolicy>,

    /// Rate limiting and WAL safety
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<ResizeStrategy>,
}

impl ResizeConfiguration {
    pub fn wal_safety_policy(&self) -> Option<&WalSafetyPolicy> {
        self.strategy.as_ref()?.wal_safety_policy.as_ref()
    }

    pub fn max_actions_per_day(&self) -> Option<i32> {
        self.strategy.as_ref()?.max_actions_per_day
    }
}

/// Trigger thresholds. Either condition alone starts an expansion.
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResizeTriggers {
    /// Expand when used space exceeds this percentage (1-99, default 80)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage_threshold: Option<i32>,

    /// Expand when available space drops below this quantity (e.g. "5Gi")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_available: Option<String>,
}

/// Expansion sizing
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExpansionPolicy {
    /// Growth per expansion, either a percentage of the current size
    /// ("20%") or an absolute quantity ("10Gi"). Defaults to "20%".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,

    /// Smallest growth per expansion
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_step: Option<String>,

    /// Largest growth per expansion
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_step: Option<String>,

    /// Hard ceiling for the volume size
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<String>,
}

/// Rate limiting and WAL safety strategy
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResizeStrategy {
    /// Maximum successful expansions per volume in any 24 hour window.
    /// Unlimited when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_actions_per_day: Option<i32>,

    /// Safety checks tied to WAL archiving and replication slots
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wal_safety_policy: Option<WalSafetyPolicy>,
}

/// WAL safety checks applied before expanding a volume
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WalSafetyPolicy {
    /// Required on clusters without a dedicated WAL volume: the data
    /// volume also holds WAL, so WAL growth looks like data growth.
    #[serde(
        rename = "acknowledgeWALRisk",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub acknowledge_wal_risk: Option<bool>,

    /// Block expansion while WAL archiving is failing (default true)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub require_archive_healthy: Option<bool>,

    /// Block expansion when more WAL segments than this await archiving
    /// (default 100, 0 disables)
    #[serde(
        rename = "maxPendingWALFiles",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub max_pending_wal_files: Option<i32>,

    /// Block expansion when an inactive replication slot retains more
    /// WAL than this many bytes (0 or unset disables)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_slot_retention_bytes: Option<i64>,

    /// Emit a warning event whenever a WAL-carrying volume is expanded
    /// (default true)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alert_on_resize: Option<bool>,
}
