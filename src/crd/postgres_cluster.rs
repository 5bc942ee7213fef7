use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::disk_status::{AutoResizeEvent, InstanceDiskStatus};
use super::resize::ResizeConfiguration;

/// PostgresCluster is the Schema for the postgresclusters API
///
/// The storage operator only reads the storage layout of a cluster and
/// writes disk status back; pods and PVCs are provisioned elsewhere.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "postgres-operator.smoketurner.com",
    version = "v1alpha1",
    kind = "PostgresCluster",
    plural = "postgresclusters",
    shortname = "pgc",
    namespaced,
    status = "PostgresClusterStatus",
    printcolumn = r#"{"name":"Version", "type":"string", "jsonPath":".spec.version"}"#,
    printcolumn = r#"{"name":"Replicas", "type":"integer", "jsonPath":".spec.replicas"}"#,
    printcolumn = r#"{"name":"Size", "type":"string", "jsonPath":".spec.storage.size"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct PostgresClusterSpec {
    /// PostgreSQL version (e.g., "15", "16")
    pub version: String,

    /// Number of instances (primary plus replicas)
    #[serde(default = "default_replicas")]
    pub replicas: i32,

    /// Storage for the data directory. Without `walStorage` this volume
    /// also holds the write-ahead log.
    pub storage: StorageSpec,

    /// Dedicated volume for the write-ahead log
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wal_storage: Option<StorageSpec>,

    /// Additional tablespaces, each on its own volume
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tablespaces: Vec<TablespaceSpec>,

    /// Backup configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup: Option<BackupSpec>,

    /// TLS configuration for PostgreSQL connections
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<TLSSpec>,
}

fn default_replicas() -> i32 {
    1
}

impl PostgresClusterSpec {
    /// True when WAL lives on its own volume
    pub fn has_dedicated_wal(&self) -> bool {
        self.wal_storage.is_some()
    }

    pub fn tablespace(&self, name: &str) -> Option<&TablespaceSpec> {
        self.tablespaces.iter().find(|t| t.name == name)
    }
}

/// Storage configuration for one volume role
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StorageSpec {
    /// Storage class name (uses default if not specified)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class: Option<String>,

    /// Size of the persistent volume (e.g., "10Gi", "100Gi")
    pub size: String,

    /// Automatic expansion policy for this volume
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resize: Option<ResizeConfiguration>,
}

impl StorageSpec {
    /// The resize configuration when present and enabled
    pub fn enabled_resize(&self) -> Option<&ResizeConfiguration> {
        self.resize.as_ref().filter(|r| r.enabled)
    }
}

/// A named tablespace backed by its own volume
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TablespaceSpec {
    /// Tablespace name, also used in the mount path
    pub name: String,

    /// Volume configuration
    pub storage: StorageSpec,
}

/// Backup configuration
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BackupSpec {
    /// Backup schedule in cron format
    pub schedule: String,

    /// Backup destination
    pub destination: BackupDestination,
}

/// Backup destination configuration
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum BackupDestination {
    /// Amazon S3 backup destination
    S3 {
        bucket: String,
        region: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        endpoint: Option<String>,
        credentials_secret: String,
    },
    /// Google Cloud Storage backup destination
    Gcs {
        bucket: String,
        credentials_secret: String,
    },
    /// Azure Blob Storage backup destination
    Azure {
        container: String,
        storage_account: String,
        credentials_secret: String,
    },
}

/// TLS configuration
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct TLSSpec {
    /// Whether PostgreSQL requires TLS connections
    #[serde(default)]
    pub enabled: bool,
}

/// Status of the PostgresCluster
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct PostgresClusterStatus {
    /// Name of the pod last observed as primary
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_pod: Option<String>,

    /// Per-instance disk usage and WAL health, keyed by instance name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub disk_status: BTreeMap<String, InstanceDiskStatus>,

    /// Bounded log of automatic resize attempts, oldest first
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub auto_resize_events: Vec<AutoResizeEvent>,

    /// Observed generation of the resource
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Kubernetes-style conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

/// Kubernetes-style condition
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition
    #[serde(rename = "type")]
    pub type_: String,

    /// Status of the condition: True, False, or Unknown
    pub status: String,

    /// Reason for the condition's last transition
    pub reason: String,

    /// Human-readable message
    pub message: String,

    /// Last time the condition transitioned
    pub last_transition_time: String,

    /// Generation observed when condition was set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}
