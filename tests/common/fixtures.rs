//! Test fixtures and builders for PostgresCluster resources
//!
//! # Quick Start
//!
//! ```rust,ignore
//! let cluster = PostgresClusterBuilder::new("db", "default")
//!     .with_storage("10Gi", Some("standard"))
//!     .with_wal_storage("2Gi", Some(ResizeBuilder::new().step("1Gi").limit("4Gi").build()))
//!     .build();
//! ```

use kube::core::ObjectMeta;
use postgres_storage_operator::crd::{
    BackupDestination, BackupSpec, ExpansionPolicy, PostgresCluster, PostgresClusterSpec,
    PostgresClusterStatus, ResizeConfiguration, ResizeStrategy, ResizeTriggers, StorageSpec,
    TablespaceSpec, WalSafetyPolicy,
};

// =============================================================================
// Convenience Functions for Simple Test Cases
// =============================================================================

/// A single-volume cluster without any resize policy
pub fn create_test_cluster(name: &str, namespace: &str) -> PostgresCluster {
    PostgresClusterBuilder::new(name, namespace)
        .with_storage("10Gi", Some("standard"))
        .with_uid("test-uid-12345")
        .build()
}

/// A cluster with a dedicated WAL volume whose resize is enabled
pub fn create_test_cluster_with_wal_resize(
    name: &str,
    namespace: &str,
    resize: ResizeConfiguration,
) -> PostgresCluster {
    PostgresClusterBuilder::new(name, namespace)
        .with_storage("10Gi", Some("standard"))
        .with_wal_storage("2Gi", Some(resize))
        .with_uid("test-uid-12345")
        .build()
}

// =============================================================================
// PostgresCluster Builder
// =============================================================================

/// Builder for PostgresCluster test fixtures
pub struct PostgresClusterBuilder {
    name: String,
    namespace: String,
    uid: Option<String>,
    generation: Option<i64>,
    replicas: i32,
    storage: StorageSpec,
    wal_storage: Option<StorageSpec>,
    tablespaces: Vec<TablespaceSpec>,
    backup: Option<BackupSpec>,
    status: Option<PostgresClusterStatus>,
}

impl PostgresClusterBuilder {
    pub fn new(name: &str, namespace: &str) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            uid: None,
            generation: Some(1),
            replicas: 1,
            storage: StorageSpec {
                storage_class: None,
                size: "10Gi".to_string(),
                resize: None,
            },
            wal_storage: None,
            tablespaces: Vec::new(),
            backup: None,
            status: None,
        }
    }

    pub fn with_uid(mut self, uid: &str) -> Self {
        self.uid = Some(uid.to_string());
        self
    }

    pub fn with_generation(mut self, generation: i64) -> Self {
        self.generation = Some(generation);
        self
    }

    pub fn with_replicas(mut self, replicas: i32) -> Self {
        self.replicas = replicas;
        self
    }

    pub fn with_storage(mut self, size: &str, storage_class: Option<&str>) -> Self {
        self.storage.size = size.to_string();
        self.storage.storage_class = storage_class.map(String::from);
        self
    }

    pub fn with_data_resize(mut self, resize: ResizeConfiguration) -> Self {
        self.storage.resize = Some(resize);
        self
    }

    pub fn with_wal_storage(mut self, size: &str, resize: Option<ResizeConfiguration>) -> Self {
        self.wal_storage = Some(StorageSpec {
            storage_class: None,
            size: size.to_string(),
            resize,
        });
        self
    }

    pub fn with_tablespace(mut self, name: &str, size: &str, resize: Option<ResizeConfiguration>) -> Self {
        self.tablespaces.push(TablespaceSpec {
            name: name.to_string(),
            storage: StorageSpec {
                storage_class: None,
                size: size.to_string(),
                resize,
            },
        });
        self
    }

    pub fn with_backup(mut self) -> Self {
        self.backup = Some(BackupSpec {
            schedule: "0 2 * * *".to_string(),
            destination: BackupDestination::S3 {
                bucket: "backups".to_string(),
                region: "us-east-1".to_string(),
                endpoint: None,
                credentials_secret: "s3-credentials".to_string(),
            },
        });
        self
    }

    pub fn with_status(mut self, status: PostgresClusterStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn build(self) -> PostgresCluster {
        PostgresCluster {
            metadata: ObjectMeta {
                name: Some(self.name),
                namespace: Some(self.namespace),
                uid: self.uid,
                generation: self.generation,
                ..Default::default()
            },
            spec: PostgresClusterSpec {
                version: "16".to_string(),
                replicas: self.replicas,
                storage: self.storage,
                wal_storage: self.wal_storage,
                tablespaces: self.tablespaces,
                backup: self.backup,
                tls: None,
            },
            status: self.status,
        }
    }
}

// =============================================================================
// Resize policy builder
// =============================================================================

/// Builder for an enabled ResizeConfiguration
#[derive(Default)]
pub struct ResizeBuilder {
    triggers: ResizeTriggers,
    expansion: ExpansionPolicy,
    max_actions_per_day: Option<i32>,
    wal: WalSafetyPolicy,
}

impl ResizeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn threshold(mut self, percent: i32) -> Self {
        self.triggers.usage_threshold = Some(percent);
        self
    }

    pub fn min_available(mut self, quantity: &str) -> Self {
        self.triggers.min_available = Some(quantity.to_string());
        self
    }

    pub fn step(mut self, step: &str) -> Self {
        self.expansion.step = Some(step.to_string());
        self
    }

    pub fn min_step(mut self, quantity: &str) -> Self {
        self.expansion.min_step = Some(quantity.to_string());
        self
    }

    pub fn max_step(mut self, quantity: &str) -> Self {
        self.expansion.max_step = Some(quantity.to_string());
        self
    }

    pub fn limit(mut self, quantity: &str) -> Self {
        self.expansion.limit = Some(quantity.to_string());
        self
    }

    pub fn max_actions_per_day(mut self, max: i32) -> Self {
        self.max_actions_per_day = Some(max);
        self
    }

    pub fn acknowledge_wal_risk(mut self) -> Self {
        self.wal.acknowledge_wal_risk = Some(true);
        self
    }

    pub fn require_archive_healthy(mut self, required: bool) -> Self {
        self.wal.require_archive_healthy = Some(required);
        self
    }

    pub fn max_pending_wal_files(mut self, max: i32) -> Self {
        self.wal.max_pending_wal_files = Some(max);
        self
    }

    pub fn max_slot_retention_bytes(mut self, max: i64) -> Self {
        self.wal.max_slot_retention_bytes = Some(max);
        self
    }

    pub fn alert_on_resize(mut self, alert: bool) -> Self {
        self.wal.alert_on_resize = Some(alert);
        self
    }

    pub fn build(self) -> ResizeConfiguration {
        ResizeConfiguration {
            enabled: true,
            triggers: Some(self.triggers),
            expansion: Some(self.expansion),
            strategy: Some(ResizeStrategy {
                max_actions_per_day: self.max_actions_per_day,
                wal_safety_policy: Some(self.wal),
            }),
        }
    }
}
