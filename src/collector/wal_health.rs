//! WAL health collection from the primary
//!
//! Reads archiver statistics, the archive backlog and inactive replication
//! slots. These only describe the cluster when read on the primary, so
//! replicas are never queried.

use chrono::{DateTime, Utc};
use kube::{Client, ResourceExt};
use std::time::Duration;
use tokio::time::timeout;
use tracing::debug;

use super::postgres::{TlsMode, connect, credentials_secret_name, fetch_credentials};
use super::{CollectionError, InstancePod, Result};
use crate::autoresize::rate_limit::format_timestamp;
use crate::crd::{InactiveSlot, PostgresCluster, WalHealthStatus};

const ARCHIVER_QUERY: &str =
    "SELECT last_archived_time, last_failed_time FROM pg_catalog.pg_stat_archiver";

const PENDING_WAL_QUERY: &str = "SELECT count(*) FROM pg_catalog.pg_ls_archive_statusdir() \
     WHERE name LIKE '%.ready'";

const INACTIVE_SLOTS_QUERY: &str = "SELECT slot_name::text, \
     COALESCE(pg_catalog.pg_wal_lsn_diff(pg_catalog.pg_current_wal_lsn(), restart_lsn), 0)::bigint \
     FROM pg_catalog.pg_replication_slots \
     WHERE NOT active AND restart_lsn IS NOT NULL \
     ORDER BY slot_name";

/// Archiver timestamps from `pg_stat_archiver`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArchiverStats {
    pub last_archived: Option<DateTime<Utc>>,
    pub last_failed: Option<DateTime<Utc>>,
}

impl ArchiverStats {
    /// Unhealthy when the last failure is newer than the last success, or
    /// when failures exist without any success
    pub fn is_healthy(&self) -> bool {
        match (self.last_archived, self.last_failed) {
            (_, None) => true,
            (None, Some(_)) => false,
            (Some(archived), Some(failed)) => archived >= failed,
        }
    }
}

/// Assemble a health status from query results
pub fn build_wal_health(
    archiver: ArchiverStats,
    pending_wal_files: i64,
    inactive_slots: Vec<InactiveSlot>,
    observed_at: &str,
) -> WalHealthStatus {
    WalHealthStatus {
        archive_healthy: archiver.is_healthy(),
        pending_wal_files: i32::try_from(pending_wal_files).unwrap_or(i32::MAX),
        inactive_slots,
        last_archived_time: archiver.last_archived.map(format_timestamp),
        last_failed_time: archiver.last_failed.map(format_timestamp),
        observed_at: Some(observed_at.to_string()),
        stale: false,
    }
}

/// Queries WAL health on the primary of one cluster
pub struct WalHealthCollector {
    client: Client,
    namespace: String,
    cluster_name: String,
    tls_mode: TlsMode,
    connect_timeout: Duration,
}

impl WalHealthCollector {
    #[must_use]
    pub fn new(client: Client, cluster: &PostgresCluster, connect_timeout: Duration) -> Self {
        let tls_mode = if cluster.spec.tls.as_ref().is_some_and(|t| t.enabled) {
            TlsMode::RequireUnverified
        } else {
            TlsMode::Disabled
        };
        Self {
            client,
            namespace: cluster.namespace().unwrap_or_else(|| "default".to_string()),
            cluster_name: cluster.name_any(),
            tls_mode,
            connect_timeout,
        }
    }

    /// Collect WAL health from `primary`
    pub async fn collect(&self, primary: &InstancePod, observed_at: &str) -> Result<WalHealthStatus> {
        if !primary.primary {
            return Err(CollectionError::NoPrimaryPod);
        }
        let overall = self.connect_timeout * 3;
        timeout(overall, self.query(primary, observed_at))
            .await
            .map_err(|_| CollectionError::Timeout(overall.as_secs()))?
    }

    async fn query(&self, primary: &InstancePod, observed_at: &str) -> Result<WalHealthStatus> {
        let host = primary
            .ip
            .as_deref()
            .ok_or_else(|| CollectionError::NoPodIp(primary.name.clone()))?;
        let credentials = fetch_credentials(
            &self.client,
            &self.namespace,
            &credentials_secret_name(&self.cluster_name),
        )
        .await?;
        let db = connect(host, &credentials, self.tls_mode, self.connect_timeout).await?;

        let row = db.query_one(ARCHIVER_QUERY, &[]).await?;
        let archiver = ArchiverStats {
            last_archived: row.get(0),
            last_failed: row.get(1),
        };

        let pending: i64 = db.query_one(PENDING_WAL_QUERY, &[]).await?.get(0);

        let inactive_slots = db
            .query(INACTIVE_SLOTS_QUERY, &[])
            .await?
            .iter()
            .map(|row| InactiveSlot {
                slot_name: row.get(0),
                retention_bytes: row.get(1),
            })
            .collect::<Vec<_>>();

        debug!(
            pod = %primary.name,
            archive_healthy = archiver.is_healthy(),
            pending,
            inactive_slots = inactive_slots.len(),
            "Collected WAL health"
        );

        Ok(build_wal_health(archiver, pending, inactive_slots, observed_at))
    }
}
