//! Health server for Kubernetes probes and Prometheus metrics
//!
//! Provides HTTP endpoints for:
//! - `/healthz` - Liveness probe (is the process alive?)
//! - `/readyz` - Readiness probe (is the operator ready to serve?)
//! - `/metrics` - Prometheus metrics

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use prometheus_client::encoding::text::encode;
use prometheus_client::encoding::{EncodeLabel, EncodeLabelSet, LabelSetEncoder};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::net::TcpListener;
use tokio::sync::RwLock;

use crate::autoresize::volume::VolumeKey;
use crate::crd::{BlockReason, VolumeUsageSample, WalHealthStatus};

const PREFIX: &str = "postgres_storage_operator";

/// Labels for metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct ReconcileLabels {
    pub namespace: String,
    pub name: String,
}

impl EncodeLabelSet for ReconcileLabels {
    fn encode(&self, encoder: &mut LabelSetEncoder) -> Result<(), std::fmt::Error> {
        ("namespace", self.namespace.as_str()).encode(encoder.encode_label())?;
        ("name", self.name.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Labels identifying one volume of one instance
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct VolumeLabels {
    pub namespace: String,
    pub cluster: String,
    pub instance: String,
    pub volume_type: String,
    pub tablespace: String,
}

impl VolumeLabels {
    pub fn new(namespace: &str, cluster: &str, key: &VolumeKey) -> Self {
        Self {
            namespace: namespace.to_string(),
            cluster: cluster.to_string(),
            instance: key.instance.clone(),
            volume_type: key.role.volume_type().to_string(),
            tablespace: key.role.tablespace().unwrap_or_default().to_string(),
        }
    }
}

impl EncodeLabelSet for VolumeLabels {
    fn encode(&self, encoder: &mut LabelSetEncoder) -> Result<(), std::fmt::Error> {
        ("namespace", self.namespace.as_str()).encode(encoder.encode_label())?;
        ("cluster", self.cluster.as_str()).encode(encoder.encode_label())?;
        ("instance", self.instance.as_str()).encode(encoder.encode_label())?;
        ("volume_type", self.volume_type.as_str()).encode(encoder.encode_label())?;
        ("tablespace", self.tablespace.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Volume labels plus one outcome label (`result` or `reason`)
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct OutcomeLabels {
    pub volume: VolumeLabels,
    pub key: &'static str,
    pub value: String,
}

impl EncodeLabelSet for OutcomeLabels {
    fn encode(&self, encoder: &mut LabelSetEncoder) -> Result<(), std::fmt::Error> {
        self.volume.encode(encoder)?;
        (self.key, self.value.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Labels for per-instance metrics, optionally with one extra label
/// (`slot` or `source`)
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct InstanceLabels {
    pub namespace: String,
    pub cluster: String,
    pub instance: String,
    pub extra: Option<(&'static str, String)>,
}

impl EncodeLabelSet for InstanceLabels {
    fn encode(&self, encoder: &mut LabelSetEncoder) -> Result<(), std::fmt::Error> {
        ("namespace", self.namespace.as_str()).encode(encoder.encode_label())?;
        ("cluster", self.cluster.as_str()).encode(encoder.encode_label())?;
        ("instance", self.instance.as_str()).encode(encoder.encode_label())?;
        if let Some((key, value)) = &self.extra {
            (*key, value.as_str()).encode(encoder.encode_label())?;
        }
        Ok(())
    }
}

/// Shared metrics state
pub struct Metrics {
    pub reconciliations_total: Family<ReconcileLabels, Counter>,
    pub reconcile_errors_total: Family<ReconcileLabels, Counter>,
    pub reconcile_duration_seconds: Family<ReconcileLabels, Histogram>,

    // Disk usage
    pub disk_total_bytes: Family<VolumeLabels, Gauge>,
    pub disk_available_bytes: Family<VolumeLabels, Gauge>,
    pub disk_percent_used: Family<VolumeLabels, Gauge>,

    // Resize decisions
    pub disk_at_limit: Family<VolumeLabels, Gauge>,
    pub resize_budget_remaining: Family<VolumeLabels, Gauge>,
    pub resizes_total: Family<OutcomeLabels, Counter>,
    pub resize_blocked_total: Family<OutcomeLabels, Counter>,

    // WAL health
    pub wal_archive_healthy: Family<InstanceLabels, Gauge>,
    pub wal_pending_files: Family<InstanceLabels, Gauge>,
    pub wal_inactive_slot_retention_bytes: Family<InstanceLabels, Gauge>,

    pub collection_errors_total: Family<InstanceLabels, Counter>,

    registry: Registry,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

fn name(metric: &str) -> String {
    format!("{}_{}", PREFIX, metric)
}

impl Metrics {
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let reconciliations_total = Family::<ReconcileLabels, Counter>::default();
        registry.register(
            name("reconciliations"),
            "Total number of reconciliations",
            reconciliations_total.clone(),
        );

        let reconcile_errors_total = Family::<ReconcileLabels, Counter>::default();
        registry.register(
            name("reconcile_errors"),
            "Total number of reconciliation errors",
            reconcile_errors_total.clone(),
        );

        let reconcile_duration_seconds =
            Family::<ReconcileLabels, Histogram>::new_with_constructor(|| {
                Histogram::new(exponential_buckets(0.001, 2.0, 15))
            });
        registry.register(
            name("reconcile_duration_seconds"),
            "Duration of reconciliation in seconds",
            reconcile_duration_seconds.clone(),
        );

        let disk_total_bytes = Family::<VolumeLabels, Gauge>::default();
        registry.register(
            name("disk_total_bytes"),
            "Filesystem size of the volume as reported by the instance",
            disk_total_bytes.clone(),
        );

        let disk_available_bytes = Family::<VolumeLabels, Gauge>::default();
        registry.register(
            name("disk_available_bytes"),
            "Bytes available on the volume",
            disk_available_bytes.clone(),
        );

        let disk_percent_used = Family::<VolumeLabels, Gauge>::default();
        registry.register(
            name("disk_percent_used"),
            "Percentage of usable space in use",
            disk_percent_used.clone(),
        );

        let disk_at_limit = Family::<VolumeLabels, Gauge>::default();
        registry.register(
            name("disk_at_limit"),
            "1 when the volume needs to grow but has reached its configured limit",
            disk_at_limit.clone(),
        );

        let resize_budget_remaining = Family::<VolumeLabels, Gauge>::default();
        registry.register(
            name("resize_budget_remaining"),
            "Expansions left in the current 24h window, -1 when unlimited",
            resize_budget_remaining.clone(),
        );

        let resizes_total = Family::<OutcomeLabels, Counter>::default();
        registry.register(
            name("resizes"),
            "Volume expansion attempts by result",
            resizes_total.clone(),
        );

        let resize_blocked_total = Family::<OutcomeLabels, Counter>::default();
        registry.register(
            name("resize_blocked"),
            "Triggered expansions blocked by policy",
            resize_blocked_total.clone(),
        );

        let wal_archive_healthy = Family::<InstanceLabels, Gauge>::default();
        registry.register(
            name("wal_archive_healthy"),
            "1 when WAL archiving on the primary is healthy",
            wal_archive_healthy.clone(),
        );

        let wal_pending_files = Family::<InstanceLabels, Gauge>::default();
        registry.register(
            name("wal_pending_files"),
            "WAL segments waiting to be archived",
            wal_pending_files.clone(),
        );

        let wal_inactive_slot_retention_bytes = Family::<InstanceLabels, Gauge>::default();
        registry.register(
            name("wal_inactive_slot_retention_bytes"),
            "WAL retained by an inactive replication slot",
            wal_inactive_slot_retention_bytes.clone(),
        );

        let collection_errors_total = Family::<InstanceLabels, Counter>::default();
        registry.register(
            name("collection_errors"),
            "Failed disk usage or WAL health collections",
            collection_errors_total.clone(),
        );

        Self {
            reconciliations_total,
            reconcile_errors_total,
            reconcile_duration_seconds,
            disk_total_bytes,
            disk_available_bytes,
            disk_percent_used,
            disk_at_limit,
            resize_budget_remaining,
            resizes_total,
            resize_blocked_total,
            wal_archive_healthy,
            wal_pending_files,
            wal_inactive_slot_retention_bytes,
            collection_errors_total,
            registry,
        }
    }

    /// Record a successful reconciliation
    pub fn record_reconcile(&self, namespace: &str, name: &str, duration_secs: f64) {
        let labels = ReconcileLabels {
            namespace: namespace.to_string(),
            name: name.to_string(),
        };
        self.reconciliations_total.get_or_create(&labels).inc();
        self.reconcile_duration_seconds
            .get_or_create(&labels)
            .observe(duration_secs);
    }

    /// Record a failed reconciliation
    pub fn record_error(&self, namespace: &str, name: &str) {
        let labels = ReconcileLabels {
            namespace: namespace.to_string(),
            name: name.to_string(),
        };
        self.reconcile_errors_total.get_or_create(&labels).inc();
    }

    pub fn record_volume_usage(&self, labels: &VolumeLabels, sample: &VolumeUsageSample) {
        self.disk_total_bytes
            .get_or_create(labels)
            .set(sample.total_bytes);
        self.disk_available_bytes
            .get_or_create(labels)
            .set(sample.available_bytes);
        self.disk_percent_used
            .get_or_create(labels)
            .set(i64::from(sample.percent_used));
    }

    pub fn set_at_limit(&self, labels: &VolumeLabels, at_limit: bool) {
        self.disk_at_limit
            .get_or_create(labels)
            .set(i64::from(at_limit));
    }

    pub fn set_budget_remaining(&self, labels: &VolumeLabels, remaining: i64) {
        self.resize_budget_remaining
            .get_or_create(labels)
            .set(remaining);
    }

    /// Count an expansion attempt; `result` is success, blocked or failed
    pub fn record_resize(&self, labels: &VolumeLabels, result: &str) {
        self.resizes_total
            .get_or_create(&OutcomeLabels {
                volume: labels.clone(),
                key: "result",
                value: result.to_string(),
            })
            .inc();
    }

    pub fn record_blocked(&self, labels: &VolumeLabels, reason: BlockReason) {
        self.record_resize(labels, "blocked");
        self.resize_blocked_total
            .get_or_create(&OutcomeLabels {
                volume: labels.clone(),
                key: "reason",
                value: reason.as_str().to_string(),
            })
            .inc();
    }

    pub fn record_wal_health(&self, namespace: &str, cluster: &str, instance: &str, health: &WalHealthStatus) {
        let labels = InstanceLabels {
            namespace: namespace.to_string(),
            cluster: cluster.to_string(),
            instance: instance.to_string(),
            extra: None,
        };
        self.wal_archive_healthy
            .get_or_create(&labels)
            .set(i64::from(health.archive_healthy));
        self.wal_pending_files
            .get_or_create(&labels)
            .set(i64::from(health.pending_wal_files));
        for slot in &health.inactive_slots {
            let slot_labels = InstanceLabels {
                extra: Some(("slot", slot.slot_name.clone())),
                ..labels.clone()
            };
            self.wal_inactive_slot_retention_bytes
                .get_or_create(&slot_labels)
                .set(slot.retention_bytes);
        }
    }

    /// Count a failed collection; `source` is the volume role or "wal-health"
    pub fn record_collection_error(&self, namespace: &str, cluster: &str, instance: &str, source: &str) {
        self.collection_errors_total
            .get_or_create(&InstanceLabels {
                namespace: namespace.to_string(),
                cluster: cluster.to_string(),
                instance: instance.to_string(),
                extra: Some(("source", source.to_string())),
            })
            .inc();
    }

    /// Encode metrics to Prometheus text format
    ///
    /// Returns an empty string if encoding fails.
    pub fn encode(&self) -> String {
        let mut buffer = String::new();
        if let Err(e) = encode(&mut buffer, &self.registry) {
            tracing::error!("Failed to encode metrics: {}", e);
            return String::new();
        }
        buffer
    }
}

/// Shared state for the health server
pub struct HealthState {
    /// Whether the operator is ready (connected to K8s API)
    pub ready: RwLock<bool>,
    pub metrics: Metrics,
    /// Unix timestamp of the last successful reconcile
    pub last_reconcile: AtomicU64,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthState {
    pub fn new() -> Self {
        Self {
            ready: RwLock::new(false),
            metrics: Metrics::new(),
            last_reconcile: AtomicU64::new(0),
        }
    }

    pub async fn set_ready(&self, ready: bool) {
        *self.ready.write().await = ready;
    }

    pub async fn is_ready(&self) -> bool {
        *self.ready.read().await
    }

    pub fn mark_reconciled(&self, unix_secs: u64) {
        self.last_reconcile.store(unix_secs, Ordering::Relaxed);
    }
}

/// Liveness probe handler
async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Readiness probe handler
///
/// Returns 503 Service Unavailable if not ready.
async fn readyz(State(state): State<Arc<HealthState>>) -> Response {
    if state.is_ready().await {
        (StatusCode::OK, "ready").into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready").into_response()
    }
}

async fn metrics(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    let body = state.metrics.encode();
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

/// Create the health server router
pub fn create_router(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Run the health server on `0.0.0.0:<port>`
pub async fn run_health_server(state: Arc<HealthState>, port: u16) -> Result<(), std::io::Error> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Health server listening on {}", addr);

    axum::serve(listener, app).await
}
