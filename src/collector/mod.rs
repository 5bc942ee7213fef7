//! Collection of disk usage and WAL health from running instances
//!
//! Collection is best effort. A failure for one volume or instance is
//! returned next to the successful results so the caller can keep the last
//! known value for the failed entity and carry on with the rest.

pub mod aggregate;
pub mod disk;
pub mod postgres;
pub mod wal_health;

use k8s_openapi::api::core::v1::Pod;
use kube::api::ListParams;
use kube::{Api, Client, ResourceExt};

use crate::autoresize::volume::CLUSTER_LABEL;

/// Label Patroni sets on the current primary
pub const ROLE_LABEL: &str = "spilo-role";
pub const PRIMARY_ROLE: &str = "master";

/// Container running PostgreSQL inside instance pods
pub const POSTGRES_CONTAINER: &str = "postgres";

/// Maximum valid length for Kubernetes label values (RFC 1123)
const MAX_LABEL_VALUE_LENGTH: usize = 63;

pub type Result<T, E = CollectionError> = std::result::Result<T, E>;

/// Errors that can occur while collecting from an instance
#[derive(Debug, thiserror::Error)]
pub enum CollectionError {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("exec in {pod} failed: {message}")]
    ExecFailed { pod: String, message: String },

    #[error("{0} is not a mounted filesystem")]
    NotMounted(String),

    #[error("unexpected filesystem statistics output: {0:?}")]
    ParseError(String),

    #[error("collection timed out after {0}s")]
    Timeout(u64),

    #[error("no primary pod available")]
    NoPrimaryPod,

    #[error("pod IP not available for {0}")]
    NoPodIp(String),

    #[error("database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    #[error("credentials unavailable: {0}")]
    Credentials(String),

    #[error("TLS configuration error: {0}")]
    TlsConfig(String),

    #[error("invalid cluster name for label selector: {0}")]
    InvalidClusterName(String),
}

impl CollectionError {
    /// Short label for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            CollectionError::KubeError(_) => "kube",
            CollectionError::ExecFailed { .. } => "exec",
            CollectionError::NotMounted(_) => "not_mounted",
            CollectionError::ParseError(_) => "parse",
            CollectionError::Timeout(_) => "timeout",
            CollectionError::NoPrimaryPod | CollectionError::NoPodIp(_) => "no_primary",
            CollectionError::Database(_) => "database",
            CollectionError::Credentials(_) | CollectionError::TlsConfig(_) => "config",
            CollectionError::InvalidClusterName(_) => "invalid_name",
        }
    }
}

/// A running instance of a cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstancePod {
    pub name: String,
    pub ip: Option<String>,
    pub ready: bool,
    pub primary: bool,
}

impl InstancePod {
    pub fn from_pod(pod: &Pod) -> Self {
        let status = pod.status.as_ref();
        let ready = status
            .and_then(|s| s.conditions.as_ref())
            .is_some_and(|conds| {
                conds
                    .iter()
                    .any(|c| c.type_ == "Ready" && c.status == "True")
            });
        let running = status
            .and_then(|s| s.phase.as_deref())
            .is_some_and(|p| p == "Running");
        Self {
            name: pod.name_any(),
            ip: status.and_then(|s| s.pod_ip.clone()),
            ready: ready && running,
            primary: pod.labels().get(ROLE_LABEL).map(String::as_str) == Some(PRIMARY_ROLE),
        }
    }
}

/// List the instances of a cluster, ordered by name
pub async fn list_instances(
    client: &Client,
    namespace: &str,
    cluster_name: &str,
) -> Result<Vec<InstancePod>> {
    validate_label_value(cluster_name)?;
    let pods: Api<Pod> = Api::namespaced(client.clone(), namespace);
    let selector = format!("{}={}", CLUSTER_LABEL, cluster_name);
    let list = pods.list(&ListParams::default().labels(&selector)).await?;

    let mut instances: Vec<InstancePod> = list
        .items
        .iter()
        .filter(|p| p.metadata.deletion_timestamp.is_none())
        .map(InstancePod::from_pod)
        .collect();
    instances.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(instances)
}

/// Validate a value used in a label selector
pub fn validate_label_value(value: &str) -> Result<()> {
    let valid = !value.is_empty()
        && value.len() <= MAX_LABEL_VALUE_LENGTH
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
        && value.starts_with(|c: char| c.is_ascii_alphanumeric())
        && value.ends_with(|c: char| c.is_ascii_alphanumeric());
    if valid {
        Ok(())
    } else {
        Err(CollectionError::InvalidClusterName(value.to_string()))
    }
}
