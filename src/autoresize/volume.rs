//! Volume slots: data, WAL and tablespace volumes handled uniformly.

use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use std::collections::BTreeMap;
use std::fmt;

use crate::crd::{
    AutoResizeEvent, InstanceDiskStatus, PostgresClusterSpec, StorageSpec, VolumeType,
    VolumeUsageSample,
};

/// Label carrying the owning cluster name on pods and PVCs
pub const CLUSTER_LABEL: &str = "postgres-operator.smoketurner.com/cluster";
/// Label carrying the instance (pod) name on PVCs
pub const INSTANCE_LABEL: &str = "postgres-operator.smoketurner.com/instance";
/// Label carrying the volume role on PVCs: data, wal or tablespace
pub const PVC_ROLE_LABEL: &str = "postgres-operator.smoketurner.com/pvc-role";
/// Label carrying the tablespace name on tablespace PVCs
pub const TABLESPACE_LABEL: &str = "postgres-operator.smoketurner.com/tablespace";

pub const DATA_MOUNT_PATH: &str = "/var/lib/postgresql/data";
pub const WAL_MOUNT_PATH: &str = "/var/lib/postgresql/wal";
pub const TABLESPACE_MOUNT_ROOT: &str = "/var/lib/postgresql/tablespaces";

/// Role of a volume attached to an instance
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum VolumeRole {
    Data,
    Wal,
    Tablespace(String),
}

impl VolumeRole {
    pub fn volume_type(&self) -> VolumeType {
        match self {
            VolumeRole::Data => VolumeType::Data,
            VolumeRole::Wal => VolumeType::Wal,
            VolumeRole::Tablespace(_) => VolumeType::Tablespace,
        }
    }

    pub fn tablespace(&self) -> Option<&str> {
        match self {
            VolumeRole::Tablespace(name) => Some(name),
            _ => None,
        }
    }

    pub fn mount_path(&self) -> String {
        match self {
            VolumeRole::Data => DATA_MOUNT_PATH.to_string(),
            VolumeRole::Wal => WAL_MOUNT_PATH.to_string(),
            VolumeRole::Tablespace(name) => format!("{}/{}", TABLESPACE_MOUNT_ROOT, name),
        }
    }

    /// Whether WAL segments are written to this volume
    pub fn carries_wal(&self, has_dedicated_wal: bool) -> bool {
        match self {
            VolumeRole::Wal => true,
            VolumeRole::Data => !has_dedicated_wal,
            VolumeRole::Tablespace(_) => false,
        }
    }

    /// Read the role from PVC labels
    pub fn from_labels(labels: &BTreeMap<String, String>) -> Option<Self> {
        match labels.get(PVC_ROLE_LABEL)?.as_str() {
            "data" => Some(VolumeRole::Data),
            "wal" => Some(VolumeRole::Wal),
            "tablespace" => labels
                .get(TABLESPACE_LABEL)
                .filter(|name| !name.is_empty())
                .map(|name| VolumeRole::Tablespace(name.clone())),
            _ => None,
        }
    }

    /// Storage configuration for this role, if the cluster declares it
    pub fn storage<'a>(&self, spec: &'a PostgresClusterSpec) -> Option<&'a StorageSpec> {
        match self {
            VolumeRole::Data => Some(&spec.storage),
            VolumeRole::Wal => spec.wal_storage.as_ref(),
            VolumeRole::Tablespace(name) => spec.tablespace(name).map(|t| &t.storage),
        }
    }
}

impl fmt::Display for VolumeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VolumeRole::Data => write!(f, "data"),
            VolumeRole::Wal => write!(f, "wal"),
            VolumeRole::Tablespace(name) => write!(f, "tablespace/{}", name),
        }
    }
}

/// Identity of one volume of one instance
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VolumeKey {
    pub instance: String,
    pub role: VolumeRole,
}

impl VolumeKey {
    pub fn new(instance: impl Into<String>, role: VolumeRole) -> Self {
        Self {
            instance: instance.into(),
            role,
        }
    }

    /// Whether an audit event belongs to this volume
    pub fn matches(&self, event: &AutoResizeEvent) -> bool {
        event.instance == self.instance
            && event.volume_type == self.role.volume_type()
            && event.tablespace.as_deref() == self.role.tablespace()
    }

    /// Identify the volume behind a PVC from its labels
    pub fn from_claim(pvc: &PersistentVolumeClaim) -> Option<Self> {
        let labels = pvc.metadata.labels.as_ref()?;
        let instance = labels.get(INSTANCE_LABEL).filter(|i| !i.is_empty())?;
        let role = VolumeRole::from_labels(labels)?;
        Some(Self::new(instance.clone(), role))
    }
}

impl fmt::Display for VolumeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.instance, self.role)
    }
}

/// Every volume role a cluster declares: data, optional WAL, then tablespaces
pub fn declared_roles(spec: &PostgresClusterSpec) -> Vec<VolumeRole> {
    let mut roles = vec![VolumeRole::Data];
    if spec.has_dedicated_wal() {
        roles.push(VolumeRole::Wal);
    }
    roles.extend(
        spec.tablespaces
            .iter()
            .map(|t| VolumeRole::Tablespace(t.name.clone())),
    );
    roles
}

impl InstanceDiskStatus {
    /// Latest usage sample recorded for a volume role
    pub fn sample(&self, role: &VolumeRole) -> Option<&VolumeUsageSample> {
        match role {
            VolumeRole::Data => self.data_volume.as_ref(),
            VolumeRole::Wal => self.wal_volume.as_ref(),
            VolumeRole::Tablespace(name) => self.tablespaces.get(name),
        }
    }

    pub fn set_sample(&mut self, role: &VolumeRole, sample: VolumeUsageSample) {
        match role {
            VolumeRole::Data => self.data_volume = Some(sample),
            VolumeRole::Wal => self.wal_volume = Some(sample),
            VolumeRole::Tablespace(name) => {
                self.tablespaces.insert(name.clone(), sample);
            }
        }
    }

    /// Flag the last known sample of a volume as stale, if there is one
    pub fn mark_stale(&mut self, role: &VolumeRole) {
        let sample = match role {
            VolumeRole::Data => self.data_volume.as_mut(),
            VolumeRole::Wal => self.wal_volume.as_mut(),
            VolumeRole::Tablespace(name) => self.tablespaces.get_mut(name),
        };
        if let Some(sample) = sample {
            sample.stale = true;
        }
    }
}
