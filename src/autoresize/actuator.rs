//! Actuator: submits PVC expansions and records their outcome.
//!
//! Expansion is fire-and-forget. The request is written to the PVC and the
//! storage driver completes it later; a later disk sample shows the new
//! size. Requesting a size at or below the current request is a no-op.
//! Every submission also stamps the PVC with its expansion history, so the
//! rate limiter can count it even when the status write that follows fails.

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use kube::api::{Api, Patch, PatchParams};
use kube::runtime::events::{Event, EventType};
use serde_json::json;
use std::future::Future;
use thiserror::Error;
use tracing::{debug, info};

use super::quantity::{QuantityError, format_quantity, parse_quantity};
use super::rate_limit::{format_timestamp, parse_history, record_history};
use super::volume::VolumeKey;
use crate::crd::{AutoResizeEvent, BlockReason, ResizeResult};

/// Field manager recorded on PVC patches
pub const FIELD_MANAGER: &str = "postgres-storage-operator";

/// Comma separated timestamps of recent expansions of a PVC
pub const RESIZE_HISTORY_ANNOTATION: &str = "postgres-operator.smoketurner.com/auto-resize-history";

const RESIZE_CONDITIONS: [&str; 2] = ["Resizing", "FileSystemResizePending"];

#[derive(Error, Debug)]
pub enum ActuationError {
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("PVC {0} not found")]
    ClaimNotFound(String),

    #[error("PVC {0} has no storage request")]
    MissingRequest(String),

    #[error("PVC {claim} has an invalid size: {source}")]
    InvalidSize {
        claim: String,
        #[source]
        source: QuantityError,
    },
}

/// Size state of a PVC
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClaimState {
    /// Bytes requested in the PVC spec
    pub requested: u64,
    /// Bytes reported as provisioned, if known
    pub capacity: Option<u64>,
    /// An expansion was requested and has not completed yet
    pub resizing: bool,
    /// Expansions stamped on the PVC
    pub resize_history: Vec<DateTime<Utc>>,
}

impl ClaimState {
    pub fn from_claim(pvc: &PersistentVolumeClaim) -> Result<Self, ActuationError> {
        let name = pvc.metadata.name.clone().unwrap_or_default();
        let requested = pvc
            .spec
            .as_ref()
            .and_then(|s| s.resources.as_ref())
            .and_then(|r| r.requests.as_ref())
            .and_then(|r| r.get("storage"))
            .ok_or_else(|| ActuationError::MissingRequest(name.clone()))?;
        let requested = parse_quantity(&requested.0).map_err(|source| ActuationError::InvalidSize {
            claim: name.clone(),
            source,
        })?;

        let status = pvc.status.as_ref();
        let capacity = status
            .and_then(|s| s.capacity.as_ref())
            .and_then(|c| c.get("storage"))
            .and_then(|q| parse_quantity(&q.0).ok());
        let condition_pending = status
            .and_then(|s| s.conditions.as_ref())
            .is_some_and(|conds| {
                conds
                    .iter()
                    .any(|c| RESIZE_CONDITIONS.contains(&c.type_.as_str()) && c.status == "True")
            });

        let resize_history = pvc
            .metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(RESIZE_HISTORY_ANNOTATION))
            .map(|v| parse_history(v))
            .unwrap_or_default();

        Ok(Self {
            requested,
            capacity,
            resizing: condition_pending || capacity.is_some_and(|c| c < requested),
            resize_history,
        })
    }

    /// Size the volume has now. Drivers may provision more than requested.
    pub fn current_size(&self) -> u64 {
        self.capacity.map_or(self.requested, |c| c.max(self.requested))
    }
}

/// Result of submitting an expansion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpansionRequest {
    /// The request was raised from `previous` to the target
    Submitted { previous: u64 },
    /// The PVC already requests at least the target
    AlreadyRequested { requested: u64 },
}

/// Target of expansion requests, keyed by PVC name
pub trait VolumeResizer {
    /// Raise the request of `claim` to `target` and record the expansion at
    /// `at` in the same write
    fn request_size(
        &self,
        claim: &str,
        target: u64,
        at: DateTime<Utc>,
    ) -> impl Future<Output = Result<ExpansionRequest, ActuationError>> + Send;
}

/// Expands PVCs through the Kubernetes API
#[derive(Clone)]
pub struct PvcResizer {
    api: Api<PersistentVolumeClaim>,
}

impl PvcResizer {
    pub fn new(client: kube::Client, namespace: &str) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
        }
    }
}

impl VolumeResizer for PvcResizer {
    async fn request_size(
        &self,
        claim: &str,
        target: u64,
        at: DateTime<Utc>,
    ) -> Result<ExpansionRequest, ActuationError> {
        let pvc = self
            .api
            .get_opt(claim)
            .await?
            .ok_or_else(|| ActuationError::ClaimNotFound(claim.to_string()))?;
        let state = ClaimState::from_claim(&pvc)?;
        if state.requested >= target {
            return Ok(ExpansionRequest::AlreadyRequested {
                requested: state.requested,
            });
        }

        let history = pvc
            .metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(RESIZE_HISTORY_ANNOTATION))
            .map(String::as_str);
        let patch = json!({
            "metadata": {
                "annotations": { RESIZE_HISTORY_ANNOTATION: record_history(history, at) }
            },
            "spec": {
                "resources": {
                    "requests": { "storage": format_quantity(target) }
                }
            }
        });
        let params = PatchParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        self.api.patch(claim, &params, &Patch::Merge(&patch)).await?;

        Ok(ExpansionRequest::Submitted {
            previous: state.requested,
        })
    }
}

/// Externally visible notification kinds
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    Success {
        key: VolumeKey,
        from: u64,
        to: u64,
    },
    Blocked {
        key: VolumeKey,
        reason: BlockReason,
        message: String,
    },
    AtLimit {
        key: VolumeKey,
        size: u64,
        limit: u64,
    },
    WalRisk {
        key: VolumeKey,
        to: u64,
    },
}

impl Notification {
    pub fn reason(&self) -> &'static str {
        match self {
            Notification::Success { .. } => "AutoResizeSuccess",
            Notification::Blocked { .. } => "AutoResizeBlocked",
            Notification::AtLimit { .. } => "AutoResizeAtLimit",
            Notification::WalRisk { .. } => "AutoResizeWALRisk",
        }
    }

    pub fn note(&self) -> String {
        match self {
            Notification::Success { key, from, to } => format!(
                "Expanded {} volume of {} from {} to {}",
                key.role,
                key.instance,
                format_quantity(*from),
                format_quantity(*to)
            ),
            Notification::Blocked {
                key,
                reason,
                message,
            } => format!(
                "Resize of {} volume of {} blocked ({}): {}",
                key.role, key.instance, reason, message
            ),
            Notification::AtLimit { key, size, limit } => format!(
                "{} volume of {} is at {} and cannot grow past its limit of {}",
                key.role,
                key.instance,
                format_quantity(*size),
                format_quantity(*limit)
            ),
            Notification::WalRisk { key, to } => format!(
                "{} volume of {} holds WAL and was expanded to {}; check archiving and replication slots",
                key.role,
                key.instance,
                format_quantity(*to)
            ),
        }
    }

    pub fn to_event(&self) -> Event {
        let type_ = match self {
            Notification::Success { .. } => EventType::Normal,
            _ => EventType::Warning,
        };
        Event {
            type_,
            reason: self.reason().to_string(),
            note: Some(self.note()),
            action: "AutoResize".to_string(),
            secondary: None,
        }
    }
}

/// A permitted, non-empty expansion
#[derive(Debug, Clone)]
pub struct Expansion {
    pub key: VolumeKey,
    pub claim: String,
    pub current: u64,
    pub target: u64,
    /// Emit a WAL risk warning alongside the success notification
    pub alert_wal_risk: bool,
}

/// What an actuation produced
#[derive(Debug, Default)]
pub struct ActuationOutcome {
    pub event: Option<AutoResizeEvent>,
    pub notifications: Vec<Notification>,
}

/// Submit an expansion. Only a new submission records a success event.
pub async fn actuate<R: VolumeResizer>(
    resizer: &R,
    expansion: &Expansion,
    now: DateTime<Utc>,
) -> Result<ActuationOutcome, ActuationError> {
    let previous = match resizer
        .request_size(&expansion.claim, expansion.target, now)
        .await?
    {
        ExpansionRequest::Submitted { previous } => previous,
        ExpansionRequest::AlreadyRequested { requested } => {
            debug!(
                volume = %expansion.key,
                claim = %expansion.claim,
                requested,
                target = expansion.target,
                "Expansion already requested"
            );
            return Ok(ActuationOutcome::default());
        }
    };

    info!(
        volume = %expansion.key,
        claim = %expansion.claim,
        from = %format_quantity(previous),
        to = %format_quantity(expansion.target),
        "Requested volume expansion"
    );

    let event = AutoResizeEvent {
        timestamp: format_timestamp(now),
        instance: expansion.key.instance.clone(),
        volume_type: expansion.key.role.volume_type(),
        tablespace: expansion.key.role.tablespace().map(str::to_string),
        pvc_name: Some(expansion.claim.clone()),
        result: ResizeResult::Success,
        block_reason: None,
        previous_size: Some(format_quantity(previous)),
        new_size: Some(format_quantity(expansion.target)),
        message: None,
    };

    let mut notifications = vec![Notification::Success {
        key: expansion.key.clone(),
        from: previous,
        to: expansion.target,
    }];
    if expansion.alert_wal_risk {
        notifications.push(Notification::WalRisk {
            key: expansion.key.clone(),
            to: expansion.target,
        });
    }

    Ok(ActuationOutcome {
        event: Some(event),
        notifications,
    })
}

/// Audit event and notification for a policy denial
pub fn blocked(
    key: &VolumeKey,
    claim: Option<&str>,
    reason: BlockReason,
    message: &str,
    now: DateTime<Utc>,
) -> (AutoResizeEvent, Notification) {
    let event = AutoResizeEvent {
        timestamp: format_timestamp(now),
        instance: key.instance.clone(),
        volume_type: key.role.volume_type(),
        tablespace: key.role.tablespace().map(str::to_string),
        pvc_name: claim.map(str::to_string),
        result: ResizeResult::Blocked,
        block_reason: Some(reason),
        previous_size: None,
        new_size: None,
        message: Some(message.to_string()),
    };
    let notification = Notification::Blocked {
        key: key.clone(),
        reason,
        message: message.to_string(),
    };
    (event, notification)
}
