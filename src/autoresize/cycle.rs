//! One resize cycle over all volume slots of a cluster
//!
//! `plan` turns a snapshot of the cluster into a decision per slot without
//! touching the API. `execute` hands the permitted expansions to a
//! [`VolumeResizer`] and collects the audit events and notifications.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info};

use super::actuator::{self, ActuationError, ClaimState, Expansion, Notification, VolumeResizer};
use super::quantity::QuantityError;
use super::volume::{VolumeKey, declared_roles};
use super::{VolumeInput, VolumeOutcome, alerts_wal_risk, evaluate_volume};
use crate::crd::{AutoResizeEvent, InstanceDiskStatus, PostgresClusterSpec};

/// A PVC backing a volume slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimInfo {
    pub name: String,
    pub state: ClaimState,
}

/// What the planner reads
#[derive(Debug, Clone, Copy)]
pub struct ClusterSnapshot<'a> {
    pub spec: &'a PostgresClusterSpec,
    pub disk_status: &'a BTreeMap<String, InstanceDiskStatus>,
    /// Instance currently acting as primary
    pub primary: Option<&'a str>,
    pub claims: &'a BTreeMap<VolumeKey, ClaimInfo>,
    pub events: &'a [AutoResizeEvent],
    pub now: DateTime<Utc>,
}

/// Decision for one enabled slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotDecision {
    pub key: VolumeKey,
    pub claim: Option<String>,
    pub outcome: VolumeOutcome,
    pub alert_wal_risk: bool,
}

/// Decisions for every enabled slot, plus slots whose policy could not be
/// evaluated
#[derive(Debug, Default)]
pub struct CyclePlan {
    pub decisions: Vec<SlotDecision>,
    pub invalid: Vec<(VolumeKey, QuantityError)>,
}

/// Decide on every enabled slot of every instance with disk status
pub fn plan(snapshot: &ClusterSnapshot<'_>) -> CyclePlan {
    let spec = snapshot.spec;
    let has_dedicated_wal = spec.has_dedicated_wal();
    let wal_health = snapshot
        .primary
        .and_then(|p| snapshot.disk_status.get(p))
        .and_then(|s| s.wal_health.as_ref());
    let roles = declared_roles(spec);

    let mut plan = CyclePlan::default();
    for (instance, status) in snapshot.disk_status {
        for role in &roles {
            let Some(config) = role.storage(spec).and_then(|s| s.enabled_resize()) else {
                continue;
            };
            let key = VolumeKey::new(instance.clone(), role.clone());
            let claim = snapshot.claims.get(&key);
            let input = VolumeInput {
                key: &key,
                config,
                sample: status.sample(role),
                claim: claim.map(|c| &c.state),
                has_dedicated_wal,
                wal_health,
                events: snapshot.events,
                now: snapshot.now,
            };
            match evaluate_volume(&input) {
                Ok(outcome) => plan.decisions.push(SlotDecision {
                    alert_wal_risk: alerts_wal_risk(config, role, has_dedicated_wal),
                    claim: claim.map(|c| c.name.clone()),
                    key,
                    outcome,
                }),
                Err(e) => plan.invalid.push((key, e)),
            }
        }
    }
    plan
}

/// What executing a plan produced
#[derive(Debug, Default)]
pub struct CycleOutcome {
    /// Audit events to append to the log
    pub events: Vec<AutoResizeEvent>,
    pub notifications: Vec<Notification>,
    /// Submitted expansions, for metrics
    pub expanded: Vec<VolumeKey>,
    /// Expansions the API server rejected; retried next cycle
    pub failures: Vec<(VolumeKey, ActuationError)>,
}

/// Carry out the decisions of a plan
///
/// Blocked slots get a blocked event, slots at their limit a notification,
/// and permitted expansions are submitted.
pub async fn execute<R: VolumeResizer>(resizer: &R, decisions: &[SlotDecision], now: DateTime<Utc>) -> CycleOutcome {
    let mut outcome = CycleOutcome::default();

    for decision in decisions {
        match &decision.outcome {
            VolumeOutcome::Idle(reason) => {
                debug!(volume = %decision.key, reason = reason.as_str(), "No resize");
            }
            VolumeOutcome::AtLimit { current, limit } => {
                info!(volume = %decision.key, current, limit, "Volume needs to grow but is at its limit");
                outcome.notifications.push(Notification::AtLimit {
                    key: decision.key.clone(),
                    size: *current,
                    limit: *limit,
                });
            }
            VolumeOutcome::Blocked { reason, message, .. } => {
                info!(volume = %decision.key, reason = %reason, message = %message, "Resize blocked");
                let (event, notification) =
                    actuator::blocked(&decision.key, decision.claim.as_deref(), *reason, message, now);
                outcome.events.push(event);
                outcome.notifications.push(notification);
            }
            VolumeOutcome::Expand {
                current,
                target,
                trigger,
                ..
            } => {
                // a triggered slot without a claim is reported as idle upstream
                let Some(claim) = decision.claim.clone() else {
                    continue;
                };
                debug!(volume = %decision.key, trigger = %trigger, "Resize triggered");
                let expansion = Expansion {
                    key: decision.key.clone(),
                    claim,
                    current: *current,
                    target: *target,
                    alert_wal_risk: decision.alert_wal_risk,
                };
                match actuator::actuate(resizer, &expansion, now).await {
                    Ok(result) => {
                        if let Some(event) = result.event {
                            outcome.events.push(event);
                            outcome.expanded.push(decision.key.clone());
                        }
                        outcome.notifications.extend(result.notifications);
                    }
                    Err(e) => {
                        error!(volume = %decision.key, error = %e, "Failed to request volume expansion");
                        outcome.failures.push((decision.key.clone(), e));
                    }
                }
            }
        }
    }

    outcome
}
