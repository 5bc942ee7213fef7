//! Reconciliation logic for PostgresCluster resources
//!
//! Each cycle collects disk usage from every instance and WAL health from
//! the primary, folds it into the status, runs every enabled volume slot
//! through the resize pipeline and requests the permitted expansions.
//! The cluster is requeued at the monitoring interval.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::future::join_all;
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use kube::api::ListParams;
use kube::runtime::controller::Action;
use kube::{Api, Resource, ResourceExt};
use tracing::{debug, error, info, instrument, warn};

use crate::autoresize::actuator::ClaimState;
use crate::autoresize::cycle::{self, ClaimInfo, ClusterSnapshot, CycleOutcome, CyclePlan};
use crate::autoresize::rate_limit::format_timestamp;
use crate::autoresize::volume::{CLUSTER_LABEL, VolumeKey, VolumeRole, declared_roles};
use crate::autoresize::{IdleReason, PvcResizer, VolumeOutcome};
use crate::collector::aggregate::{self, InstanceCollection, MergedDiskStatus};
use crate::collector::disk::DiskUsageCollector;
use crate::collector::wal_health::WalHealthCollector;
use crate::collector::{CollectionError, InstancePod, list_instances};
use crate::controller::context::Context;
use crate::controller::error::{Error, Result};
use crate::controller::status::{ConditionUpdate, StatusManager, StatusUpdate, condition_types, spec_changed};
use crate::controller::validation::validate_spec;
use crate::crd::PostgresCluster;
use crate::health::VolumeLabels;

/// Delay before re-running a cycle abandoned because the spec changed
const SUPERSEDED_REQUEUE: Duration = Duration::from_secs(1);

/// Main reconciliation function
#[instrument(
    skip(cluster, ctx),
    fields(name = %cluster.name_any(), namespace = cluster.namespace().unwrap_or_default())
)]
pub async fn reconcile(cluster: Arc<PostgresCluster>, ctx: Arc<Context>) -> Result<Action> {
    let start = Instant::now();
    let ns = cluster
        .namespace()
        .ok_or(Error::MissingObjectKey("metadata.namespace"))?;
    let name = cluster.name_any();

    // Nothing to clean up: PVCs belong to whoever provisioned the cluster
    if cluster.metadata.deletion_timestamp.is_some() {
        debug!("Cluster is being deleted, skipping");
        return Ok(Action::await_change());
    }

    debug!("Reconciling PostgresCluster storage");
    let result = reconcile_storage(&cluster, &ctx, &ns).await;

    if result.is_ok() {
        ctx.reset_errors(&format!("{}/{}", ns, name));
        if let Some(state) = &ctx.health_state {
            state
                .metrics
                .record_reconcile(&ns, &name, start.elapsed().as_secs_f64());
            state.mark_reconciled(u64::try_from(Utc::now().timestamp()).unwrap_or_default());
        }
    }
    result
}

/// Error policy for the controller
///
/// Collection and actuation failures are retried on the regular monitoring
/// cadence; everything else backs off exponentially.
pub fn error_policy(cluster: Arc<PostgresCluster>, error: &Error, ctx: Arc<Context>) -> Action {
    let ns = cluster.namespace().unwrap_or_default();
    let name = cluster.name_any();
    let attempts = ctx.record_error(&format!("{}/{}", ns, name), error);
    if let Some(metrics) = ctx.metrics() {
        metrics.record_error(&ns, &name);
    }

    if error.retries_on_next_cycle() {
        warn!(cluster = %name, error = %error, "Cycle failed, retrying at the next monitoring interval");
        return Action::requeue(ctx.config.monitoring_interval);
    }

    let delay = ctx.backoff.delay_for_error(error, attempts.saturating_sub(1));
    if error.is_retryable() {
        warn!(
            "Retryable error for {} (attempt {}): {}, requeuing in {:?}",
            name, attempts, error, delay
        );
    } else {
        error!(
            "Non-retryable error for {}: {}, requeuing in {:?} for manual intervention",
            name, error, delay
        );
    }
    Action::requeue(delay)
}

async fn reconcile_storage(cluster: &PostgresCluster, ctx: &Context, ns: &str) -> Result<Action> {
    let name = cluster.name_any();
    let api: Api<PostgresCluster> = Api::namespaced(ctx.client.clone(), ns);
    let status_manager = StatusManager::new(api.clone());
    let interval = ctx.config.monitoring_interval;

    if let Err(e) = validate_spec(cluster) {
        warn!(cluster = %name, error = %e, "Resize configuration is invalid, skipping resize");
        let update = StatusUpdate {
            conditions: vec![ConditionUpdate::new(
                condition_types::CONFIG_VALID,
                false,
                "InvalidConfiguration",
                e.to_string(),
            )],
            ..Default::default()
        };
        status_manager.update(cluster, &update, Utc::now()).await?;
        return Ok(Action::requeue(interval));
    }

    let instances = list_instances(&ctx.client, ns, &name).await?;
    let primary = instances.iter().find(|i| i.primary).map(|i| i.name.clone());
    if primary.is_none() && !instances.is_empty() {
        debug!(cluster = %name, "No instance is labelled as primary, WAL health unavailable");
    }

    let now = Utc::now();
    let now_str = format_timestamp(now);
    let roles = declared_roles(&cluster.spec);
    let collections = collect(cluster, ctx, ns, &instances, &roles, &now_str).await;
    let previous = cluster
        .status
        .as_ref()
        .map(|s| s.disk_status.clone())
        .unwrap_or_default();
    let merged = aggregate::merge(&previous, collections, &now_str);
    report_collection(ctx, ns, &name, &merged, primary.as_deref());

    let claims = list_claims(ctx, ns, &name).await?;

    // Abandon the cycle if the spec moved on while we were collecting. The
    // fresh copy also carries the latest event log for the rate limiter.
    let Some(latest) = api.get_opt(&name).await? else {
        debug!(cluster = %name, "Cluster deleted during the cycle");
        return Ok(Action::await_change());
    };
    if spec_changed(cluster, &latest) {
        info!(
            cluster = %name,
            from = ?cluster.metadata.generation,
            to = ?latest.metadata.generation,
            "Spec changed during the cycle, abandoning stale decisions"
        );
        return Ok(Action::requeue(SUPERSEDED_REQUEUE));
    }

    let events = latest
        .status
        .as_ref()
        .map(|s| s.auto_resize_events.clone())
        .unwrap_or_default();
    let plan = cycle::plan(&ClusterSnapshot {
        spec: &latest.spec,
        disk_status: &merged.instances,
        primary: primary.as_deref(),
        claims: &claims,
        events: &events,
        now,
    });
    for (key, e) in &plan.invalid {
        warn!(volume = %key, error = %e, "Resize policy could not be evaluated");
    }

    let resizer = PvcResizer::new(ctx.client.clone(), ns);
    let outcome = cycle::execute(&resizer, &plan.decisions, now).await;
    report_outcome(ctx, &latest, ns, &name, &plan, &outcome).await;

    let update = StatusUpdate {
        primary_pod: primary,
        disk_status: Some(merged.instances.clone()),
        new_events: outcome.events.clone(),
        conditions: conditions(&merged, &plan, &outcome),
    };
    status_manager.update(&latest, &update, now).await?;

    if !outcome.failures.is_empty() {
        let message = outcome
            .failures
            .iter()
            .map(|(key, e)| format!("{}: {}", key, e))
            .collect::<Vec<_>>()
            .join("; ");
        return Err(Error::ActuationError(message));
    }

    Ok(Action::requeue(interval))
}

/// Collect disk usage from every instance and WAL health from the primary
async fn collect(
    cluster: &PostgresCluster,
    ctx: &Context,
    ns: &str,
    instances: &[InstancePod],
    roles: &[VolumeRole],
    now: &str,
) -> Vec<InstanceCollection> {
    let disk = DiskUsageCollector::new(ctx.client.clone(), ns, ctx.config.exec_timeout);
    let wal = WalHealthCollector::new(ctx.client.clone(), cluster, ctx.config.db_connect_timeout);

    let per_instance = instances.iter().map(|instance| {
        let disk = &disk;
        let wal = &wal;
        async move {
            if !instance.ready {
                let not_ready = || CollectionError::ExecFailed {
                    pod: instance.name.clone(),
                    message: "pod is not ready".to_string(),
                };
                return InstanceCollection {
                    instance: instance.name.clone(),
                    volumes: roles.iter().map(|r| (r.clone(), Err(not_ready()))).collect(),
                    wal_health: instance.primary.then(|| Err(not_ready())),
                };
            }
            let volumes = disk.collect(&instance.name, roles, now);
            let wal_health = async {
                if instance.primary {
                    Some(wal.collect(instance, now).await)
                } else {
                    None
                }
            };
            let (volumes, wal_health) = tokio::join!(volumes, wal_health);
            InstanceCollection {
                instance: instance.name.clone(),
                volumes,
                wal_health,
            }
        }
    });
    join_all(per_instance).await
}

/// PVCs of the cluster keyed by the volume slot they back
async fn list_claims(ctx: &Context, ns: &str, cluster_name: &str) -> Result<BTreeMap<VolumeKey, ClaimInfo>> {
    let pvcs: Api<PersistentVolumeClaim> = Api::namespaced(ctx.client.clone(), ns);
    let selector = format!("{}={}", CLUSTER_LABEL, cluster_name);
    let list = pvcs.list(&ListParams::default().labels(&selector)).await?;

    let mut claims = BTreeMap::new();
    for pvc in list.items.iter().filter(|p| p.metadata.deletion_timestamp.is_none()) {
        let Some(key) = VolumeKey::from_claim(pvc) else {
            debug!(claim = %pvc.name_any(), "PVC has no instance or role labels, ignoring");
            continue;
        };
        match ClaimState::from_claim(pvc) {
            Ok(state) => {
                claims.insert(
                    key,
                    ClaimInfo {
                        name: pvc.name_any(),
                        state,
                    },
                );
            }
            Err(e) => warn!(claim = %pvc.name_any(), error = %e, "Ignoring PVC"),
        }
    }
    Ok(claims)
}

fn report_collection(ctx: &Context, ns: &str, cluster: &str, merged: &MergedDiskStatus, primary: Option<&str>) {
    for failure in &merged.failures {
        warn!(
            instance = %failure.instance,
            source = %failure.source,
            kind = failure.kind,
            error = %failure.message,
            "Collection failed, keeping last known value"
        );
    }

    let Some(metrics) = ctx.metrics() else {
        return;
    };
    for failure in &merged.failures {
        metrics.record_collection_error(ns, cluster, &failure.instance, &failure.source);
    }
    for (instance, status) in &merged.instances {
        for role in [VolumeRole::Data, VolumeRole::Wal]
            .into_iter()
            .chain(status.tablespaces.keys().map(|t| VolumeRole::Tablespace(t.clone())))
        {
            if let Some(sample) = status.sample(&role).filter(|s| !s.stale) {
                let labels = VolumeLabels::new(ns, cluster, &VolumeKey::new(instance.clone(), role));
                metrics.record_volume_usage(&labels, sample);
            }
        }
    }
    if let Some(health) = aggregate::primary_wal_health(&merged.instances, primary).filter(|h| !h.stale)
        && let Some(primary) = primary
    {
        metrics.record_wal_health(ns, cluster, primary, health);
    }
}

/// Publish notifications as Kubernetes events and update resize metrics
async fn report_outcome(
    ctx: &Context,
    cluster: &PostgresCluster,
    ns: &str,
    name: &str,
    plan: &CyclePlan,
    outcome: &CycleOutcome,
) {
    let reference = cluster.object_ref(&());
    for notification in &outcome.notifications {
        if let Err(e) = ctx.recorder.publish(&notification.to_event(), &reference).await {
            warn!(reason = notification.reason(), error = %e, "Failed to publish event");
        }
    }

    let Some(metrics) = ctx.metrics() else {
        return;
    };
    for decision in &plan.decisions {
        let labels = VolumeLabels::new(ns, name, &decision.key);
        metrics.set_at_limit(&labels, matches!(decision.outcome, VolumeOutcome::AtLimit { .. }));
        match &decision.outcome {
            VolumeOutcome::Blocked { reason, budget, .. } => {
                metrics.record_blocked(&labels, *reason);
                metrics.set_budget_remaining(&labels, budget.remaining());
            }
            VolumeOutcome::Expand { budget, .. } => {
                let spent = i64::from(outcome.expanded.contains(&decision.key));
                let remaining = budget.remaining();
                metrics.set_budget_remaining(&labels, if remaining < 0 { remaining } else { remaining - spent });
            }
            _ => {}
        }
    }
    for key in &outcome.expanded {
        metrics.record_resize(&VolumeLabels::new(ns, name, key), "success");
    }
    for (key, _) in &outcome.failures {
        metrics.record_resize(&VolumeLabels::new(ns, name, key), "failed");
    }
}

/// Conditions describing this cycle
fn conditions(merged: &MergedDiskStatus, plan: &CyclePlan, outcome: &CycleOutcome) -> Vec<ConditionUpdate> {
    let ready = if merged.instances.is_empty() {
        ConditionUpdate::new(condition_types::READY, false, "NoInstances", "no running instances found")
    } else if merged.has_failures() {
        ConditionUpdate::new(
            condition_types::READY,
            false,
            "CollectionFailed",
            format!("{} collection(s) failed, using last known values", merged.failures.len()),
        )
    } else {
        ConditionUpdate::new(condition_types::READY, true, "Collected", "disk usage collected from all instances")
    };

    let mut problems = Vec::new();
    let mut reason = "Healthy";
    for decision in &plan.decisions {
        match &decision.outcome {
            VolumeOutcome::Blocked { reason: r, .. } => {
                reason = "ResizeBlocked";
                problems.push(format!("{} blocked ({})", decision.key, r));
            }
            VolumeOutcome::AtLimit { .. } => {
                if reason == "Healthy" {
                    reason = "AtLimit";
                }
                problems.push(format!("{} at limit", decision.key));
            }
            VolumeOutcome::Idle(IdleReason::StaleSample) => {
                if reason == "Healthy" {
                    reason = "StaleData";
                }
                problems.push(format!("{} has stale usage data", decision.key));
            }
            _ => {}
        }
    }
    for (key, e) in &plan.invalid {
        reason = "InvalidPolicy";
        problems.push(format!("{}: {}", key, e));
    }
    for (key, _) in &outcome.failures {
        reason = "ActuationFailed";
        problems.push(format!("{} expansion request failed", key));
    }
    let healthy = if problems.is_empty() {
        ConditionUpdate::new(condition_types::AUTO_RESIZE_HEALTHY, true, reason, "all volumes within policy")
    } else {
        ConditionUpdate::new(condition_types::AUTO_RESIZE_HEALTHY, false, reason, problems.join("; "))
    };

    vec![
        ready,
        healthy,
        ConditionUpdate::new(condition_types::CONFIG_VALID, true, "Valid", "resize configuration is valid"),
    ]
}
