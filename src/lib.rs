pub mod autoresize;
pub mod collector;
pub mod config;
pub mod controller;
pub mod crd;
pub mod health;
pub mod webhooks;

pub use config::OperatorConfig;
pub use controller::{BackoffConfig, Context, Error, Result, error_policy, reconcile};
pub use crd::PostgresCluster;
pub use health::{HealthState, Metrics};
pub use webhooks::{WebhookError, run_webhook_server};

use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use kube::runtime::Controller;
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::{Api, Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;

use crate::autoresize::volume::CLUSTER_LABEL;

/// Helper to create a namespaced or cluster-wide API based on scope.
fn scoped_api<T>(client: Client, namespace: Option<&str>) -> Api<T>
where
    T: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
    <T as Resource>::DynamicType: Default,
    T: Clone + DeserializeOwned + std::fmt::Debug,
{
    match namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    }
}

/// The cluster a labelled PVC belongs to
fn cluster_for_claim(pvc: &PersistentVolumeClaim) -> Option<ObjectRef<PostgresCluster>> {
    let cluster = pvc.labels().get(CLUSTER_LABEL)?;
    let namespace = pvc.namespace()?;
    Some(ObjectRef::new(cluster).within(&namespace))
}

/// Run the storage controller.
///
/// Watches PostgresCluster resources in `config.watch_namespace` (or
/// cluster-wide) together with the PVCs labelled as belonging to a
/// cluster, so a finished expansion is picked up without waiting for the
/// next monitoring interval.
///
/// If health_state is provided, metrics will be recorded for reconciliations.
pub async fn run_controller(client: Client, config: OperatorConfig, health_state: Option<Arc<HealthState>>) {
    let namespace = config.watch_namespace.clone();
    let scope_msg = namespace.as_deref().unwrap_or("cluster-wide");
    tracing::info!(
        interval_secs = config.monitoring_interval.as_secs(),
        "Starting storage controller for PostgresCluster resources (scope: {})",
        scope_msg
    );

    // Mark as ready once we start the controller
    if let Some(ref state) = health_state {
        state.set_ready(true).await;
    }

    let ctx = Arc::new(Context::new(client.clone(), config, health_state));

    let clusters: Api<PostgresCluster> = scoped_api(client.clone(), namespace.as_deref());
    let claims: Api<PersistentVolumeClaim> = scoped_api(client, namespace.as_deref());

    let watcher_config = WatcherConfig::default().any_semantic();

    Controller::new(clusters, watcher_config.clone())
        .watches(claims, watcher_config.labels(CLUSTER_LABEL), |pvc| cluster_for_claim(&pvc))
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((obj, _action)) => {
                    tracing::debug!("Reconciled: {}", obj.name);
                }
                Err(e) => {
                    // PVC events can arrive for a cluster that was just deleted
                    let is_not_found = matches!(
                        &e,
                        kube::runtime::controller::Error::ReconcilerFailed(err, _) if err.is_not_found()
                    );
                    if is_not_found {
                        tracing::debug!("Object no longer exists (likely deleted): {:?}", e);
                    } else {
                        tracing::error!("Reconciliation error: {:?}", e);
                    }
                }
            }
        })
        .await;

    // This should never complete in normal operation
    tracing::error!("Controller stream ended unexpectedly");
}
