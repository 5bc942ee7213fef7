//! Fast integration tests for postgres-storage-operator
//!
//! These tests exercise the controller against a real API server without
//! running PostgreSQL: clusters are created with no pods behind them, so
//! the controller reports status but never resizes anything.

use kube::api::{DeleteParams, PostParams};
use kube::runtime::wait::await_condition;
use kube::{Api, Client};
use postgres_storage_operator::controller::status::{condition_status, condition_types};
use postgres_storage_operator::crd::PostgresCluster;
use std::time::Duration;

use crate::common::{PostgresClusterBuilder, ResizeBuilder};
use crate::{ScopedOperator, TestNamespace, install_crd};

/// Short timeout - we're testing operator logic, not pod readiness
const FAST_TIMEOUT: Duration = Duration::from_secs(30);

/// Test context that holds the operator for the test duration
struct TestContext {
    client: Client,
    namespace: TestNamespace,
    _operator: ScopedOperator,
}

/// Helper to set up test infrastructure
async fn setup(prefix: &str) -> TestContext {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info,kube=warn")
        .with_test_writer()
        .try_init();

    let client = Client::try_default().await.expect("Failed to create client");
    install_crd(client.clone()).await.expect("Failed to install CRD");
    let namespace = TestNamespace::create(client.clone(), prefix)
        .await
        .expect("Failed to create namespace");
    let operator = ScopedOperator::start(client.clone(), namespace.name()).await;

    TestContext {
        client,
        namespace,
        _operator: operator,
    }
}

/// Wait for a condition with timeout
async fn wait_for<C>(
    api: &Api<PostgresCluster>,
    name: &str,
    condition: C,
    timeout: Duration,
) -> Result<PostgresCluster, String>
where
    C: kube::runtime::wait::Condition<PostgresCluster>,
{
    let result = tokio::time::timeout(timeout, await_condition(api.clone(), name, condition)).await;

    match result {
        Ok(Ok(Some(cluster))) => Ok(cluster),
        Ok(Ok(None)) => Err("Resource not found".to_string()),
        Ok(Err(e)) => Err(format!("Watch error: {}", e)),
        Err(_) => Err("Timeout".to_string()),
    }
}

/// Condition: cluster status carries a condition of `type_` with `status`
fn has_condition(
    type_: &'static str,
    status: &'static str,
) -> impl kube::runtime::wait::Condition<PostgresCluster> {
    move |obj: Option<&PostgresCluster>| {
        obj.and_then(|c| c.status.as_ref())
            .is_some_and(|s| s.conditions.iter().any(|c| c.type_ == type_ && c.status == status))
    }
}

#[tokio::test]
#[ignore = "requires Kubernetes cluster"]
async fn test_crd_installs_idempotently() {
    let client = Client::try_default().await.expect("Failed to create client");
    install_crd(client.clone()).await.expect("first install");
    install_crd(client).await.expect("second install");
}

#[tokio::test]
#[ignore = "requires Kubernetes cluster"]
async fn test_cluster_without_instances_reports_not_ready() {
    let ctx = setup("pso-empty").await;
    let api: Api<PostgresCluster> = Api::namespaced(ctx.client.clone(), ctx.namespace.name());

    let cluster = PostgresClusterBuilder::new("empty", ctx.namespace.name())
        .with_wal_storage("2Gi", Some(ResizeBuilder::new().step("1Gi").build()))
        .build();
    api.create(&PostParams::default(), &cluster).await.expect("create cluster");

    let observed = wait_for(
        &api,
        "empty",
        has_condition(condition_types::READY, condition_status::FALSE),
        FAST_TIMEOUT,
    )
    .await
    .expect("Ready=False");

    let status = observed.status.expect("status");
    assert!(status.disk_status.is_empty());
    assert!(status.auto_resize_events.is_empty());
    assert!(status
        .conditions
        .iter()
        .any(|c| c.type_ == condition_types::CONFIG_VALID && c.status == condition_status::TRUE));

    api.delete("empty", &DeleteParams::default()).await.expect("delete");
    ctx.namespace.cleanup().await.expect("cleanup");
}

#[tokio::test]
#[ignore = "requires Kubernetes cluster"]
async fn test_invalid_policy_reported_in_status() {
    let ctx = setup("pso-invalid").await;
    let api: Api<PostgresCluster> = Api::namespaced(ctx.client.clone(), ctx.namespace.name());

    // no admission webhook in this environment, so the API server accepts it
    let cluster = PostgresClusterBuilder::new("unacked", ctx.namespace.name())
        .with_data_resize(ResizeBuilder::new().build())
        .build();
    api.create(&PostParams::default(), &cluster).await.expect("create cluster");

    let observed = wait_for(
        &api,
        "unacked",
        has_condition(condition_types::CONFIG_VALID, condition_status::FALSE),
        FAST_TIMEOUT,
    )
    .await
    .expect("ConfigurationValid=False");

    let condition = observed
        .status
        .expect("status")
        .conditions
        .into_iter()
        .find(|c| c.type_ == condition_types::CONFIG_VALID)
        .expect("condition");
    assert!(condition.message.contains("acknowledgeWALRisk"), "{}", condition.message);

    ctx.namespace.cleanup().await.expect("cleanup");
}
