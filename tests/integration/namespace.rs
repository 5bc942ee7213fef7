//! Throwaway namespaces, one per test

use k8s_openapi::api::core::v1::Namespace;
use kube::api::{DeleteParams, PostParams, PropagationPolicy};
use kube::core::ObjectMeta;
use kube::{Api, Client};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Label marking namespaces created by the storage operator tests
const TEST_LABEL: &str = "postgres-storage-operator.test";

pub struct TestNamespace {
    name: String,
    api: Api<Namespace>,
}

impl TestNamespace {
    /// Create `{prefix}-{uuid8}`
    pub async fn create(client: Client, prefix: &str) -> kube::Result<Self> {
        let name = format!("{}-{}", prefix, &Uuid::new_v4().simple().to_string()[..8]);
        let ns = Namespace {
            metadata: ObjectMeta {
                name: Some(name.clone()),
                labels: Some(BTreeMap::from([(TEST_LABEL.to_string(), prefix.to_string())])),
                ..Default::default()
            },
            ..Default::default()
        };

        let api: Api<Namespace> = Api::all(client);
        api.create(&PostParams::default(), &ns).await?;
        tracing::info!(namespace = %name, "Created test namespace");

        Ok(Self { name, api })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Start deleting the namespace without waiting for it to go away
    pub async fn cleanup(&self) -> kube::Result<()> {
        let dp = DeleteParams {
            propagation_policy: Some(PropagationPolicy::Background),
            ..Default::default()
        };
        match self.api.delete(&self.name, &dp).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
            Err(e) => Err(e),
        }
    }
}
