//! Operator spawning utilities for integration tests
//!
//! Each test gets its own controller scoped to the test namespace so tests
//! do not see each other's clusters. The controller runs in the test's
//! tokio runtime.

use kube::Client;
use postgres_storage_operator::{OperatorConfig, run_controller};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// A scoped operator that runs for the duration of a test
pub struct ScopedOperator {
    handle: JoinHandle<()>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl ScopedOperator {
    /// Start a controller watching only `namespace`
    ///
    /// It will be automatically stopped when dropped.
    pub async fn start(client: Client, namespace: &str) -> Self {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let config = OperatorConfig {
            watch_namespace: Some(namespace.to_string()),
            monitoring_interval: Duration::from_secs(5),
            ..Default::default()
        };

        tracing::info!(namespace, "Starting scoped storage controller...");

        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = run_controller(client, config, None) => {
                    tracing::debug!("Operator exited normally");
                }
                _ = shutdown_rx => {
                    tracing::debug!("Operator received shutdown signal");
                }
            }
        });

        // Give the controller a moment to start watching
        tokio::time::sleep(Duration::from_millis(100)).await;

        Self {
            handle,
            shutdown_tx: Some(shutdown_tx),
        }
    }
}

impl Drop for ScopedOperator {
    fn drop(&mut self) {
        // Send shutdown signal (ignore error if receiver already dropped)
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        self.handle.abort();
    }
}
