use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use kube::Client;
use kube::runtime::events::{Recorder, Reporter};

use crate::config::OperatorConfig;
use crate::controller::error::{BackoffConfig, Error, ErrorContext};
use crate::health::{HealthState, Metrics};

/// Name reported as the source of Kubernetes events
pub const CONTROLLER_NAME: &str = "postgres-storage-operator";

/// Shared context for the controller
pub struct Context {
    /// Kubernetes client
    pub client: Client,
    pub config: OperatorConfig,
    pub backoff: BackoffConfig,
    /// Health state, when the health server is running
    pub health_state: Option<Arc<HealthState>>,
    pub recorder: Recorder,
    /// Consecutive failures per cluster, keyed by `namespace/name`
    errors: Mutex<HashMap<String, ErrorContext>>,
}

impl Context {
    pub fn new(client: Client, config: OperatorConfig, health_state: Option<Arc<HealthState>>) -> Self {
        let reporter = Reporter {
            controller: CONTROLLER_NAME.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client.clone(), reporter),
            client,
            config,
            backoff: BackoffConfig::default(),
            health_state,
            errors: Mutex::new(HashMap::new()),
        }
    }

    pub fn metrics(&self) -> Option<&Metrics> {
        self.health_state.as_deref().map(|s| &s.metrics)
    }

    /// Record a failed reconcile and return the number of consecutive failures
    pub fn record_error(&self, key: &str, error: &Error) -> u32 {
        let Ok(mut errors) = self.errors.lock() else {
            return 0;
        };
        let entry = errors.entry(key.to_string()).or_default();
        entry.record_error(error);
        entry.consecutive_errors
    }

    /// Forget failures after a successful reconcile
    pub fn reset_errors(&self, key: &str) {
        if let Ok(mut errors) = self.errors.lock() {
            errors.remove(key);
        }
    }
}
