//! Operator configuration from environment variables
//!
//! Every setting has a default. Unparseable values are reported and the
//! default is used instead, so a typo never stops the operator.

use std::time::Duration;

use tracing::warn;

pub const DEFAULT_MONITORING_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_EXEC_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_DB_CONNECT_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_HEALTH_PORT: u16 = 8080;
pub const DEFAULT_WEBHOOK_PORT: u16 = 8443;
pub const DEFAULT_WEBHOOK_CERT_PATH: &str = "/etc/webhook/certs/tls.crt";
pub const DEFAULT_WEBHOOK_KEY_PATH: &str = "/etc/webhook/certs/tls.key";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorConfig {
    /// Restrict the controller to one namespace
    pub watch_namespace: Option<String>,
    /// Time between collection cycles for a cluster
    pub monitoring_interval: Duration,
    /// Timeout for one filesystem probe
    pub exec_timeout: Duration,
    /// Timeout for opening a database connection
    pub db_connect_timeout: Duration,
    pub health_port: u16,
    pub enable_webhooks: bool,
    pub webhook_port: u16,
    pub webhook_cert_path: String,
    pub webhook_key_path: String,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            watch_namespace: None,
            monitoring_interval: Duration::from_secs(DEFAULT_MONITORING_INTERVAL_SECS),
            exec_timeout: Duration::from_secs(DEFAULT_EXEC_TIMEOUT_SECS),
            db_connect_timeout: Duration::from_secs(DEFAULT_DB_CONNECT_TIMEOUT_SECS),
            health_port: DEFAULT_HEALTH_PORT,
            enable_webhooks: true,
            webhook_port: DEFAULT_WEBHOOK_PORT,
            webhook_cert_path: DEFAULT_WEBHOOK_CERT_PATH.to_string(),
            webhook_key_path: DEFAULT_WEBHOOK_KEY_PATH.to_string(),
        }
    }
}

impl OperatorConfig {
    /// Read configuration from the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through `lookup`
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        Self {
            watch_namespace: get("WATCH_NAMESPACE"),
            monitoring_interval: seconds(
                "AUTORESIZE_MONITORING_INTERVAL_SECS",
                get("AUTORESIZE_MONITORING_INTERVAL_SECS"),
                defaults.monitoring_interval,
            ),
            exec_timeout: seconds(
                "AUTORESIZE_EXEC_TIMEOUT_SECS",
                get("AUTORESIZE_EXEC_TIMEOUT_SECS"),
                defaults.exec_timeout,
            ),
            db_connect_timeout: seconds(
                "AUTORESIZE_DB_CONNECT_TIMEOUT_SECS",
                get("AUTORESIZE_DB_CONNECT_TIMEOUT_SECS"),
                defaults.db_connect_timeout,
            ),
            health_port: parsed("HEALTH_PORT", get("HEALTH_PORT"), defaults.health_port),
            enable_webhooks: parsed("ENABLE_WEBHOOKS", get("ENABLE_WEBHOOKS"), defaults.enable_webhooks),
            webhook_port: parsed("WEBHOOK_PORT", get("WEBHOOK_PORT"), defaults.webhook_port),
            webhook_cert_path: get("WEBHOOK_CERT_PATH").unwrap_or(defaults.webhook_cert_path),
            webhook_key_path: get("WEBHOOK_KEY_PATH").unwrap_or(defaults.webhook_key_path),
        }
    }
}

fn parsed<T>(key: &str, value: Option<String>, default: T) -> T
where
    T: std::str::FromStr + std::fmt::Debug,
{
    match value {
        None => default,
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            warn!(key, value = %raw, ?default, "Invalid value, using default");
            default
        }),
    }
}

/// Positive whole seconds
fn seconds(key: &str, value: Option<String>, default: Duration) -> Duration {
    match parsed::<u64>(key, value, default.as_secs()) {
        0 => {
            warn!(key, ?default, "Zero is not a valid duration, using default");
            default
        }
        secs => Duration::from_secs(secs),
    }
}
