//! Disk usage collection through pod exec.
//!
//! Runs `stat -f` against each mount path inside the postgres container.
//! The numbers are reported the way `df` reports them: percent used is
//! relative to the space an unprivileged writer can use, so reserved
//! blocks count as neither used nor available.

use futures::future::join_all;
use k8s_openapi::api::core::v1::Pod;
use kube::api::AttachParams;
use kube::{Api, Client};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::time::timeout;
use tracing::{debug, trace};

use super::{CollectionError, POSTGRES_CONTAINER, Result};
use crate::autoresize::volume::VolumeRole;
use crate::crd::VolumeUsageSample;

/// Prefix the probe writes to stderr for a path that is not a mount point
const NOT_MOUNTED_MARKER: &str = "not mounted:";

const STATFS_SCRIPT: &str = r#"grep -qs " $1 " /proc/mounts || { echo "not mounted: $1" >&2; exit 3; }; exec stat -f -c '%S %b %f %a' "$1""#;

/// Command that prints `<block size> <blocks> <free> <available>` for a path
pub fn statfs_command(path: &str) -> Vec<String> {
    vec![
        "sh".to_string(),
        "-c".to_string(),
        STATFS_SCRIPT.to_string(),
        "statfs".to_string(),
        path.to_string(),
    ]
}

/// Raw filesystem statistics, in blocks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilesystemStats {
    pub block_size: u64,
    pub blocks: u64,
    pub blocks_free: u64,
    pub blocks_available: u64,
}

impl FilesystemStats {
    pub fn total_bytes(&self) -> u64 {
        self.blocks.saturating_mul(self.block_size)
    }

    pub fn available_bytes(&self) -> u64 {
        self.blocks_available.saturating_mul(self.block_size)
    }

    pub fn used_bytes(&self) -> u64 {
        self.total_bytes()
            .saturating_sub(self.blocks_free.saturating_mul(self.block_size))
    }

    /// Percentage used, rounded up, 0 for an empty filesystem
    pub fn percent_used(&self) -> i32 {
        let used = u128::from(self.used_bytes());
        let usable = used + u128::from(self.available_bytes());
        if usable == 0 {
            return 0;
        }
        let pct = (used * 100).div_ceil(usable).min(100);
        i32::try_from(pct).unwrap_or(100)
    }

    pub fn to_sample(&self, collected_at: &str) -> VolumeUsageSample {
        VolumeUsageSample {
            percent_used: self.percent_used(),
            available_bytes: i64::try_from(self.available_bytes()).unwrap_or(i64::MAX),
            total_bytes: i64::try_from(self.total_bytes()).unwrap_or(i64::MAX),
            collected_at: Some(collected_at.to_string()),
            stale: false,
        }
    }
}

/// Parse the output of the statfs probe
pub fn parse_statfs_output(output: &str) -> Result<FilesystemStats> {
    let fields: Vec<u64> = output
        .split_whitespace()
        .map(str::parse)
        .collect::<std::result::Result<_, _>>()
        .map_err(|_| CollectionError::ParseError(output.to_string()))?;

    match fields.as_slice() {
        [block_size, blocks, blocks_free, blocks_available] if *block_size > 0 => Ok(FilesystemStats {
            block_size: *block_size,
            blocks: *blocks,
            blocks_free: *blocks_free,
            blocks_available: *blocks_available,
        }),
        _ => Err(CollectionError::ParseError(output.to_string())),
    }
}

/// Collects usage samples for the volumes of one instance
pub struct DiskUsageCollector {
    client: Client,
    namespace: String,
    exec_timeout: Duration,
}

impl DiskUsageCollector {
    #[must_use]
    pub fn new(client: Client, namespace: &str, exec_timeout: Duration) -> Self {
        Self {
            client,
            namespace: namespace.to_string(),
            exec_timeout,
        }
    }

    /// Sample every role on `pod` concurrently; each role gets its own result
    pub async fn collect(
        &self,
        pod: &str,
        roles: &[VolumeRole],
        collected_at: &str,
    ) -> Vec<(VolumeRole, Result<VolumeUsageSample>)> {
        let probes = roles.iter().map(|role| async move {
            let result = self.collect_volume(pod, role, collected_at).await;
            (role.clone(), result)
        });
        join_all(probes).await
    }

    async fn collect_volume(&self, pod: &str, role: &VolumeRole, collected_at: &str) -> Result<VolumeUsageSample> {
        let path = role.mount_path();
        let output = timeout(self.exec_timeout, self.exec_command(pod, statfs_command(&path)))
            .await
            .map_err(|_| CollectionError::Timeout(self.exec_timeout.as_secs()))??;

        let stats = parse_statfs_output(&output)?;
        trace!(pod, volume = %role, ?stats, "Filesystem statistics");
        Ok(stats.to_sample(collected_at))
    }

    /// Execute a command in the postgres container and return stdout
    async fn exec_command(&self, pod: &str, command: Vec<String>) -> Result<String> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &self.namespace);
        let attach_params = AttachParams {
            container: Some(POSTGRES_CONTAINER.to_string()),
            stdin: false,
            stdout: true,
            stderr: true,
            tty: false,
            ..Default::default()
        };

        let mut attached = pods.exec(pod, command, &attach_params).await?;
        let exec_failed = |message: String| CollectionError::ExecFailed {
            pod: pod.to_string(),
            message,
        };

        let mut stdout_reader = attached
            .stdout()
            .ok_or_else(|| exec_failed("no stdout available".to_string()))?;
        let mut stderr_reader = attached
            .stderr()
            .ok_or_else(|| exec_failed("no stderr available".to_string()))?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let (out, err) = tokio::join!(
            stdout_reader.read_to_end(&mut stdout),
            stderr_reader.read_to_end(&mut stderr)
        );
        out.map_err(|e| exec_failed(format!("failed to read stdout: {}", e)))?;
        err.map_err(|e| exec_failed(format!("failed to read stderr: {}", e)))?;

        let stderr = String::from_utf8_lossy(&stderr).trim().to_string();
        if let Some(status_channel) = attached.take_status()
            && let Some(result) = status_channel.await
            && let Some(status) = result.status
            && status != "Success"
        {
            debug!(pod, status = %status, stderr = %stderr, "Command exited with non-success status");
            if let Some(path) = stderr.strip_prefix(NOT_MOUNTED_MARKER) {
                return Err(CollectionError::NotMounted(path.trim().to_string()));
            }
            return Err(exec_failed(if stderr.is_empty() {
                result.message.unwrap_or(status)
            } else {
                stderr
            }));
        }

        String::from_utf8(stdout).map_err(|e| exec_failed(format!("invalid UTF-8 output: {}", e)))
    }
}
