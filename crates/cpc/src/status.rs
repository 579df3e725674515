//! Staged cluster status pipeline.
//!
//! Three stages: infrastructure extraction, SSH reachability per node, and a
//! Kubernetes API health query. Quick mode skips the third stage so an
//! operator gets a near-instant infra/SSH signal without paying the API
//! latency. The aggregate report is cached per `(workspace, mode)` with a
//! short TTL so polling is cheap.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::cache::CacheStore;
use crate::context::Workspace;
use crate::error::{CpcError, Result};
use crate::infra::{self, Node};
use crate::resilience::{with_retry, RetryConfig};
use crate::runner::ClusterProbe;

/// How long a cached status report stays live.
pub const STATUS_CACHE_TTL: Duration = Duration::from_secs(300);

/// Per-node SSH reachability result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshResult {
    /// Node IP address.
    pub ip: String,
    /// Node hostname.
    pub hostname: String,
    /// Whether a bounded SSH round-trip succeeded.
    pub reachable: bool,
}

/// Kubernetes API health summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct K8sHealth {
    /// Whether the API answered at all.
    pub api_reachable: bool,
    /// Nodes known to the API.
    pub nodes_total: usize,
    /// Nodes reporting Ready.
    pub nodes_ready: usize,
}

/// Aggregated cluster status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReport {
    /// Workspace the report describes.
    pub workspace: String,
    /// Whether the Kubernetes stage was skipped.
    pub quick: bool,
    /// Whether infrastructure extraction succeeded.
    pub infra_ok: bool,
    /// Per-node SSH results, in node-table order.
    pub ssh_results: Vec<SshResult>,
    /// Kubernetes health; `None` in quick mode or when infra failed.
    pub k8s: Option<K8sHealth>,
    /// When the report was produced.
    pub timestamp: DateTime<Utc>,
}

impl StatusReport {
    fn infra_unreachable(workspace: &Workspace, quick: bool) -> Self {
        Self {
            workspace: workspace.name().to_string(),
            quick,
            infra_ok: false,
            ssh_results: Vec::new(),
            k8s: None,
            timestamp: Utc::now(),
        }
    }
}

/// Run the SSH and Kubernetes stages over an already-extracted node table.
///
/// SSH probes have no data dependency on one another and run concurrently;
/// results are re-ordered to match the node table so the report is stable.
pub async fn status_from_nodes(
    workspace: &Workspace,
    quick: bool,
    nodes: &[Node],
    probe: Arc<dyn ClusterProbe>,
) -> StatusReport {
    let mut set = JoinSet::new();
    for (idx, node) in nodes.iter().enumerate() {
        let probe = Arc::clone(&probe);
        let ip = node.ip.clone();
        set.spawn(async move { (idx, probe.ssh_reachable(&ip).await) });
    }

    let mut reachable = vec![false; nodes.len()];
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((idx, ok)) => reachable[idx] = ok,
            Err(e) => warn!("SSH probe task failed: {e}"),
        }
    }

    let ssh_results = nodes
        .iter()
        .zip(reachable)
        .map(|(node, ok)| SshResult {
            ip: node.ip.clone(),
            hostname: node.hostname.clone(),
            reachable: ok,
        })
        .collect();

    let k8s = if quick {
        None
    } else {
        Some(match probe.k8s_health().await {
            Ok(health) => health,
            Err(e) => {
                warn!("Kubernetes health check failed: {e}");
                K8sHealth {
                    api_reachable: false,
                    nodes_total: 0,
                    nodes_ready: 0,
                }
            }
        })
    };

    StatusReport {
        workspace: workspace.name().to_string(),
        quick,
        infra_ok: true,
        ssh_results,
        k8s,
        timestamp: Utc::now(),
    }
}

/// Full status pipeline with result caching.
///
/// A live cached report is served as-is. Infrastructure extraction failure
/// short-circuits to an `infra_ok = false` report, which is not cached so the
/// next invocation re-probes.
///
/// # Errors
/// Returns an error only when writing the cache entry fails; probe failures
/// degrade the report instead of aborting it.
pub async fn check_cluster_status(
    workspace: &Workspace,
    infra_dir: &Path,
    quick: bool,
    probe: Arc<dyn ClusterProbe>,
    cache: &CacheStore,
) -> Result<StatusReport> {
    let mode = if quick { "status_quick" } else { "status_full" };
    let cache_file = cache.path(mode, workspace.name());

    if cache.entry_live(&cache_file, STATUS_CACHE_TTL) {
        match cache
            .read(&cache_file)
            .and_then(|payload| {
                serde_json::from_str::<StatusReport>(&payload)
                    .map_err(|e| CpcError::CacheInconsistency(e.to_string()))
            }) {
            Ok(report) => {
                debug!("Status served from cache for '{workspace}'");
                return Ok(report);
            }
            Err(e) => debug!("Status cache unusable ({e}), re-probing"),
        }
    }

    // `tofu output` is read-only and idempotent, one of the few collaborator
    // calls that is safe to retry blindly.
    let retry = RetryConfig {
        max_attempts: 2,
        initial_delay: Duration::from_secs(2),
        ..RetryConfig::default()
    };
    let nodes = match with_retry(&retry, "infrastructure extraction", || {
        Ok(infra::extract_cluster_infra(infra_dir)?)
    }) {
        Ok(nodes) => nodes,
        Err(e) => {
            warn!("Infrastructure unreachable: {e:#}");
            return Ok(StatusReport::infra_unreachable(workspace, quick));
        }
    };

    let report = status_from_nodes(workspace, quick, &nodes, probe).await;

    let payload = serde_json::to_string(&report)
        .map_err(|e| CpcError::CacheInconsistency(e.to_string()))?;
    cache.write(&cache_file, &payload)?;

    Ok(report)
}
