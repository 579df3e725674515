//! Infrastructure data extraction.
//!
//! The provisioning tool's JSON output is the only source of truth for the
//! node set: the node table is a transient projection rebuilt per invocation,
//! never persisted beyond the current process except inside a cache entry.

use std::collections::BTreeMap;
use std::path::Path;
use std::process::Command;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CpcError, Result};
use crate::runner::run_checked;

/// Role of a node within the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeRole {
    /// Runs the Kubernetes control plane.
    ControlPlane,
    /// Runs workloads.
    Worker,
}

impl NodeRole {
    /// Parse a role string, or infer one from the node's logical name when
    /// the provisioning output omits the field.
    #[must_use]
    pub fn parse_or_infer(role: Option<&str>, node_name: &str) -> Self {
        match role {
            Some("control-plane" | "controlplane") => Self::ControlPlane,
            Some(_) => Self::Worker,
            None if node_name.contains("controlplane") => Self::ControlPlane,
            None => Self::Worker,
        }
    }
}

impl std::fmt::Display for NodeRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ControlPlane => f.write_str("control-plane"),
            Self::Worker => f.write_str("worker"),
        }
    }
}

/// A deployed node as reported by the provisioning tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Logical name from the provisioning output.
    pub name: String,
    /// Node IP address.
    pub ip: String,
    /// Node hostname.
    pub hostname: String,
    /// Cluster role.
    pub role: NodeRole,
    /// Virtual machine identifier.
    pub vm_id: Option<String>,
}

/// Raw per-node entry inside `cluster_summary.value`.
#[derive(Debug, Deserialize)]
struct RawNode {
    #[serde(rename = "IP")]
    ip: String,
    hostname: String,
    role: Option<String>,
    #[serde(rename = "VM_ID")]
    vm_id: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct RawSummary {
    // BTreeMap fixes iteration order, so repeated extraction over unchanged
    // tool output yields an identical node table.
    value: BTreeMap<String, RawNode>,
}

/// Parse the provisioning tool's JSON output into a node table.
///
/// Expects a top-level object with `cluster_summary.value` mapping node names
/// to `{IP, hostname, role?, VM_ID}`. The result is sorted by node name.
///
/// # Errors
/// Returns [`CpcError::ExternalTool`] for malformed JSON and
/// [`CpcError::MissingData`] when `cluster_summary` is absent; both attach
/// the raw output.
pub fn parse_cluster_summary(raw: &str) -> Result<Vec<Node>> {
    let top: serde_json::Value = serde_json::from_str(raw).map_err(|e| {
        CpcError::tool_failure("tofu", &format!("output is not valid JSON: {e}"), "", raw)
    })?;

    let Some(summary) = top.get("cluster_summary") else {
        return Err(CpcError::MissingData(format!(
            "cluster_summary not present in provisioning output:\n{raw}"
        )));
    };

    let summary: RawSummary = serde_json::from_value(summary.clone()).map_err(|e| {
        CpcError::tool_failure(
            "tofu",
            &format!("cluster_summary has unexpected shape: {e}"),
            "",
            raw,
        )
    })?;

    let nodes = summary
        .value
        .into_iter()
        .map(|(name, raw_node)| {
            let role = NodeRole::parse_or_infer(raw_node.role.as_deref(), &name);
            Node {
                role,
                ip: raw_node.ip,
                hostname: raw_node.hostname,
                // VM_ID arrives as a number from some module versions
                vm_id: raw_node.vm_id.map(|v| match v {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                }),
                name,
            }
        })
        .collect();

    Ok(nodes)
}

/// Run the provisioning tool in the workspace's infra directory and extract
/// the node table.
///
/// # Errors
/// Returns [`CpcError::ExternalTool`] if the subprocess exits non-zero or the
/// output cannot be parsed, with the raw tool output attached.
pub fn extract_cluster_infra(infra_dir: &Path) -> Result<Vec<Node>> {
    let raw = run_checked(
        "tofu",
        Command::new("tofu")
            .args(["output", "-json"])
            .current_dir(infra_dir),
        "output -json",
    )?;

    let nodes = parse_cluster_summary(&raw)?;
    debug!("Extracted {} nodes from {}", nodes.len(), infra_dir.display());
    Ok(nodes)
}

/// Tear down a workspace's provisioned infrastructure.
///
/// Stdio is inherited so the operator watches the destroy plan execute. No
/// timeout: this is a long-running, user-consented action.
///
/// # Errors
/// Returns [`CpcError::ExternalTool`] if the subprocess cannot be spawned or
/// exits non-zero.
pub fn destroy_cluster_infra(infra_dir: &Path) -> Result<()> {
    let status = Command::new("tofu")
        .args(["destroy", "-auto-approve"])
        .current_dir(infra_dir)
        .status()
        .map_err(|e| CpcError::ExternalTool {
            tool: "tofu".to_string(),
            message: format!("failed to spawn destroy: {e}"),
            output: String::new(),
        })?;

    if !status.success() {
        return Err(CpcError::ExternalTool {
            tool: "tofu".to_string(),
            message: format!("destroy exited with {status}"),
            output: String::from("see destroy output above"),
        });
    }
    Ok(())
}

/// Look up a node's hostname by IP over an already-extracted table.
///
/// # Errors
/// Returns [`CpcError::MissingData`] when no node matches.
pub fn resolve_hostname<'a>(nodes: &'a [Node], ip: &str) -> Result<&'a str> {
    nodes
        .iter()
        .find(|n| n.ip == ip)
        .map(|n| n.hostname.as_str())
        .ok_or_else(|| CpcError::MissingData(format!("no node with IP {ip} in cluster summary")))
}

/// The first control-plane node of a table, the bootstrap target.
#[must_use]
pub fn first_control_plane(nodes: &[Node]) -> Option<&Node> {
    nodes.iter().find(|n| n.role == NodeRole::ControlPlane)
}
