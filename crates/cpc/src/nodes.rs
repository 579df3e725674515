//! Node lifecycle commands.
//!
//! Every operation follows the same template: validate the target argument
//! locally, resolve the target's hostname from the extracted node table, run
//! an operation-specific pre-check, then delegate to the playbook runner with
//! the operation name and resolved hostname as extra variables.

use std::sync::OnceLock;

use regex::Regex;
use strum::{Display, EnumString};
use tracing::info;

use crate::error::{CpcError, Result};
use crate::infra::{resolve_hostname, Node};
use crate::inventory;
use crate::runner::ansible_playbook;

/// Supported node lifecycle operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum NodeOperation {
    /// Join a new node to the cluster.
    Add,
    /// Remove a node from the cluster.
    Remove,
    /// Drain workloads off a node.
    Drain,
    /// Mark a drained node schedulable again.
    Uncordon,
    /// Upgrade the Kubernetes components on a node.
    Upgrade,
    /// Reset a node back to a pre-join state.
    Reset,
}

impl NodeOperation {
    /// The playbook implementing this operation.
    #[must_use]
    pub fn playbook(self) -> &'static str {
        match self {
            Self::Add => "pb_add_nodes.yml",
            Self::Remove => "pb_delete_node.yml",
            Self::Drain => "pb_drain_node.yml",
            Self::Uncordon => "pb_uncordon_node.yml",
            Self::Upgrade => "pb_upgrade_node.yml",
            Self::Reset => "pb_reset_node.yml",
        }
    }

    /// Operation-specific validation before the playbook runs.
    ///
    /// An extension point: currently a no-op for every operation.
    ///
    /// # Errors
    /// None today; kept fallible so future pre-checks slot in without
    /// changing call sites.
    pub fn pre_check(self, _args: &NodeOpArgs) -> Result<()> {
        Ok(())
    }
}

/// Node type accepted by `--node-type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display)]
#[strum(serialize_all = "kebab-case")]
pub enum NodeType {
    /// Worker node (the default).
    #[default]
    Worker,
    /// Control-plane node.
    ControlPlane,
}

/// Validated arguments for a node operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeOpArgs {
    /// Target node IP.
    pub target_ip: String,
    /// Target node type.
    pub node_type: NodeType,
}

fn dotted_quad() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}$").expect("static regex"))
}

/// Syntax-only dotted-quad check.
///
/// Out-of-range octets (e.g. `256.1.1.1`) are accepted on purpose: this
/// mirrors the long-standing observed behavior, which may amount to
/// accepting arbitrary numeric host identifiers. Only malformed syntax is
/// rejected.
#[must_use]
pub fn is_valid_ip_syntax(candidate: &str) -> bool {
    dotted_quad().is_match(candidate)
}

impl NodeOpArgs {
    /// Validate `--target-hosts` and `--node-type` values.
    ///
    /// # Errors
    /// Returns a validation error with the exact user-facing message for a
    /// missing target, malformed IP syntax, or unknown node type.
    pub fn parse(target_hosts: Option<&str>, node_type: Option<&str>) -> Result<Self> {
        let Some(target_ip) = target_hosts else {
            return Err(CpcError::Validation(
                "Missing required argument: --target-hosts".to_string(),
            ));
        };

        if !is_valid_ip_syntax(target_ip) {
            return Err(CpcError::Validation(format!(
                "Invalid IP address format: {target_ip}"
            )));
        }

        let node_type = match node_type {
            None => NodeType::Worker,
            Some("worker") => NodeType::Worker,
            Some("control-plane") => NodeType::ControlPlane,
            Some(other) => {
                return Err(CpcError::Validation(format!(
                    "Invalid node type '{other}': expected worker or control-plane"
                )))
            }
        };

        Ok(Self {
            target_ip: target_ip.to_string(),
            node_type,
        })
    }
}

/// Execute a node operation against the cluster.
///
/// # Errors
/// Returns a missing-data error when the target IP is not in the node table,
/// or an external-tool error from the playbook run.
pub fn run_node_operation(
    op: NodeOperation,
    args: &NodeOpArgs,
    nodes: &[Node],
    ssh_user: Option<&str>,
) -> Result<()> {
    let hostname = resolve_hostname(nodes, &args.target_ip)?.to_string();
    op.pre_check(args)?;

    let doc = inventory::generate_inventory(nodes);
    let inventory_path = inventory::write_inventory(&doc)?;

    info!(
        "Running node operation '{op}' on {hostname} ({})",
        args.target_ip
    );
    let operation = op.to_string();
    let node_type = args.node_type.to_string();
    let mut extra_vars = vec![
        ("node_operation", operation.as_str()),
        ("target_node", hostname.as_str()),
        ("node_type", node_type.as_str()),
    ];
    if let Some(user) = ssh_user {
        extra_vars.push(("ansible_user", user));
    }
    let result = ansible_playbook(op.playbook(), &inventory_path, &extra_vars);

    let _ = std::fs::remove_file(&inventory_path);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_missing_target_hosts_message() {
        let err = NodeOpArgs::parse(None, None).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Missing required argument: --target-hosts"
        );
    }

    #[test]
    fn test_invalid_ip_message() {
        let err = NodeOpArgs::parse(Some("not.an.ip"), None).unwrap_err();
        assert!(err.to_string().contains("Invalid IP address format"));
    }

    #[test]
    fn test_node_type_defaults_to_worker() {
        let args = NodeOpArgs::parse(Some("192.168.1.100"), None).unwrap();
        assert_eq!(args.node_type, NodeType::Worker);
        assert_eq!(args.target_ip, "192.168.1.100");
    }

    #[test]
    fn test_node_type_control_plane() {
        let args = NodeOpArgs::parse(Some("192.168.1.100"), Some("control-plane")).unwrap();
        assert_eq!(args.node_type, NodeType::ControlPlane);
    }

    #[test]
    fn test_unknown_node_type_rejected() {
        let err = NodeOpArgs::parse(Some("192.168.1.100"), Some("storage")).unwrap_err();
        assert!(err.to_string().contains("storage"));
    }

    #[test]
    fn test_ip_syntax_is_deliberately_loose() {
        // Out-of-range octets pass the syntax-only check.
        assert!(is_valid_ip_syntax("256.1.1.1"));
        assert!(is_valid_ip_syntax("999.999.999.999"));
        assert!(is_valid_ip_syntax("10.0.1.10"));

        assert!(!is_valid_ip_syntax("invalid.ip"));
        assert!(!is_valid_ip_syntax("10.0.1"));
        assert!(!is_valid_ip_syntax("10.0.1.10.5"));
        assert!(!is_valid_ip_syntax("10.0.1.1000"));
        assert!(!is_valid_ip_syntax(""));
    }

    #[test]
    fn test_operation_parsing_is_closed() {
        assert_eq!(NodeOperation::from_str("drain").unwrap(), NodeOperation::Drain);
        assert!(NodeOperation::from_str("prepare").is_err());
    }

    #[test]
    fn test_playbook_mapping() {
        assert_eq!(NodeOperation::Add.playbook(), "pb_add_nodes.yml");
        assert_eq!(NodeOperation::Reset.playbook(), "pb_reset_node.yml");
    }
}
