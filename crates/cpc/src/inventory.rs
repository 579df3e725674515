//! Playbook-runner inventory generation.
//!
//! Converts a node table into the dynamic-inventory JSON shape ansible
//! expects: role groups plus a `_meta.hostvars` map keyed by hostname.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;
use crate::infra::{Node, NodeRole};

/// A group of hosts in the inventory.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct HostGroup {
    /// Hostnames belonging to the group.
    pub hosts: Vec<String>,
}

/// Per-host variables under `_meta.hostvars`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HostVars {
    /// Address ansible connects to.
    pub ansible_host: String,
}

/// Host metadata section.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Meta {
    /// Variables per hostname.
    pub hostvars: BTreeMap<String, HostVars>,
}

/// An ansible-compatible inventory document grouped by role.
///
/// Only non-empty groups are emitted.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct InventoryDocument {
    /// Control-plane hosts, omitted when empty.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub control_plane: Option<HostGroup>,
    /// Worker hosts, omitted when empty.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workers: Option<HostGroup>,
    /// Host metadata.
    #[serde(rename = "_meta")]
    pub meta: Meta,
}

/// Group a node table into an inventory document.
///
/// Nodes whose role cannot be determined have already been defaulted to
/// worker by the extractor.
#[must_use]
pub fn generate_inventory(nodes: &[Node]) -> InventoryDocument {
    let mut control_plane = HostGroup::default();
    let mut workers = HostGroup::default();
    let mut meta = Meta::default();

    for node in nodes {
        match node.role {
            NodeRole::ControlPlane => control_plane.hosts.push(node.hostname.clone()),
            NodeRole::Worker => workers.hosts.push(node.hostname.clone()),
        }
        meta.hostvars.insert(
            node.hostname.clone(),
            HostVars {
                ansible_host: node.ip.clone(),
            },
        );
    }

    InventoryDocument {
        control_plane: (!control_plane.hosts.is_empty()).then_some(control_plane),
        workers: (!workers.hosts.is_empty()).then_some(workers),
        meta,
    }
}

/// Serialize an inventory to a uniquely named temp file.
///
/// The caller owns cleanup: deletion is best-effort on exit, and a skipped
/// delete is not a leak because temp directory hygiene belongs to the OS.
///
/// # Errors
/// Returns an error if the file cannot be created or written.
pub fn write_inventory(doc: &InventoryDocument) -> Result<PathBuf> {
    let json = serde_json::to_string_pretty(doc)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

    let file = tempfile::Builder::new()
        .prefix("cpc_inventory_")
        .suffix(".json")
        .tempfile()?;
    std::fs::write(file.path(), json)?;

    // keep() detaches the file from the guard so the playbook run can use it
    let (_, path) = file.keep().map_err(|e| e.error)?;
    debug!("Inventory written to {}", path.display());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(name: &str, ip: &str, hostname: &str, role: NodeRole) -> Node {
        Node {
            name: name.to_string(),
            ip: ip.to_string(),
            hostname: hostname.to_string(),
            role,
            vm_id: None,
        }
    }

    #[test]
    fn test_round_trip_one_cp_two_workers() {
        let nodes = vec![
            node("controlplane-01", "10.0.1.10", "cp-1.lab", NodeRole::ControlPlane),
            node("worker-01", "10.0.1.11", "w-1.lab", NodeRole::Worker),
            node("worker-02", "10.0.1.12", "w-2.lab", NodeRole::Worker),
        ];

        let doc = generate_inventory(&nodes);

        assert_eq!(doc.control_plane.as_ref().unwrap().hosts.len(), 1);
        assert_eq!(doc.workers.as_ref().unwrap().hosts.len(), 2);
        assert_eq!(doc.meta.hostvars.len(), 3);
        for vars in doc.meta.hostvars.values() {
            assert!(!vars.ansible_host.is_empty());
        }
    }

    #[test]
    fn test_empty_groups_are_omitted() {
        let nodes = vec![node("worker-01", "10.0.1.11", "w-1.lab", NodeRole::Worker)];
        let doc = generate_inventory(&nodes);

        assert!(doc.control_plane.is_none());
        let json = serde_json::to_string(&doc).unwrap();
        assert!(!json.contains("control_plane"));
        assert!(json.contains("workers"));
    }

    #[test]
    fn test_hostvars_keyed_by_hostname() {
        let nodes = vec![node("controlplane-01", "10.0.1.10", "cp-1.lab", NodeRole::ControlPlane)];
        let doc = generate_inventory(&nodes);
        assert_eq!(
            doc.meta.hostvars.get("cp-1.lab").unwrap().ansible_host,
            "10.0.1.10"
        );
    }

    #[test]
    fn test_write_inventory_emits_parseable_json() {
        let nodes = vec![
            node("controlplane-01", "10.0.1.10", "cp-1.lab", NodeRole::ControlPlane),
            node("worker-01", "10.0.1.11", "w-1.lab", NodeRole::Worker),
        ];
        let doc = generate_inventory(&nodes);

        let path = write_inventory(&doc).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        let parsed: InventoryDocument = serde_json::from_str(&content).unwrap();
        assert_eq!(parsed, doc);

        let _ = std::fs::remove_file(&path);
    }
}
