//! Integration tests for the cluster orchestration pipeline.
//!
//! These exercise the flow from provisioning-tool output through inventory
//! generation and the status pipeline, with deterministic probe stubs in
//! place of live ssh/kubectl subprocesses.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use cpc::bootstrap::verify_not_already_initialized;
use cpc::cache::{check_freshness, CacheStore, Freshness};
use cpc::context::{ContextStore, Workspace};
use cpc::infra::parse_cluster_summary;
use cpc::inventory::generate_inventory;
use cpc::runner::ClusterProbe;
use cpc::status::{status_from_nodes, K8sHealth};
use cpc::{CpcError, NodeRole};

const TWO_NODE_OUTPUT: &str = r#"{
    "cluster_summary": {
        "value": {
            "cp-1": {"IP": "10.0.1.10", "hostname": "cp-1", "role": "control-plane", "VM_ID": 500},
            "w-1": {"IP": "10.0.1.11", "hostname": "w-1", "role": "worker", "VM_ID": 501}
        }
    }
}"#;

/// Probe stub with scriptable answers and call counting.
struct StubProbe {
    ssh_ok: bool,
    admin_conf: bool,
    k8s_calls: AtomicUsize,
}

impl StubProbe {
    fn new(ssh_ok: bool, admin_conf: bool) -> Self {
        Self {
            ssh_ok,
            admin_conf,
            k8s_calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ClusterProbe for StubProbe {
    async fn ssh_reachable(&self, _ip: &str) -> bool {
        self.ssh_ok
    }

    async fn admin_conf_exists(&self, _ip: &str) -> Result<bool, CpcError> {
        Ok(self.admin_conf)
    }

    async fn k8s_health(&self) -> Result<K8sHealth, CpcError> {
        self.k8s_calls.fetch_add(1, Ordering::SeqCst);
        Ok(K8sHealth {
            api_reachable: true,
            nodes_total: 2,
            nodes_ready: 2,
        })
    }
}

mod scenario_tests {
    use super::*;

    /// The two-node scenario: extraction, inventory, and quick status.
    #[tokio::test]
    async fn test_two_node_cluster_end_to_end() {
        let nodes = parse_cluster_summary(TWO_NODE_OUTPUT).unwrap();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].role, NodeRole::ControlPlane);
        assert_eq!(nodes[1].role, NodeRole::Worker);

        let doc = generate_inventory(&nodes);
        assert_eq!(doc.control_plane.as_ref().unwrap().hosts, vec!["cp-1"]);
        assert_eq!(doc.workers.as_ref().unwrap().hosts, vec!["w-1"]);
        assert_eq!(doc.meta.hostvars.len(), 2);

        let probe = Arc::new(StubProbe::new(true, false));
        let ws = Workspace::new("lab").unwrap();
        let report = status_from_nodes(&ws, true, &nodes, probe.clone()).await;

        assert!(report.infra_ok);
        assert_eq!(report.ssh_results.len(), 2);
        assert_eq!(report.ssh_results[0].ip, "10.0.1.10");
        assert!(report.ssh_results[0].reachable);
        assert_eq!(report.ssh_results[1].ip, "10.0.1.11");
        assert!(report.ssh_results[1].reachable);
        assert!(report.k8s.is_none());

        // Quick mode never touched the Kubernetes probe.
        assert_eq!(probe.k8s_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_full_mode_reaches_kubernetes() {
        let nodes = parse_cluster_summary(TWO_NODE_OUTPUT).unwrap();
        let probe = Arc::new(StubProbe::new(true, false));
        let ws = Workspace::new("lab").unwrap();

        let report = status_from_nodes(&ws, false, &nodes, probe.clone()).await;

        assert_eq!(probe.k8s_calls.load(Ordering::SeqCst), 1);
        let k8s = report.k8s.unwrap();
        assert_eq!(k8s.nodes_ready, 2);
    }

    #[test]
    fn test_re_extraction_is_idempotent() {
        let first = parse_cluster_summary(TWO_NODE_OUTPUT).unwrap();
        let second = parse_cluster_summary(TWO_NODE_OUTPUT).unwrap();
        assert_eq!(first, second);

        let inv_a = serde_json::to_string(&generate_inventory(&first)).unwrap();
        let inv_b = serde_json::to_string(&generate_inventory(&second)).unwrap();
        assert_eq!(inv_a, inv_b);
    }
}

mod bootstrap_gate_tests {
    use super::*;

    #[tokio::test]
    async fn test_initialized_cluster_blocks_without_force() {
        let nodes = parse_cluster_summary(TWO_NODE_OUTPUT).unwrap();
        let probe = StubProbe::new(true, true);

        let err = verify_not_already_initialized(&nodes, false, &probe)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("--force"));
    }

    #[tokio::test]
    async fn test_initialized_cluster_proceeds_with_force() {
        let nodes = parse_cluster_summary(TWO_NODE_OUTPUT).unwrap();
        let probe = StubProbe::new(true, true);

        verify_not_already_initialized(&nodes, true, &probe)
            .await
            .unwrap();
    }
}

mod cache_workflow_tests {
    use super::*;

    #[test]
    fn test_workspace_switch_invalidates_cached_reports() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheStore::new(dir.path());

        let report_cache = cache.path("status_quick", "lab");
        cache.write(&report_cache, "{}").unwrap();
        assert!(report_cache.exists());

        let store = ContextStore::new(dir.path().join("context"));
        store
            .set_context(&Workspace::new("other").unwrap(), &cache)
            .unwrap();

        assert!(!report_cache.exists());
    }

    #[test]
    fn test_freshness_tracks_source_rewrites() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheStore::new(dir.path());
        let source = dir.path().join("secrets.sops.yaml");
        let cache_file = cache.path("secrets", "lab");

        std::fs::write(&source, "v1").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));
        cache.write(&cache_file, "decrypted v1").unwrap();
        assert_eq!(check_freshness(&cache_file, &source), Freshness::Fresh);

        // Editing the encrypted source makes the cached plaintext stale.
        std::thread::sleep(std::time::Duration::from_millis(1100));
        std::fs::write(&source, "v2").unwrap();
        assert_eq!(check_freshness(&cache_file, &source), Freshness::Stale);
    }
}
