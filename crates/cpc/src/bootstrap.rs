//! First-time cluster bootstrap.
//!
//! Stages run in a fixed order; a recovery checkpoint is recorded after each
//! so a crashed run can report where it stopped. Any stage failure aborts the
//! run with the stage name attached. There is no partial rollback: the
//! infrastructure steps are idempotent and safe to re-run, and resuming from
//! a partial state intentionally requires operator judgment.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use strum::Display;
use tracing::{info, warn};

use crate::context::Workspace;
use crate::infra::{self, Node};
use crate::inventory;
use crate::resilience::CheckpointLog;
use crate::runner::{ansible_playbook, tool_available, ClusterProbe};

/// Playbook that initializes the control plane and joins workers.
pub const BOOTSTRAP_PLAYBOOK: &str = "install_kubernetes_cluster.yml";

/// Ordered bootstrap stages. Argument parsing happens at the CLI boundary
/// before the machine starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum BootstrapStage {
    /// Required external tools are resolvable.
    ValidatePrerequisites,
    /// Node table extracted from the provisioning tool.
    ExtractInfrastructureData,
    /// Inventory written for the playbook runner.
    GenerateInventory,
    /// Advisory check that the cluster is not already initialized.
    VerifyNotAlreadyInitialized,
    /// Playbook execution against the generated inventory.
    ExecuteBootstrapSteps,
}

/// Options recognized by the bootstrap command.
#[derive(Debug, Clone, Default)]
pub struct BootstrapOptions {
    /// Skip the already-initialized check entirely.
    pub skip_check: bool,
    /// Proceed even when the cluster looks initialized.
    pub force: bool,
    /// Login user for the playbook runner (the workspace's `VM_USERNAME`
    /// credential).
    pub ssh_user: Option<String>,
}

/// Ephemeral state threaded through the stage sequence; discarded when the
/// run completes or aborts.
#[derive(Debug, Default)]
pub struct BootstrapRun {
    /// Extracted node table.
    pub nodes: Vec<Node>,
    /// Generated inventory path.
    pub inventory_path: Option<PathBuf>,
}

/// Tools every bootstrap run needs on PATH.
const REQUIRED_TOOLS: &[&str] = &["kubectl", "ansible-playbook", "tofu"];

/// Drive the bootstrap state machine to completion.
///
/// # Errors
/// Returns the failing stage's error, wrapped with the stage name. The gate
/// failure from `verify_not_already_initialized` recommends `--force`.
pub async fn run_bootstrap(
    workspace: &Workspace,
    infra_dir: &Path,
    options: BootstrapOptions,
    probe: &dyn ClusterProbe,
    checkpoints: &CheckpointLog,
) -> Result<PathBuf> {
    if let Some(last) = checkpoints.last().unwrap_or(None) {
        info!("Previous run recorded checkpoint '{last}'; starting a fresh run");
    }
    checkpoints.clear();

    let mut run = BootstrapRun::default();

    stage(checkpoints, BootstrapStage::ValidatePrerequisites, || {
        validate_prerequisites()
    })?;

    stage(checkpoints, BootstrapStage::ExtractInfrastructureData, || {
        run.nodes = infra::extract_cluster_infra(infra_dir)?;
        if run.nodes.is_empty() {
            bail!("provisioning output contains no nodes");
        }
        Ok(())
    })?;

    stage(checkpoints, BootstrapStage::GenerateInventory, || {
        let doc = inventory::generate_inventory(&run.nodes);
        run.inventory_path = Some(inventory::write_inventory(&doc)?);
        Ok(())
    })?;

    if options.skip_check {
        info!("Skipping already-initialized check (--skip-check)");
    } else {
        verify_not_already_initialized(&run.nodes, options.force, probe)
            .await
            .with_context(|| stage_label(BootstrapStage::VerifyNotAlreadyInitialized))?;
        checkpoints.record(&BootstrapStage::VerifyNotAlreadyInitialized.to_string())?;
    }

    let inventory_path = run
        .inventory_path
        .clone()
        .context("inventory stage did not record a path")?;

    stage(checkpoints, BootstrapStage::ExecuteBootstrapSteps, || {
        let mut extra_vars = vec![("cluster_workspace", workspace.name())];
        if let Some(user) = options.ssh_user.as_deref() {
            extra_vars.push(("ansible_user", user));
        }
        ansible_playbook(BOOTSTRAP_PLAYBOOK, &inventory_path, &extra_vars)?;
        Ok(())
    })?;

    info!("✅ Cluster '{workspace}' bootstrapped");
    Ok(inventory_path)
}

fn stage_label(s: BootstrapStage) -> String {
    format!("bootstrap stage '{s}' failed")
}

fn stage<F>(checkpoints: &CheckpointLog, which: BootstrapStage, f: F) -> Result<()>
where
    F: FnOnce() -> Result<()>,
{
    f().with_context(|| stage_label(which))?;
    checkpoints.record(&which.to_string())?;
    Ok(())
}

fn validate_prerequisites() -> Result<()> {
    for tool in REQUIRED_TOOLS {
        if !tool_available(tool) {
            bail!("required tool not available: {tool}");
        }
    }
    Ok(())
}

/// Probe the first control-plane node for an existing admin credential file.
///
/// Advisory, not security-critical: the check can race with a concurrent
/// operator, which is accepted for an interactive tool.
///
/// # Errors
/// Fails when the cluster appears initialized and `force` is not set, when no
/// control-plane node exists, or when the probe itself cannot reach the node.
pub async fn verify_not_already_initialized(
    nodes: &[Node],
    force: bool,
    probe: &dyn ClusterProbe,
) -> Result<()> {
    let Some(cp) = infra::first_control_plane(nodes) else {
        bail!("no control-plane node in provisioning output");
    };

    let initialized = probe
        .admin_conf_exists(&cp.ip)
        .await
        .with_context(|| format!("could not probe {} for admin.conf", cp.ip))?;

    if initialized {
        if force {
            warn!(
                "Cluster on {} appears already initialized; proceeding (--force)",
                cp.ip
            );
        } else {
            bail!(
                "Cluster appears already initialized on {} (/etc/kubernetes/admin.conf exists). \
                 Re-run with --force to bootstrap anyway.",
                cp.ip
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::NodeRole;
    use crate::runner::MockClusterProbe;

    fn cluster() -> Vec<Node> {
        vec![
            Node {
                name: "controlplane-01".into(),
                ip: "10.0.1.10".into(),
                hostname: "cp-1.lab".into(),
                role: NodeRole::ControlPlane,
                vm_id: None,
            },
            Node {
                name: "worker-01".into(),
                ip: "10.0.1.11".into(),
                hostname: "w-1.lab".into(),
                role: NodeRole::Worker,
                vm_id: None,
            },
        ]
    }

    #[tokio::test]
    async fn test_gate_blocks_initialized_cluster() {
        let mut probe = MockClusterProbe::new();
        probe
            .expect_admin_conf_exists()
            .returning(|_| Ok(true));

        let err = verify_not_already_initialized(&cluster(), false, &probe)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("--force"));
    }

    #[tokio::test]
    async fn test_gate_passes_with_force() {
        let mut probe = MockClusterProbe::new();
        probe
            .expect_admin_conf_exists()
            .returning(|_| Ok(true));

        verify_not_already_initialized(&cluster(), true, &probe)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_gate_passes_uninitialized() {
        let mut probe = MockClusterProbe::new();
        probe
            .expect_admin_conf_exists()
            .withf(|ip| ip == "10.0.1.10")
            .returning(|_| Ok(false));

        verify_not_already_initialized(&cluster(), false, &probe)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_gate_requires_control_plane_node() {
        let probe = MockClusterProbe::new();
        let workers = vec![cluster().remove(1)];
        let err = verify_not_already_initialized(&workers, false, &probe)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no control-plane node"));
    }

    #[test]
    fn test_stage_names_are_snake_case() {
        assert_eq!(
            BootstrapStage::ExtractInfrastructureData.to_string(),
            "extract_infrastructure_data"
        );
        assert_eq!(
            BootstrapStage::VerifyNotAlreadyInitialized.to_string(),
            "verify_not_already_initialized"
        );
    }
}
