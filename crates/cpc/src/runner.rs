//! External tool boundary.
//!
//! Every collaborator (tofu, sops, ansible-playbook, ssh, kubectl) is invoked
//! as a subprocess here. Non-zero exits and unparsable output become
//! [`CpcError::ExternalTool`] with the tool's raw output attached; the raw
//! text is never paraphrased away.
//!
//! Probe-like calls (ssh reachability, Kubernetes health) are bounded by
//! short timeouts; long-running, user-consented actions (playbook runs) are
//! not.

use std::path::Path;
use std::process::Command;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::{CpcError, Result};
use crate::status::K8sHealth;

/// SSH options for probing ephemeral cluster members. Host-key checking is
/// disabled because nodes are routinely destroyed and re-provisioned under
/// the same addresses.
pub const SSH_PROBE_OPTS: &[&str] = &[
    "-o",
    "ConnectTimeout=5",
    "-o",
    "BatchMode=yes",
    "-o",
    "StrictHostKeyChecking=no",
    "-o",
    "UserKnownHostsFile=/dev/null",
];

/// Timeout applied to kubectl health queries.
pub const K8S_PROBE_TIMEOUT: Duration = Duration::from_secs(15);

/// Run a subprocess and return its stdout, mapping failure into the error
/// taxonomy.
///
/// # Errors
/// Returns [`CpcError::ExternalTool`] if the process cannot be spawned or
/// exits non-zero.
pub fn run_checked(tool: &str, cmd: &mut Command, action: &str) -> Result<String> {
    debug!("Running {tool}: {action}");
    let output = cmd.output().map_err(|e| CpcError::ExternalTool {
        tool: tool.to_string(),
        message: format!("failed to spawn for {action}: {e}"),
        output: String::new(),
    })?;

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    if !output.status.success() {
        return Err(CpcError::tool_failure(tool, action, &stderr, &stdout));
    }
    Ok(stdout)
}

/// Check that an external tool resolves on `PATH`.
///
/// A resolvability lookup in the manner of `command -v`: the tool is not
/// executed, because collaborators disagree on version flags (kubectl has no
/// `--version`).
#[must_use]
pub fn tool_available(tool: &str) -> bool {
    std::env::var_os("PATH")
        .map(|path| find_on_path(tool, &path).is_some())
        .unwrap_or(false)
}

fn find_on_path(tool: &str, path: &std::ffi::OsStr) -> Option<std::path::PathBuf> {
    std::env::split_paths(path)
        .map(|dir| dir.join(tool))
        .find(|candidate| is_executable(candidate))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.is_file()
        && std::fs::metadata(path)
            .map(|m| m.permissions().mode() & 0o111 != 0)
            .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Run a playbook against an inventory with `--extra-vars key=value` pairs.
///
/// Stdio is inherited so the operator sees playbook progress; the exit code
/// is the sole success signal. No timeout: playbook runs are long-running,
/// user-consented actions.
///
/// # Errors
/// Returns [`CpcError::ExternalTool`] if ansible-playbook cannot be spawned
/// or exits non-zero.
pub fn ansible_playbook(
    playbook: &str,
    inventory: &Path,
    extra_vars: &[(&str, &str)],
) -> Result<()> {
    let mut cmd = Command::new("ansible-playbook");
    cmd.arg(playbook).arg("-i").arg(inventory);
    for (key, value) in extra_vars {
        cmd.arg("--extra-vars").arg(format!("{key}={value}"));
    }

    info!("Running playbook {playbook} against {}", inventory.display());
    let status = cmd.status().map_err(|e| CpcError::ExternalTool {
        tool: "ansible-playbook".to_string(),
        message: format!("failed to spawn for {playbook}: {e}"),
        output: String::new(),
    })?;

    if !status.success() {
        return Err(CpcError::ExternalTool {
            tool: "ansible-playbook".to_string(),
            message: format!("{playbook} exited with {status}"),
            output: String::from("see playbook output above"),
        });
    }
    Ok(())
}

/// Remote probes used by the status pipeline and the bootstrap gate.
///
/// A trait seam so tests can substitute deterministic probes for live ssh
/// and kubectl subprocesses.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ClusterProbe: Send + Sync {
    /// Whether an SSH round-trip to `ip` succeeds within the probe timeout.
    async fn ssh_reachable(&self, ip: &str) -> bool;

    /// Whether `/etc/kubernetes/admin.conf` exists on the node at `ip`.
    ///
    /// # Errors
    /// Returns an error when the node cannot be reached at all, as distinct
    /// from a clean "file absent" answer.
    async fn admin_conf_exists(&self, ip: &str) -> Result<bool>;

    /// Query the Kubernetes API for overall health and node readiness.
    ///
    /// # Errors
    /// Returns an error when kubectl fails or times out.
    async fn k8s_health(&self) -> Result<K8sHealth>;
}

/// The ssh destination for a node, `user@ip` when a login user is known.
#[must_use]
pub fn ssh_target(user: Option<&str>, ip: &str) -> String {
    match user {
        Some(user) => format!("{user}@{ip}"),
        None => ip.to_string(),
    }
}

/// Live probe implementation backed by ssh and kubectl subprocesses.
#[derive(Debug, Clone, Default)]
pub struct LiveProbe {
    ssh_user: Option<String>,
}

impl LiveProbe {
    /// A probe connecting as the invoking user.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect as the given login user (the workspace's `VM_USERNAME`
    /// credential).
    #[must_use]
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.ssh_user = Some(user.into());
        self
    }
}

#[async_trait]
impl ClusterProbe for LiveProbe {
    async fn ssh_reachable(&self, ip: &str) -> bool {
        tokio::process::Command::new("ssh")
            .args(SSH_PROBE_OPTS)
            .arg(ssh_target(self.ssh_user.as_deref(), ip))
            .arg("true")
            .output()
            .await
            .map(|out| out.status.success())
            .unwrap_or(false)
    }

    async fn admin_conf_exists(&self, ip: &str) -> Result<bool> {
        let output = tokio::process::Command::new("ssh")
            .args(SSH_PROBE_OPTS)
            .arg(ssh_target(self.ssh_user.as_deref(), ip))
            .arg("test -f /etc/kubernetes/admin.conf")
            .output()
            .await
            .map_err(|e| CpcError::ExternalTool {
                tool: "ssh".to_string(),
                message: format!("failed to spawn admin.conf probe for {ip}: {e}"),
                output: String::new(),
            })?;

        match output.status.code() {
            // test(1) semantics over a successful connection
            Some(0) => Ok(true),
            Some(1) => Ok(false),
            _ => Err(CpcError::tool_failure(
                "ssh",
                &format!("admin.conf probe could not reach {ip}"),
                &String::from_utf8_lossy(&output.stderr),
                &String::from_utf8_lossy(&output.stdout),
            )),
        }
    }

    async fn k8s_health(&self) -> Result<K8sHealth> {
        let fut = tokio::process::Command::new("kubectl")
            .args(["get", "nodes", "--no-headers", "--request-timeout=10s"])
            .output();

        let output = tokio::time::timeout(K8S_PROBE_TIMEOUT, fut)
            .await
            .map_err(|_| CpcError::ExternalTool {
                tool: "kubectl".to_string(),
                message: format!(
                    "get nodes timed out after {}s",
                    K8S_PROBE_TIMEOUT.as_secs()
                ),
                output: String::new(),
            })?
            .map_err(|e| CpcError::ExternalTool {
                tool: "kubectl".to_string(),
                message: format!("failed to spawn get nodes: {e}"),
                output: String::new(),
            })?;

        if !output.status.success() {
            return Err(CpcError::tool_failure(
                "kubectl",
                "get nodes",
                &String::from_utf8_lossy(&output.stderr),
                &String::from_utf8_lossy(&output.stdout),
            ));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let total = stdout.lines().filter(|l| !l.trim().is_empty()).count();
        let ready = stdout
            .lines()
            .filter(|l| l.split_whitespace().nth(1) == Some("Ready"))
            .count();

        Ok(K8sHealth {
            api_reachable: true,
            nodes_total: total,
            nodes_ready: ready,
        })
    }
}
