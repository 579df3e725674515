//! cpc CLI - cluster provisioning control.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use cpc::bootstrap::{run_bootstrap, BootstrapOptions};
use cpc::cache::CacheStore;
use cpc::context::{ContextStore, Workspace};
use cpc::infra;
use cpc::nodes::{run_node_operation, NodeOpArgs, NodeOperation};
use cpc::resilience::CheckpointLog;
use cpc::runner::LiveProbe;
use cpc::secrets;
use cpc::status::{check_cluster_status, StatusReport};

/// cpc - lifecycle orchestrator for self-hosted Kubernetes clusters.
#[derive(Parser)]
#[command(name = "cpc")]
#[command(about = "Bootstrap, inspect, and operate self-hosted Kubernetes clusters")]
struct Cli {
    /// Root of the workspace tree (or set `CPC_HOME`).
    #[arg(long, env = "CPC_HOME", default_value = ".")]
    home: PathBuf,

    /// Directory for cache files (or set `CPC_CACHE_DIR`).
    #[arg(long, env = "CPC_CACHE_DIR")]
    cache_dir: Option<PathBuf>,

    /// Enable verbose logging.
    #[arg(short, long, default_value = "false")]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show or select the current workspace.
    Ctx {
        /// Workspace name to select; omit to show the current one.
        name: Option<String>,
    },

    /// Destroy a workspace's provisioned infrastructure and forget it.
    DeleteWorkspace {
        /// Workspace to destroy.
        name: String,

        /// Confirm destruction without prompting.
        #[arg(long, default_value = "false")]
        yes: bool,
    },

    /// Bootstrap a cluster on provisioned infrastructure.
    Bootstrap {
        /// Skip the already-initialized check.
        #[arg(long, default_value = "false")]
        skip_check: bool,

        /// Proceed even if the cluster looks initialized.
        #[arg(long, default_value = "false")]
        force: bool,
    },

    /// Check cluster health (infrastructure, SSH, Kubernetes API).
    Status {
        /// Skip the Kubernetes API stage for a near-instant answer.
        #[arg(long, default_value = "false")]
        quick: bool,
    },

    /// Join a new node to the cluster.
    Add(NodeTarget),
    /// Remove a node from the cluster.
    Remove(NodeTarget),
    /// Drain workloads off a node.
    Drain(NodeTarget),
    /// Mark a drained node schedulable again.
    Uncordon(NodeTarget),
    /// Upgrade Kubernetes components on a node.
    Upgrade(NodeTarget),
    /// Reset a node back to a pre-join state.
    Reset(NodeTarget),
}

/// Target arguments shared by every node lifecycle command.
#[derive(clap::Args)]
struct NodeTarget {
    /// Target node IP address.
    #[arg(long)]
    target_hosts: Option<String>,

    /// Node type: worker or control-plane.
    #[arg(long)]
    node_type: Option<String>,
}

/// Filesystem layout rooted at `--home`.
struct Layout {
    home: PathBuf,
    cache: CacheStore,
}

impl Layout {
    fn new(home: PathBuf, cache_dir: Option<PathBuf>) -> Self {
        let cache = match cache_dir {
            Some(dir) => CacheStore::new(dir),
            None => CacheStore::system(),
        };
        Self { home, cache }
    }

    fn context_store(&self) -> ContextStore {
        ContextStore::new(self.home.join("context"))
    }

    fn workspace_dir(&self, ws: &Workspace) -> PathBuf {
        self.home.join("workspaces").join(ws.name())
    }

    fn infra_dir(&self, ws: &Workspace) -> PathBuf {
        self.workspace_dir(ws).join("terraform")
    }

    fn secrets_file(&self, ws: &Workspace) -> PathBuf {
        self.workspace_dir(ws).join("secrets.sops.yaml")
    }

    /// Diagnostic state (recovery checkpoints) lives under `--home`, away
    /// from the cache directory and its invalidation sweeps.
    fn state_dir(&self) -> PathBuf {
        self.home.join(".cpc")
    }

    fn current_workspace(&self) -> Result<Workspace> {
        self.context_store()
            .current()?
            .context("No workspace selected. Run 'cpc ctx <name>' first.")
    }
}

fn main() -> ExitCode {
    // Validation failures exit 1, not clap's default 2; help and version
    // remain exit 0.
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let layout = Layout::new(cli.home.clone(), cli.cache_dir.clone());

    match run(cli, &layout) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

#[tokio::main]
async fn run(cli: Cli, layout: &Layout) -> Result<()> {
    match cli.command {
        Commands::Ctx { name } => cmd_ctx(layout, name.as_deref()),
        Commands::DeleteWorkspace { name, yes } => cmd_delete_workspace(layout, &name, yes),
        Commands::Bootstrap { skip_check, force } => {
            cmd_bootstrap(layout, skip_check, force).await
        }
        Commands::Status { quick } => cmd_status(layout, quick).await,
        Commands::Add(t) => cmd_node(layout, NodeOperation::Add, &t),
        Commands::Remove(t) => cmd_node(layout, NodeOperation::Remove, &t),
        Commands::Drain(t) => cmd_node(layout, NodeOperation::Drain, &t),
        Commands::Uncordon(t) => cmd_node(layout, NodeOperation::Uncordon, &t),
        Commands::Upgrade(t) => cmd_node(layout, NodeOperation::Upgrade, &t),
        Commands::Reset(t) => cmd_node(layout, NodeOperation::Reset, &t),
    }
}

fn cmd_ctx(layout: &Layout, name: Option<&str>) -> Result<()> {
    let store = layout.context_store();
    match name {
        None => match store.current()? {
            Some(ws) => println!("{ws}"),
            None => println!("No workspace selected"),
        },
        Some(name) => {
            let ws = Workspace::new(name)?;
            store.set_context(&ws, &layout.cache)?;
            println!("✅ Context set to '{ws}'");
        }
    }
    Ok(())
}

fn cmd_delete_workspace(layout: &Layout, name: &str, yes: bool) -> Result<()> {
    let ws = Workspace::new(name)?;
    if !yes {
        bail!("Refusing to destroy workspace '{ws}' without --yes");
    }

    infra::destroy_cluster_infra(&layout.infra_dir(&ws))?;
    layout.cache.clear_all();

    // Drop the context selection if it pointed at the destroyed workspace.
    let store = layout.context_store();
    if store.current()?.as_ref() == Some(&ws) {
        let _ = std::fs::remove_file(layout.home.join("context"));
    }

    println!("✅ Workspace '{ws}' destroyed");
    Ok(())
}

async fn cmd_bootstrap(layout: &Layout, skip_check: bool, force: bool) -> Result<()> {
    let ws = layout.current_workspace()?;

    // Fails fast when a required credential is absent, before any
    // infrastructure call happens.
    let secrets = secrets::load_secrets_cached(&ws, &layout.secrets_file(&ws), &layout.cache)?;
    info!("Secrets validated for workspace '{ws}'");

    let ssh_user = secrets.get("VM_USERNAME").map(str::to_string);
    let probe = match ssh_user.as_deref() {
        Some(user) => LiveProbe::new().with_user(user),
        None => LiveProbe::new(),
    };
    let options = BootstrapOptions {
        skip_check,
        force,
        ssh_user,
    };

    let checkpoints = CheckpointLog::new(&layout.state_dir(), ws.name());
    let inventory_path = run_bootstrap(
        &ws,
        &layout.infra_dir(&ws),
        options,
        &probe,
        &checkpoints,
    )
    .await?;

    let _ = std::fs::remove_file(&inventory_path);
    println!("\n✅ Cluster '{ws}' bootstrapped");
    Ok(())
}

async fn cmd_status(layout: &Layout, quick: bool) -> Result<()> {
    let ws = layout.current_workspace()?;

    // The SSH stage connects as the workspace's VM user when credentials are
    // loadable; otherwise the probes run as the invoking user.
    let probe = match secrets::load_secrets_cached(&ws, &layout.secrets_file(&ws), &layout.cache) {
        Ok(secrets) => match secrets.get("VM_USERNAME") {
            Some(user) => LiveProbe::new().with_user(user),
            None => LiveProbe::new(),
        },
        Err(e) => {
            tracing::warn!("Secrets unavailable ({e}), probing as the invoking user");
            LiveProbe::new()
        }
    };

    let report = check_cluster_status(
        &ws,
        &layout.infra_dir(&ws),
        quick,
        Arc::new(probe),
        &layout.cache,
    )
    .await?;

    print_report(&report);
    if !report.infra_ok {
        bail!("infrastructure unreachable for workspace '{ws}'");
    }
    Ok(())
}

fn print_report(report: &StatusReport) {
    println!("\nCluster status: {}", report.workspace);
    println!("  Generated: {}", report.timestamp.to_rfc3339());
    println!(
        "  Infrastructure: {}",
        if report.infra_ok { "✅ ok" } else { "❌ unreachable" }
    );

    if !report.ssh_results.is_empty() {
        println!("\n  {:<20} {:<16} {}", "HOSTNAME", "IP", "SSH");
        for result in &report.ssh_results {
            println!(
                "  {:<20} {:<16} {}",
                result.hostname,
                result.ip,
                if result.reachable { "✅" } else { "❌" }
            );
        }
    }

    match (&report.k8s, report.quick) {
        (Some(k8s), _) => {
            println!(
                "\n  Kubernetes API: {} ({}/{} nodes Ready)",
                if k8s.api_reachable { "✅ reachable" } else { "❌ unreachable" },
                k8s.nodes_ready,
                k8s.nodes_total
            );
        }
        (None, true) => println!("\n  Kubernetes API: skipped (--quick)"),
        (None, false) => {}
    }
}

fn cmd_node(layout: &Layout, op: NodeOperation, target: &NodeTarget) -> Result<()> {
    let ws = layout.current_workspace()?;
    let args = NodeOpArgs::parse(target.target_hosts.as_deref(), target.node_type.as_deref())?;

    let secrets = secrets::load_secrets_cached(&ws, &layout.secrets_file(&ws), &layout.cache)?;
    let nodes = infra::extract_cluster_infra(&layout.infra_dir(&ws))?;
    run_node_operation(op, &args, &nodes, secrets.get("VM_USERNAME"))?;

    println!("\n✅ Node operation '{op}' completed for {}", args.target_ip);
    Ok(())
}
