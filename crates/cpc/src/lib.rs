//! Cluster lifecycle orchestration for self-hosted Kubernetes on virtualized nodes.
//!
//! This crate drives external tools (OpenTofu, ansible-playbook, sops, ssh,
//! kubectl) through staged workflows: bootstrapping a cluster from provisioned
//! infrastructure, running health checks with result caching, and node-level
//! lifecycle operations (add / remove / drain / uncordon / upgrade / reset).
//!
//! The crate never talks to etcd or schedules workloads; it orchestrates
//! collaborator processes and aggregates their results into typed reports.
//!
//! # Example
//!
//! ```rust,ignore
//! use cpc::infra;
//! use cpc::inventory;
//!
//! let nodes = infra::extract_cluster_infra(&infra_dir)?;
//! let doc = inventory::generate_inventory(&nodes);
//! let path = inventory::write_inventory(&doc)?;
//! ```

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod bootstrap;
pub mod cache;
pub mod context;
pub mod error;
pub mod infra;
pub mod inventory;
pub mod nodes;
pub mod resilience;
pub mod runner;
pub mod secrets;
pub mod status;

pub use error::{CpcError, Result};
pub use infra::{Node, NodeRole};
pub use status::StatusReport;
