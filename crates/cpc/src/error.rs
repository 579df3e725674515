//! Error taxonomy for orchestration commands.
//!
//! Validation errors stay at the command boundary (exit 1 with a usage
//! message); external-tool and missing-data errors abort the current stage but
//! never corrupt on-disk state, because cache writes are the last step of any
//! successful fetch. Cache inconsistencies are treated as misses by callers,
//! never surfaced as fatal.

use thiserror::Error;

/// Errors produced by the orchestration layer.
#[derive(Debug, Error)]
pub enum CpcError {
    /// Bad CLI input. Resolved at the command boundary, always exit code 1.
    #[error("{0}")]
    Validation(String),

    /// A collaborator subprocess exited non-zero or produced unparsable
    /// output. Carries the tool's raw output for debuggability.
    #[error("{tool} failed: {message}\n--- tool output ---\n{output}")]
    ExternalTool {
        /// Tool name, e.g. `tofu` or `ansible-playbook`.
        tool: String,
        /// What the orchestrator was doing when the tool failed.
        message: String,
        /// Raw stderr (or stdout where stderr is empty) from the tool.
        output: String,
    },

    /// An expected key or field was absent from a collaborator's output.
    #[error("missing data: {0}")]
    MissingData(String),

    /// A cache entry could not be read or parsed. Callers treat this as a
    /// cache miss and re-fetch rather than aborting.
    #[error("cache inconsistency: {0}")]
    CacheInconsistency(String),

    /// Filesystem access failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl CpcError {
    /// Build an external-tool error from a finished process's output.
    #[must_use]
    pub fn tool_failure(tool: &str, message: &str, stderr: &str, stdout: &str) -> Self {
        let output = if stderr.trim().is_empty() { stdout } else { stderr };
        Self::ExternalTool {
            tool: tool.to_string(),
            message: message.to_string(),
            output: output.trim_end().to_string(),
        }
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, CpcError>;
