//! Workspace context persistence.
//!
//! One workspace is "current" at any time. The selection is a single
//! plain-text file; commands load it once at startup and carry the resolved
//! [`Workspace`] value explicitly instead of re-reading ambient global state.

use std::path::PathBuf;
use std::sync::OnceLock;

use regex::Regex;
use tracing::info;

use crate::cache::CacheStore;
use crate::error::{CpcError, Result};

/// Reserved names that can never be a workspace.
const RESERVED_NAMES: &[&str] = &["default", "null", "none"];

fn name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_-]*$").expect("static regex"))
}

/// A validated workspace name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Workspace(String);

impl Workspace {
    /// Validate and wrap a workspace name.
    ///
    /// Names are 1-50 characters matching `[A-Za-z0-9][A-Za-z0-9_-]*` and may
    /// not be one of the reserved names (`default`, `null`, `none`).
    ///
    /// # Errors
    /// Returns a validation error describing the first rule violated.
    pub fn new(name: &str) -> Result<Self> {
        if name.is_empty() || name.len() > 50 {
            return Err(CpcError::Validation(format!(
                "Invalid workspace name '{name}': must be 1-50 characters"
            )));
        }
        if !name_pattern().is_match(name) {
            return Err(CpcError::Validation(format!(
                "Invalid workspace name '{name}': allowed pattern is [A-Za-z0-9][A-Za-z0-9_-]*"
            )));
        }
        if RESERVED_NAMES.contains(&name) {
            return Err(CpcError::Validation(format!(
                "Invalid workspace name '{name}': reserved"
            )));
        }
        Ok(Self(name.to_string()))
    }

    /// The workspace name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Workspace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Persists the current workspace selection to a fixed file path.
#[derive(Debug, Clone)]
pub struct ContextStore {
    path: PathBuf,
}

impl ContextStore {
    /// A store backed by the given context file.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The currently selected workspace, or `None` before the first
    /// `set_context`.
    ///
    /// # Errors
    /// Returns an error if an existing context file is unreadable or holds an
    /// invalid name.
    pub fn current(&self) -> Result<Option<Workspace>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&self.path)?;
        let name = content.trim();
        if name.is_empty() {
            return Ok(None);
        }
        Workspace::new(name).map(Some)
    }

    /// Select a workspace, invalidating every cache first.
    ///
    /// Clearing all caches (not only the previous workspace's) before the
    /// context file changes means no stale entry can ever be attributed to
    /// the new workspace.
    ///
    /// # Errors
    /// Returns an error if the context file cannot be written.
    pub fn set_context(&self, workspace: &Workspace, cache: &CacheStore) -> Result<()> {
        cache.clear_all();

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, format!("{workspace}\n"))?;
        info!("Context set to workspace '{workspace}'");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_workspace_names() {
        for name in ["prod", "k8s-lab", "a", "Test_Cluster-01", "0x1"] {
            assert!(Workspace::new(name).is_ok(), "should accept {name}");
        }
    }

    #[test]
    fn test_invalid_workspace_names() {
        let too_long = "a".repeat(51);
        for name in ["", "-leading", "_leading", "has space", too_long.as_str()] {
            assert!(Workspace::new(name).is_err(), "should reject {name:?}");
        }
    }

    #[test]
    fn test_reserved_workspace_names() {
        for name in ["default", "null", "none"] {
            let err = Workspace::new(name).unwrap_err();
            assert!(err.to_string().contains("reserved"));
        }
    }

    #[test]
    fn test_current_absent_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContextStore::new(dir.path().join("context"));
        assert!(store.current().unwrap().is_none());
    }

    #[test]
    fn test_set_context_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheStore::new(dir.path().join("cache"));
        let store = ContextStore::new(dir.path().join("context"));
        let ws = Workspace::new("lab").unwrap();

        store.set_context(&ws, &cache).unwrap();
        assert_eq!(store.current().unwrap().unwrap(), ws);
    }

    #[test]
    fn test_set_context_clears_caches() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheStore::new(dir.path());
        let entry = cache.path("secrets", "old-ws");
        cache.write(&entry, "stale").unwrap();

        let store = ContextStore::new(dir.path().join("context"));
        store
            .set_context(&Workspace::new("new-ws").unwrap(), &cache)
            .unwrap();

        assert!(!entry.exists());
    }
}
