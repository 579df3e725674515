//! Freshness-based result caching.
//!
//! A cache entry is usable while it is younger than its TTL *and* no
//! authoritative source file (for example the encrypted secrets file) has an
//! mtime newer than the entry. No locking is provided: concurrent writers may
//! race and the last write wins. That is a documented limitation of this
//! single-operator tool, not a defect to mask.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tracing::{debug, warn};

use crate::error::{CpcError, Result};

/// Freshness of a cache entry relative to its source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Cache is at least as new as the source.
    Fresh,
    /// The source file changed after the cache was written.
    Stale,
    /// Cache file or source file is absent.
    Missing,
}

/// Compare a cache file against its authoritative source file.
///
/// Returns [`Freshness::Missing`] if either file is absent, [`Freshness::Stale`]
/// if the source's mtime is newer than the cache's, otherwise
/// [`Freshness::Fresh`].
#[must_use]
pub fn check_freshness(cache_file: &Path, source_file: &Path) -> Freshness {
    let Ok(cache_mtime) = mtime(cache_file) else {
        return Freshness::Missing;
    };
    let Ok(source_mtime) = mtime(source_file) else {
        return Freshness::Missing;
    };

    if source_mtime > cache_mtime {
        Freshness::Stale
    } else {
        Freshness::Fresh
    }
}

fn mtime(path: &Path) -> std::io::Result<SystemTime> {
    std::fs::metadata(path)?.modified()
}

/// Deterministically named cache files under one directory.
///
/// File names follow `cpc_<kind>_cache_<workspace>`, so every cache this
/// process family owns matches the `cpc_*` prefix.
#[derive(Debug, Clone)]
pub struct CacheStore {
    dir: PathBuf,
}

impl CacheStore {
    /// A store rooted at `dir`. The directory is created on first write.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// A store in the system temp directory, the default location.
    #[must_use]
    pub fn system() -> Self {
        Self::new(std::env::temp_dir())
    }

    /// Path for a cache of `kind` scoped to `workspace`.
    #[must_use]
    pub fn path(&self, kind: &str, workspace: &str) -> PathBuf {
        self.dir.join(format!("cpc_{kind}_cache_{workspace}"))
    }

    /// Overwrite a cache file atomically (temp file + rename) and bump its
    /// mtime to now.
    ///
    /// # Errors
    /// Returns an error if the directory or file cannot be written.
    pub fn write(&self, path: &Path, payload: &str) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        std::fs::write(tmp.path(), payload)?;
        tmp.persist(path)
            .map_err(|e| CpcError::Io(e.error))?;
        debug!("Cache written: {}", path.display());
        Ok(())
    }

    /// Read a cache file's payload.
    ///
    /// # Errors
    /// Returns [`CpcError::CacheInconsistency`] when the file cannot be read;
    /// callers treat that as a miss and re-fetch.
    pub fn read(&self, path: &Path) -> Result<String> {
        std::fs::read_to_string(path)
            .map_err(|e| CpcError::CacheInconsistency(format!("{}: {e}", path.display())))
    }

    /// Whether an entry exists and is younger than `ttl`.
    #[must_use]
    pub fn entry_live(&self, path: &Path, ttl: Duration) -> bool {
        match mtime(path).and_then(|m| {
            SystemTime::now()
                .duration_since(m)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        }) {
            Ok(age) => age < ttl,
            Err(_) => false,
        }
    }

    /// Delete every `cpc_*` file in the store directory.
    ///
    /// Deliberately broad: switching workspaces invalidates all caches, not
    /// just the previous workspace's. Simplicity traded for cache efficiency.
    pub fn clear_all(&self) {
        let Ok(entries) = std::fs::read_dir(&self.dir) else {
            return;
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            if name.to_string_lossy().starts_with("cpc_") {
                if let Err(e) = std::fs::remove_file(entry.path()) {
                    warn!("Failed to remove cache file {name:?}: {e}");
                }
            }
        }
    }
}
