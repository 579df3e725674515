//! Secrets loading through the external decryption tool.
//!
//! Secrets live in an encrypted YAML file per workspace and are decrypted
//! with sops. Decrypted material is cached per workspace with the encrypted
//! file as the freshness source, so editing the secrets file invalidates the
//! cache on the next load. Required credentials are validated on every fresh
//! decrypt; defaults are never substituted.

use std::collections::BTreeMap;
use std::path::Path;
use std::process::Command;

use tracing::{debug, info};

use crate::cache::{check_freshness, CacheStore, Freshness};
use crate::context::Workspace;
use crate::error::{CpcError, Result};
use crate::runner::run_checked;

/// Credentials every workspace must provide.
pub const REQUIRED_KEYS: &[&str] = &[
    "PROXMOX_HOST",
    "PROXMOX_USERNAME",
    "PROXMOX_PASSWORD",
    "VM_USERNAME",
    "VM_SSH_KEY",
];

/// Decrypted credential material for one workspace.
#[derive(Debug, Clone)]
pub struct Secrets {
    values: BTreeMap<String, String>,
}

impl Secrets {
    /// Look up a named credential.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Parse a flat `KEY: value` document (the decryption tool's plaintext
    /// output) and validate the required keys.
    ///
    /// # Errors
    /// Returns [`CpcError::MissingData`] naming the first absent required
    /// key, or [`CpcError::ExternalTool`] when the document cannot be parsed.
    pub fn parse(plaintext: &str) -> Result<Self> {
        let raw: BTreeMap<String, serde_yaml::Value> =
            serde_yaml::from_str(plaintext).map_err(|e| {
                CpcError::tool_failure(
                    "sops",
                    &format!("decrypted secrets are not a flat key/value document: {e}"),
                    "",
                    plaintext,
                )
            })?;

        let values: BTreeMap<String, String> = raw
            .into_iter()
            .map(|(k, v)| {
                let s = match v {
                    serde_yaml::Value::String(s) => s,
                    other => serde_yaml::to_string(&other)
                        .unwrap_or_default()
                        .trim_end()
                        .to_string(),
                };
                (k, s)
            })
            .collect();

        for key in REQUIRED_KEYS {
            match values.get(*key) {
                Some(v) if !v.trim().is_empty() => {}
                _ => {
                    return Err(CpcError::MissingData(format!(
                        "Missing required secret: {key}"
                    )))
                }
            }
        }

        Ok(Self { values })
    }

    /// Serialize back to the flat `KEY: value` shape used for the cache file.
    #[must_use]
    pub fn to_cache_payload(&self) -> String {
        self.values
            .iter()
            .map(|(k, v)| format!("{k}: {v}\n"))
            .collect()
    }
}

/// Load a workspace's secrets, serving from cache while the encrypted source
/// is unchanged.
///
/// The cache write is the last step of a successful decrypt, so a failure
/// never leaves a partial entry behind.
///
/// # Errors
/// Returns [`CpcError::ExternalTool`] when the decryption tool fails (with
/// its stderr attached) and [`CpcError::MissingData`] when a required key is
/// absent from the decrypted document.
pub fn load_secrets_cached(
    workspace: &Workspace,
    source_file: &Path,
    cache: &CacheStore,
) -> Result<Secrets> {
    let cache_file = cache.path("secrets", workspace.name());

    if check_freshness(&cache_file, source_file) == Freshness::Fresh {
        match cache.read(&cache_file).and_then(|p| Secrets::parse(&p)) {
            Ok(secrets) => {
                debug!("Secrets served from cache for '{workspace}'");
                return Ok(secrets);
            }
            Err(CpcError::CacheInconsistency(msg)) => {
                debug!("Secrets cache unreadable ({msg}), re-decrypting");
            }
            Err(other) => return Err(other),
        }
    }

    if !source_file.exists() {
        return Err(CpcError::MissingData(format!(
            "secrets file not found: {}",
            source_file.display()
        )));
    }

    info!("Decrypting secrets for workspace '{workspace}'");
    let plaintext = run_checked(
        "sops",
        Command::new("sops").arg("-d").arg(source_file),
        &format!("decrypt {}", source_file.display()),
    )?;

    let secrets = Secrets::parse(&plaintext)?;
    cache.write(&cache_file, &secrets.to_cache_payload())?;
    Ok(secrets)
}
