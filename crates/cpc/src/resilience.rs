//! Shared resiliency primitives: retry, timeout, recovery checkpoints.
//!
//! Retry is opt-in per call site. Most external-tool invocations are *not*
//! wrapped because they are not known to be safe to repeat blindly (apply,
//! destroy, playbook runs); probe-like operations compose `with_retry` or
//! `with_timeout` explicitly where the call site documents it.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info};

/// Attempt budget and backoff curve for a retried operation.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts before giving up.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Ceiling the backoff never exceeds.
    pub max_delay: Duration,
    /// Growth factor applied to the delay after each failure.
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// A config with the given attempt budget and no other changes.
    #[must_use]
    pub fn attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }
}

/// Run `f` until it succeeds or the attempt budget is spent, backing off
/// between attempts.
///
/// # Errors
/// Returns the final attempt's error, wrapped with the operation name and
/// attempt count.
pub fn with_retry<T, F>(config: &RetryConfig, operation_name: &str, mut f: F) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    let mut attempt = 0;
    let mut delay = config.initial_delay;

    loop {
        attempt += 1;
        match f() {
            Ok(result) => return Ok(result),
            Err(e) => {
                if attempt >= config.max_attempts {
                    return Err(e)
                        .context(format!("{operation_name}: giving up after {attempt} attempts"));
                }

                info!(
                    "{operation_name} attempt {attempt}/{} failed: {e}; next try in {delay:?}",
                    config.max_attempts
                );

                std::thread::sleep(delay);
                delay = std::cmp::min(
                    config.max_delay,
                    Duration::from_secs_f64(delay.as_secs_f64() * config.backoff_multiplier),
                );
            }
        }
    }
}

/// `with_retry` for futures; sleeps on the tokio timer instead of blocking.
///
/// # Errors
/// Returns the final attempt's error, wrapped with the operation name and
/// attempt count.
pub async fn with_retry_async<T, F, Fut>(
    config: &RetryConfig,
    operation_name: &str,
    mut f: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut attempt = 0;
    let mut delay = config.initial_delay;

    loop {
        attempt += 1;
        match f().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                if attempt >= config.max_attempts {
                    return Err(e)
                        .context(format!("{operation_name}: giving up after {attempt} attempts"));
                }

                info!(
                    "{operation_name} attempt {attempt}/{} failed: {e}; next try in {delay:?}",
                    config.max_attempts
                );

                tokio::time::sleep(delay).await;
                delay = std::cmp::min(
                    config.max_delay,
                    Duration::from_secs_f64(delay.as_secs_f64() * config.backoff_multiplier),
                );
            }
        }
    }
}

/// Bound an async operation by a wall-clock duration.
///
/// # Errors
/// Returns an error naming the operation if the duration elapses, or the
/// operation's own error if it fails within the bound.
pub async fn with_timeout<T, Fut>(duration: Duration, operation_name: &str, fut: Fut) -> Result<T>
where
    Fut: std::future::Future<Output = Result<T>>,
{
    match tokio::time::timeout(duration, fut).await {
        Ok(result) => result,
        Err(_) => anyhow::bail!(
            "{operation_name} timed out after {}s",
            duration.as_secs()
        ),
    }
}

/// Recovery checkpoint log for a workspace.
///
/// Records which stage last completed so a crashed run can be diagnosed on
/// the next invocation. Informational only: nothing resumes automatically,
/// because resuming a partial bootstrap requires operator judgment.
#[derive(Debug, Clone)]
pub struct CheckpointLog {
    path: PathBuf,
}

impl CheckpointLog {
    /// Checkpoint log for a workspace, stored under `dir`.
    ///
    /// The name stays outside the `cpc_*` cache namespace: checkpoints are
    /// diagnostic state and must survive cache invalidation on workspace
    /// switch.
    #[must_use]
    pub fn new(dir: &Path, workspace: &str) -> Self {
        Self {
            path: dir.join(format!("recovery_{workspace}.log")),
        }
    }

    /// Record that a stage completed.
    ///
    /// # Errors
    /// Returns an error if the log file cannot be written.
    pub fn record(&self, label: &str) -> Result<()> {
        use std::io::Write;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create checkpoint directory")?;
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .context("Failed to open checkpoint log")?;
        writeln!(file, "{} {label}", chrono::Utc::now().to_rfc3339())
            .context("Failed to write checkpoint")?;
        debug!("Recovery checkpoint: {label}");
        Ok(())
    }

    /// The most recently recorded checkpoint label, if any.
    ///
    /// # Errors
    /// Returns an error if an existing log cannot be read.
    pub fn last(&self) -> Result<Option<String>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content =
            std::fs::read_to_string(&self.path).context("Failed to read checkpoint log")?;
        Ok(content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .next_back()
            .and_then(|line| line.split_once(' ').map(|(_, label)| label.to_string())))
    }

    /// Remove the log, e.g. at the start of a fresh run.
    pub fn clear(&self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_config_default() {
        let config = RetryConfig::default();
        assert_eq!(config.max_attempts, 5);
        assert!((config.backoff_multiplier - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_with_retry_succeeds_after_failures() {
        let config = RetryConfig {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            backoff_multiplier: 1.0,
        };

        let mut calls = 0;
        let result: Result<u32> = with_retry(&config, "flaky", || {
            calls += 1;
            if calls < 3 {
                anyhow::bail!("not yet")
            }
            Ok(42)
        });

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_with_retry_exhausts_attempts() {
        let config = RetryConfig {
            max_attempts: 2,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(1),
            backoff_multiplier: 1.0,
        };

        let result: Result<()> = with_retry(&config, "doomed", || anyhow::bail!("nope"));
        let msg = format!("{:#}", result.unwrap_err());
        assert!(msg.contains("doomed: giving up after 2 attempts"));
    }

    #[tokio::test]
    async fn test_with_timeout_elapses() {
        let result: Result<()> = with_timeout(Duration::from_millis(10), "slow probe", async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;

        let msg = format!("{:#}", result.unwrap_err());
        assert!(msg.contains("slow probe timed out"));
    }

    #[test]
    fn test_checkpoints_survive_cache_invalidation() {
        let dir = tempfile::tempdir().unwrap();
        let log = CheckpointLog::new(dir.path(), "lab");
        log.record("execute_bootstrap_steps").unwrap();

        // Workspace switch clears every cpc_* cache file in the same
        // directory; the checkpoint log is not cache state.
        let cache = crate::cache::CacheStore::new(dir.path());
        cache.write(&cache.path("status_quick", "lab"), "{}").unwrap();
        cache.clear_all();

        assert_eq!(log.last().unwrap().unwrap(), "execute_bootstrap_steps");
    }

    #[test]
    fn test_checkpoint_record_and_last() {
        let dir = tempfile::tempdir().unwrap();
        let log = CheckpointLog::new(dir.path(), "test");

        assert!(log.last().unwrap().is_none());

        log.record("extract_infrastructure_data").unwrap();
        log.record("generate_inventory").unwrap();

        assert_eq!(log.last().unwrap().unwrap(), "generate_inventory");

        log.clear();
        assert!(log.last().unwrap().is_none());
    }
}
