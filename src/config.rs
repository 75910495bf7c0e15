//! Configuration for claimcheck.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (CLAIMCHECK_HOME, CLAIMCHECK_DATABASE, CLAIMCHECK_METRICS_ADDR)
//! 2. Config file (.claimcheck/config.yaml)
//! 3. Defaults (~/.claimcheck, ~/.claimcheck/claimcheck.db)
//!
//! Config file discovery:
//! - Searches current directory and parents for .claimcheck/config.yaml
//! - Paths in the config file are relative to the .claimcheck/ directory

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::queue::{ConsumerOptions, QueueOptions, RetryPolicy, VERIFY_QUEUE};

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub queue: QueueSettings,
    #[serde(default)]
    pub worker: WorkerSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// State directory (relative to .claimcheck/)
    pub home: Option<String>,
    /// SQLite database file (relative to .claimcheck/)
    pub database: Option<String>,
}

/// Queue behaviour
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    /// Channel name
    pub name: String,

    /// Retry and backoff for failed jobs
    #[serde(flatten)]
    pub retry: RetryPolicy,

    /// Completed jobs kept for inspection
    pub keep_completed: usize,

    /// Failed jobs kept for inspection
    pub keep_failed: usize,

    /// A job running longer fails its attempt
    pub job_timeout_seconds: u64,

    /// Extra lease time past the job timeout, so the timed-out consumer can
    /// record the failure before anyone else may take the job
    pub lease_grace_ms: u64,

    /// Idle wait between queue polls
    pub poll_interval_ms: u64,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            name: VERIFY_QUEUE.to_string(),
            retry: RetryPolicy::default(),
            keep_completed: 50,
            keep_failed: 50,
            job_timeout_seconds: 30,
            lease_grace_ms: 5000,
            poll_interval_ms: 500,
        }
    }
}

impl QueueSettings {
    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_seconds)
    }

    /// Leases run for the job timeout plus the grace period
    pub fn lease(&self) -> Duration {
        self.job_timeout()
            .saturating_add(Duration::from_millis(self.lease_grace_ms))
    }

    /// Options for a queue backend
    pub fn queue_options(&self) -> QueueOptions {
        QueueOptions {
            name: self.name.clone(),
            retry: self.retry.clone(),
            keep_completed: self.keep_completed,
            keep_failed: self.keep_failed,
            lease: self.lease(),
        }
    }

    pub fn consumer_options(&self) -> ConsumerOptions {
        ConsumerOptions {
            job_timeout: self.job_timeout(),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
        }
    }
}

/// Worker process settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
    /// Consumers per process
    pub concurrency: usize,

    /// Simulated verification cost per job
    pub simulated_latency_ms: u64,

    /// Bind address of the metrics endpoint
    pub metrics_addr: String,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            concurrency: 1,
            simulated_latency_ms: 900,
            metrics_addr: "0.0.0.0:3001".to_string(),
        }
    }
}

impl WorkerSettings {
    pub fn simulated_latency(&self) -> Duration {
        Duration::from_millis(self.simulated_latency_ms)
    }
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// State directory
    pub home: PathBuf,
    /// SQLite database shared by the evidence store and the queue
    pub database: PathBuf,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    pub queue: QueueSettings,
    pub worker: WorkerSettings,
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(".claimcheck").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to the config file's directory
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

/// Combine config file, environment and defaults
fn resolve(
    config_file: Option<(PathBuf, ConfigFile)>,
    default_home: PathBuf,
    env: impl Fn(&str) -> Option<String>,
) -> ResolvedConfig {
    let (config_path, paths, queue, mut worker) = match config_file {
        Some((path, config)) => (Some(path), config.paths, config.queue, config.worker),
        None => (
            None,
            PathsConfig::default(),
            QueueSettings::default(),
            WorkerSettings::default(),
        ),
    };

    // Relative paths are anchored at the .claimcheck/ directory
    let config_dir = config_path
        .as_deref()
        .and_then(Path::parent)
        .map(Path::to_path_buf);

    let home = if let Some(env_home) = env("CLAIMCHECK_HOME") {
        PathBuf::from(env_home)
    } else {
        match (&config_dir, &paths.home) {
            (Some(dir), Some(home)) => resolve_path(dir, home),
            _ => default_home,
        }
    };

    let database = if let Some(env_db) = env("CLAIMCHECK_DATABASE") {
        PathBuf::from(env_db)
    } else {
        match (&config_dir, &paths.database) {
            (Some(dir), Some(db)) => resolve_path(dir, db),
            _ => home.join("claimcheck.db"),
        }
    };

    if let Some(addr) = env("CLAIMCHECK_METRICS_ADDR") {
        worker.metrics_addr = addr;
    }

    ResolvedConfig {
        home,
        database,
        config_file: config_path,
        queue,
        worker,
    }
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(".claimcheck");

    let config_file = match find_config_file() {
        Some(path) => {
            let config = load_config_file(&path)?;
            Some((path, config))
        }
        None => None,
    };

    Ok(resolve(config_file, default_home, |key| std::env::var(key).ok()))
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| e.to_string()));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::TempDir;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_defaults_without_file() {
        let config = resolve(None, PathBuf::from("/home/u/.claimcheck"), no_env);

        assert_eq!(config.home, PathBuf::from("/home/u/.claimcheck"));
        assert_eq!(config.database, PathBuf::from("/home/u/.claimcheck/claimcheck.db"));
        assert!(config.config_file.is_none());
        assert_eq!(config.queue.name, "verify-evidence");
        assert_eq!(config.queue.keep_failed, 50);
        assert_eq!(config.worker.simulated_latency_ms, 900);
        assert_eq!(config.worker.metrics_addr, "0.0.0.0:3001");
    }

    #[test]
    fn test_config_file_parsing() {
        let temp = TempDir::new().unwrap();
        let config_dir = temp.path().join(".claimcheck");
        std::fs::create_dir_all(&config_dir).unwrap();

        let config_path = config_dir.join("config.yaml");
        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(
            file,
            r#"
version: "1.0"
paths:
  home: ./
  database: data/verify.db
queue:
  max_attempts: 5
  initial_delay_ms: 250
  keep_completed: 10
worker:
  concurrency: 4
  simulated_latency_ms: 0
"#
        )
        .unwrap();

        let config = load_config_file(&config_path).unwrap();
        assert_eq!(config.version, "1.0");
        assert_eq!(config.paths.database, Some("data/verify.db".to_string()));
        assert_eq!(config.queue.retry.max_attempts, 5);
        assert_eq!(config.queue.retry.initial_delay_ms, 250);
        // Unset fields keep their defaults
        assert_eq!(config.queue.retry.backoff_multiplier, 2.0);
        assert_eq!(config.queue.keep_completed, 10);
        assert_eq!(config.queue.keep_failed, 50);
        assert_eq!(config.worker.concurrency, 4);

        let resolved = resolve(
            Some((config_path, config)),
            PathBuf::from("/unused"),
            no_env,
        );
        assert_eq!(resolved.database, config_dir.join("data/verify.db"));
        assert_eq!(resolved.worker.simulated_latency(), Duration::ZERO);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("CLAIMCHECK_HOME", "/srv/claimcheck"),
            ("CLAIMCHECK_METRICS_ADDR", "127.0.0.1:9100"),
        ]
        .into_iter()
        .collect();

        let config = resolve(None, PathBuf::from("/home/u/.claimcheck"), |key| {
            env.get(key).map(|v| v.to_string())
        });

        assert_eq!(config.home, PathBuf::from("/srv/claimcheck"));
        assert_eq!(config.database, PathBuf::from("/srv/claimcheck/claimcheck.db"));
        assert_eq!(config.worker.metrics_addr, "127.0.0.1:9100");
    }

    #[test]
    fn test_queue_options_follow_settings() {
        let settings = QueueSettings {
            job_timeout_seconds: 12,
            keep_failed: 3,
            ..Default::default()
        };

        let options = settings.queue_options();
        assert_eq!(options.lease, Duration::from_secs(17));
        assert!(options.lease > settings.consumer_options().job_timeout);
        assert_eq!(options.keep_failed, 3);
        assert_eq!(settings.consumer_options().job_timeout, Duration::from_secs(12));
    }

    #[test]
    fn test_resolve_relative_path() {
        let base = PathBuf::from("/home/user/project");

        assert_eq!(
            resolve_path(&base, "./subdir"),
            PathBuf::from("/home/user/project/subdir")
        );
        assert_eq!(
            resolve_path(&base, "/absolute/path"),
            PathBuf::from("/absolute/path")
        );
    }
}
