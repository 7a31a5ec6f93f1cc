//! JSON configuration file shared by every command.

use crate::notifier::dedup::DedupKeyMode;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Config file used when neither `--config` nor `OSA_OPS_CONFIG` is given
pub const DEFAULT_CONFIG_FILE: &str = "osa-ops.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub worker: WorkerConfig,
    /// Touched by `reload`; the application server restarts when its mtime changes
    #[serde(default = "default_sentinel")]
    pub sentinel: PathBuf,
    #[serde(default)]
    pub cleanup: CleanupConfig,
    #[serde(default)]
    pub notifier: NotifierConfig,
}

/// The supervised background sync worker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Program to run (looked up on PATH unless it contains a slash)
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default = "default_pid_file")]
    pub pid_file: PathBuf,
    /// Worker stdout/stderr, opened in append mode
    #[serde(default = "default_log_file")]
    pub log_file: PathBuf,
    #[serde(default = "default_grace_period_ms")]
    pub grace_period_ms: u64,
}

impl WorkerConfig {
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupConfig {
    #[serde(default = "default_cleanup_root")]
    pub root: PathBuf,
    /// Glob patterns matched against file names (not full paths)
    #[serde(default)]
    pub patterns: Vec<String>,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            root: default_cleanup_root(),
            patterns: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifierConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_dedup_window_secs")]
    pub dedup_window_secs: u64,
    #[serde(default)]
    pub dedup_key: DedupKeyMode,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl NotifierConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn dedup_window(&self) -> Duration {
        Duration::from_secs(self.dedup_window_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            poll_interval_ms: default_poll_interval_ms(),
            dedup_window_secs: default_dedup_window_secs(),
            dedup_key: DedupKeyMode::default(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

fn default_sentinel() -> PathBuf {
    PathBuf::from("tmp/restart.txt")
}

fn default_pid_file() -> PathBuf {
    PathBuf::from("auto_sync.pid")
}

fn default_log_file() -> PathBuf {
    PathBuf::from("auto_sync.log")
}

fn default_grace_period_ms() -> u64 {
    2000
}

fn default_cleanup_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_base_url() -> String {
    "http://127.0.0.1:5000".to_string()
}

fn default_poll_interval_ms() -> u64 {
    5000
}

fn default_dedup_window_secs() -> u64 {
    300
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

impl Config {
    /// Load and validate a config file. Relative paths inside it are resolved
    /// against the file's own directory.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| {
                format!("Configuration file not found or unreadable: {}", path.display())
            })?;
        let base_dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        Self::parse(&content, base_dir)
            .with_context(|| format!("Invalid configuration file: {}", path.display()))
    }

    /// Parse config content, resolving relative paths against `base_dir`
    pub fn parse(content: &str, base_dir: &Path) -> Result<Self> {
        let mut config: Config = serde_json::from_str(content)?;
        if config.worker.command.trim().is_empty() {
            anyhow::bail!("worker.command must not be empty");
        }
        if config.notifier.poll_interval_ms == 0 {
            anyhow::bail!("notifier.poll_interval_ms must be positive");
        }

        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base_dir.join(&*p);
            }
        };
        resolve(&mut config.worker.pid_file);
        resolve(&mut config.worker.log_file);
        if let Some(cwd) = config.worker.cwd.as_mut() {
            resolve(cwd);
        }
        resolve(&mut config.sentinel);
        resolve(&mut config.cleanup.root);

        Ok(config)
    }
}
