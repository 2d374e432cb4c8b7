//! User configuration.
//!
//! Read from `config.toml` in the platform config directory
//! (`~/.config/etrace/config.toml` on Linux). Every key is optional and a
//! missing file means all defaults:
//!
//! ```toml
//! window_timeout_secs = 60
//! window_search_attempts = 10
//! merge_tool = "strace-log-merge"
//! strace_path = "/snap/bin/strace-static"
//! excluded_syscalls = ["select", "nanosleep"]
//! exclude_programs = ["/usr/bin/snap", "/usr/lib/snapd/*"]
//! keep_vm_caches = false
//! ```

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use anyhow::Context;
use etcetera::base_strategy::{BaseStrategy, choose_base_strategy};
use serde::Deserialize;

use crate::strace::command::DEFAULT_EXCLUDED_SYSCALLS;
use crate::strace::{DEFAULT_EXCLUDED_PROGRAMS, DEFAULT_MERGE_TOOL};

/// Override for the config path, set via the --config CLI flag
static CONFIG_PATH: OnceLock<PathBuf> = OnceLock::new();

pub fn set_config_path(path: PathBuf) {
    CONFIG_PATH.set(path).ok();
}

/// Get the config file path.
///
/// Priority:
/// 1. CLI --config flag (set via `set_config_path`)
/// 2. ETRACE_CONFIG_PATH environment variable
/// 3. Platform-specific default location
pub fn get_config_path() -> Option<PathBuf> {
    if let Some(path) = CONFIG_PATH.get() {
        return Some(path.clone());
    }

    if let Ok(path) = std::env::var("ETRACE_CONFIG_PATH") {
        return Some(PathBuf::from(path));
    }

    let strategy = choose_base_strategy().ok()?;
    Some(strategy.config_dir().join("etrace").join("config.toml"))
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EtraceConfig {
    /// How long to wait for the application window before giving up
    pub window_timeout_secs: u64,
    /// Number of `xdotool search` attempts within the timeout
    pub window_search_attempts: u32,
    /// Tool that merges per-process trace fragments
    pub merge_tool: String,
    /// strace binary; looked up on `PATH` when unset
    pub strace_path: Option<PathBuf>,
    pub excluded_syscalls: Vec<String>,
    /// Program globs hidden from file reports
    pub exclude_programs: Vec<String>,
    /// Skip dropping the VM caches before each run
    pub keep_vm_caches: bool,
}

impl Default for EtraceConfig {
    fn default() -> Self {
        Self {
            window_timeout_secs: 60,
            window_search_attempts: 10,
            merge_tool: DEFAULT_MERGE_TOOL.to_string(),
            strace_path: None,
            excluded_syscalls: DEFAULT_EXCLUDED_SYSCALLS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            exclude_programs: DEFAULT_EXCLUDED_PROGRAMS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            keep_vm_caches: false,
        }
    }
}

impl EtraceConfig {
    /// Load from [`get_config_path`], or defaults when there is no file.
    pub fn load() -> Result<Self, ConfigError> {
        match get_config_path() {
            Some(path) => Self::load_from_path(&path),
            None => Ok(Self::default()),
        }
    }

    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            log::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    pub fn window_timeout(&self) -> Duration {
        Duration::from_secs(self.window_timeout_secs)
    }

    /// The configured strace, or the first one on `PATH`.
    pub fn resolve_strace(&self) -> anyhow::Result<PathBuf> {
        if let Some(path) = &self.strace_path {
            return Ok(path.clone());
        }
        which::which("strace")
            .context("cannot find an installed strace, please try 'snap install strace-static'")
    }
}
