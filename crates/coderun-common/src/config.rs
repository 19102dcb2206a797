//! Configuration structures for coderun.
//!
//! This module defines configuration options for the service components:
//! - [`RuntimeConfig`]: Top-level configuration containing all settings
//! - [`ToolchainConfig`]: External toolchain invocation
//! - [`WorkspaceConfig`]: Where workspaces are allocated
//! - [`ExecutionConfig`]: Grace period, concurrency bound, output cap
//! - [`SandboxConfig`]: Process sandbox enforcement settings
//! - [`LimitsConfig`]: Upper bounds accepted from callers

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level runtime configuration.
///
/// This structure contains all service-wide settings. Per-request options
/// live in [`crate::ExecutionContext`] instead.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub toolchain: ToolchainConfig,

    #[serde(default)]
    pub workspace: WorkspaceConfig,

    #[serde(default)]
    pub execution: ExecutionConfig,

    #[serde(default)]
    pub sandbox: SandboxConfig,

    #[serde(default)]
    pub limits: LimitsConfig,
}

/// External toolchain configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ToolchainConfig {
    /// Build tool executable (looked up on `PATH` when not absolute).
    #[serde(default = "defaults::program")]
    pub program: String,

    /// Language edition written into generated manifests.
    #[serde(default = "defaults::edition")]
    pub edition: String,

    /// Package name written into generated manifests.
    ///
    /// This is also the file name of the built artifact.
    #[serde(default = "defaults::package_name")]
    pub package_name: String,

    /// Pass `--offline` to the build so dependencies resolve only from the
    /// local registry cache.
    #[serde(default)]
    pub offline: bool,

    /// Bound for the startup version probe, in seconds.
    #[serde(default = "defaults::probe_timeout_secs")]
    pub probe_timeout_secs: u64,
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        Self {
            program: defaults::program(),
            edition: defaults::edition(),
            package_name: defaults::package_name(),
            offline: false,
            probe_timeout_secs: defaults::probe_timeout_secs(),
        }
    }
}

impl ToolchainConfig {
    /// Get the probe timeout as a `Duration`.
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

/// Workspace allocation configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct WorkspaceConfig {
    /// Directory under which per-request workspaces are created.
    ///
    /// Defaults to `coderun` inside the system temporary directory.
    #[serde(default)]
    pub root: Option<PathBuf>,
}

impl WorkspaceConfig {
    /// Resolve the workspace root directory.
    pub fn root_dir(&self) -> PathBuf {
        self.root
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("coderun"))
    }
}

/// Pipeline execution configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExecutionConfig {
    /// Extra wait after the user timeout before the artifact is force-killed.
    ///
    /// Applies to the execute phase only.
    #[serde(default = "defaults::grace_period_secs")]
    pub grace_period_secs: u64,

    /// Maximum number of requests compiling or executing at once.
    ///
    /// Requests beyond this bound wait for a slot.
    #[serde(default = "defaults::max_concurrent")]
    pub max_concurrent: usize,

    /// Maximum bytes kept from each of stdout and stderr.
    #[serde(default = "defaults::max_output_bytes")]
    pub max_output_bytes: usize,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            grace_period_secs: defaults::grace_period_secs(),
            max_concurrent: defaults::max_concurrent(),
            max_output_bytes: defaults::max_output_bytes(),
        }
    }
}

impl ExecutionConfig {
    /// Get the grace period as a `Duration`.
    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }
}

/// Process sandbox configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SandboxConfig {
    /// Use the platform sandbox. When disabled, artifacts run unconfined
    /// and every requested control is reported as not enforced.
    #[serde(default = "defaults::sandbox_enabled")]
    pub enabled: bool,

    /// Largest file the artifact may create, in megabytes.
    #[serde(default = "defaults::max_file_size_mb")]
    pub max_file_size_mb: Option<u64>,

    /// Process count ceiling for the artifact's user.
    #[serde(default)]
    pub max_processes: Option<u64>,

    /// Fail the execute phase instead of warning when network isolation
    /// is requested but unavailable on this host.
    #[serde(default)]
    pub require_network_isolation: bool,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            enabled: defaults::sandbox_enabled(),
            max_file_size_mb: defaults::max_file_size_mb(),
            max_processes: None,
            require_network_isolation: false,
        }
    }
}

/// Upper bounds on what callers may request.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LimitsConfig {
    #[serde(default = "defaults::max_timeout_secs")]
    pub max_timeout_secs: u64,

    #[serde(default = "defaults::max_memory_limit_mb")]
    pub max_memory_limit_mb: u64,

    #[serde(default = "defaults::max_source_bytes")]
    pub max_source_bytes: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_timeout_secs: defaults::max_timeout_secs(),
            max_memory_limit_mb: defaults::max_memory_limit_mb(),
            max_source_bytes: defaults::max_source_bytes(),
        }
    }
}

/// Default value functions for serde.
mod defaults {
    pub fn program() -> String {
        "cargo".to_string()
    }

    pub fn edition() -> String {
        "2021".to_string()
    }

    pub fn package_name() -> String {
        "submission".to_string()
    }

    pub const fn probe_timeout_secs() -> u64 {
        10
    }

    pub const fn grace_period_secs() -> u64 {
        5
    }

    pub const fn max_concurrent() -> usize {
        4
    }

    pub const fn max_output_bytes() -> usize {
        1024 * 1024
    }

    pub const fn sandbox_enabled() -> bool {
        true
    }

    #[allow(clippy::unnecessary_wraps)]
    pub const fn max_file_size_mb() -> Option<u64> {
        Some(64)
    }

    pub const fn max_timeout_secs() -> u64 {
        60
    }

    pub const fn max_memory_limit_mb() -> u64 {
        4096
    }

    pub const fn max_source_bytes() -> usize {
        256 * 1024
    }
}
