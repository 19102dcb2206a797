//! Per-request execution context.
//!
//! [`ExecutionContext`] carries the options a caller attaches to one
//! submission. Defaults are resolved once, when the value is built or
//! deserialized, and the value is never mutated afterward.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Build profile selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum OptimizationLevel {
    /// Unoptimized build with debug symbols.
    #[default]
    #[serde(rename = "debug")]
    Debug,
    #[serde(rename = "O1")]
    O1,
    #[serde(rename = "O2")]
    O2,
    #[serde(rename = "O3")]
    O3,
    /// Optimize for binary size.
    #[serde(rename = "size")]
    Size,
    /// Optimize aggressively for binary size.
    #[serde(rename = "size-min")]
    SizeMin,
}

impl OptimizationLevel {
    /// All levels, in ascending order of optimization effort.
    pub const ALL: [OptimizationLevel; 6] = [
        Self::Debug,
        Self::O1,
        Self::O2,
        Self::O3,
        Self::Size,
        Self::SizeMin,
    ];

    /// Returns `true` for every level that builds with the release profile.
    pub fn is_optimized(self) -> bool {
        !matches!(self, Self::Debug)
    }

    /// The wire name of this level.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::O1 => "O1",
            Self::O2 => "O2",
            Self::O3 => "O3",
            Self::Size => "size",
            Self::SizeMin => "size-min",
        }
    }
}

impl fmt::Display for OptimizationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OptimizationLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|level| level.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| {
                format!("unknown optimization level '{s}' (expected debug, O1, O2, O3, size, size-min)")
            })
    }
}

/// Options for one execution request.
///
/// Construct with [`ExecutionContext::builder`] or deserialize from JSON/TOML;
/// absent fields take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionContext {
    /// Bound for the compile phase and, independently, the execute phase.
    #[serde(default = "defaults::timeout_secs")]
    timeout_secs: u64,

    /// Memory ceiling handed to the sandbox for the executed artifact.
    #[serde(default = "defaults::memory_limit_mb")]
    memory_limit_mb: u64,

    /// Whether the executed artifact may use the network.
    #[serde(default)]
    network_enabled: bool,

    /// Requested dependency names; only those in the trusted table resolve.
    #[serde(default)]
    allowed_dependencies: BTreeSet<String>,

    /// Build feature flags, in request order.
    #[serde(default)]
    extra_features: Vec<String>,

    #[serde(default)]
    optimization_level: OptimizationLevel,

    /// Keep the workspace on disk after the request (debugging only).
    #[serde(default)]
    retain_workspace: bool,
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self {
            timeout_secs: defaults::timeout_secs(),
            memory_limit_mb: defaults::memory_limit_mb(),
            network_enabled: false,
            allowed_dependencies: BTreeSet::new(),
            extra_features: Vec::new(),
            optimization_level: OptimizationLevel::default(),
            retain_workspace: false,
        }
    }
}

impl ExecutionContext {
    /// Create a builder starting from the defaults.
    pub fn builder() -> ExecutionContextBuilder {
        ExecutionContextBuilder::default()
    }

    pub fn timeout_secs(&self) -> u64 {
        self.timeout_secs
    }

    /// The phase bound as a `Duration`.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn memory_limit_mb(&self) -> u64 {
        self.memory_limit_mb
    }

    /// The memory ceiling in bytes.
    pub fn memory_limit_bytes(&self) -> u64 {
        self.memory_limit_mb.saturating_mul(1024 * 1024)
    }

    pub fn network_enabled(&self) -> bool {
        self.network_enabled
    }

    pub fn allowed_dependencies(&self) -> &BTreeSet<String> {
        &self.allowed_dependencies
    }

    pub fn extra_features(&self) -> &[String] {
        &self.extra_features
    }

    pub fn optimization_level(&self) -> OptimizationLevel {
        self.optimization_level
    }

    pub fn retain_workspace(&self) -> bool {
        self.retain_workspace
    }
}

/// Builder for [`ExecutionContext`].
#[derive(Debug, Default)]
pub struct ExecutionContextBuilder {
    inner: ExecutionContext,
}

impl ExecutionContextBuilder {
    #[must_use]
    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.inner.timeout_secs = secs;
        self
    }

    #[must_use]
    pub fn memory_limit_mb(mut self, mb: u64) -> Self {
        self.inner.memory_limit_mb = mb;
        self
    }

    #[must_use]
    pub fn network_enabled(mut self, enabled: bool) -> Self {
        self.inner.network_enabled = enabled;
        self
    }

    /// Request dependencies by name.
    ///
    /// Names outside the trusted table are accepted here and dropped when the
    /// manifest is generated.
    #[must_use]
    pub fn allow_dependencies<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inner
            .allowed_dependencies
            .extend(names.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn extra_features<I, S>(mut self, features: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inner
            .extra_features
            .extend(features.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn optimization_level(mut self, level: OptimizationLevel) -> Self {
        self.inner.optimization_level = level;
        self
    }

    #[must_use]
    pub fn retain_workspace(mut self, retain: bool) -> Self {
        self.inner.retain_workspace = retain;
        self
    }

    #[must_use]
    pub fn build(self) -> ExecutionContext {
        self.inner
    }
}

/// Default value functions for serde.
mod defaults {
    pub const fn timeout_secs() -> u64 {
        10
    }

    pub const fn memory_limit_mb() -> u64 {
        512
    }
}
