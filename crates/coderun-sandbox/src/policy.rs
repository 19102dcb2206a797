//! Resource policy for executed artifacts.
//!
//! This module provides the [`ResourcePolicy`] struct, which declares the
//! controls a sandbox should attempt, and [`EnforcementReport`], which
//! records what the sandbox actually managed to apply.

use std::time::Duration;

use serde::Serialize;

use coderun_common::{ExecutionContext, SandboxConfig};

/// Resource controls requested for one artifact process.
///
/// # Security Philosophy
///
/// The default policy disables networking and sets no numeric ceilings;
/// every ceiling must be requested explicitly. A sandbox that cannot honor a
/// requested control must say so in its [`EnforcementReport`] rather than
/// skip it silently.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourcePolicy {
    /// Address-space ceiling in bytes.
    pub memory_limit_bytes: Option<u64>,

    /// Allow outbound networking.
    pub network_enabled: bool,

    /// CPU-time ceiling in seconds.
    ///
    /// A backstop behind the wall-clock timeout, never a replacement for it.
    pub cpu_time_secs: Option<u64>,

    /// Largest file the process may write, in bytes.
    pub max_file_size_bytes: Option<u64>,

    /// Process count ceiling.
    pub max_processes: Option<u64>,

    /// Keep every descendant inside a container that is torn down with the
    /// artifact, including processes that leave its process group.
    pub contain_process_tree: bool,
}

impl ResourcePolicy {
    /// Create a builder for constructing a policy.
    pub fn builder() -> ResourcePolicyBuilder {
        ResourcePolicyBuilder::default()
    }

    /// Derive the policy for one execution.
    ///
    /// The CPU ceiling is the user timeout plus the grace period, rounded up
    /// to whole seconds, so it only fires if the wall-clock kill failed. A
    /// memory limit of zero means no ceiling.
    pub fn for_execution(
        context: &ExecutionContext,
        sandbox: &SandboxConfig,
        grace_period: Duration,
    ) -> Self {
        let cpu_secs = context
            .timeout_secs()
            .saturating_add(grace_period.as_secs())
            .saturating_add(1);

        let mut builder = Self::builder()
            .network_enabled(context.network_enabled())
            .cpu_time_secs(cpu_secs)
            .contain_process_tree(true);

        if context.memory_limit_mb() > 0 {
            builder = builder.memory_limit_bytes(context.memory_limit_bytes());
        }
        if let Some(mb) = sandbox.max_file_size_mb {
            builder = builder.max_file_size_bytes(mb.saturating_mul(1024 * 1024));
        }
        if let Some(count) = sandbox.max_processes {
            builder = builder.max_processes(count);
        }

        builder.build()
    }
}

/// Builder for [`ResourcePolicy`].
#[derive(Debug, Default)]
pub struct ResourcePolicyBuilder {
    inner: ResourcePolicy,
}

impl ResourcePolicyBuilder {
    #[must_use]
    pub fn memory_limit_bytes(mut self, bytes: u64) -> Self {
        self.inner.memory_limit_bytes = Some(bytes);
        self
    }

    #[must_use]
    pub fn network_enabled(mut self, enabled: bool) -> Self {
        self.inner.network_enabled = enabled;
        self
    }

    #[must_use]
    pub fn cpu_time_secs(mut self, secs: u64) -> Self {
        self.inner.cpu_time_secs = Some(secs);
        self
    }

    #[must_use]
    pub fn max_file_size_bytes(mut self, bytes: u64) -> Self {
        self.inner.max_file_size_bytes = Some(bytes);
        self
    }

    #[must_use]
    pub fn max_processes(mut self, count: u64) -> Self {
        self.inner.max_processes = Some(count);
        self
    }

    #[must_use]
    pub fn contain_process_tree(mut self, contain: bool) -> Self {
        self.inner.contain_process_tree = contain;
        self
    }

    #[must_use]
    pub fn build(self) -> ResourcePolicy {
        self.inner
    }
}

/// Outcome of one requested control.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Enforcement {
    /// The control is installed on the process.
    Applied,
    /// The policy did not ask for this control.
    NotRequested,
    /// The control was requested but could not be installed.
    Unsupported {
        /// Why the control is unavailable.
        reason: String,
    },
}

impl Enforcement {
    pub fn unsupported(reason: impl Into<String>) -> Self {
        Self::Unsupported {
            reason: reason.into(),
        }
    }

    /// `Applied` if `requested`, otherwise `NotRequested`.
    pub fn applied_if(requested: bool) -> Self {
        if requested {
            Self::Applied
        } else {
            Self::NotRequested
        }
    }

    pub fn is_unsupported(&self) -> bool {
        matches!(self, Self::Unsupported { .. })
    }
}

/// What a sandbox installed on a command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnforcementReport {
    /// Name of the sandbox implementation.
    pub sandbox: String,
    pub memory: Enforcement,
    pub network: Enforcement,
    pub cpu_time: Enforcement,
    pub file_size: Enforcement,
    pub processes: Enforcement,
    /// Descendants cannot outlive the artifact.
    pub process_tree: Enforcement,
}

impl EnforcementReport {
    /// A report with every control marked `NotRequested`.
    pub fn new(sandbox: impl Into<String>) -> Self {
        Self {
            sandbox: sandbox.into(),
            memory: Enforcement::NotRequested,
            network: Enforcement::NotRequested,
            cpu_time: Enforcement::NotRequested,
            file_size: Enforcement::NotRequested,
            processes: Enforcement::NotRequested,
            process_tree: Enforcement::NotRequested,
        }
    }

    /// Requested controls that were not installed, as `(control, reason)`.
    pub fn unenforced(&self) -> Vec<(&'static str, &str)> {
        [
            ("memory", &self.memory),
            ("network", &self.network),
            ("cpu_time", &self.cpu_time),
            ("file_size", &self.file_size),
            ("processes", &self.processes),
            ("process_tree", &self.process_tree),
        ]
        .into_iter()
        .filter_map(|(name, enforcement)| match enforcement {
            Enforcement::Unsupported { reason } => Some((name, reason.as_str())),
            _ => None,
        })
        .collect()
    }

    /// Returns `true` if every requested control was installed.
    pub fn fully_enforced(&self) -> bool {
        self.unenforced().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_default_is_locked_down_network() {
        let policy = ResourcePolicy::default();
        assert!(!policy.network_enabled);
        assert!(policy.memory_limit_bytes.is_none());
        assert!(policy.cpu_time_secs.is_none());
        assert!(!policy.contain_process_tree);
    }

    #[test]
    fn test_builder() {
        let policy = ResourcePolicy::builder()
            .memory_limit_bytes(1024)
            .network_enabled(true)
            .cpu_time_secs(3)
            .max_file_size_bytes(2048)
            .max_processes(8)
            .build();

        assert_eq!(policy.memory_limit_bytes, Some(1024));
        assert!(policy.network_enabled);
        assert_eq!(policy.cpu_time_secs, Some(3));
        assert_eq!(policy.max_file_size_bytes, Some(2048));
        assert_eq!(policy.max_processes, Some(8));
    }

    #[test]
    fn test_for_execution() {
        let context = ExecutionContext::builder()
            .timeout_secs(2)
            .memory_limit_mb(64)
            .build();
        let sandbox = SandboxConfig {
            max_processes: Some(16),
            ..Default::default()
        };

        let policy = ResourcePolicy::for_execution(&context, &sandbox, Duration::from_secs(5));

        assert_eq!(policy.memory_limit_bytes, Some(64 * 1024 * 1024));
        assert!(!policy.network_enabled);
        assert_eq!(policy.cpu_time_secs, Some(8));
        assert_eq!(policy.max_file_size_bytes, Some(64 * 1024 * 1024));
        assert_eq!(policy.max_processes, Some(16));
        assert!(policy.contain_process_tree);
    }

    #[test]
    fn test_for_execution_zero_memory_means_no_ceiling() {
        let context = ExecutionContext::builder().memory_limit_mb(0).build();
        let policy = ResourcePolicy::for_execution(
            &context,
            &SandboxConfig::default(),
            Duration::from_secs(5),
        );

        assert!(policy.memory_limit_bytes.is_none());
    }

    #[test]
    fn test_report_unenforced() {
        let mut report = EnforcementReport::new("test");
        assert!(report.fully_enforced());

        report.memory = Enforcement::Applied;
        report.network = Enforcement::unsupported("no namespaces");

        assert!(!report.fully_enforced());
        assert_eq!(report.unenforced(), vec![("network", "no namespaces")]);
    }

    #[test]
    fn test_enforcement_applied_if() {
        assert_eq!(Enforcement::applied_if(true), Enforcement::Applied);
        assert_eq!(Enforcement::applied_if(false), Enforcement::NotRequested);
        assert!(Enforcement::unsupported("x").is_unsupported());
    }
}
