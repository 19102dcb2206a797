//! Pluggable process sandbox for coderun.
//!
//! This crate provides the enforcement capability the execute stage uses to
//! confine compiled artifacts. Platform-specific mechanisms sit behind the
//! [`ProcessSandbox`] trait so they can be substituted per target.
//!
//! # Implementations
//!
//! - [`RlimitSandbox`]: `setrlimit` ceilings plus, on Linux, a private
//!   network namespace and a PID namespace that takes every descendant
//!   down with the artifact (Unix only)
//! - [`UnconfinedSandbox`]: applies nothing and says so
//!
//! # Contract
//!
//! A sandbox attempts every control in the [`ResourcePolicy`] and returns an
//! [`EnforcementReport`] stating which ones it installed. It fails only when
//! a control it was configured to require cannot be installed.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::warn;

use coderun_common::{SandboxConfig, SandboxError};

pub mod policy;
#[cfg(unix)]
pub mod rlimit;
pub mod unconfined;

pub use policy::{Enforcement, EnforcementReport, ResourcePolicy, ResourcePolicyBuilder};
#[cfg(unix)]
pub use rlimit::RlimitSandbox;
pub use unconfined::UnconfinedSandbox;

/// Capability that confines a child process.
#[async_trait]
pub trait ProcessSandbox: Send + Sync + std::fmt::Debug {
    /// Short implementation name, used in logs and reports.
    fn name(&self) -> &'static str;

    /// Install enforcement on `command` before it is spawned.
    async fn prepare(
        &self,
        command: &mut Command,
        policy: &ResourcePolicy,
    ) -> Result<EnforcementReport, SandboxError>;

    /// Hook invoked with the child's pid right after spawn.
    ///
    /// Mechanisms that attach an existing process (control groups, job
    /// objects) do their work here.
    async fn attach(&self, _pid: u32) -> Result<(), SandboxError> {
        Ok(())
    }
}

/// Build the sandbox selected by configuration for this platform.
pub fn default_sandbox(config: &SandboxConfig) -> Arc<dyn ProcessSandbox> {
    if !config.enabled {
        warn!("Process sandbox disabled by configuration; artifacts run unconfined");
        return Arc::new(UnconfinedSandbox::new("sandbox disabled by configuration"));
    }

    #[cfg(unix)]
    {
        Arc::new(RlimitSandbox::new(config))
    }

    #[cfg(not(unix))]
    {
        warn!("No process sandbox for this platform; artifacts run unconfined");
        Arc::new(UnconfinedSandbox::new("no sandbox for this platform"))
    }
}
