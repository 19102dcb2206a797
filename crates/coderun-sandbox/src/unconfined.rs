//! Sandbox that installs nothing.
//!
//! Used when the platform sandbox is disabled by configuration or the target
//! has no implementation. Every requested control is reported as unsupported
//! so callers log it instead of assuming enforcement.

use async_trait::async_trait;
use tokio::process::Command;

use coderun_common::SandboxError;

use crate::ProcessSandbox;
use crate::policy::{Enforcement, EnforcementReport, ResourcePolicy};

/// A [`ProcessSandbox`] that applies no controls.
#[derive(Debug, Clone)]
pub struct UnconfinedSandbox {
    reason: String,
}

impl UnconfinedSandbox {
    /// Create an unconfined sandbox; `reason` is attached to every
    /// unsupported control in its reports.
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl ProcessSandbox for UnconfinedSandbox {
    fn name(&self) -> &'static str {
        "unconfined"
    }

    async fn prepare(
        &self,
        _command: &mut Command,
        policy: &ResourcePolicy,
    ) -> Result<EnforcementReport, SandboxError> {
        let unsupported = |requested: bool| {
            if requested {
                Enforcement::unsupported(self.reason.clone())
            } else {
                Enforcement::NotRequested
            }
        };

        let mut report = EnforcementReport::new(self.name());
        report.memory = unsupported(policy.memory_limit_bytes.is_some());
        report.network = unsupported(!policy.network_enabled);
        report.cpu_time = unsupported(policy.cpu_time_secs.is_some());
        report.file_size = unsupported(policy.max_file_size_bytes.is_some());
        report.processes = unsupported(policy.max_processes.is_some());
        report.process_tree = unsupported(policy.contain_process_tree);

        Ok(report)
    }
}
