//! External toolchain discovery.
//!
//! The [`Toolchain`] is probed once at startup. A missing or unresponsive
//! toolchain is fatal: no request can succeed without it, so the service
//! refuses to start rather than failing every request.

use std::process::Stdio;

use tokio::process::Command;
use tokio::time::timeout;
use tracing::{info, instrument};

use coderun_common::{PipelineError, ToolchainConfig};

/// A build toolchain that answered its version probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toolchain {
    program: String,
    name: String,
}

impl Toolchain {
    /// Probe the configured toolchain by running `<program> --version`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::ToolchainUnavailable`] if the program cannot
    /// be spawned, exits unsuccessfully, prints nothing, or does not answer
    /// within the probe timeout.
    #[instrument(skip(config), fields(program = %config.program))]
    pub async fn detect(config: &ToolchainConfig) -> Result<Self, PipelineError> {
        let program = config.program.as_str();

        let mut command = Command::new(program);
        command
            .arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = timeout(config.probe_timeout(), command.output())
            .await
            .map_err(|_| {
                PipelineError::toolchain_unavailable(
                    program,
                    format!(
                        "no answer to --version within {}s",
                        config.probe_timeout_secs
                    ),
                )
            })?
            .map_err(|e| PipelineError::toolchain_unavailable(program, e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PipelineError::toolchain_unavailable(
                program,
                format!("--version exited with {}: {}", output.status, stderr.trim()),
            ));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let name = stdout
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .ok_or_else(|| {
                PipelineError::toolchain_unavailable(program, "--version printed nothing")
            })?
            .to_string();

        info!(toolchain = %name, "Toolchain detected");

        Ok(Self {
            program: program.to_string(),
            name,
        })
    }

    /// Build a toolchain handle without probing.
    ///
    /// Meant for embedding and tests where the program is known to exist.
    pub fn from_parts(program: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            name: name.into(),
        }
    }

    /// The program invoked for builds.
    pub fn program(&self) -> &str {
        &self.program
    }

    /// First line of the version output, e.g. `cargo 1.85.0 (d73d2caf9 2024-12-31)`.
    pub fn name(&self) -> &str {
        &self.name
    }
}
