//! Compile stage: `cargo build` against a workspace.

use std::time::Duration;

use tokio::process::Command;
use tracing::{info, instrument, warn};

use coderun_common::{ExecutionContext, PipelineError};

use crate::process::{BoundedProcess, StageResult};
use crate::workspace::Workspace;

/// Runs the build toolchain for one workspace.
///
/// Compilation is deterministic for identical inputs, so a failed build is
/// never retried.
#[derive(Debug, Clone)]
pub struct CompileStage {
    program: String,
    offline: bool,
    max_output_bytes: usize,
}

impl CompileStage {
    /// Create a compile stage.
    ///
    /// # Arguments
    ///
    /// * `program` - The build program, normally `cargo`
    /// * `offline` - Pass `--offline` so dependencies resolve from the local cache only
    /// * `max_output_bytes` - Capture limit for each output stream
    pub fn new(program: impl Into<String>, offline: bool, max_output_bytes: usize) -> Self {
        Self {
            program: program.into(),
            offline,
            max_output_bytes,
        }
    }

    /// Build the command line for `workspace`.
    pub fn command(&self, workspace: &Workspace, context: &ExecutionContext) -> Command {
        let mut command = Command::new(&self.program);
        command
            .arg("build")
            .arg("--manifest-path")
            .arg(workspace.manifest_path())
            .arg("--target-dir")
            .arg(workspace.target_dir())
            .arg("--color")
            .arg("never");

        if context.optimization_level().is_optimized() {
            command.arg("--release");
        }

        let features = workspace.manifest().features();
        if !features.is_empty() {
            command.arg("--features").arg(features.join(","));
        }

        if self.offline {
            command.arg("--offline");
        }

        command
            .current_dir(workspace.root_path())
            .env_remove("CARGO_BUILD_TARGET")
            .env_remove("CARGO_TARGET_DIR")
            .env_remove("RUSTFLAGS");

        command
    }

    /// Compile the workspace, bounded by the context's timeout.
    ///
    /// Returns the stage result whatever the build's outcome; use
    /// [`CompileStage::failure`] to classify it.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Internal`] if the toolchain cannot be spawned.
    #[instrument(
        skip_all,
        fields(workspace_id = %workspace.id(), level = %context.optimization_level())
    )]
    pub async fn run(
        &self,
        workspace: &Workspace,
        context: &ExecutionContext,
    ) -> Result<StageResult, PipelineError> {
        let mut command = self.command(workspace, context);

        let process = BoundedProcess::spawn(&mut command, self.max_output_bytes).map_err(|e| {
            PipelineError::internal(format!("failed to spawn '{}': {e}", self.program))
        })?;

        // Compile time is not user logic, so no grace period: kill at the bound.
        let result = process
            .wait(context.timeout(), Duration::ZERO)
            .await
            .map_err(|e| PipelineError::internal(format!("failed waiting on build: {e}")))?;

        if result.success {
            info!(
                duration_ms = result.duration.as_millis(),
                "Compilation succeeded"
            );
        } else if result.timed_out {
            warn!(
                duration_ms = result.duration.as_millis(),
                "Compilation timed out"
            );
        } else {
            info!(
                exit_code = result.exit_code,
                duration_ms = result.duration.as_millis(),
                "Compilation failed"
            );
        }

        Ok(result)
    }

    /// The error a finished build represents, if it failed.
    pub fn failure(result: &StageResult, context: &ExecutionContext) -> Option<PipelineError> {
        if result.success {
            None
        } else if result.timed_out {
            Some(PipelineError::CompileTimeout {
                timeout_secs: context.timeout_secs(),
            })
        } else {
            Some(PipelineError::CompileFailure {
                exit_code: result.exit_code,
                diagnostics: result.stderr_lines.clone(),
            })
        }
    }
}
