//! Execute stage: run a compiled artifact under the sandbox.

use std::sync::Arc;
use std::time::Duration;

use tokio::process::Command;
use tracing::{error, info, instrument, warn};

use coderun_common::{ExecutionContext, PipelineError, SandboxConfig};
use coderun_sandbox::{EnforcementReport, ProcessSandbox, ResourcePolicy};

use crate::process::{BoundedProcess, StageResult};
use crate::workspace::Workspace;

/// `PATH` given to artifacts, whose environment is otherwise empty.
const ARTIFACT_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

/// A finished execution and the controls that were in force.
#[derive(Debug, Clone)]
pub struct ExecuteOutcome {
    pub result: StageResult,
    pub enforcement: EnforcementReport,
}

/// Runs compiled artifacts.
#[derive(Debug, Clone)]
pub struct ExecuteStage {
    sandbox: Arc<dyn ProcessSandbox>,
    sandbox_config: SandboxConfig,
    grace_period: Duration,
    max_output_bytes: usize,
}

impl ExecuteStage {
    pub fn new(
        sandbox: Arc<dyn ProcessSandbox>,
        sandbox_config: SandboxConfig,
        grace_period: Duration,
        max_output_bytes: usize,
    ) -> Self {
        Self {
            sandbox,
            sandbox_config,
            grace_period,
            max_output_bytes,
        }
    }

    /// Name of the sandbox in use.
    pub fn sandbox_name(&self) -> &'static str {
        self.sandbox.name()
    }

    /// Run the workspace's artifact.
    ///
    /// The process gets `context.timeout()`; after that its group receives
    /// `SIGTERM` and, once the grace period is spent, `SIGKILL`.
    ///
    /// # Errors
    ///
    /// - [`PipelineError::ArtifactMissing`] if the build left no artifact
    /// - [`PipelineError::Sandbox`] if the sandbox cannot prepare the process
    /// - [`PipelineError::Internal`] if the artifact cannot be spawned
    #[instrument(skip_all, fields(workspace_id = %workspace.id()))]
    pub async fn run(
        &self,
        workspace: &Workspace,
        context: &ExecutionContext,
    ) -> Result<ExecuteOutcome, PipelineError> {
        let artifact = workspace.artifact_path(context.optimization_level());
        if !tokio::fs::try_exists(&artifact).await.unwrap_or(false) {
            error!(
                artifact = %artifact.display(),
                level = %context.optimization_level(),
                "Build succeeded but artifact is missing; artifact path resolution is wrong"
            );
            return Err(PipelineError::artifact_missing(artifact.display()));
        }

        let mut command = Command::new(&artifact);
        command
            .current_dir(workspace.root_path())
            .env_clear()
            .env("PATH", ARTIFACT_PATH)
            .env("HOME", workspace.root_path());

        let policy =
            ResourcePolicy::for_execution(context, &self.sandbox_config, self.grace_period);
        let enforcement = self.sandbox.prepare(&mut command, &policy).await?;

        for (control, reason) in enforcement.unenforced() {
            warn!(
                control,
                reason,
                sandbox = enforcement.sandbox.as_str(),
                "Requested resource control not enforced"
            );
        }

        let process = BoundedProcess::spawn(&mut command, self.max_output_bytes).map_err(|e| {
            PipelineError::internal(format!(
                "failed to spawn artifact {}: {e}",
                artifact.display()
            ))
        })?;

        if let Some(pid) = process.pid() {
            self.sandbox.attach(pid).await?;
        }

        let result = process
            .wait(context.timeout(), self.grace_period)
            .await
            .map_err(|e| PipelineError::internal(format!("failed waiting on artifact: {e}")))?;

        if result.timed_out {
            warn!(
                duration_ms = result.duration.as_millis(),
                timeout_secs = context.timeout_secs(),
                "Execution timed out"
            );
        } else {
            info!(
                exit_code = result.exit_code,
                duration_ms = result.duration.as_millis(),
                "Execution finished"
            );
        }

        Ok(ExecuteOutcome {
            result,
            enforcement,
        })
    }

    /// The error a finished execution represents, if it failed.
    pub fn failure(result: &StageResult, context: &ExecutionContext) -> Option<PipelineError> {
        if result.success {
            None
        } else if result.timed_out {
            Some(PipelineError::ExecuteTimeout {
                timeout_secs: context.timeout_secs(),
            })
        } else {
            Some(PipelineError::ExecuteFailure {
                exit_code: result.exit_code,
                diagnostics: result.stderr_lines.clone(),
            })
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    use coderun_common::{OptimizationLevel, TIMEOUT_EXIT_CODE, WorkspaceConfig};
    use coderun_sandbox::{Enforcement, UnconfinedSandbox};

    use crate::manifest::ManifestGenerator;
    use crate::workspace::WorkspaceManager;

    fn stage() -> ExecuteStage {
        ExecuteStage::new(
            Arc::new(UnconfinedSandbox::new("test")),
            SandboxConfig::default(),
            Duration::from_millis(300),
            4096,
        )
    }

    async fn workspace_in(dir: &Path) -> Workspace {
        let config = WorkspaceConfig {
            root: Some(dir.to_path_buf()),
        };
        WorkspaceManager::new(&config, ManifestGenerator::new("submission", "2021"))
            .create("fn main() {}", &ExecutionContext::default())
            .await
            .unwrap()
    }

    /// Put a shell script where the build would have placed the artifact.
    fn fake_artifact(workspace: &Workspace, level: OptimizationLevel, script: &str) {
        let path = workspace.artifact_path(level);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, format!("#!/bin/sh\n{script}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[tokio::test]
    async fn test_missing_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = workspace_in(dir.path()).await;

        let err = stage()
            .run(&workspace, &ExecutionContext::default())
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::ArtifactMissing { .. }));
    }

    #[tokio::test]
    async fn test_runs_artifact_in_workspace_with_clean_env() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = workspace_in(dir.path()).await;
        fake_artifact(
            &workspace,
            OptimizationLevel::Debug,
            "pwd; echo \"home=$HOME\"; echo \"cargo=${CARGO_HOME:-unset}\"",
        );

        let outcome = stage()
            .run(&workspace, &ExecutionContext::default())
            .await
            .unwrap();

        assert!(outcome.result.success);
        let root = workspace.root_path().canonicalize().unwrap();
        let lines: Vec<&str> = outcome.result.stdout.lines().collect();
        assert_eq!(Path::new(lines[0]).canonicalize().unwrap(), root);
        assert_eq!(lines[1], format!("home={}", workspace.root_path().display()));
        assert_eq!(lines[2], "cargo=unset");
        assert_eq!(outcome.enforcement.sandbox, "unconfined");
    }

    #[tokio::test]
    async fn test_release_artifact_location() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = workspace_in(dir.path()).await;
        fake_artifact(&workspace, OptimizationLevel::O3, "echo release");
        let context = ExecutionContext::builder()
            .optimization_level(OptimizationLevel::O3)
            .build();

        let outcome = stage().run(&workspace, &context).await.unwrap();

        assert_eq!(outcome.result.stdout, "release\n");
    }

    #[tokio::test]
    async fn test_timeout_reports_sentinel() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = workspace_in(dir.path()).await;
        fake_artifact(&workspace, OptimizationLevel::Debug, "while :; do :; done");
        let context = ExecutionContext::builder().timeout_secs(1).build();

        let outcome = stage().run(&workspace, &context).await.unwrap();

        assert!(outcome.result.timed_out);
        assert_eq!(outcome.result.exit_code, TIMEOUT_EXIT_CODE);
        assert!(matches!(
            ExecuteStage::failure(&outcome.result, &context),
            Some(PipelineError::ExecuteTimeout { timeout_secs: 1 })
        ));
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_failure() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = workspace_in(dir.path()).await;
        fake_artifact(&workspace, OptimizationLevel::Debug, "echo boom >&2; exit 2");
        let context = ExecutionContext::default();

        let outcome = stage().run(&workspace, &context).await.unwrap();
        let err = ExecuteStage::failure(&outcome.result, &context).unwrap();

        assert_eq!(err.exit_code(), 2);
        assert_eq!(err.diagnostics(), ["boom"]);
    }

    #[tokio::test]
    async fn test_timeout_takes_detached_descendants_with_it() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = workspace_in(dir.path()).await;
        fake_artifact(
            &workspace,
            OptimizationLevel::Debug,
            "setsid sh -c 'sleep 2; touch escaped' & while :; do :; done",
        );
        let stage = ExecuteStage::new(
            coderun_sandbox::default_sandbox(&SandboxConfig::default()),
            SandboxConfig::default(),
            Duration::from_millis(100),
            4096,
        );
        let context = ExecutionContext::builder()
            .timeout_secs(1)
            .network_enabled(true)
            .build();

        let outcome = stage.run(&workspace, &context).await.unwrap();

        assert!(outcome.result.timed_out);
        if outcome.enforcement.process_tree != Enforcement::Applied {
            assert!(outcome.enforcement.process_tree.is_unsupported());
            eprintln!("skipping: process tree containment unavailable");
            return;
        }
        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert!(!workspace.root_path().join("escaped").exists());
    }
}
