//! Error types for coderun.
//!
//! This module defines the error taxonomy using `thiserror`:
//! - [`PipelineError`]: Every failure the compile-and-execute pipeline can report
//! - [`SandboxError`]: Failures of the process sandbox capability
//! - [`ErrorKind`]: Fieldless mirror of [`PipelineError`] for reports

use std::fmt;
use std::io;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Exit code reported for processes killed because they exceeded their bound.
///
/// Real exit statuses are `0..=255` and signal deaths are reported as
/// `128 + signal`, so this value never collides with either.
pub const TIMEOUT_EXIT_CODE: i32 = -1;

/// Failures of the compile-and-execute pipeline.
///
/// None of these cross the orchestrator boundary as an `Err`: the orchestrator
/// folds each of them into an unsuccessful execution result.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// The external toolchain could not be found or did not respond.
    ///
    /// This is raised at startup only and halts the service.
    #[error("Toolchain unavailable: '{program}': {reason}")]
    ToolchainUnavailable {
        /// The program that was probed.
        program: String,
        /// Why the probe failed.
        reason: String,
    },

    /// The workspace directory or one of its files could not be written.
    #[error("Workspace creation failed at {path}: {source}")]
    WorkspaceCreationFailed {
        /// The path that could not be written.
        path: String,
        #[source]
        source: io::Error,
    },

    /// Compilation exceeded its bound and was killed.
    #[error("Compilation timed out after {timeout_secs}s")]
    CompileTimeout {
        /// The bound that was exceeded.
        timeout_secs: u64,
    },

    /// The toolchain exited with a nonzero status.
    #[error("Compilation failed with exit code {exit_code}")]
    CompileFailure {
        /// Exit code of the build process.
        exit_code: i32,
        /// Diagnostic lines from the build's stderr.
        diagnostics: Vec<String>,
    },

    /// The build reported success but produced no artifact.
    ///
    /// This indicates a bug in artifact path resolution, not a user error.
    #[error("Build artifact missing after successful compile: {path}")]
    ArtifactMissing {
        /// Where the artifact was expected.
        path: String,
    },

    /// The artifact exceeded its bound and was killed.
    #[error("Execution timed out after {timeout_secs}s")]
    ExecuteTimeout {
        /// The user-level bound that was exceeded (grace period excluded).
        timeout_secs: u64,
    },

    /// The artifact exited with a nonzero status.
    #[error("Execution failed with exit code {exit_code}")]
    ExecuteFailure {
        /// Exit code of the artifact.
        exit_code: i32,
        /// Lines the artifact wrote to stderr.
        diagnostics: Vec<String>,
    },

    /// The workspace could not be removed.
    ///
    /// Logged only; never alters a returned result.
    #[error("Workspace cleanup failed at {path}: {source}")]
    CleanupFailure {
        /// The workspace root.
        path: String,
        #[source]
        source: io::Error,
    },

    /// The sandbox could not prepare the artifact's process.
    #[error("Sandbox setup failed: {0}")]
    Sandbox(#[from] SandboxError),

    /// An unexpected fault inside the pipeline.
    #[error("Internal error: {reason}")]
    Internal {
        /// Description of the fault.
        reason: String,
    },
}

/// Errors from process sandbox implementations.
#[derive(Error, Debug)]
pub enum SandboxError {
    /// A resource limit value could not be represented or applied.
    #[error("Resource limit '{resource}' rejected: {reason}")]
    LimitRejected {
        /// Name of the resource (e.g. `memory`).
        resource: String,
        /// Why the limit was rejected.
        reason: String,
    },

    /// An isolation primitive failed while it was required.
    #[error("Isolation setup failed: {reason}")]
    IsolationFailed {
        /// Description of the failure.
        reason: String,
    },
}

/// Fieldless classification of a [`PipelineError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ToolchainUnavailable,
    WorkspaceCreationFailed,
    CompileTimeout,
    CompileFailure,
    ArtifactMissing,
    ExecuteTimeout,
    ExecuteFailure,
    CleanupFailure,
    SandboxSetup,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::ToolchainUnavailable => "toolchain_unavailable",
            ErrorKind::WorkspaceCreationFailed => "workspace_creation_failed",
            ErrorKind::CompileTimeout => "compile_timeout",
            ErrorKind::CompileFailure => "compile_failure",
            ErrorKind::ArtifactMissing => "artifact_missing",
            ErrorKind::ExecuteTimeout => "execute_timeout",
            ErrorKind::ExecuteFailure => "execute_failure",
            ErrorKind::CleanupFailure => "cleanup_failure",
            ErrorKind::SandboxSetup => "sandbox_setup",
            ErrorKind::Internal => "internal",
        };
        f.write_str(name)
    }
}

impl PipelineError {
    /// Create a new `ToolchainUnavailable` error.
    pub fn toolchain_unavailable(program: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ToolchainUnavailable {
            program: program.into(),
            reason: reason.into(),
        }
    }

    /// Create a new `WorkspaceCreationFailed` error.
    pub fn workspace_creation(path: impl fmt::Display, source: io::Error) -> Self {
        Self::WorkspaceCreationFailed {
            path: path.to_string(),
            source,
        }
    }

    /// Create a new `ArtifactMissing` error.
    pub fn artifact_missing(path: impl fmt::Display) -> Self {
        Self::ArtifactMissing {
            path: path.to_string(),
        }
    }

    /// Create a new `Internal` error.
    pub fn internal(reason: impl Into<String>) -> Self {
        Self::Internal {
            reason: reason.into(),
        }
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ToolchainUnavailable { .. } => ErrorKind::ToolchainUnavailable,
            Self::WorkspaceCreationFailed { .. } => ErrorKind::WorkspaceCreationFailed,
            Self::CompileTimeout { .. } => ErrorKind::CompileTimeout,
            Self::CompileFailure { .. } => ErrorKind::CompileFailure,
            Self::ArtifactMissing { .. } => ErrorKind::ArtifactMissing,
            Self::ExecuteTimeout { .. } => ErrorKind::ExecuteTimeout,
            Self::ExecuteFailure { .. } => ErrorKind::ExecuteFailure,
            Self::CleanupFailure { .. } => ErrorKind::CleanupFailure,
            Self::Sandbox(_) => ErrorKind::SandboxSetup,
            Self::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// Returns `true` if this error means a process was killed for exceeding its bound.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::CompileTimeout { .. } | Self::ExecuteTimeout { .. }
        )
    }

    /// Diagnostic lines carried by the error, if any.
    pub fn diagnostics(&self) -> &[String] {
        match self {
            Self::CompileFailure { diagnostics, .. } | Self::ExecuteFailure { diagnostics, .. } => {
                diagnostics
            }
            _ => &[],
        }
    }

    /// The exit code a report should carry for this error.
    ///
    /// Timeouts map to [`TIMEOUT_EXIT_CODE`]; failures without a process
    /// exit status map to `1`.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::CompileFailure { exit_code, .. } | Self::ExecuteFailure { exit_code, .. } => {
                *exit_code
            }
            Self::CompileTimeout { .. } | Self::ExecuteTimeout { .. } => TIMEOUT_EXIT_CODE,
            _ => 1,
        }
    }

    /// Render the error as report lines: the summary first, then diagnostics.
    pub fn to_report_lines(&self) -> Vec<String> {
        std::iter::once(self.to_string())
            .chain(self.diagnostics().iter().cloned())
            .collect()
    }
}
