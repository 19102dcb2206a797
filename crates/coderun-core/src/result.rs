//! Execution results and the external adapter shape.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use coderun_common::ErrorKind;
use coderun_sandbox::EnforcementReport;

use crate::process::duration_secs;
use crate::workspace::WorkspaceRef;

/// Lifecycle of one request through the pipeline.
///
/// ```text
/// Created → Compiling → CompileFailed
///                     → Compiled → Executing → ExecuteFailed
///                                            → Completed
/// (any non-terminal state) → Faulted
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Created,
    Compiling,
    Compiled,
    CompileFailed,
    Executing,
    ExecuteFailed,
    Completed,
    /// Workspace creation failed or the pipeline hit an internal fault.
    Faulted,
}

impl PipelineState {
    /// Returns `true` for states that end a request.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::CompileFailed | Self::ExecuteFailed | Self::Completed | Self::Faulted
        )
    }

    /// Returns `true` if moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(self, next: Self) -> bool {
        match (self, next) {
            (from, Self::Faulted) => !from.is_terminal(),
            (Self::Created, Self::Compiling)
            | (Self::Compiling, Self::CompileFailed | Self::Compiled)
            | (Self::Compiled, Self::Executing)
            | (Self::Executing, Self::ExecuteFailed | Self::Completed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::Compiling => "compiling",
            Self::Compiled => "compiled",
            Self::CompileFailed => "compile_failed",
            Self::Executing => "executing",
            Self::ExecuteFailed => "execute_failed",
            Self::Completed => "completed",
            Self::Faulted => "faulted",
        };
        f.write_str(name)
    }
}

/// The report returned for every request.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub success: bool,
    /// The artifact's stdout; empty when it never ran.
    pub output: String,
    /// Error summary first, then diagnostics. Empty on success.
    pub errors: Vec<String>,
    #[serde(with = "duration_secs")]
    pub compile_duration: Duration,
    /// Zero when the execute stage never ran.
    #[serde(with = "duration_secs")]
    pub execute_duration: Duration,
    pub exit_code: i32,
    pub workspace: Option<WorkspaceRef>,
    pub state: PipelineState,
    pub error_kind: Option<ErrorKind>,
    /// Controls the sandbox installed, when the artifact ran.
    pub enforcement: Option<EnforcementReport>,
    /// Output was cut at the capture limit.
    pub output_truncated: bool,
    pub toolchain_name: String,
}

impl ExecutionResult {
    /// Convert to the shape external callers consume.
    pub fn to_adapter(&self) -> AdapterResponse {
        AdapterResponse {
            success: self.success,
            output: self.output.clone(),
            errors: self.errors.clone(),
            exit_code: self.exit_code,
            metadata: AdapterMetadata {
                compilation_time: self.compile_duration.as_secs_f64(),
                execution_time: self.execute_duration.as_secs_f64(),
                toolchain_name: self.toolchain_name.clone(),
            },
        }
    }
}

/// Adapter shape: `{ success, output, errors[], exit_code, metadata }`.
///
/// Field names and nesting are a compatibility contract; do not rename.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdapterResponse {
    pub success: bool,
    pub output: String,
    pub errors: Vec<String>,
    pub exit_code: i32,
    pub metadata: AdapterMetadata,
}

/// Timing and toolchain metadata; times are in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdapterMetadata {
    pub compilation_time: f64,
    pub execution_time: f64,
    pub toolchain_name: String,
}
