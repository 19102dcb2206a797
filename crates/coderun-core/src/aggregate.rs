//! Merging stage outcomes into one [`ExecutionResult`].

use std::time::Duration;

use coderun_common::{ExecutionContext, PipelineError};

use crate::compile::CompileStage;
use crate::execute::{ExecuteOutcome, ExecuteStage};
use crate::process::StageResult;
use crate::result::{ExecutionResult, PipelineState};
use crate::workspace::WorkspaceRef;

/// Builds the caller-facing report from stage outcomes.
#[derive(Debug, Clone)]
pub struct ResultAggregator {
    toolchain_name: String,
}

impl ResultAggregator {
    pub fn new(toolchain_name: impl Into<String>) -> Self {
        Self {
            toolchain_name: toolchain_name.into(),
        }
    }

    /// Combine the compile outcome and, if it ran, the execute outcome.
    ///
    /// A failed compile yields a zero execute duration and carries the
    /// build's exit code (or the timeout sentinel).
    pub fn aggregate(
        &self,
        compile: &StageResult,
        execute: Option<&ExecuteOutcome>,
        context: &ExecutionContext,
        workspace: Option<WorkspaceRef>,
    ) -> ExecutionResult {
        if let Some(error) = CompileStage::failure(compile, context) {
            return self.failed(PipelineState::CompileFailed, &error, compile, None, workspace);
        }

        let Some(outcome) = execute else {
            let error = PipelineError::internal("compile succeeded but the artifact never ran");
            return self.fault(&error, Some(compile), workspace);
        };

        match ExecuteStage::failure(&outcome.result, context) {
            Some(error) => self.failed(
                PipelineState::ExecuteFailed,
                &error,
                compile,
                Some(outcome),
                workspace,
            ),
            None => ExecutionResult {
                success: true,
                output: outcome.result.stdout.clone(),
                errors: Vec::new(),
                compile_duration: compile.duration,
                execute_duration: outcome.result.duration,
                exit_code: outcome.result.exit_code,
                workspace,
                state: PipelineState::Completed,
                error_kind: None,
                enforcement: Some(outcome.enforcement.clone()),
                output_truncated: outcome.result.output_truncated,
                toolchain_name: self.toolchain_name.clone(),
            },
        }
    }

    /// Report a failure that did not come from a finished stage.
    pub fn fault(
        &self,
        error: &PipelineError,
        compile: Option<&StageResult>,
        workspace: Option<WorkspaceRef>,
    ) -> ExecutionResult {
        ExecutionResult {
            success: false,
            output: String::new(),
            errors: error.to_report_lines(),
            compile_duration: compile.map_or(Duration::ZERO, |result| result.duration),
            execute_duration: Duration::ZERO,
            exit_code: error.exit_code(),
            workspace,
            state: PipelineState::Faulted,
            error_kind: Some(error.kind()),
            enforcement: None,
            output_truncated: false,
            toolchain_name: self.toolchain_name.clone(),
        }
    }

    fn failed(
        &self,
        state: PipelineState,
        error: &PipelineError,
        compile: &StageResult,
        execute: Option<&ExecuteOutcome>,
        workspace: Option<WorkspaceRef>,
    ) -> ExecutionResult {
        ExecutionResult {
            success: false,
            output: execute.map(|o| o.result.stdout.clone()).unwrap_or_default(),
            errors: error.to_report_lines(),
            compile_duration: compile.duration,
            execute_duration: execute.map_or(Duration::ZERO, |o| o.result.duration),
            exit_code: error.exit_code(),
            workspace,
            state,
            error_kind: Some(error.kind()),
            enforcement: execute.map(|o| o.enforcement.clone()),
            output_truncated: compile.output_truncated
                || execute.is_some_and(|o| o.result.output_truncated),
            toolchain_name: self.toolchain_name.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coderun_common::{ErrorKind, TIMEOUT_EXIT_CODE};
    use coderun_sandbox::EnforcementReport;

    fn compiled() -> StageResult {
        StageResult {
            success: true,
            duration: Duration::from_secs(2),
            ..Default::default()
        }
    }

    fn ran(result: StageResult) -> ExecuteOutcome {
        ExecuteOutcome {
            result,
            enforcement: EnforcementReport::new("test"),
        }
    }

    fn aggregator() -> ResultAggregator {
        ResultAggregator::new("cargo 1.85.0")
    }

    #[test]
    fn test_success() {
        let execute = ran(StageResult {
            success: true,
            stdout: "hi\n".into(),
            duration: Duration::from_millis(10),
            ..Default::default()
        });

        let result = aggregator().aggregate(
            &compiled(),
            Some(&execute),
            &ExecutionContext::default(),
            None,
        );

        assert!(result.success);
        assert_eq!(result.output, "hi\n");
        assert!(result.errors.is_empty());
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.state, PipelineState::Completed);
        assert_eq!(result.compile_duration, Duration::from_secs(2));
        assert_eq!(result.toolchain_name, "cargo 1.85.0");
        assert!(result.enforcement.is_some());
    }

    #[test]
    fn test_compile_failure_skips_execute() {
        let compile = StageResult {
            exit_code: 101,
            stderr_lines: vec!["error[E0425]: cannot find value `undefined_symbol`".into()],
            duration: Duration::from_secs(1),
            ..Default::default()
        };

        let result = aggregator().aggregate(&compile, None, &ExecutionContext::default(), None);

        assert!(!result.success);
        assert_eq!(result.state, PipelineState::CompileFailed);
        assert_eq!(result.error_kind, Some(ErrorKind::CompileFailure));
        assert_eq!(result.exit_code, 101);
        assert_eq!(result.execute_duration, Duration::ZERO);
        assert!(result.errors.iter().any(|line| line.contains("E0425")));
        assert!(result.enforcement.is_none());
    }

    #[test]
    fn test_compile_timeout_uses_sentinel() {
        let compile = StageResult {
            timed_out: true,
            exit_code: TIMEOUT_EXIT_CODE,
            ..Default::default()
        };

        let result = aggregator().aggregate(&compile, None, &ExecutionContext::default(), None);

        assert_eq!(result.error_kind, Some(ErrorKind::CompileTimeout));
        assert_eq!(result.exit_code, TIMEOUT_EXIT_CODE);
    }

    #[test]
    fn test_execute_timeout_keeps_partial_output() {
        let execute = ran(StageResult {
            stdout: "partial".into(),
            timed_out: true,
            exit_code: TIMEOUT_EXIT_CODE,
            duration: Duration::from_secs(2),
            ..Default::default()
        });
        let context = ExecutionContext::builder().timeout_secs(2).build();

        let result = aggregator().aggregate(&compiled(), Some(&execute), &context, None);

        assert!(!result.success);
        assert_eq!(result.state, PipelineState::ExecuteFailed);
        assert_eq!(result.error_kind, Some(ErrorKind::ExecuteTimeout));
        assert_eq!(result.exit_code, TIMEOUT_EXIT_CODE);
        assert_eq!(result.output, "partial");
        assert_eq!(result.errors[0], "Execution timed out after 2s");
    }

    #[test]
    fn test_missing_execute_after_compile_is_fault() {
        let result =
            aggregator().aggregate(&compiled(), None, &ExecutionContext::default(), None);

        assert_eq!(result.state, PipelineState::Faulted);
        assert_eq!(result.error_kind, Some(ErrorKind::Internal));
    }

    #[test]
    fn test_fault() {
        let error = PipelineError::internal("pipeline task panicked");

        let result = aggregator().fault(&error, None, None);

        assert!(!result.success);
        assert_eq!(result.exit_code, 1);
        assert_eq!(result.errors, vec!["Internal error: pipeline task panicked"]);
        assert_eq!(result.compile_duration, Duration::ZERO);
    }
}
