//! Integration tests for coderun-core.
//!
//! These tests drive the complete pipeline with the real `cargo`:
//! - Workspace creation and manifest generation
//! - Compilation, including failures and the allowlist
//! - Sandboxed execution and timeouts
//! - Cleanup and concurrency guarantees
//!
//! Each test returns early if no toolchain is installed.

use std::path::Path;
use std::time::{Duration, Instant};

use coderun_common::{
    ErrorKind, ExecutionContext, OptimizationLevel, RuntimeConfig, TIMEOUT_EXIT_CODE,
    WorkspaceConfig,
};
use coderun_core::{Orchestrator, PipelineState, Toolchain};

struct Harness {
    _dir: tempfile::TempDir,
    orchestrator: Orchestrator,
}

impl Harness {
    fn workspace_root(&self) -> &Path {
        self.orchestrator.workspace_root()
    }

    fn leftover_workspaces(&self) -> usize {
        std::fs::read_dir(self.workspace_root()).map_or(0, Iterator::count)
    }
}

async fn harness(max_concurrent: usize) -> Option<Harness> {
    let dir = tempfile::tempdir().unwrap();
    let mut config = RuntimeConfig::default();
    config.workspace = WorkspaceConfig {
        root: Some(dir.path().join("workspaces")),
    };
    config.execution.max_concurrent = max_concurrent;
    config.execution.grace_period_secs = 1;

    let toolchain = match Toolchain::detect(&config.toolchain).await {
        Ok(toolchain) => toolchain,
        Err(e) => {
            eprintln!("skipping: {e}");
            return None;
        }
    };

    Some(Harness {
        _dir: dir,
        orchestrator: Orchestrator::new(&config, toolchain),
    })
}

// ============================================================================
// Test: Hello World
// ============================================================================

#[tokio::test]
async fn test_hello_world() {
    let Some(h) = harness(4).await else { return };

    let result = h
        .orchestrator
        .execute(
            r#"fn main() { println!("hi"); }"#,
            &ExecutionContext::default(),
        )
        .await;

    assert!(result.success, "{:?}", result.errors);
    assert!(result.output.contains("hi"));
    assert_eq!(result.exit_code, 0);
    assert_eq!(result.state, PipelineState::Completed);
    assert!(result.compile_duration > Duration::ZERO);
    assert_eq!(h.leftover_workspaces(), 0);

    let adapter = result.to_adapter();
    assert!(adapter.metadata.toolchain_name.starts_with("cargo"));
}

// ============================================================================
// Test: Compile Failure
// ============================================================================

#[tokio::test]
async fn test_undefined_symbol() {
    let Some(h) = harness(4).await else { return };

    let result = h
        .orchestrator
        .execute(
            "fn main() { println!(\"{}\", undefined_symbol); }",
            &ExecutionContext::default(),
        )
        .await;

    assert!(!result.success);
    assert_eq!(result.state, PipelineState::CompileFailed);
    assert_eq!(result.error_kind, Some(ErrorKind::CompileFailure));
    assert_ne!(result.exit_code, 0);
    assert_eq!(result.execute_duration, Duration::ZERO);
    assert!(
        result
            .errors
            .iter()
            .any(|line| line.contains("undefined_symbol")),
        "{:?}",
        result.errors
    );
    assert_eq!(h.leftover_workspaces(), 0);
}

#[tokio::test]
async fn test_dependency_outside_allowlist_fails_to_resolve() {
    let Some(h) = harness(4).await else { return };
    let context = ExecutionContext::builder()
        .allow_dependencies(["tokio"])
        .build();

    let result = h
        .orchestrator
        .execute("use tokio as _;\nfn main() {}", &context)
        .await;

    assert!(!result.success);
    assert_eq!(result.error_kind, Some(ErrorKind::CompileFailure));
}

// ============================================================================
// Test: Execution Failures
// ============================================================================

#[tokio::test]
async fn test_infinite_loop_times_out() {
    let Some(h) = harness(4).await else { return };
    let context = ExecutionContext::builder().timeout_secs(5).build();

    let start = Instant::now();
    let result = h
        .orchestrator
        .execute("fn main() { loop { std::hint::spin_loop(); } }", &context)
        .await;

    assert!(!result.success);
    assert_eq!(result.error_kind, Some(ErrorKind::ExecuteTimeout));
    assert_eq!(result.exit_code, TIMEOUT_EXIT_CODE);
    assert!(result.execute_duration < Duration::from_secs(5 + 1 + 2));
    assert!(start.elapsed() < Duration::from_secs(60));
    assert_eq!(h.leftover_workspaces(), 0);
}

#[tokio::test]
async fn test_nonzero_exit_is_execute_failure() {
    let Some(h) = harness(4).await else { return };

    let result = h
        .orchestrator
        .execute(
            r#"fn main() { eprintln!("about to fail"); std::process::exit(3); }"#,
            &ExecutionContext::default(),
        )
        .await;

    assert_eq!(result.state, PipelineState::ExecuteFailed);
    assert_eq!(result.exit_code, 3);
    assert!(result.errors.iter().any(|line| line == "about to fail"));
}

// ============================================================================
// Test: Optimization Levels
// ============================================================================

#[tokio::test]
async fn test_release_build_runs() {
    let Some(h) = harness(4).await else { return };
    let context = ExecutionContext::builder()
        .optimization_level(OptimizationLevel::O1)
        .build();

    let result = h
        .orchestrator
        .execute(
            r#"fn main() { println!("{}", if cfg!(debug_assertions) { "debug" } else { "release" }); }"#,
            &context,
        )
        .await;

    assert!(result.success, "{:?}", result.errors);
    assert_eq!(result.output.trim(), "release");
}

// ============================================================================
// Test: Concurrency and Cleanup
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_are_isolated() {
    let Some(h) = harness(2).await else { return };

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let orchestrator = h.orchestrator.clone();
            tokio::spawn(async move {
                let source = format!(
                    "fn main() {{ println!(\"{{}}\", std::env::current_dir().unwrap().display()); println!(\"{i}\"); }}"
                );
                orchestrator
                    .execute(&source, &ExecutionContext::default())
                    .await
            })
        })
        .collect();

    let mut dirs = Vec::new();
    for (i, handle) in handles.into_iter().enumerate() {
        let result = handle.await.unwrap();
        assert!(result.success, "{:?}", result.errors);
        let mut lines = result.output.lines();
        dirs.push(lines.next().unwrap().to_string());
        assert_eq!(lines.next().unwrap(), i.to_string());
    }

    dirs.sort();
    dirs.dedup();
    assert_eq!(dirs.len(), 4);
    assert_eq!(h.orchestrator.in_flight_count(), 0);
    assert_eq!(h.leftover_workspaces(), 0);
}

#[tokio::test]
async fn test_retained_workspace_keeps_build() {
    let Some(h) = harness(4).await else { return };
    let context = ExecutionContext::builder().retain_workspace(true).build();

    let result = h.orchestrator.execute("fn main() {}", &context).await;

    assert!(result.success, "{:?}", result.errors);
    let workspace = result.workspace.unwrap();
    assert!(workspace.retained);
    assert!(workspace.root_path.join("src/main.rs").exists());
    assert!(workspace.root_path.join("target").exists());
}
