//! The public entry point of the pipeline.
//!
//! [`Orchestrator::execute`] takes source code and an [`ExecutionContext`]
//! and always returns an [`ExecutionResult`]; no failure escapes as an
//! error or a panic. Each request:
//!
//! 1. Waits for a concurrency permit
//! 2. Gets a fresh workspace
//! 3. Compiles, then executes if the build succeeded
//! 4. Has its workspace removed before the result is returned, unless the
//!    context asks for it to be retained
//!
//! The pipeline runs in its own task under a per-request span. If that task
//! panics, a drop guard removes the workspace and the caller receives an
//! internal-fault result.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::{Instrument, Span, debug, error, field, info, info_span, warn};

use coderun_common::{ExecutionContext, PipelineError, RuntimeConfig};
use coderun_sandbox::{ProcessSandbox, default_sandbox};

use crate::aggregate::ResultAggregator;
use crate::compile::CompileStage;
use crate::execute::ExecuteStage;
use crate::manifest::ManifestGenerator;
use crate::result::{ExecutionResult, PipelineState};
use crate::toolchain::Toolchain;
use crate::workspace::{Workspace, WorkspaceGuard, WorkspaceId, WorkspaceManager};

/// A request currently holding a workspace.
#[derive(Debug, Clone, Serialize)]
pub struct InFlight {
    pub root_path: PathBuf,
    pub state: PipelineState,
    pub started_at: DateTime<Utc>,
}

type InFlightMap = Arc<DashMap<WorkspaceId, InFlight>>;

/// Composes the pipeline stages and owns the concurrency bound.
///
/// Cheap to clone; clones share the semaphore and in-flight table.
#[derive(Debug, Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    toolchain: Toolchain,
    workspaces: WorkspaceManager,
    compile: CompileStage,
    execute: ExecuteStage,
    aggregator: ResultAggregator,
    permits: Arc<Semaphore>,
    max_concurrent: usize,
    in_flight: InFlightMap,
}

impl Orchestrator {
    /// Probe the toolchain and build an orchestrator with the platform sandbox.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::ToolchainUnavailable`] if the toolchain does
    /// not answer; the service must not start without it.
    pub async fn start(config: &RuntimeConfig) -> Result<Self, PipelineError> {
        let toolchain = Toolchain::detect(&config.toolchain).await?;
        Ok(Self::new(config, toolchain))
    }

    /// Build an orchestrator for an already detected toolchain.
    pub fn new(config: &RuntimeConfig, toolchain: Toolchain) -> Self {
        let sandbox = default_sandbox(&config.sandbox);
        Self::with_sandbox(config, toolchain, sandbox)
    }

    /// Build an orchestrator with an explicit sandbox implementation.
    pub fn with_sandbox(
        config: &RuntimeConfig,
        toolchain: Toolchain,
        sandbox: Arc<dyn ProcessSandbox>,
    ) -> Self {
        let max_concurrent = config.execution.max_concurrent.max(1);
        let max_output_bytes = config.execution.max_output_bytes;

        let workspaces = WorkspaceManager::new(
            &config.workspace,
            ManifestGenerator::from_config(&config.toolchain),
        );
        let compile = CompileStage::new(
            toolchain.program(),
            config.toolchain.offline,
            max_output_bytes,
        );
        let execute = ExecuteStage::new(
            sandbox,
            config.sandbox.clone(),
            config.execution.grace_period(),
            max_output_bytes,
        );
        let aggregator = ResultAggregator::new(toolchain.name());

        info!(
            toolchain = toolchain.name(),
            sandbox = execute.sandbox_name(),
            max_concurrent,
            workspace_root = %workspaces.root().display(),
            "Orchestrator ready"
        );

        Self {
            inner: Arc::new(Inner {
                toolchain,
                workspaces,
                compile,
                execute,
                aggregator,
                permits: Arc::new(Semaphore::new(max_concurrent)),
                max_concurrent,
                in_flight: Arc::new(DashMap::new()),
            }),
        }
    }

    /// Compile and run `source_code`.
    ///
    /// Requests beyond the concurrency bound wait for a permit. The returned
    /// result reports every failure; this never errors.
    pub async fn execute(&self, source_code: &str, context: &ExecutionContext) -> ExecutionResult {
        let span = info_span!(
            "execute",
            workspace_id = field::Empty,
            level = %context.optimization_level(),
            timeout_secs = context.timeout_secs(),
        );

        let inner = Arc::clone(&self.inner);
        let source_code = source_code.to_string();
        let context = context.clone();

        let pipeline = async move {
            let Ok(_permit) = Arc::clone(&inner.permits).acquire_owned().await else {
                let error = PipelineError::internal("concurrency limiter closed");
                return inner.aggregator.fault(&error, None, None);
            };
            inner.run(&source_code, &context).await
        };

        match tokio::spawn(pipeline.instrument(span.clone())).await {
            Ok(result) => result,
            Err(e) => {
                let _entered = span.enter();
                error!(error = %e, panicked = e.is_panic(), "Pipeline task failed");
                let error = PipelineError::internal(format!("pipeline task failed: {e}"));
                self.inner.aggregator.fault(&error, None, None)
            }
        }
    }

    /// The toolchain builds run with.
    pub fn toolchain(&self) -> &Toolchain {
        &self.inner.toolchain
    }

    /// Upper bound on concurrently running requests.
    pub fn max_concurrent(&self) -> usize {
        self.inner.max_concurrent
    }

    /// Number of requests currently holding a workspace.
    pub fn in_flight_count(&self) -> usize {
        self.inner.in_flight.len()
    }

    /// Snapshot of the requests currently holding a workspace.
    pub fn in_flight(&self) -> Vec<(WorkspaceId, InFlight)> {
        self.inner
            .in_flight
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// Directory workspaces are created under.
    pub fn workspace_root(&self) -> &Path {
        self.inner.workspaces.root()
    }
}

impl Inner {
    async fn run(&self, source_code: &str, context: &ExecutionContext) -> ExecutionResult {
        let workspace = match self.workspaces.create(source_code, context).await {
            Ok(workspace) => workspace,
            Err(e) => {
                error!(error = %e, "Workspace creation failed");
                return self.aggregator.fault(&e, None, None);
            }
        };
        Span::current().record("workspace_id", field::display(workspace.id()));

        let mut guard = WorkspaceGuard::new(workspace.root_path());
        let _tracked = Tracked::register(&self.in_flight, &workspace);

        let result = self.compile_and_execute(&workspace, context).await;

        if context.retain_workspace() {
            info!(
                path = %workspace.root_path().display(),
                "Workspace retained on request"
            );
        } else if let Err(e) = self.workspaces.destroy(&workspace).await {
            warn!(error = %e, "Workspace cleanup failed");
        }
        guard.disarm();

        info!(
            success = result.success,
            exit_code = result.exit_code,
            state = %result.state,
            compile_ms = result.compile_duration.as_millis(),
            execute_ms = result.execute_duration.as_millis(),
            "Request finished"
        );

        result
    }

    async fn compile_and_execute(
        &self,
        workspace: &Workspace,
        context: &ExecutionContext,
    ) -> ExecutionResult {
        let reference = Some(workspace.reference(context.retain_workspace()));
        let mut state = PipelineState::Created;

        self.advance(workspace.id(), &mut state, PipelineState::Compiling);
        let compile = match self.compile.run(workspace, context).await {
            Ok(compile) => compile,
            Err(e) => {
                error!(error = %e, "Compile stage fault");
                self.advance(workspace.id(), &mut state, PipelineState::Faulted);
                return self.aggregator.fault(&e, None, reference);
            }
        };

        if !compile.success {
            self.advance(workspace.id(), &mut state, PipelineState::CompileFailed);
            return self.aggregator.aggregate(&compile, None, context, reference);
        }

        self.advance(workspace.id(), &mut state, PipelineState::Compiled);
        self.advance(workspace.id(), &mut state, PipelineState::Executing);

        let outcome = match self.execute.run(workspace, context).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(error = %e, kind = %e.kind(), "Execute stage fault");
                self.advance(workspace.id(), &mut state, PipelineState::Faulted);
                return self.aggregator.fault(&e, Some(&compile), reference);
            }
        };

        let result = self
            .aggregator
            .aggregate(&compile, Some(&outcome), context, reference);
        self.advance(workspace.id(), &mut state, result.state);
        result
    }

    fn advance(&self, id: &WorkspaceId, state: &mut PipelineState, next: PipelineState) {
        debug_assert!(
            state.can_transition_to(next),
            "illegal transition {state} -> {next}"
        );
        debug!(from = %state, to = %next, "Pipeline state transition");

        *state = next;
        if let Some(mut entry) = self.in_flight.get_mut(id) {
            entry.state = next;
        }
    }
}

/// Keeps a workspace listed as in flight until dropped.
struct Tracked {
    map: InFlightMap,
    id: WorkspaceId,
}

impl Tracked {
    fn register(map: &InFlightMap, workspace: &Workspace) -> Self {
        map.insert(
            workspace.id().clone(),
            InFlight {
                root_path: workspace.root_path().to_path_buf(),
                state: PipelineState::Created,
                started_at: workspace.created_at(),
            },
        );

        Self {
            map: Arc::clone(map),
            id: workspace.id().clone(),
        }
    }
}

impl Drop for Tracked {
    fn drop(&mut self) {
        self.map.remove(&self.id);
    }
}
