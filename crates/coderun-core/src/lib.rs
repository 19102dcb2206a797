//! Compile-and-execute pipeline for coderun.
//!
//! This crate turns submitted source code into a report:
//! - [`ManifestGenerator`]: Build manifest with the dependency allowlist
//! - [`WorkspaceManager`]: Per-request directories
//! - [`CompileStage`] / [`ExecuteStage`]: Bounded toolchain and artifact runs
//! - [`ResultAggregator`]: Stage outcomes to [`ExecutionResult`]
//! - [`Orchestrator`]: The entry point tying them together
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                     Orchestrator                        │
//! │  (Shared across all requests, thread-safe)              │
//! │  - Concurrency semaphore                                │
//! │  - In-flight workspace table                            │
//! └─────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │          WorkspaceManager + ManifestGenerator           │
//! │  (Per-request, exclusively owned)                       │
//! │  - Cargo.toml with pinned dependencies                  │
//! │  - src/main.rs                                          │
//! └─────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │          CompileStage → ExecuteStage                    │
//! │  (BoundedProcess: own process group, capped output)     │
//! │  - cargo build under the timeout                        │
//! │  - artifact under timeout + grace, inside the sandbox   │
//! └─────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │                  ResultAggregator                       │
//! │  - ExecutionResult / adapter shape                      │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod aggregate;
pub mod compile;
pub mod execute;
pub mod manifest;
pub mod orchestrator;
pub mod process;
pub mod result;
pub mod toolchain;
pub mod workspace;

pub use aggregate::ResultAggregator;
pub use compile::CompileStage;
pub use execute::{ExecuteOutcome, ExecuteStage};
pub use manifest::{Manifest, ManifestGenerator, TRUSTED_DEPENDENCIES, pinned_version};
pub use orchestrator::{InFlight, Orchestrator};
pub use process::{BoundedProcess, StageResult};
pub use result::{AdapterMetadata, AdapterResponse, ExecutionResult, PipelineState};
pub use toolchain::Toolchain;
pub use workspace::{Workspace, WorkspaceGuard, WorkspaceId, WorkspaceManager, WorkspaceRef};
