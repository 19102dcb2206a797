//! Common types, errors, and configuration for coderun.
//!
//! This crate provides shared functionality used across the coderun workspace:
//! - Error types using `thiserror` for the pipeline's failure taxonomy
//! - Configuration structures for service-wide settings
//! - [`ExecutionContext`], the per-request option set

pub mod config;
pub mod config_file;
pub mod context;
pub mod error;

pub use config::{
    ExecutionConfig, LimitsConfig, RuntimeConfig, SandboxConfig, ToolchainConfig, WorkspaceConfig,
};
pub use config_file::{ConfigFile, ConfigFileError, ServerConfigFile};
pub use context::{ExecutionContext, ExecutionContextBuilder, OptimizationLevel};
pub use error::{ErrorKind, PipelineError, SandboxError, TIMEOUT_EXIT_CODE};
