//! HTTP adapter for coderun.
//!
//! This crate exposes the pipeline over HTTP. It handles:
//!
//! - `POST /execute` with `{ "source", "context" }`, answered in the adapter shape
//! - Request validation against the configured limits
//! - Health and readiness checks
//!
//! # Quick Start
//!
//! ```ignore
//! use coderun_common::RuntimeConfig;
//! use coderun_core::Orchestrator;
//! use coderun_server::{CoderunServer, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let runtime_config = RuntimeConfig::default();
//!     let orchestrator = Orchestrator::start(&runtime_config).await?;
//!
//!     let server = CoderunServer::new(orchestrator, runtime_config.limits, ServerConfig::default());
//!     server.run().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod handler;
pub mod request;
pub mod response;
pub mod router;
pub mod server;
pub mod state;

pub use request::ExecuteRequest;
pub use response::ApiError;
pub use server::{CoderunServer, ServerConfig, ServerError, TestHandle};
pub use state::AppState;
