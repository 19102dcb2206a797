//! Shared application state.
//!
//! This module provides [`AppState`], which holds shared resources
//! across all HTTP request handlers.

use coderun_common::LimitsConfig;
use coderun_core::Orchestrator;

/// Shared state across all request handlers.
///
/// Cloned for each request; the orchestrator is reference-counted inside.
#[derive(Clone)]
pub struct AppState {
    orchestrator: Orchestrator,
    limits: LimitsConfig,
}

impl AppState {
    /// Create new application state.
    pub fn new(orchestrator: Orchestrator, limits: LimitsConfig) -> Self {
        Self {
            orchestrator,
            limits,
        }
    }

    /// Get the orchestrator.
    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    /// Get the request limits.
    pub fn limits(&self) -> &LimitsConfig {
        &self.limits
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("toolchain", &self.orchestrator.toolchain().name())
            .field("in_flight", &self.orchestrator.in_flight_count())
            .finish_non_exhaustive()
    }
}
