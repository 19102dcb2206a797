//! Execute request body and its validation.

use serde::Deserialize;

use coderun_common::{ExecutionContext, LimitsConfig};

/// Body of `POST /execute`.
///
/// ```json
/// { "source": "fn main() {}", "context": { "timeout_secs": 5 } }
/// ```
///
/// `context` is optional; missing fields take their defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecuteRequest {
    pub source: String,
    #[serde(default)]
    pub context: ExecutionContext,
}

impl ExecuteRequest {
    /// Check the request against the service limits.
    ///
    /// # Errors
    ///
    /// Returns a message naming the first limit the request breaks.
    pub fn validate(&self, limits: &LimitsConfig) -> Result<(), String> {
        if self.source.trim().is_empty() {
            return Err("source must not be empty".to_string());
        }

        if self.source.len() > limits.max_source_bytes {
            return Err(format!(
                "source is {} bytes, limit is {}",
                self.source.len(),
                limits.max_source_bytes
            ));
        }

        let timeout = self.context.timeout_secs();
        if timeout == 0 || timeout > limits.max_timeout_secs {
            return Err(format!(
                "timeout_secs must be between 1 and {}, got {timeout}",
                limits.max_timeout_secs
            ));
        }

        if self.context.memory_limit_mb() > limits.max_memory_limit_mb {
            return Err(format!(
                "memory_limit_mb must be at most {}, got {}",
                limits.max_memory_limit_mb,
                self.context.memory_limit_mb()
            ));
        }

        Ok(())
    }
}
