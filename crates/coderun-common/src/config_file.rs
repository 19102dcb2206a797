//! Configuration file structures for coderun.
//!
//! This module defines structures for TOML configuration files:
//! - [`ConfigFile`]: Top-level configuration file structure
//! - [`ServerConfigFile`]: HTTP adapter settings

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::RuntimeConfig;

/// Prefix for environment variable overrides.
///
/// Nested keys are separated by `__`, e.g.
/// `CODERUN__RUNTIME__EXECUTION__MAX_CONCURRENT=8`.
pub const ENV_PREFIX: &str = "CODERUN";

/// Top-level configuration file structure.
///
/// # Example
///
/// ```toml
/// [runtime.toolchain]
/// program = "cargo"
/// offline = true
///
/// [runtime.execution]
/// grace_period_secs = 5
/// max_concurrent = 8
///
/// [runtime.sandbox]
/// max_file_size_mb = 16
///
/// [server]
/// bind_addr = "0.0.0.0:8080"
/// request_timeout_secs = 180
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ConfigFile {
    /// Pipeline configuration.
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// HTTP adapter configuration.
    #[serde(default)]
    pub server: ServerConfigFile,
}

impl ConfigFile {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigFileError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigFileError::Io {
            path: path.as_ref().display().to_string(),
            source: e,
        })?;

        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the string cannot be parsed as TOML.
    pub fn from_toml(content: &str) -> Result<Self, ConfigFileError> {
        toml::from_str(content).map_err(|e| ConfigFileError::Parse {
            message: e.to_string(),
        })
    }

    /// Load configuration from an optional file, then apply
    /// `CODERUN__*` environment overrides on top.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing or any source fails to parse.
    pub fn load_layered(path: Option<&Path>) -> Result<Self, ConfigFileError> {
        debug!(path = ?path, prefix = ENV_PREFIX, "Loading layered configuration");
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

        builder
            .build()
            .and_then(config::Config::try_deserialize)
            .map_err(|e| ConfigFileError::Parse {
                message: e.to_string(),
            })
    }
}

/// HTTP adapter configuration from config file.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfigFile {
    /// Bind address (e.g., "0.0.0.0:8080").
    #[serde(default = "defaults::bind_addr")]
    pub bind_addr: String,

    /// Request timeout in seconds.
    ///
    /// Must exceed twice the largest accepted execution timeout plus the
    /// grace period, or slow requests are cut off by the HTTP layer.
    #[serde(default = "defaults::request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Enable graceful shutdown.
    #[serde(default = "defaults::graceful_shutdown")]
    pub graceful_shutdown: bool,
}

impl Default for ServerConfigFile {
    fn default() -> Self {
        Self {
            bind_addr: defaults::bind_addr(),
            request_timeout_secs: defaults::request_timeout_secs(),
            graceful_shutdown: defaults::graceful_shutdown(),
        }
    }
}

/// Configuration file errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigFileError {
    /// Failed to read configuration file.
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse configuration file.
    #[error("Failed to parse config file: {message}")]
    Parse { message: String },
}

/// Default value functions for serde.
mod defaults {
    pub fn bind_addr() -> String {
        "0.0.0.0:8080".to_string()
    }

    pub const fn request_timeout_secs() -> u64 {
        180
    }

    pub const fn graceful_shutdown() -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_file() {
        let config = ConfigFile::default();

        assert_eq!(config.server.bind_addr, "0.0.0.0:8080");
        assert_eq!(config.server.request_timeout_secs, 180);
        assert!(config.server.graceful_shutdown);
        assert_eq!(config.runtime.toolchain.program, "cargo");
    }

    #[test]
    fn test_parse_minimal_config() {
        let toml = r#"
            [server]
            bind_addr = "127.0.0.1:3000"
        "#;

        let config = ConfigFile::from_toml(toml).unwrap();

        assert_eq!(config.server.bind_addr, "127.0.0.1:3000");
        // Defaults applied
        assert_eq!(config.server.request_timeout_secs, 180);
        assert_eq!(config.runtime.execution.max_concurrent, 4);
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
            [runtime.toolchain]
            program = "/opt/rust/bin/cargo"
            edition = "2024"
            offline = true

            [runtime.workspace]
            root = "/var/lib/coderun"

            [runtime.execution]
            grace_period_secs = 2
            max_concurrent = 16

            [runtime.sandbox]
            enabled = true
            max_file_size_mb = 8
            max_processes = 32
            require_network_isolation = true

            [runtime.limits]
            max_timeout_secs = 30

            [server]
            bind_addr = "0.0.0.0:9000"
            request_timeout_secs = 90
            graceful_shutdown = false
        "#;

        let config = ConfigFile::from_toml(toml).unwrap();

        assert_eq!(config.runtime.toolchain.program, "/opt/rust/bin/cargo");
        assert_eq!(config.runtime.toolchain.edition, "2024");
        assert!(config.runtime.toolchain.offline);
        assert_eq!(
            config.runtime.workspace.root_dir(),
            std::path::PathBuf::from("/var/lib/coderun")
        );
        assert_eq!(config.runtime.execution.grace_period_secs, 2);
        assert_eq!(config.runtime.execution.max_concurrent, 16);
        assert_eq!(config.runtime.sandbox.max_file_size_mb, Some(8));
        assert_eq!(config.runtime.sandbox.max_processes, Some(32));
        assert!(config.runtime.sandbox.require_network_isolation);
        assert_eq!(config.runtime.limits.max_timeout_secs, 30);
        assert_eq!(config.server.bind_addr, "0.0.0.0:9000");
        assert!(!config.server.graceful_shutdown);
    }

    #[test]
    fn test_parse_invalid_toml() {
        let invalid = "this is not valid toml [";
        let result = ConfigFile::from_toml(invalid);
        assert!(result.is_err());
    }

    #[test]
    fn test_load_layered_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("coderun.toml");
        std::fs::write(
            &path,
            "[runtime.execution]\nmax_concurrent = 2\n\n[server]\nbind_addr = \"127.0.0.1:4000\"\n",
        )
        .unwrap();

        let config = ConfigFile::load_layered(Some(&path)).unwrap();

        assert_eq!(config.runtime.execution.max_concurrent, 2);
        assert_eq!(config.server.bind_addr, "127.0.0.1:4000");
        assert_eq!(config.runtime.execution.grace_period_secs, 5);
    }

    #[test]
    fn test_load_layered_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");

        assert!(ConfigFile::load_layered(Some(&path)).is_err());
    }
}
