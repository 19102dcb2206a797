//! Per-request filesystem workspaces.
//!
//! Each request gets its own directory under the configured root:
//!
//! ```text
//! <root>/ws-<timestamp>-<pid>-<counter>/
//! ├── Cargo.toml      generated manifest
//! ├── src/main.rs     submitted source, written verbatim
//! └── target/         build output (created by the compile stage)
//! ```
//!
//! A workspace is owned by exactly one request and removed when it ends.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};

use coderun_common::{ExecutionContext, OptimizationLevel, PipelineError, WorkspaceConfig};

use crate::manifest::{Manifest, ManifestGenerator};

static NEXT_WORKSPACE: AtomicU64 = AtomicU64::new(0);

/// Identifier of a workspace, unique for the lifetime of the process.
///
/// Combines a millisecond timestamp, the process id, and a monotonic counter,
/// so ids also stay distinct across restarts sharing one root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct WorkspaceId(String);

impl WorkspaceId {
    /// Allocate the next id.
    pub fn next() -> Self {
        let sequence = NEXT_WORKSPACE.fetch_add(1, Ordering::Relaxed);
        let millis = Utc::now().timestamp_millis();

        Self(format!("ws-{millis}-{}-{sequence}", std::process::id()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkspaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lightweight reference to a workspace, attached to results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkspaceRef {
    pub id: WorkspaceId,
    pub root_path: PathBuf,
    /// Whether the directory was kept on disk after the request.
    pub retained: bool,
}

/// An isolated build directory for one request.
#[derive(Debug)]
pub struct Workspace {
    id: WorkspaceId,
    root_path: PathBuf,
    manifest_path: PathBuf,
    source_path: PathBuf,
    created_at: DateTime<Utc>,
    package_name: String,
    manifest: Manifest,
}

impl Workspace {
    pub fn id(&self) -> &WorkspaceId {
        &self.id
    }

    pub fn root_path(&self) -> &Path {
        &self.root_path
    }

    pub fn manifest_path(&self) -> &Path {
        &self.manifest_path
    }

    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// The manifest written into this workspace.
    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// Build output directory.
    pub fn target_dir(&self) -> PathBuf {
        self.root_path.join("target")
    }

    /// Where the build places the artifact for `level`.
    pub fn artifact_path(&self, level: OptimizationLevel) -> PathBuf {
        let profile_dir = if level.is_optimized() {
            "release"
        } else {
            "debug"
        };

        self.target_dir().join(profile_dir).join(format!(
            "{}{}",
            self.package_name,
            std::env::consts::EXE_SUFFIX
        ))
    }

    /// A reference to this workspace for reporting.
    pub fn reference(&self, retained: bool) -> WorkspaceRef {
        WorkspaceRef {
            id: self.id.clone(),
            root_path: self.root_path.clone(),
            retained,
        }
    }
}

/// Allocates and removes workspaces under one root directory.
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    root: PathBuf,
    generator: ManifestGenerator,
}

impl WorkspaceManager {
    /// Create a manager for the configured root.
    ///
    /// The root is created lazily by the first [`create`](Self::create).
    pub fn new(config: &WorkspaceConfig, generator: ManifestGenerator) -> Self {
        Self {
            root: config.root_dir(),
            generator,
        }
    }

    /// The directory workspaces are created under.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Allocate a workspace and write the manifest and source into it.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::WorkspaceCreationFailed`] if any directory or
    /// file cannot be written. Anything already created is removed first.
    #[instrument(skip_all)]
    pub async fn create(
        &self,
        source_code: &str,
        context: &ExecutionContext,
    ) -> Result<Workspace, PipelineError> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| PipelineError::workspace_creation(self.root.display(), e))?;

        let id = WorkspaceId::next();
        let root_path = self.root.join(id.as_str());

        // A plain create_dir fails if the id somehow already exists.
        tokio::fs::create_dir(&root_path)
            .await
            .map_err(|e| PipelineError::workspace_creation(root_path.display(), e))?;

        let manifest = self.generator.generate(context);
        if !manifest.omitted_dependencies().is_empty() {
            info!(
                workspace_id = %id,
                omitted = ?manifest.omitted_dependencies(),
                "Dependencies outside the trusted table left out of manifest"
            );
        }
        if !manifest.omitted_features().is_empty() {
            info!(
                workspace_id = %id,
                omitted = ?manifest.omitted_features(),
                "Invalid feature flags left out of manifest"
            );
        }

        let workspace = Workspace {
            manifest_path: root_path.join("Cargo.toml"),
            source_path: root_path.join("src").join("main.rs"),
            created_at: Utc::now(),
            package_name: self.generator.package_name().to_string(),
            id,
            root_path,
            manifest,
        };

        if let Err(e) = write_files(&workspace, source_code).await {
            if let Err(cleanup) = remove_tree(&workspace.root_path).await {
                warn!(
                    workspace_id = %workspace.id,
                    error = %cleanup,
                    "Failed to remove partially created workspace"
                );
            }
            return Err(e);
        }

        debug!(
            workspace_id = %workspace.id,
            path = %workspace.root_path.display(),
            "Workspace created"
        );

        Ok(workspace)
    }

    /// Remove a workspace's directory tree.
    ///
    /// Idempotent: a directory that is already gone counts as removed.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::CleanupFailure`] if the tree exists but
    /// cannot be removed. Callers log it; it never alters a result.
    #[instrument(skip_all, fields(workspace_id = %workspace.id))]
    pub async fn destroy(&self, workspace: &Workspace) -> Result<(), PipelineError> {
        match remove_tree(&workspace.root_path).await {
            Ok(()) => {
                debug!("Workspace removed");
                Ok(())
            }
            Err(source) => Err(PipelineError::CleanupFailure {
                path: workspace.root_path.display().to_string(),
                source,
            }),
        }
    }
}

async fn write_files(workspace: &Workspace, source_code: &str) -> Result<(), PipelineError> {
    tokio::fs::write(&workspace.manifest_path, workspace.manifest.text())
        .await
        .map_err(|e| PipelineError::workspace_creation(workspace.manifest_path.display(), e))?;

    let src_dir = workspace.root_path.join("src");
    tokio::fs::create_dir(&src_dir)
        .await
        .map_err(|e| PipelineError::workspace_creation(src_dir.display(), e))?;

    tokio::fs::write(&workspace.source_path, source_code)
        .await
        .map_err(|e| PipelineError::workspace_creation(workspace.source_path.display(), e))
}

async fn remove_tree(path: &Path) -> io::Result<()> {
    match tokio::fs::remove_dir_all(path).await {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Removes a workspace directory on drop unless disarmed.
///
/// The orchestrator arms one per request so a panicking pipeline task still
/// leaves nothing behind. Removal here is synchronous.
#[derive(Debug)]
pub struct WorkspaceGuard {
    path: Option<PathBuf>,
}

impl WorkspaceGuard {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    /// Stop guarding; the directory is left for explicit handling.
    pub fn disarm(&mut self) {
        self.path = None;
    }
}

impl Drop for WorkspaceGuard {
    fn drop(&mut self) {
        let Some(path) = self.path.take() else {
            return;
        };

        match std::fs::remove_dir_all(&path) {
            Ok(()) => warn!(path = %path.display(), "Workspace removed by drop guard"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => error!(
                path = %path.display(),
                error = %e,
                "Drop guard failed to remove workspace"
            ),
        }
    }
}
