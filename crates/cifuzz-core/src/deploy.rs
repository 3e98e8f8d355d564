//! Artifact deployment: persisting a successful build, keyed by commit.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::BuildConfig;
use crate::error::{BuildError, Result};

/// Remote blob store for build artifacts.
#[async_trait]
pub trait Filestore: Send + Sync {
    /// Upload the contents of `directory` under `name`, returning a handle
    /// to the stored artifact.
    async fn upload_build(&self, name: &str, directory: &Path) -> Result<String>;
}

/// Record of one completed upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRecord {
    pub commit: String,
    pub handle: String,
}

/// Deployment policy for finished builds.
#[async_trait]
pub trait Deployment: Send + Sync {
    /// Upload the build output keyed by `commit`. Returns `None` when the
    /// deployment decides not to upload.
    async fn upload_build(&self, commit: &str, out_dir: &Path) -> Result<Option<UploadRecord>>;
}

/// Deployment that never uploads anything.
pub struct NoOpDeployment;

#[async_trait]
impl Deployment for NoOpDeployment {
    async fn upload_build(&self, commit: &str, _out_dir: &Path) -> Result<Option<UploadRecord>> {
        debug!(commit, "no-op deployment, skipping upload");
        Ok(None)
    }
}

/// Filestore-backed deployment, gated on the orchestrator's upload flag.
pub struct FilestoreDeployment {
    filestore: Arc<dyn Filestore>,
    upload_enabled: bool,
}

impl FilestoreDeployment {
    pub fn new(filestore: Arc<dyn Filestore>, upload_enabled: bool) -> Self {
        Self {
            filestore,
            upload_enabled,
        }
    }
}

#[async_trait]
impl Deployment for FilestoreDeployment {
    async fn upload_build(&self, commit: &str, out_dir: &Path) -> Result<Option<UploadRecord>> {
        if !self.upload_enabled {
            debug!(commit, "upload disabled, skipping");
            return Ok(None);
        }
        let handle = self.filestore.upload_build(commit, out_dir).await?;
        info!(commit, handle, "uploaded build");
        Ok(Some(UploadRecord {
            commit: commit.to_string(),
            handle,
        }))
    }
}

/// Filestore over a local directory tree. Each upload lands under
/// `<root>/<name>/`.
pub struct LocalFilestore {
    root: PathBuf,
}

impl LocalFilestore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl Filestore for LocalFilestore {
    async fn upload_build(&self, name: &str, directory: &Path) -> Result<String> {
        let dest = self.root.join(name);
        copy_dir(directory, &dest)
            .map_err(|e| BuildError::Filestore(format!("copy to {} failed: {e}", dest.display())))?;
        Ok(dest.display().to_string())
    }
}

fn copy_dir(src: &Path, dst: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dst)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let dest_path = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir(&entry.path(), &dest_path)?;
        } else {
            std::fs::copy(entry.path(), dest_path)?;
        }
    }
    Ok(())
}

/// Select a deployment for the configuration. Absence of a filestore (or the
/// explicit `no_filestore` sentinel) selects the no-op implementation.
pub fn get_deployment(config: &BuildConfig) -> Box<dyn Deployment> {
    match config.filestore.as_deref() {
        Some("") | Some("no_filestore") | None => Box::new(NoOpDeployment),
        Some(root) => Box::new(FilestoreDeployment::new(
            Arc::new(LocalFilestore::new(root)),
            config.upload_build,
        )),
    }
}
