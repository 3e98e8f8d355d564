//! Working-tree management over the `git` subprocess.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

use crate::error::{BuildError, Result};

/// Handle to a checked-out working tree.
///
/// The manager owns the tree path for the duration of the build; tearing the
/// directory down is the caller's job when the workspace is destroyed.
#[derive(Debug, Clone)]
pub struct RepoManager {
    repo_dir: PathBuf,
    timeout: Option<Duration>,
}

impl RepoManager {
    pub fn new(repo_dir: impl Into<PathBuf>) -> Self {
        Self {
            repo_dir: repo_dir.into(),
            timeout: None,
        }
    }

    /// Apply a deadline to every git invocation made through this manager.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn repo_dir(&self) -> &Path {
        &self.repo_dir
    }

    /// The commit SHA the working tree is currently at.
    pub async fn current_commit(&self) -> Result<String> {
        let sha = self.git(&["rev-parse", "HEAD"]).await?;
        if sha.is_empty() {
            return Err(BuildError::Git(
                "git rev-parse HEAD returned empty output".to_string(),
            ));
        }
        Ok(sha)
    }

    /// Files changed between `base` and the current checkout.
    pub async fn changed_files(&self, base: &str) -> Result<Vec<String>> {
        let out = self.git(&["diff", "--name-only", base]).await?;
        Ok(out
            .lines()
            .map(str::to_string)
            .filter(|l| !l.is_empty())
            .collect())
    }

    /// Fetch a refspec from origin.
    pub async fn fetch(&self, refspec: &str) -> Result<()> {
        self.git(&["fetch", "origin", refspec]).await?;
        Ok(())
    }

    /// Force-checkout a specific commit and drop any leftover build detritus.
    pub async fn checkout_commit(&self, sha: &str) -> Result<()> {
        self.git(&["checkout", "-f", sha]).await?;
        self.git(&["clean", "-fd"]).await?;
        Ok(())
    }

    /// Fetch a pull request's synthetic merge ref and check it out.
    pub async fn checkout_pr(&self, pr_ref: &str) -> Result<()> {
        self.fetch(pr_ref).await?;
        self.git(&["checkout", "-f", "FETCH_HEAD"]).await?;
        Ok(())
    }

    async fn git(&self, args: &[&str]) -> Result<String> {
        run_git(Some(&self.repo_dir), args, self.timeout).await
    }
}

/// Clone `url` into `dest` and return a manager for the new tree.
pub async fn clone_repo_and_get_manager(
    url: &str,
    dest: &Path,
    timeout: Option<Duration>,
) -> Result<RepoManager> {
    let dest_str = dest.display().to_string();
    run_git(None, &["clone", "--recursive", url, &dest_str], timeout).await?;
    Ok(RepoManager::new(dest).with_timeout(timeout))
}

async fn run_git(dir: Option<&Path>, args: &[&str], timeout: Option<Duration>) -> Result<String> {
    debug!(?args, "running git");

    let mut cmd = Command::new("git");
    cmd.args(args).stdout(Stdio::piped()).stderr(Stdio::piped());
    if let Some(dir) = dir {
        cmd.current_dir(dir);
    }

    let child = cmd
        .spawn()
        .map_err(|e| BuildError::Git(format!("failed to run git: {e}")))?;

    let output = match timeout {
        Some(t) => tokio::time::timeout(t, child.wait_with_output())
            .await
            .map_err(|_| BuildError::Timeout(t.as_secs()))?
            .map_err(BuildError::Io)?,
        None => child.wait_with_output().await.map_err(BuildError::Io)?,
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(BuildError::Git(format!(
            "git {args:?} failed: {}",
            stderr.trim()
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}
