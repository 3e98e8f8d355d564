//! CI platform dispatch.
//!
//! The closed set of platforms the orchestrator runs under, behind one
//! capability trait: environment-derived facts plus checkout performed on
//! behalf of the CI system. Tests substitute fakes for the whole trait.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::{BuildConfig, CiPlatformKind};
use crate::error::Result;
use crate::repo::{clone_repo_and_get_manager, RepoManager};
use crate::revision::parse_pr_ref;

/// What to check out once the repository is cloned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckoutTarget {
    Commit(String),
    PullRequest(String),
}

/// Capability interface over the CI platform variants.
#[async_trait]
pub trait ContinuousIntegration: Send + Sync {
    fn kind(&self) -> CiPlatformKind;

    /// Whether this platform runs the lightweight ClusterFuzzLite variant
    /// (drives the `CLUSTERFUZZLITE=True` build marker).
    fn lite(&self) -> bool;

    /// Workspace root the platform provides, if any.
    fn workspace_root(&self) -> Option<PathBuf> {
        None
    }

    /// PR number derived from the configured PR ref.
    fn pr_number(&self, config: &BuildConfig) -> Option<u64> {
        config.pr_ref.as_deref().and_then(parse_pr_ref)
    }

    /// Clone the repository on behalf of CI.
    async fn clone_repo(
        &self,
        url: &str,
        dest: &Path,
        timeout: Option<Duration>,
    ) -> Result<RepoManager> {
        clone_repo_and_get_manager(url, dest, timeout).await
    }

    /// Check out the target revision and return the concrete commit SHA the
    /// working tree landed on.
    async fn checkout(&self, repo: &RepoManager, target: &CheckoutTarget) -> Result<String> {
        match target {
            CheckoutTarget::Commit(sha) => repo.checkout_commit(sha).await?,
            CheckoutTarget::PullRequest(pr_ref) => repo.checkout_pr(pr_ref).await?,
        }
        repo.current_commit().await
    }
}

/// Classic CIFuzz on the fuzzing project's own infrastructure.
pub struct GenericCi;

#[async_trait]
impl ContinuousIntegration for GenericCi {
    fn kind(&self) -> CiPlatformKind {
        CiPlatformKind::Generic
    }

    fn lite(&self) -> bool {
        false
    }
}

/// ClusterFuzzLite running on GitHub Actions.
pub struct GithubActions;

#[async_trait]
impl ContinuousIntegration for GithubActions {
    fn kind(&self) -> CiPlatformKind {
        CiPlatformKind::GithubActions
    }

    fn lite(&self) -> bool {
        true
    }

    fn workspace_root(&self) -> Option<PathBuf> {
        std::env::var_os("GITHUB_WORKSPACE").map(PathBuf::from)
    }
}

/// ClusterFuzzLite on any other CI system.
pub struct ExternalCi;

#[async_trait]
impl ContinuousIntegration for ExternalCi {
    fn kind(&self) -> CiPlatformKind {
        CiPlatformKind::OtherCi
    }

    fn lite(&self) -> bool {
        true
    }
}

/// Select the platform implementation for a build configuration.
pub fn get_ci(config: &BuildConfig) -> Box<dyn ContinuousIntegration> {
    match config.platform {
        CiPlatformKind::Generic => Box::new(GenericCi),
        CiPlatformKind::GithubActions => Box::new(GithubActions),
        CiPlatformKind::OtherCi => Box::new(ExternalCi),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_ci_dispatch() {
        let mut config = BuildConfig::new("myproject", "/tmp/ws");

        config.platform = CiPlatformKind::Generic;
        let ci = get_ci(&config);
        assert_eq!(ci.kind(), CiPlatformKind::Generic);
        assert!(!ci.lite());

        config.platform = CiPlatformKind::GithubActions;
        let ci = get_ci(&config);
        assert_eq!(ci.kind(), CiPlatformKind::GithubActions);
        assert!(ci.lite());

        config.platform = CiPlatformKind::OtherCi;
        let ci = get_ci(&config);
        assert_eq!(ci.kind(), CiPlatformKind::OtherCi);
        assert!(ci.lite());
    }

    #[test]
    fn test_pr_number_from_config() {
        let mut config = BuildConfig::new("myproject", "/tmp/ws");
        config.pr_ref = Some("refs/pull/1757/merge".to_string());
        assert_eq!(GithubActions.pr_number(&config), Some(1757));

        config.pr_ref = Some("ref-1/merge".to_string());
        assert_eq!(GithubActions.pr_number(&config), None);

        config.pr_ref = None;
        assert_eq!(GithubActions.pr_number(&config), None);
    }
}
