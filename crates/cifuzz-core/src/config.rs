//! Build configuration and workspace layout.

use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// CI platform variants the orchestrator can run under.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CiPlatformKind {
    /// Classic CIFuzz running on the fuzzing project's own infrastructure.
    Generic,

    /// ClusterFuzzLite on GitHub Actions.
    GithubActions,

    /// ClusterFuzzLite on some other CI system.
    OtherCi,
}

impl CiPlatformKind {
    /// Parse a platform tag as it appears in CI configuration.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "generic" => Some(CiPlatformKind::Generic),
            "github" | "github-actions" => Some(CiPlatformKind::GithubActions),
            "other" | "other-ci" => Some(CiPlatformKind::OtherCi),
            _ => None,
        }
    }
}

/// Immutable configuration for one build pipeline invocation.
///
/// At least one of `git_sha`, `pr_ref`, or `project_src_path` must identify
/// the revision to build; the pipeline fails fast otherwise.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConfig {
    /// OSS-Fuzz project name, if this is a registered project. `None` for
    /// external projects that bring their own `git_url`.
    pub project_name: Option<String>,

    /// Name of the repository the fuzz targets live in.
    pub project_repo_name: String,

    /// Workspace root holding checked-out source and build output.
    pub workspace: PathBuf,

    /// Sanitizer to instrument the targets with.
    pub sanitizer: String,

    /// Language of the fuzz targets.
    pub language: String,

    /// Repository URL, when known up front.
    pub git_url: Option<String>,

    /// Commit SHA to build.
    pub git_sha: Option<String>,

    /// PR reference (`refs/pull/<n>/merge`) to build.
    pub pr_ref: Option<String>,

    /// Base ref for diffing.
    pub base_ref: Option<String>,

    /// Base commit for diffing.
    pub base_commit: Option<String>,

    /// Which CI platform is driving this build.
    pub platform: CiPlatformKind,

    /// Filestore selection; `None` (or `no_filestore`) selects the no-op
    /// deployment.
    pub filestore: Option<String>,

    /// Tolerated percentage of broken fuzz targets, as a string so it can be
    /// threaded verbatim into the check harness environment.
    pub allowed_broken_targets_percentage: Option<String>,

    /// Whether to upload the build to the filestore on success.
    pub upload_build: bool,

    /// Explicit local source checkout; skips network checkout entirely.
    pub project_src_path: Option<PathBuf>,

    /// Directory holding per-project build scripts, for main-repo detection.
    pub projects_dir: Option<PathBuf>,

    /// Deadline for each blocking operation (checkout, container run,
    /// upload), passed down uninterpreted.
    pub timeout_secs: Option<u64>,
}

impl BuildConfig {
    /// Create a configuration with the defaults CI builds use.
    pub fn new(project_repo_name: impl Into<String>, workspace: impl Into<PathBuf>) -> Self {
        Self {
            project_name: None,
            project_repo_name: project_repo_name.into(),
            workspace: workspace.into(),
            sanitizer: "address".to_string(),
            language: "c++".to_string(),
            git_url: None,
            git_sha: None,
            pr_ref: None,
            base_ref: None,
            base_commit: None,
            platform: CiPlatformKind::Generic,
            filestore: None,
            allowed_broken_targets_percentage: None,
            upload_build: false,
            project_src_path: None,
            projects_dir: None,
            timeout_secs: None,
        }
    }

    /// The workspace directory layout for this build.
    pub fn workspace_layout(&self) -> Workspace {
        Workspace::new(&self.workspace)
    }

    /// Per-operation deadline, if one was configured.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

/// Fixed directory layout under one workspace root.
///
/// The workspace is owned exclusively by a single in-flight build; two
/// builds must use distinct roots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where produced fuzz-target binaries land.
    pub fn out(&self) -> PathBuf {
        self.root.join("build-out")
    }

    /// Where repositories get checked out.
    pub fn repo_storage(&self) -> PathBuf {
        self.root.join("repo-storage")
    }

    /// Create the layout. The root itself must already have a valid parent;
    /// a bogus workspace path surfaces here as an error.
    pub fn create(&self) -> io::Result<()> {
        match std::fs::create_dir(&self.root) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
            Err(e) => return Err(e),
        }
        std::fs::create_dir_all(self.out())?;
        std::fs::create_dir_all(self.repo_storage())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_tag_parsing() {
        assert_eq!(
            CiPlatformKind::from_tag("github"),
            Some(CiPlatformKind::GithubActions)
        );
        assert_eq!(
            CiPlatformKind::from_tag("generic"),
            Some(CiPlatformKind::Generic)
        );
        assert_eq!(
            CiPlatformKind::from_tag("other"),
            Some(CiPlatformKind::OtherCi)
        );
        assert_eq!(CiPlatformKind::from_tag("jenkins"), None);
    }

    #[test]
    fn test_config_defaults() {
        let config = BuildConfig::new("myproject", "/tmp/workspace");
        assert_eq!(config.sanitizer, "address");
        assert_eq!(config.language, "c++");
        assert_eq!(config.platform, CiPlatformKind::Generic);
        assert!(!config.upload_build);
        assert!(config.git_sha.is_none());
        assert!(config.timeout().is_none());
    }

    #[test]
    fn test_workspace_layout() {
        let ws = Workspace::new("/work");
        assert_eq!(ws.out(), PathBuf::from("/work/build-out"));
        assert_eq!(ws.repo_storage(), PathBuf::from("/work/repo-storage"));
    }

    #[test]
    fn test_workspace_create() {
        let tmp = tempfile::tempdir().unwrap();
        let ws = Workspace::new(tmp.path().join("workspace"));
        ws.create().unwrap();
        assert!(ws.out().is_dir());
        assert!(ws.repo_storage().is_dir());

        // Creating again is fine.
        ws.create().unwrap();
    }

    #[test]
    fn test_workspace_create_fails_for_missing_parents() {
        let tmp = tempfile::tempdir().unwrap();
        let ws = Workspace::new(tmp.path().join("not").join("a").join("dir"));
        assert!(ws.create().is_err());
    }
}
