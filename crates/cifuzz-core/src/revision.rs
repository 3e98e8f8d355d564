//! Revision resolution: turning a (URL | path, SHA | PR ref) tuple into a
//! concrete checked-out working tree.
//!
//! Resolution is deliberately asymmetric about bad input. A malformed PR ref
//! is a CI-triggered edge case and resolves to [`Resolution::Skip`] (build
//! nothing, report success); an unknown project or repository is a domain
//! failure (pipeline reports `false`); an empty git SHA is a caller bug and
//! raises [`ConfigError::EmptyGitSha`].

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::config::BuildConfig;
use crate::error::{BuildError, ConfigError, ResolveError, Result};
use crate::platform::{CheckoutTarget, ContinuousIntegration};
use crate::repo::RepoManager;

/// Parse a pull-request merge ref of the exact shape `refs/pull/<digits>/merge`.
pub fn parse_pr_ref(pr_ref: &str) -> Option<u64> {
    let digits = pr_ref.strip_prefix("refs/pull/")?.strip_suffix("/merge")?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// The main repository a project builds its fuzz targets from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MainRepo {
    /// Clone URL.
    pub git_url: String,

    /// Path the repository lives at inside the build image.
    pub image_path: PathBuf,
}

/// A resolved, checked-out revision. Created once per build, immutable
/// afterward.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRevision {
    pub git_url: String,
    pub repo_path: PathBuf,
    pub commit: String,
    pub base_commit: Option<String>,
}

/// Detects a project's main repository from its build scripts.
pub trait RepoDetector: Send + Sync {
    fn detect_main_repo(&self, project_name: &str, repo_name: &str) -> Result<MainRepo>;
}

/// Real detector: scans `<projects_dir>/<project>/{Dockerfile,build.sh}` for
/// a clone URL mentioning the repository name.
pub struct ProjectScriptsDetector {
    projects_dir: PathBuf,
}

impl ProjectScriptsDetector {
    pub fn new(projects_dir: impl Into<PathBuf>) -> Self {
        Self {
            projects_dir: projects_dir.into(),
        }
    }
}

impl RepoDetector for ProjectScriptsDetector {
    fn detect_main_repo(&self, project_name: &str, repo_name: &str) -> Result<MainRepo> {
        if project_name.is_empty() {
            return Err(BuildError::UnknownProject(project_name.to_string()));
        }
        let project_dir = self.projects_dir.join(project_name);
        if !project_dir.is_dir() {
            return Err(BuildError::UnknownProject(project_name.to_string()));
        }

        for script in ["Dockerfile", "build.sh"] {
            let path = project_dir.join(script);
            let Ok(contents) = std::fs::read_to_string(&path) else {
                continue;
            };
            for token in contents.split_whitespace() {
                let token = token.trim_matches(|c| c == '"' || c == '\'');
                if !looks_like_git_url(token) {
                    continue;
                }
                let name = repo_basename(token);
                if name == repo_name {
                    return Ok(MainRepo {
                        git_url: token.to_string(),
                        image_path: Path::new("/src").join(name),
                    });
                }
            }
        }

        Err(BuildError::UnknownRepo(repo_name.to_string()))
    }
}

fn looks_like_git_url(token: &str) -> bool {
    token.starts_with("http://") || token.starts_with("https://") || token.starts_with("git@")
}

/// Trailing path component of a clone URL, minus any `.git` suffix.
pub fn repo_basename(url: &str) -> &str {
    let trimmed = url.trim_end_matches('/');
    let name = trimmed.rsplit('/').next().unwrap_or(trimmed);
    name.strip_suffix(".git").unwrap_or(name)
}

/// How the source for this build will be obtained.
#[derive(Debug, Clone)]
pub enum SourcePlan {
    /// Use an existing local checkout as-is; no network checkout.
    Existing { main_repo: MainRepo, path: PathBuf },

    /// Clone into `dest` and check out `target`.
    Checkout {
        main_repo: MainRepo,
        dest: PathBuf,
        target: CheckoutTarget,
    },
}

impl SourcePlan {
    pub fn main_repo(&self) -> &MainRepo {
        match self {
            SourcePlan::Existing { main_repo, .. } => main_repo,
            SourcePlan::Checkout { main_repo, .. } => main_repo,
        }
    }
}

/// Outcome of the resolution stage.
#[derive(Debug, Clone)]
pub enum Resolution {
    /// Nothing to build; the pipeline reports success without an artifact.
    Skip,

    /// A concrete plan for obtaining the source.
    Source(SourcePlan),
}

/// Source prepared for building: the revision plus the working-tree handle.
pub struct PreparedSource {
    pub revision: ResolvedRevision,
    pub manager: RepoManager,
    pub main_repo: MainRepo,
}

/// Decide how the source will be obtained, without touching the network.
pub fn resolve(
    config: &BuildConfig,
    detector: &dyn RepoDetector,
) -> std::result::Result<Resolution, ResolveError> {
    if let Some(src) = &config.project_src_path {
        let main_repo = main_repo_for(config, detector, Some(src.as_path()))?;
        return Ok(Resolution::Source(SourcePlan::Existing {
            main_repo,
            path: src.clone(),
        }));
    }

    if let Some(pr_ref) = &config.pr_ref {
        if parse_pr_ref(pr_ref).is_none() {
            warn!(pr_ref = %pr_ref, "invalid PR reference, skipping build");
            return Ok(Resolution::Skip);
        }
        let main_repo = main_repo_for(config, detector, None)?;
        let dest = checkout_dest(config, &main_repo);
        return Ok(Resolution::Source(SourcePlan::Checkout {
            main_repo,
            dest,
            target: CheckoutTarget::PullRequest(pr_ref.clone()),
        }));
    }

    match config.git_sha.as_deref() {
        None => Err(ConfigError::NoRevision.into()),
        Some("") => Err(ConfigError::EmptyGitSha.into()),
        Some(sha) => {
            let main_repo = main_repo_for(config, detector, None)?;
            let dest = checkout_dest(config, &main_repo);
            Ok(Resolution::Source(SourcePlan::Checkout {
                main_repo,
                dest,
                target: CheckoutTarget::Commit(sha.to_string()),
            }))
        }
    }
}

/// Execute a source plan: clone and check out through the CI platform, or
/// adopt the existing checkout.
pub async fn checkout(
    plan: SourcePlan,
    config: &BuildConfig,
    ci: &dyn ContinuousIntegration,
) -> Result<PreparedSource> {
    match plan {
        SourcePlan::Existing { main_repo, path } => {
            let manager = RepoManager::new(&path).with_timeout(config.timeout());
            let commit = match config.git_sha.as_deref() {
                Some(sha) if !sha.is_empty() => sha.to_string(),
                _ => manager.current_commit().await?,
            };
            Ok(PreparedSource {
                revision: ResolvedRevision {
                    git_url: main_repo.git_url.clone(),
                    repo_path: path,
                    commit,
                    base_commit: config.base_commit.clone(),
                },
                manager,
                main_repo,
            })
        }
        SourcePlan::Checkout {
            main_repo,
            dest,
            target,
        } => {
            let manager = ci
                .clone_repo(&main_repo.git_url, &dest, config.timeout())
                .await?;
            let commit = ci.checkout(&manager, &target).await?;
            Ok(PreparedSource {
                revision: ResolvedRevision {
                    git_url: main_repo.git_url.clone(),
                    repo_path: dest,
                    commit,
                    base_commit: config.base_commit.clone(),
                },
                manager,
                main_repo,
            })
        }
    }
}

fn main_repo_for(
    config: &BuildConfig,
    detector: &dyn RepoDetector,
    src_path: Option<&Path>,
) -> Result<MainRepo> {
    // An explicit local checkout names the in-image directory: nothing is
    // cloned, and the copy into the image has to land where the checkout's
    // basename says it does, regardless of what any URL is called.
    if let Some(src) = src_path {
        let name = src
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| OsString::from(config.project_repo_name.clone()));
        return Ok(MainRepo {
            git_url: config.git_url.clone().unwrap_or_default(),
            image_path: Path::new("/src").join(name),
        });
    }

    if let Some(url) = &config.git_url {
        let name = repo_basename(url);
        let name = if name.is_empty() {
            config.project_repo_name.as_str()
        } else {
            name
        };
        return Ok(MainRepo {
            git_url: url.clone(),
            image_path: Path::new("/src").join(name),
        });
    }

    if let Some(project) = config.project_name.as_deref() {
        return detector.detect_main_repo(project, &config.project_repo_name);
    }

    Err(BuildError::UnknownProject(String::new()))
}

/// Host-side checkout destination. Named after the in-image repository path
/// so the directory basenames match on both sides of the mount.
fn checkout_dest(config: &BuildConfig, main_repo: &MainRepo) -> PathBuf {
    let dir_name = main_repo
        .image_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| OsString::from(config.project_repo_name.clone()));
    config.workspace_layout().repo_storage().join(dir_name)
}
