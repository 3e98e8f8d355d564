//! The end-to-end build pipeline and its state machine.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::BuildConfig;
use crate::container::{run_build, ContainerEngine, DockerEngine};
use crate::deploy::{get_deployment, Deployment, UploadRecord};
use crate::error::{BuildError, ConfigError, ResolveError, Result};
use crate::platform::{get_ci, ContinuousIntegration};
use crate::repo::RepoManager;
use crate::revision::{self, ProjectScriptsDetector, RepoDetector, Resolution, ResolvedRevision};
use crate::validate::{check_fuzzer_build, find_fuzz_targets};

/// Pipeline states. `Aborted` is terminal and reachable from any state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildState {
    Init,
    ResolvingSource,
    CheckingOut,
    Building,
    Validating,
    Uploading,
    Done,
    Aborted,
}

/// What one build attempt produced. Never mutated after construction.
#[derive(Debug, Clone)]
pub struct BuildOutcome {
    pub success: bool,
    pub out_dir: PathBuf,
    pub fuzz_targets: Vec<PathBuf>,
    pub validated: bool,
}

/// Orchestrates one build: resolve, check out, build, validate, upload.
///
/// Collaborators are injected so tests can substitute fakes for the CI
/// platform, container engine, repo detector, and deployment.
pub struct Builder {
    pub config: BuildConfig,
    ci: Box<dyn ContinuousIntegration>,
    engine: Arc<dyn ContainerEngine>,
    detector: Arc<dyn RepoDetector>,
    deployment: Box<dyn Deployment>,

    /// Working-tree handle, set once checkout completes.
    pub repo_manager: Option<RepoManager>,

    build_id: Uuid,
    state: BuildState,
    host_repo_path: Option<PathBuf>,
    image_repo_path: Option<PathBuf>,
    revision: Option<ResolvedRevision>,
    outcome: Option<BuildOutcome>,
}

impl Builder {
    pub fn new(
        config: BuildConfig,
        ci: Box<dyn ContinuousIntegration>,
        engine: Arc<dyn ContainerEngine>,
        detector: Arc<dyn RepoDetector>,
        deployment: Box<dyn Deployment>,
    ) -> Self {
        Self {
            config,
            ci,
            engine,
            detector,
            deployment,
            repo_manager: None,
            build_id: Uuid::new_v4(),
            state: BuildState::Init,
            host_repo_path: None,
            image_repo_path: None,
            revision: None,
            outcome: None,
        }
    }

    pub fn state(&self) -> BuildState {
        self.state
    }

    /// Host-side source path used for the build mount. Fixed exactly once at
    /// the `Building` transition; its basename always matches the in-image
    /// repository path's basename.
    pub fn host_repo_path(&self) -> Option<&Path> {
        self.host_repo_path.as_deref()
    }

    pub fn revision(&self) -> Option<&ResolvedRevision> {
        self.revision.as_ref()
    }

    pub fn outcome(&self) -> Option<&BuildOutcome> {
        self.outcome.as_ref()
    }

    fn transition(&mut self, next: BuildState) {
        info!(
            build_id = %self.build_id,
            from = ?self.state,
            to = ?next,
            "pipeline transition"
        );
        self.state = next;
    }

    fn abort(&mut self, reason: &str) -> bool {
        warn!(build_id = %self.build_id, reason, "build aborted");
        self.state = BuildState::Aborted;
        self.clean_workspace();
        false
    }

    /// Remove the workspace subdirectories so an aborted build leaves no
    /// partial checkout or stale binaries behind.
    fn clean_workspace(&self) {
        let workspace = self.config.workspace_layout();
        for dir in [workspace.out(), workspace.repo_storage()] {
            match std::fs::remove_dir_all(&dir) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(dir = %dir.display(), error = %e, "workspace cleanup failed");
                }
            }
        }
    }

    /// Run the pipeline to completion.
    ///
    /// `Err` is reserved for configuration-contract violations; every
    /// domain-level failure comes back as `Ok(false)` so CI can report
    /// cleanly. A syntactically invalid PR ref is tolerated and reported as
    /// success without a build.
    pub async fn build(&mut self) -> std::result::Result<bool, ConfigError> {
        self.transition(BuildState::ResolvingSource);
        let plan = match revision::resolve(&self.config, self.detector.as_ref()) {
            Ok(Resolution::Skip) => {
                info!(build_id = %self.build_id, "nothing to build");
                self.transition(BuildState::Done);
                return Ok(true);
            }
            Ok(Resolution::Source(plan)) => plan,
            Err(ResolveError::Config(e)) => {
                error!(build_id = %self.build_id, error = %e, "configuration contract violated");
                self.state = BuildState::Aborted;
                return Err(e);
            }
            Err(ResolveError::Build(e)) => {
                return Ok(self.abort(&format!("source resolution failed: {e}")));
            }
        };

        let workspace = self.config.workspace_layout();
        if let Err(e) = workspace.create() {
            return Ok(self.abort(&format!(
                "workspace {} is unusable: {e}",
                workspace.root().display()
            )));
        }

        self.transition(BuildState::CheckingOut);
        let prepared = match revision::checkout(plan, &self.config, self.ci.as_ref()).await {
            Ok(prepared) => prepared,
            Err(e) => return Ok(self.abort(&format!("checkout failed: {e}"))),
        };
        info!(
            build_id = %self.build_id,
            commit = %prepared.revision.commit,
            repo = %prepared.manager.repo_dir().display(),
            "source checked out"
        );
        self.image_repo_path = Some(prepared.main_repo.image_path.clone());
        self.revision = Some(prepared.revision);
        self.repo_manager = Some(prepared.manager);

        self.transition(BuildState::Building);
        if !self.build_fuzz_targets().await {
            return Ok(false);
        }

        self.transition(BuildState::Validating);
        let valid = match check_fuzzer_build(&self.config, self.engine.as_ref()).await {
            Ok(valid) => valid,
            Err(e) => {
                warn!(build_id = %self.build_id, error = %e, "build check errored");
                false
            }
        };
        if !valid {
            return Ok(self.abort("fuzz build check failed"));
        }

        let out_dir = workspace.out();
        self.outcome = Some(BuildOutcome {
            success: true,
            fuzz_targets: find_fuzz_targets(&out_dir),
            out_dir,
            validated: true,
        });

        if self.config.upload_build {
            self.transition(BuildState::Uploading);
            if let Err(e) = self.upload_build().await {
                return Ok(self.abort(&format!("upload failed: {e}")));
            }
        }

        self.transition(BuildState::Done);
        Ok(true)
    }

    /// Build the fuzz targets inside the container image. Sets
    /// `host_repo_path` exactly once, then runs the build; a failed
    /// container run aborts the pipeline without raising.
    async fn build_fuzz_targets(&mut self) -> bool {
        let host_repo_path = match &self.repo_manager {
            Some(manager) => manager.repo_dir().to_path_buf(),
            None => return self.abort("no repository checked out"),
        };
        let image_repo_path = self
            .image_repo_path
            .clone()
            .unwrap_or_else(|| Path::new("/src").join(&self.config.project_repo_name));
        self.host_repo_path = Some(host_repo_path.clone());

        match run_build(
            self.engine.as_ref(),
            &self.config,
            &host_repo_path,
            &image_repo_path,
            self.ci.lite(),
        )
        .await
        {
            Ok(true) => true,
            Ok(false) => self.abort("container build failed"),
            Err(e) => self.abort(&format!("container engine error: {e}")),
        }
    }

    /// Upload the build output keyed by the current commit. A no-op unless
    /// the upload flag is set; never invoked with a stale commit because the
    /// commit is read from the working tree at upload time.
    pub async fn upload_build(&mut self) -> Result<Option<UploadRecord>> {
        if !self.config.upload_build {
            return Ok(None);
        }
        let manager = self.repo_manager.as_ref().ok_or(BuildError::NoRepo)?;
        let commit = manager.current_commit().await?;
        let out_dir = self.config.workspace_layout().out();
        self.deployment.upload_build(&commit, &out_dir).await
    }
}

/// Build fuzz targets for `config` with the real collaborators wired in.
///
/// Returns `Ok(true)` on success (including the tolerated success-without-
/// build for a malformed PR ref), `Ok(false)` on any domain failure, and
/// `Err` only for configuration-contract violations. Callers intending
/// process exit codes map true to 0 and false to non-zero.
pub async fn build_fuzzers(config: BuildConfig) -> std::result::Result<bool, ConfigError> {
    let ci = get_ci(&config);
    let engine: Arc<dyn ContainerEngine> = Arc::new(DockerEngine::new());
    let projects_dir = config
        .projects_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from("projects"));
    let detector: Arc<dyn RepoDetector> = Arc::new(ProjectScriptsDetector::new(projects_dir));
    let deployment = get_deployment(&config);

    let mut builder = Builder::new(config, ci, engine, detector, deployment);
    builder.build().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_initial_state() {
        let config = BuildConfig::new("myrepo", "/tmp/ws");
        let builder = Builder::new(
            config.clone(),
            get_ci(&config),
            Arc::new(DockerEngine::new()),
            Arc::new(ProjectScriptsDetector::new("/nonexistent")),
            get_deployment(&config),
        );
        assert_eq!(builder.state(), BuildState::Init);
        assert!(builder.host_repo_path().is_none());
        assert!(builder.outcome().is_none());
    }
}
