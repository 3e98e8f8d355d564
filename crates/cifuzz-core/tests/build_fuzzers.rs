//! Integration tests driving the build pipeline with fake collaborators.

use async_trait::async_trait;
use cifuzz_core::{
    BuildConfig, BuildState, Builder, CiPlatformKind, ConfigError, ContainerEngine,
    ContinuousIntegration, Filestore, FilestoreDeployment, MainRepo, NoOpDeployment,
    ProjectScriptsDetector, RepoDetector, RepoManager, Result, RunOutput, CIFUZZ_MARKER,
    CLUSTERFUZZLITE_MARKER,
};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Command as StdCommand;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const EXAMPLE_PROJECT: &str = "example";

/// Engine that records every invocation and reports a fixed exit code.
struct FakeEngine {
    exit_code: i32,
    calls: Mutex<Vec<(Vec<String>, Vec<(String, String)>)>>,
}

impl FakeEngine {
    fn new(exit_code: i32) -> Arc<Self> {
        Arc::new(Self {
            exit_code,
            calls: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> Vec<(Vec<String>, Vec<(String, String)>)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ContainerEngine for FakeEngine {
    async fn run(
        &self,
        command: &[String],
        env: &[(String, String)],
        _timeout: Option<Duration>,
    ) -> Result<RunOutput> {
        self.calls
            .lock()
            .unwrap()
            .push((command.to_vec(), env.to_vec()));
        Ok(RunOutput {
            exit_code: self.exit_code,
            stdout: String::new(),
            stderr: String::new(),
        })
    }
}

/// Platform fake that checks out without touching the network. With
/// `real_git` it materializes an actual single-commit repository so commit
/// lookups against the working tree behave normally.
struct FakePlatform {
    lite: bool,
    real_git: bool,
}

fn run_git(dir: &Path, args: &[&str]) {
    let output = StdCommand::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "git {args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
}

fn init_git_repo(dir: &Path) {
    run_git(dir, &["init"]);
    run_git(dir, &["config", "user.name", "test-user"]);
    run_git(dir, &["config", "user.email", "test@example.com"]);
    run_git(dir, &["commit", "--allow-empty", "-m", "initial"]);
}

#[async_trait]
impl ContinuousIntegration for FakePlatform {
    fn kind(&self) -> CiPlatformKind {
        CiPlatformKind::GithubActions
    }

    fn lite(&self) -> bool {
        self.lite
    }

    async fn clone_repo(
        &self,
        _url: &str,
        dest: &Path,
        _timeout: Option<Duration>,
    ) -> Result<RepoManager> {
        std::fs::create_dir_all(dest)?;
        if self.real_git {
            init_git_repo(dest);
        }
        Ok(RepoManager::new(dest))
    }

    async fn checkout(
        &self,
        repo: &RepoManager,
        _target: &cifuzz_core::CheckoutTarget,
    ) -> Result<String> {
        if self.real_git {
            repo.current_commit().await
        } else {
            Ok("fake-commit".to_string())
        }
    }
}

struct StaticDetector(MainRepo);

impl RepoDetector for StaticDetector {
    fn detect_main_repo(&self, _project: &str, _repo: &str) -> Result<MainRepo> {
        Ok(self.0.clone())
    }
}

fn static_detector(image_path: &str) -> Arc<dyn RepoDetector> {
    Arc::new(StaticDetector(MainRepo {
        git_url: "https://example.com/example.git".to_string(),
        image_path: PathBuf::from(image_path),
    }))
}

struct RecordingFilestore {
    uploads: Mutex<Vec<String>>,
}

impl RecordingFilestore {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            uploads: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl Filestore for RecordingFilestore {
    async fn upload_build(&self, name: &str, _directory: &Path) -> Result<String> {
        self.uploads.lock().unwrap().push(name.to_string());
        Ok(format!("handle-{name}"))
    }
}

fn create_build_config(workspace: &Path) -> BuildConfig {
    let mut config = BuildConfig::new(EXAMPLE_PROJECT, workspace);
    config.project_name = Some(EXAMPLE_PROJECT.to_string());
    config.platform = CiPlatformKind::GithubActions;
    config
}

fn place_fuzz_target(workspace: &Path, name: &str) {
    let out = workspace.join("build-out");
    std::fs::create_dir_all(&out).unwrap();
    let path = out.join(name);
    std::fs::write(&path, b"\x7fELF").unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
}

fn command_has_env_var_arg(command: &[String], env_var_arg: &str) -> bool {
    command
        .windows(2)
        .any(|pair| pair[0] == "-e" && pair[1] == env_var_arg)
}

#[tokio::test]
async fn test_cifuzz_clusterfuzzlite_env_vars() {
    let tmp = tempfile::tempdir().unwrap();
    let mut config = create_build_config(tmp.path());
    config.pr_ref = Some("refs/pull/1757/merge".to_string());

    // Engine fails the build so the pipeline quits early; the recorded
    // command is all we need.
    let engine = FakeEngine::new(1);
    let mut builder = Builder::new(
        config,
        Box::new(FakePlatform {
            lite: true,
            real_git: false,
        }),
        engine.clone(),
        static_detector("/src/example"),
        Box::new(NoOpDeployment),
    );

    assert!(!builder.build().await.unwrap());

    let calls = engine.calls();
    let (docker_run_command, _) = &calls[0];
    assert!(command_has_env_var_arg(docker_run_command, CIFUZZ_MARKER));
    assert!(command_has_env_var_arg(
        docker_run_command,
        CLUSTERFUZZLITE_MARKER
    ));
}

#[tokio::test]
async fn test_generic_platform_omits_clusterfuzzlite_marker() {
    let tmp = tempfile::tempdir().unwrap();
    let mut config = create_build_config(tmp.path());
    config.pr_ref = Some("refs/pull/1757/merge".to_string());

    let engine = FakeEngine::new(1);
    let mut builder = Builder::new(
        config,
        Box::new(FakePlatform {
            lite: false,
            real_git: false,
        }),
        engine.clone(),
        static_detector("/src/example"),
        Box::new(NoOpDeployment),
    );

    assert!(!builder.build().await.unwrap());

    let calls = engine.calls();
    let (docker_run_command, _) = &calls[0];
    assert!(command_has_env_var_arg(docker_run_command, CIFUZZ_MARKER));
    assert!(!command_has_env_var_arg(
        docker_run_command,
        CLUSTERFUZZLITE_MARKER
    ));
}

#[tokio::test]
async fn test_correct_host_repo_path() {
    // The directory the repo is checked out into must have the same name as
    // the directory used inside the image, so the in-image copy is replaced
    // properly.
    let tmp = tempfile::tempdir().unwrap();
    let mut config = create_build_config(tmp.path());
    config.git_sha = Some("0b95fe1039ed7c38fea1f97078316bfc1030c523".to_string());

    let engine = FakeEngine::new(1);
    let image_repo_path = Path::new("/src/repo_dir");
    let mut builder = Builder::new(
        config,
        Box::new(FakePlatform {
            lite: true,
            real_git: false,
        }),
        engine,
        static_detector("/src/repo_dir"),
        Box::new(NoOpDeployment),
    );

    builder.build().await.unwrap();

    assert_eq!(
        builder.host_repo_path().unwrap().file_name(),
        image_repo_path.file_name()
    );
}

#[tokio::test]
async fn test_explicit_source_path_names_image_dir() {
    // A local checkout whose directory name differs from the URL basename:
    // the in-image directory must follow the checkout, or the copy before
    // `compile` would land next to a stale tree.
    let tmp = tempfile::tempdir().unwrap();
    let src = tmp.path().join("local-checkout-dir");
    std::fs::create_dir_all(&src).unwrap();

    let mut config = create_build_config(tmp.path());
    config.project_src_path = Some(src.clone());
    config.git_url = Some("https://github.com/example/myrepo.git".to_string());
    config.git_sha = Some("0b95fe1039ed7c38fea1f97078316bfc1030c523".to_string());

    let engine = FakeEngine::new(1);
    let mut builder = Builder::new(
        config,
        Box::new(FakePlatform {
            lite: true,
            real_git: false,
        }),
        engine.clone(),
        static_detector("/src/example"),
        Box::new(NoOpDeployment),
    );

    assert!(!builder.build().await.unwrap());

    assert_eq!(builder.host_repo_path().unwrap(), src.as_path());
    let calls = engine.calls();
    let (docker_run_command, _) = &calls[0];
    let script = docker_run_command.last().unwrap();
    assert!(
        script.contains("rm -rf /src/local-checkout-dir"),
        "image dir should match the checkout basename, got: {script}"
    );
}

#[tokio::test]
async fn test_aborted_build_cleans_workspace() {
    let tmp = tempfile::tempdir().unwrap();
    let mut config = create_build_config(tmp.path());
    config.pr_ref = Some("refs/pull/1757/merge".to_string());

    let engine = FakeEngine::new(1);
    let mut builder = Builder::new(
        config,
        Box::new(FakePlatform {
            lite: true,
            real_git: false,
        }),
        engine,
        static_detector("/src/example"),
        Box::new(NoOpDeployment),
    );

    assert!(!builder.build().await.unwrap());
    assert_eq!(builder.state(), BuildState::Aborted);

    // The failed build leaves neither a partial checkout nor stale output.
    assert!(!tmp.path().join("build-out").exists());
    assert!(!tmp.path().join("repo-storage").exists());
}

#[tokio::test]
async fn test_upload_build_disabled() {
    let tmp = tempfile::tempdir().unwrap();
    let config = create_build_config(tmp.path());

    let filestore = RecordingFilestore::new();
    let mut builder = Builder::new(
        config,
        Box::new(FakePlatform {
            lite: true,
            real_git: false,
        }),
        FakeEngine::new(0),
        static_detector("/src/example"),
        Box::new(FilestoreDeployment::new(filestore.clone(), false)),
    );

    let record = builder.upload_build().await.unwrap();

    assert!(record.is_none());
    assert!(filestore.uploads.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_upload_build_keyed_by_current_commit() {
    let tmp = tempfile::tempdir().unwrap();
    let mut config = create_build_config(tmp.path());
    config.upload_build = true;

    let repo_dir = tmp.path().join("repo");
    std::fs::create_dir_all(&repo_dir).unwrap();
    init_git_repo(&repo_dir);
    let manager = RepoManager::new(&repo_dir);
    let commit = manager.current_commit().await.unwrap();

    let filestore = RecordingFilestore::new();
    let mut builder = Builder::new(
        config,
        Box::new(FakePlatform {
            lite: true,
            real_git: false,
        }),
        FakeEngine::new(0),
        static_detector("/src/example"),
        Box::new(FilestoreDeployment::new(filestore.clone(), true)),
    );
    builder.repo_manager = Some(manager);

    let record = builder.upload_build().await.unwrap().unwrap();

    assert_eq!(record.commit, commit);
    assert_eq!(*filestore.uploads.lock().unwrap(), vec![commit]);
}

#[tokio::test]
async fn test_invalid_pr_ref_is_success_without_build() {
    let tmp = tempfile::tempdir().unwrap();
    let mut config = create_build_config(tmp.path());
    config.pr_ref = Some("ref-1/merge".to_string());

    let engine = FakeEngine::new(0);
    let mut builder = Builder::new(
        config,
        Box::new(FakePlatform {
            lite: true,
            real_git: false,
        }),
        engine.clone(),
        static_detector("/src/example"),
        Box::new(NoOpDeployment),
    );

    assert!(builder.build().await.unwrap());
    assert_eq!(builder.state(), BuildState::Done);
    assert!(engine.calls().is_empty(), "no build should be attempted");
}

#[tokio::test]
async fn test_empty_git_sha_is_config_error() {
    let tmp = tempfile::tempdir().unwrap();
    let mut config = create_build_config(tmp.path());
    config.git_sha = Some(String::new());

    let mut builder = Builder::new(
        config,
        Box::new(FakePlatform {
            lite: true,
            real_git: false,
        }),
        FakeEngine::new(0),
        static_detector("/src/example"),
        Box::new(NoOpDeployment),
    );

    let err = builder.build().await.unwrap_err();
    assert!(matches!(err, ConfigError::EmptyGitSha));
    assert_eq!(builder.state(), BuildState::Aborted);
}

#[tokio::test]
async fn test_unknown_project_returns_false() {
    let tmp = tempfile::tempdir().unwrap();
    let projects = tempfile::tempdir().unwrap();

    let mut config = create_build_config(tmp.path());
    config.project_name = Some("not_a_valid_project".to_string());
    config.git_sha = Some("0b95fe1039ed7c38fea1f97078316bfc1030c523".to_string());

    let mut builder = Builder::new(
        config,
        Box::new(FakePlatform {
            lite: true,
            real_git: false,
        }),
        FakeEngine::new(0),
        Arc::new(ProjectScriptsDetector::new(projects.path())),
        Box::new(NoOpDeployment),
    );

    assert!(!builder.build().await.unwrap());
    assert_eq!(builder.state(), BuildState::Aborted);
}

#[tokio::test]
async fn test_unknown_repo_returns_false() {
    let tmp = tempfile::tempdir().unwrap();
    let projects = tempfile::tempdir().unwrap();
    let project_dir = projects.path().join(EXAMPLE_PROJECT);
    std::fs::create_dir_all(&project_dir).unwrap();
    std::fs::write(
        project_dir.join("Dockerfile"),
        "RUN git clone https://github.com/example/example.git\n",
    )
    .unwrap();

    let mut config = create_build_config(tmp.path());
    config.project_repo_name = "not-real-repo".to_string();
    config.git_sha = Some("0b95fe1039ed7c38fea1f97078316bfc1030c523".to_string());

    let mut builder = Builder::new(
        config,
        Box::new(FakePlatform {
            lite: true,
            real_git: false,
        }),
        FakeEngine::new(0),
        Arc::new(ProjectScriptsDetector::new(projects.path())),
        Box::new(NoOpDeployment),
    );

    assert!(!builder.build().await.unwrap());
}

#[tokio::test]
async fn test_full_pipeline_with_upload() {
    let tmp = tempfile::tempdir().unwrap();
    let mut config = create_build_config(tmp.path());
    config.git_sha = Some("HEAD".to_string());
    config.upload_build = true;

    // The fake engine produces no files, so seed the output directory with
    // a target up front.
    place_fuzz_target(tmp.path(), "do_stuff_fuzzer");

    let engine = FakeEngine::new(0);
    let filestore = RecordingFilestore::new();
    let mut builder = Builder::new(
        config,
        Box::new(FakePlatform {
            lite: true,
            real_git: true,
        }),
        engine.clone(),
        static_detector("/src/example"),
        Box::new(FilestoreDeployment::new(filestore.clone(), true)),
    );

    assert!(builder.build().await.unwrap());
    assert_eq!(builder.state(), BuildState::Done);

    let outcome = builder.outcome().unwrap();
    assert!(outcome.success);
    assert!(outcome.validated);
    assert_eq!(outcome.fuzz_targets.len(), 1);

    // Build + one per-target check.
    assert_eq!(engine.calls().len(), 2);

    let commit = builder
        .repo_manager
        .as_ref()
        .unwrap()
        .current_commit()
        .await
        .unwrap();
    assert_eq!(*filestore.uploads.lock().unwrap(), vec![commit]);

    assert_eq!(
        builder.host_repo_path().unwrap().file_name().unwrap(),
        "example"
    );
}

#[tokio::test]
async fn test_invalid_workspace_returns_false() {
    let tmp = tempfile::tempdir().unwrap();
    let mut config = create_build_config(&tmp.path().join("not").join("a").join("dir"));
    config.git_sha = Some("0b95fe1039ed7c38fea1f97078316bfc1030c523".to_string());

    let mut builder = Builder::new(
        config,
        Box::new(FakePlatform {
            lite: true,
            real_git: false,
        }),
        FakeEngine::new(0),
        static_detector("/src/example"),
        Box::new(NoOpDeployment),
    );

    assert!(!builder.build().await.unwrap());
    assert_eq!(builder.state(), BuildState::Aborted);
}
