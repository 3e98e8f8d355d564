//! cifuzz-core - Fuzzer-build orchestration for CI pipelines
//!
//! Given a source project, a target commit (or pull request), and a build
//! configuration, this crate:
//! - Resolves and checks out the correct source revision
//! - Builds fuzz targets inside an isolated container image
//! - Validates that the produced binaries are runnable fuzzers
//! - Optionally uploads the build artifacts to a filestore, keyed by commit
//!
//! The container runtime, version-control client, and artifact store are
//! external collaborators behind traits, so tests inject fakes instead of
//! patching anything at runtime.

pub mod builder;
pub mod config;
pub mod container;
pub mod deploy;
pub mod error;
pub mod platform;
pub mod repo;
pub mod revision;
pub mod validate;

// Re-export key types
pub use builder::{build_fuzzers, BuildOutcome, BuildState, Builder};
pub use config::{BuildConfig, CiPlatformKind, Workspace};
pub use container::{
    build_fuzzers_command, ci_env_args, mount_args_not_container, ContainerEngine, DockerEngine,
    RunOutput, CIFUZZ_MARKER, CLUSTERFUZZLITE_MARKER,
};
pub use deploy::{
    get_deployment, Deployment, Filestore, FilestoreDeployment, LocalFilestore, NoOpDeployment,
    UploadRecord,
};
pub use error::{BuildError, ConfigError, ResolveError, Result};
pub use platform::{get_ci, CheckoutTarget, ContinuousIntegration, ExternalCi, GenericCi, GithubActions};
pub use repo::{clone_repo_and_get_manager, RepoManager};
pub use revision::{
    parse_pr_ref, MainRepo, ProjectScriptsDetector, RepoDetector, ResolvedRevision,
};
pub use validate::{check_fuzzer_build, find_fuzz_targets, ALLOWED_BROKEN_TARGETS_PERCENTAGE_ENV};
