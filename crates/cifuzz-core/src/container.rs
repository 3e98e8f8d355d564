//! The container execution boundary.
//!
//! One command invocation in, exit status plus captured output back. The
//! build contract pinned down here: `CIFUZZ=True` is always injected,
//! `CLUSTERFUZZLITE=True` additionally for the lightweight variant, and a
//! host-path-identical bind mount is used when the orchestrator is not
//! itself running inside a container.

use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::config::BuildConfig;
use crate::error::{BuildError, Result};

/// Environment marker for any CI-triggered build.
pub const CIFUZZ_MARKER: &str = "CIFUZZ=True";

/// Additional marker for the lightweight continuous-fuzzing variant.
pub const CLUSTERFUZZLITE_MARKER: &str = "CLUSTERFUZZLITE=True";

/// Environment variable naming the container the orchestrator runs in, when
/// it runs in one.
pub const CONTAINER_NAME_ENV: &str = "CONTAINER_NAME";

const BASE_BUILDER_IMAGE: &str = "gcr.io/oss-fuzz-base/base-builder";

/// Captured result of one container invocation.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl RunOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Opaque command executor behind the container runtime.
///
/// `command[0]` is the program; `env` is extra process environment for the
/// invocation itself (not `-e` container variables, which travel in the
/// command). A failed run comes back as a non-zero `RunOutput`, not an error.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    async fn run(
        &self,
        command: &[String],
        env: &[(String, String)],
        timeout: Option<Duration>,
    ) -> Result<RunOutput>;
}

/// Real engine: spawns the command and captures its output.
pub struct DockerEngine;

impl DockerEngine {
    pub fn new() -> Self {
        Self
    }
}

impl Default for DockerEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    async fn run(
        &self,
        command: &[String],
        env: &[(String, String)],
        timeout: Option<Duration>,
    ) -> Result<RunOutput> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| BuildError::Engine("empty command".to_string()))?;

        debug!(command = %command.join(" "), "running container command");

        let child = Command::new(program)
            .args(args)
            .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| BuildError::Engine(format!("failed to spawn {program}: {e}")))?;

        let output = match timeout {
            Some(t) => tokio::time::timeout(t, child.wait_with_output())
                .await
                .map_err(|_| BuildError::Timeout(t.as_secs()))?
                .map_err(BuildError::Io)?,
            None => child.wait_with_output().await.map_err(BuildError::Io)?,
        };

        Ok(RunOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

/// The `-e` marker pairs every CI-aware build gets.
pub fn ci_env_args(lite: bool) -> Vec<String> {
    let mut args = vec!["-e".to_string(), CIFUZZ_MARKER.to_string()];
    if lite {
        args.push("-e".to_string());
        args.push(CLUSTERFUZZLITE_MARKER.to_string());
    }
    args
}

/// Mount arguments used when not already inside a container: the host
/// repository path is bound to the identical path in the image so
/// path-dependent build scripts resolve the same way on both sides.
pub fn mount_args_not_container(host_repo_path: &Path) -> Vec<String> {
    vec![
        "-v".to_string(),
        format!("{0}:{0}", host_repo_path.display()),
    ]
}

/// Name of the container the orchestrator itself runs in, if any.
pub fn container_name() -> Option<String> {
    std::env::var(CONTAINER_NAME_ENV)
        .ok()
        .filter(|name| !name.is_empty())
}

/// Image the build runs in: the project image for registered projects, the
/// base builder for external ones.
pub fn build_image_name(config: &BuildConfig) -> String {
    match config.project_name.as_deref() {
        Some(project) if !project.is_empty() => format!("gcr.io/oss-fuzz/{project}"),
        _ => BASE_BUILDER_IMAGE.to_string(),
    }
}

/// Assemble the full `docker run` invocation for a fuzz-target build.
///
/// `host_repo_path` and `image_repo_path` share a basename; the in-image
/// copy is replaced by the host checkout before `compile` runs.
pub fn build_fuzzers_command(
    config: &BuildConfig,
    host_repo_path: &Path,
    image_repo_path: &Path,
    lite: bool,
) -> Vec<String> {
    let workspace = config.workspace_layout();

    let mut command: Vec<String> = ["docker", "run", "--rm", "--privileged"]
        .iter()
        .map(|s| s.to_string())
        .collect();

    command.extend(ci_env_args(lite));
    command.push("-e".to_string());
    command.push(format!("SANITIZER={}", config.sanitizer));
    command.push("-e".to_string());
    command.push(format!("FUZZING_LANGUAGE={}", config.language));

    match container_name() {
        Some(container) => {
            command.push("--volumes-from".to_string());
            command.push(container);
        }
        None => {
            command.extend(mount_args_not_container(host_repo_path));
            command.push("-v".to_string());
            command.push(format!("{}:/out", workspace.out().display()));
        }
    }

    command.push(build_image_name(config));
    command.push("/bin/bash".to_string());
    command.push("-c".to_string());

    let image_parent = image_repo_path.parent().unwrap_or(Path::new("/src"));
    command.push(format!(
        "rm -rf {image} && cp -r {host} {parent} && compile",
        image = image_repo_path.display(),
        host = host_repo_path.display(),
        parent = image_parent.display(),
    ));

    command
}

/// Run the assembled build and report whether it succeeded. A failing run is
/// a `false` outcome for the caller to act on, never an error.
pub async fn run_build(
    engine: &dyn ContainerEngine,
    config: &BuildConfig,
    host_repo_path: &Path,
    image_repo_path: &Path,
    lite: bool,
) -> Result<bool> {
    let command = build_fuzzers_command(config, host_repo_path, image_repo_path, lite);
    let output = engine.run(&command, &[], config.timeout()).await?;
    if !output.success() {
        warn!(
            exit_code = output.exit_code,
            stderr = %output.stderr,
            "container build failed"
        );
    }
    Ok(output.success())
}
