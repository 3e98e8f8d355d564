//! CIFuzz build orchestrator CLI.
//!
//! ## Commands
//!
//! - `build`: resolve a revision, build fuzz targets in a container image,
//!   validate them, and optionally upload the artifacts
//! - `check-build`: validate an existing output directory without building
//!
//! The process exits 0 only when the orchestrator reports success;
//! configuration-contract violations exit 2 and every other failure exits 1.

use anyhow::{anyhow, Result};
use clap::{Args, Parser, Subcommand};
use cifuzz_core::{
    build_fuzzers, check_fuzzer_build, BuildConfig, CiPlatformKind, ConfigError, DockerEngine,
};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::error;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cifuzz-build")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Builds and validates fuzz targets for CI pipelines", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build fuzz targets for a commit or pull request
    Build(BuildArgs),

    /// Check that an existing build output directory holds usable fuzzers
    CheckBuild(BuildArgs),
}

#[derive(Args)]
struct BuildArgs {
    /// Registered project name; omit for external projects with --git-url
    #[arg(long)]
    project_name: Option<String>,

    /// Name of the repository the fuzz targets live in
    #[arg(long)]
    repo_name: String,

    /// Workspace root for checkout and build output
    #[arg(long, env = "GITHUB_WORKSPACE")]
    workspace: PathBuf,

    /// Sanitizer to build with
    #[arg(long, default_value = "address")]
    sanitizer: String,

    /// Language of the fuzz targets
    #[arg(long, default_value = "c++")]
    language: String,

    /// Repository clone URL
    #[arg(long)]
    git_url: Option<String>,

    /// Commit SHA to build
    #[arg(long, env = "GITHUB_SHA")]
    git_sha: Option<String>,

    /// PR merge ref to build (refs/pull/<n>/merge)
    #[arg(long, env = "GITHUB_REF")]
    pr_ref: Option<String>,

    /// Base ref for diffing
    #[arg(long)]
    base_ref: Option<String>,

    /// Base commit for diffing
    #[arg(long)]
    base_commit: Option<String>,

    /// CI platform tag: generic, github-actions, or other-ci
    #[arg(long, default_value = "generic")]
    platform: String,

    /// Filestore root; omit (or pass no_filestore) to disable persistence
    #[arg(long)]
    filestore: Option<String>,

    /// Tolerated percentage of broken fuzz targets
    #[arg(long)]
    allowed_broken_targets_percentage: Option<String>,

    /// Upload the build to the filestore on success
    #[arg(long)]
    upload_build: bool,

    /// Existing local source checkout; skips network checkout
    #[arg(long)]
    project_src_path: Option<PathBuf>,

    /// Directory holding per-project build scripts
    #[arg(long)]
    projects_dir: Option<PathBuf>,

    /// Deadline in seconds for each blocking operation
    #[arg(long)]
    timeout_secs: Option<u64>,
}

impl BuildArgs {
    fn into_config(self) -> Result<BuildConfig> {
        let platform = CiPlatformKind::from_tag(&self.platform)
            .ok_or_else(|| anyhow!("unknown CI platform tag: {}", self.platform))?;

        let mut config = BuildConfig::new(self.repo_name, self.workspace);
        config.project_name = self.project_name;
        config.sanitizer = self.sanitizer;
        config.language = self.language;
        config.git_url = self.git_url;
        config.git_sha = self.git_sha;
        config.pr_ref = self.pr_ref;
        config.base_ref = self.base_ref;
        config.base_commit = self.base_commit;
        config.platform = platform;
        config.filestore = self.filestore;
        config.allowed_broken_targets_percentage = self.allowed_broken_targets_percentage;
        config.upload_build = self.upload_build;
        config.project_src_path = self.project_src_path;
        config.projects_dir = self.projects_dir;
        config.timeout_secs = self.timeout_secs;
        Ok(config)
    }
}

fn init_tracing(verbose: bool, json: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run(command: Commands) -> Result<bool> {
    match command {
        Commands::Build(args) => {
            let config = args.into_config()?;
            let success = build_fuzzers(config).await?;
            Ok(success)
        }
        Commands::CheckBuild(args) => {
            let config = args.into_config()?;
            let engine = DockerEngine::new();
            let valid = check_fuzzer_build(&config, &engine).await?;
            Ok(valid)
        }
    }
}

/// 0 for success, 2 for a configuration-contract violation, 1 for any other
/// failure (bad flags, engine errors, failed builds).
fn exit_status(result: &Result<bool>) -> u8 {
    match result {
        Ok(true) => 0,
        Ok(false) => 1,
        Err(e) if e.downcast_ref::<ConfigError>().is_some() => 2,
        Err(_) => 1,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.json);

    let result = run(cli.command).await;
    match &result {
        Ok(true) => {}
        Ok(false) => error!("build failed"),
        Err(e) => error!(error = %e, "command failed"),
    }
    ExitCode::from(exit_status(&result))
}
