//! Judges whether a finished build produced a usable set of fuzz targets.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::config::BuildConfig;
use crate::container::ContainerEngine;
use crate::error::Result;

/// Environment variable carrying the broken-target tolerance into the check
/// harness.
pub const ALLOWED_BROKEN_TARGETS_PERCENTAGE_ENV: &str = "ALLOWED_BROKEN_TARGETS_PERCENTAGE";

const BASE_RUNNER_IMAGE: &str = "gcr.io/oss-fuzz-base/base-runner";

/// Candidate fuzz-target binaries in an output directory: executable regular
/// files, minus the auxiliary files a build drops next to them.
pub fn find_fuzz_targets(out_dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(out_dir) else {
        return Vec::new();
    };

    let mut targets: Vec<PathBuf> = entries
        .flatten()
        .filter(|entry| {
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                return false;
            };
            if name.starts_with('.')
                || name.starts_with("afl-")
                || name.starts_with("jazzer_")
                || name.ends_with(".zip")
                || name.ends_with(".dict")
                || name.ends_with(".options")
                || name == "llvm-symbolizer"
            {
                return false;
            }
            let Ok(metadata) = entry.metadata() else {
                return false;
            };
            metadata.is_file() && metadata.permissions().mode() & 0o111 != 0
        })
        .map(|entry| entry.path())
        .collect();

    targets.sort();
    targets
}

/// Check that the workspace holds a usable build.
///
/// Rules, in order: a missing workspace is invalid; an output directory with
/// zero candidate targets is invalid; otherwise every candidate is checked
/// through the runtime harness and the broken fraction is compared against
/// the configured tolerance (zero unless overridden).
pub async fn check_fuzzer_build(config: &BuildConfig, engine: &dyn ContainerEngine) -> Result<bool> {
    if !config.workspace.exists() {
        warn!(workspace = %config.workspace.display(), "workspace does not exist");
        return Ok(false);
    }

    let out_dir = config.workspace_layout().out();
    let targets = find_fuzz_targets(&out_dir);
    if targets.is_empty() {
        warn!(out_dir = %out_dir.display(), "no fuzz targets in output directory");
        return Ok(false);
    }

    let env: Vec<(String, String)> = config
        .allowed_broken_targets_percentage
        .as_ref()
        .map(|percentage| {
            vec![(
                ALLOWED_BROKEN_TARGETS_PERCENTAGE_ENV.to_string(),
                percentage.clone(),
            )]
        })
        .unwrap_or_default();

    let mut broken = 0usize;
    for target in &targets {
        let name = target.file_name().and_then(|n| n.to_str()).unwrap_or("");
        let command = check_target_command(config, &out_dir, name);
        let output = engine.run(&command, &env, config.timeout()).await?;
        if !output.success() {
            warn!(target = name, "fuzz target failed its build check");
            broken += 1;
        }
    }

    let allowed: f64 = config
        .allowed_broken_targets_percentage
        .as_deref()
        .and_then(|v| v.parse().ok())
        .unwrap_or(0.0);
    let broken_percentage = broken as f64 * 100.0 / targets.len() as f64;

    info!(
        total = targets.len(),
        broken,
        broken_percentage,
        allowed,
        "fuzz build check finished"
    );

    if broken_percentage > allowed {
        warn!(
            broken_percentage,
            allowed, "too many broken fuzz targets, build is invalid"
        );
        return Ok(false);
    }
    Ok(true)
}

fn check_target_command(config: &BuildConfig, out_dir: &Path, target_name: &str) -> Vec<String> {
    let mut command = vec![
        "docker".to_string(),
        "run".to_string(),
        "--rm".to_string(),
        "-v".to_string(),
        format!("{}:/out", out_dir.display()),
        "-e".to_string(),
        format!("SANITIZER={}", config.sanitizer),
    ];
    // The tolerance travels into the container so the check harness enforces
    // the same threshold the orchestrator does.
    if let Some(percentage) = &config.allowed_broken_targets_percentage {
        command.push("-e".to_string());
        command.push(format!(
            "{ALLOWED_BROKEN_TARGETS_PERCENTAGE_ENV}={percentage}"
        ));
    }
    command.push(BASE_RUNNER_IMAGE.to_string());
    command.push("bad_build_check".to_string());
    command.push(format!("/out/{target_name}"));
    command
}
