//! The `check` CLI subcommand -- runs the policy rules without touching the chain.

use std::path::PathBuf;

use anyhow::Context;
use tracing::info;

use tessera_core::CheckStatus;
use tessera_policy::{discover_files, format_results, to_json, PolicyEngine};

use crate::commands::{load_project_config, OutputArgs};
use crate::ExitCode;

// ---------------------------------------------------------------------------
// CheckArgs
// ---------------------------------------------------------------------------

/// Run policy checks against a directory.
#[derive(Debug, clap::Args)]
pub struct CheckArgs {
    /// Target directory to check.
    #[arg(default_value = ".")]
    pub target: PathBuf,

    /// Print outcomes as JSON instead of the text report.
    #[arg(long)]
    pub json: bool,

    #[command(flatten)]
    pub output: OutputArgs,
}

// ---------------------------------------------------------------------------
// execute
// ---------------------------------------------------------------------------

/// Executes the `check` subcommand.
///
/// Returns [`ExitCode::CheckFailed`] if any rule reported a failure.
pub fn execute(args: CheckArgs) -> Result<ExitCode, anyhow::Error> {
    args.output.init_tracing();

    let Some(cfg) = load_project_config(&args.target) else {
        return Ok(ExitCode::ConfigError);
    };

    let discovery = discover_files(&args.target, &cfg.scan)
        .with_context(|| format!("failed to scan '{}'", args.target.display()))?;
    info!(
        files = discovery.files.len(),
        skipped_binary = discovery.stats.skipped_binary,
        skipped_large = discovery.stats.skipped_large,
        "discovery complete"
    );

    let outcomes = PolicyEngine::new().run_checks(&discovery.files);

    if args.json {
        println!("{}", to_json(&outcomes).context("failed to serialize outcomes")?);
    } else {
        print!("{}", format_results(&outcomes));
    }

    let overall = outcomes.iter().map(|o| o.status).max();
    Ok(ExitCode::for_status(overall.unwrap_or(CheckStatus::Pass)))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn args(target: PathBuf) -> CheckArgs {
        CheckArgs {
            target,
            json: false,
            output: OutputArgs {
                quiet: true,
                ..OutputArgs::default()
            },
        }
    }

    #[test]
    fn clean_directory_passes() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join("main.tf"),
            "resource \"aws_s3_bucket\" \"logs\" {\n  acl = \"private\"\n}\n",
        )
        .unwrap();

        assert_eq!(execute(args(tmp.path().to_path_buf())).unwrap(), ExitCode::Pass);
    }

    #[test]
    fn public_bucket_fails() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join("main.tf"),
            "resource \"aws_s3_bucket\" \"site\" {\n  acl = \"public-read\"\n}\n",
        )
        .unwrap();

        assert_eq!(
            execute(args(tmp.path().to_path_buf())).unwrap(),
            ExitCode::CheckFailed
        );
    }

    #[test]
    fn missing_target_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(execute(args(tmp.path().join("absent"))).is_err());
    }
}
