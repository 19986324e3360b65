//! Best-effort discovery of the repository and CI context of a run.
//!
//! Every field falls back to [`UNKNOWN`] rather than failing: the context is
//! descriptive metadata, not something the chain depends on.

use std::path::Path;
use std::process::Command;

use tracing::debug;

/// Value recorded when a field cannot be discovered.
pub const UNKNOWN: &str = "unknown";

/// Repository and CI context recorded in an attestation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunContext {
    pub repository: String,
    pub branch: String,
    pub commit: String,
    pub workflow: String,
}

impl RunContext {
    /// Discovers the context of `dir` from git and the CI environment.
    pub fn discover(dir: &Path) -> Self {
        let env = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());

        let repository = env("GITHUB_REPOSITORY")
            .or_else(|| git(dir, &["remote", "get-url", "origin"]))
            .unwrap_or_else(|| UNKNOWN.to_string());
        let branch = env("GITHUB_REF_NAME")
            .or_else(|| git(dir, &["branch", "--show-current"]))
            .unwrap_or_else(|| UNKNOWN.to_string());
        let commit = env("GITHUB_SHA")
            .map(|sha| sha.chars().take(12).collect())
            .or_else(|| git(dir, &["rev-parse", "--short=12", "HEAD"]))
            .unwrap_or_else(|| UNKNOWN.to_string());
        let workflow = workflow_from(env("GITHUB_WORKFLOW"), env("GITHUB_RUN_NUMBER"));

        let context = Self {
            repository,
            branch,
            commit,
            workflow,
        };
        debug!(?context, "run context discovered");
        context
    }
}

fn workflow_from(workflow: Option<String>, run_number: Option<String>) -> String {
    match (workflow, run_number) {
        (Some(name), Some(run)) => format!("{name}#{run}"),
        (Some(name), None) => name,
        _ => "local".to_string(),
    }
}

/// Runs `git` in `dir` and returns trimmed stdout on success.
fn git(dir: &Path, args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).current_dir(dir).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let value = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!value.is_empty()).then_some(value)
}
