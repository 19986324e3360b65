//! Subcommand implementations.
//!
//! Each module exposes a `clap::Args` struct and an `execute` function
//! returning an [`ExitCode`](crate::ExitCode).

use std::path::{Path, PathBuf};

use tessera_core::config::{self, TesseraConfig};
use tessera_evidence::{ChainManager, FsEvidenceStore};

pub mod attest;
pub mod check;
pub mod init;
pub mod log;
pub mod rebuild;
pub mod verify;

// ---------------------------------------------------------------------------
// Shared arguments
// ---------------------------------------------------------------------------

/// Output flags shared by every subcommand.
#[derive(Debug, Clone, Default, clap::Args)]
pub struct OutputArgs {
    /// Enable verbose output.
    #[arg(long, short)]
    pub verbose: bool,

    /// Suppress all non-essential output.
    #[arg(long, short)]
    pub quiet: bool,

    /// Emit logs as JSON lines.
    #[arg(long)]
    pub log_json: bool,
}

impl OutputArgs {
    /// Installs the tracing subscriber. A second installation is ignored.
    pub fn init_tracing(&self) {
        let _ = tessera_core::init_tracing(self.verbose, self.quiet, self.log_json);
    }
}

/// Location of the project whose evidence chain is used.
#[derive(Debug, Clone, clap::Args)]
pub struct ProjectArgs {
    /// Project directory holding `.tessera.yaml` and the evidence store.
    #[arg(long, default_value = ".")]
    pub project: PathBuf,
}

impl Default for ProjectArgs {
    fn default() -> Self {
        Self {
            project: PathBuf::from("."),
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Loads configuration for `project`, printing the error on failure.
///
/// Returns `None` when the configuration is invalid so the caller can exit
/// with [`ExitCode::ConfigError`](crate::ExitCode::ConfigError).
pub(crate) fn load_project_config(project: &Path) -> Option<TesseraConfig> {
    match config::load_config(Some(project)) {
        Ok(cfg) => Some(cfg),
        Err(e) => {
            eprintln!("Configuration error: {e}");
            None
        }
    }
}

/// Opens the chain manager over the project's evidence directory.
pub(crate) fn chain_manager(
    project: &Path,
    cfg: &TesseraConfig,
) -> ChainManager<FsEvidenceStore> {
    ChainManager::new(FsEvidenceStore::new(cfg.evidence.evidence_dir(project)))
}
