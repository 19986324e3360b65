//! The `init` CLI subcommand -- prepares a project for attestation.
//!
//! Writes a default `.tessera.yaml` trusting a freshly generated signing key,
//! and creates the evidence directory with an empty chain index.

use anyhow::Context;
use tracing::info;

use tessera_core::config::{self, TesseraConfig, CONFIG_FILE_NAME};
use tessera_evidence::{FileKeySource, KeySource, Signer};

use crate::commands::{chain_manager, load_project_config, OutputArgs, ProjectArgs};
use crate::ExitCode;

// ---------------------------------------------------------------------------
// InitArgs
// ---------------------------------------------------------------------------

/// Create the configuration file, signing key and evidence store.
#[derive(Debug, clap::Args)]
pub struct InitArgs {
    #[command(flatten)]
    pub project: ProjectArgs,

    /// Overwrite an existing configuration file.
    #[arg(long)]
    pub force: bool,

    #[command(flatten)]
    pub output: OutputArgs,
}

// ---------------------------------------------------------------------------
// execute
// ---------------------------------------------------------------------------

/// Executes the `init` subcommand.
///
/// An existing signing key is reused, never replaced.
pub fn execute(args: InitArgs) -> Result<ExitCode, anyhow::Error> {
    args.output.init_tracing();
    let project = &args.project.project;

    std::fs::create_dir_all(project)
        .with_context(|| format!("failed to create '{}'", project.display()))?;

    let config_path = project.join(CONFIG_FILE_NAME);
    let write_config = args.force || !config_path.exists();

    // Key and store locations come from the existing file unless it is replaced.
    let base = if write_config {
        TesseraConfig::default()
    } else {
        match load_project_config(project) {
            Some(cfg) => cfg,
            None => return Ok(ExitCode::ConfigError),
        }
    };

    let key_source = FileKeySource::new(base.evidence.signing_key_path(project));
    let signing_key = if key_source.path().exists() {
        key_source
            .signing_key()
            .context("failed to read existing signing key")?
    } else {
        key_source
            .generate()
            .context("failed to generate signing key")?
    };
    let signer = Signer::new(signing_key);
    let public_key = signer.public_key_base64();

    if write_config {
        let mut cfg = base.clone();
        cfg.evidence.trusted_keys = vec![public_key.clone()];
        let yaml = config::to_yaml(&cfg).context("failed to serialize configuration")?;
        std::fs::write(&config_path, yaml)
            .with_context(|| format!("failed to write '{}'", config_path.display()))?;
        info!(path = %config_path.display(), "configuration written");
        println!("Wrote {}", config_path.display());
    } else {
        println!("Keeping existing {}", config_path.display());
        if !base.evidence.trusted_keys.contains(&public_key) {
            println!("Add this key to evidence.trusted_keys to verify local attestations:");
        }
    }

    let manager = chain_manager(project, &base);
    let chain = manager
        .load()
        .context("failed to initialize the evidence chain")?;

    println!("Signing key: {}", key_source.path().display());
    println!("Key id:      {}", signer.key_id());
    println!("Public key:  {public_key}");
    println!(
        "Evidence:    {} (chain {}, {} entries)",
        manager.store().dir().display(),
        chain.chain_id,
        chain.length
    );

    Ok(ExitCode::Pass)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
