//! The `attest` CLI subcommand -- checks a directory and records the result in
//! the evidence chain.

use std::path::PathBuf;

use anyhow::Context;
use tracing::{info, warn};

use tessera_evidence::{
    AttestationBuilder, EphemeralKeySource, FileKeySource, KeySource, RunMetadata, Signer,
};
use tessera_policy::{discover_files, format_results, PolicyEngine};

use crate::commands::{chain_manager, load_project_config, OutputArgs};
use crate::context::RunContext;
use crate::ExitCode;

// ---------------------------------------------------------------------------
// AttestArgs
// ---------------------------------------------------------------------------

/// Run policy checks and append a signed attestation to the evidence chain.
#[derive(Debug, clap::Args)]
pub struct AttestArgs {
    /// Target directory to check.
    #[arg(default_value = ".")]
    pub target: PathBuf,

    /// Project directory holding `.tessera.yaml` and the evidence store.
    /// Defaults to the target directory.
    #[arg(long)]
    pub project: Option<PathBuf>,

    /// Sign with a throwaway key when no signing key exists.
    #[arg(long)]
    pub ephemeral_key: bool,

    #[command(flatten)]
    pub output: OutputArgs,
}

// ---------------------------------------------------------------------------
// execute
// ---------------------------------------------------------------------------

/// Executes the `attest` subcommand.
///
/// The attestation is recorded whatever the check outcome; the exit code is
/// [`ExitCode::CheckFailed`] if any rule failed.
pub fn execute(args: AttestArgs) -> Result<ExitCode, anyhow::Error> {
    args.output.init_tracing();
    let project = args.project.as_ref().unwrap_or(&args.target);

    let Some(cfg) = load_project_config(project) else {
        return Ok(ExitCode::ConfigError);
    };

    let key_source = FileKeySource::new(cfg.evidence.signing_key_path(project));
    let signing_key = if key_source.path().exists() {
        key_source.signing_key().context("failed to load signing key")?
    } else if args.ephemeral_key {
        warn!("no signing key found, signing with an ephemeral key");
        EphemeralKeySource
            .signing_key()
            .context("failed to generate ephemeral key")?
    } else {
        eprintln!(
            "No signing key at '{}'. Run `tessera init` or pass --ephemeral-key.",
            key_source.path().display()
        );
        return Ok(ExitCode::ConfigError);
    };
    let signer = Signer::new(signing_key);

    let discovery = discover_files(&args.target, &cfg.scan)
        .with_context(|| format!("failed to scan '{}'", args.target.display()))?;
    let engine = PolicyEngine::new();
    let outcomes = engine.run_checks(&discovery.files);
    print!("{}", format_results(&outcomes));

    let manager = chain_manager(project, &cfg);
    // Advisory: the head may move before the commit takes the lock.
    let head = manager.load().ok().and_then(|chain| chain.head);

    let context = RunContext::discover(&discovery.root);
    let metadata = RunMetadata {
        repository: Some(context.repository),
        branch: Some(context.branch),
        commit: Some(context.commit),
        workflow: Some(context.workflow),
        files_scanned: discovery.relative_paths(),
        rules_used: engine.rules().map(|r| r.name().to_string()).collect(),
        parent_hash_hint: head,
    };

    let draft = AttestationBuilder::new(outcomes)
        .metadata(metadata)
        .root(&discovery.root)
        .build()
        .context("failed to build attestation")?;

    let receipt = manager
        .commit(draft, &signer)
        .context("failed to record attestation")?;
    info!(
        hash = %receipt.attestation.hash(),
        length = receipt.chain.length,
        "attestation recorded"
    );

    println!();
    println!("Attestation: {}", receipt.attestation.hash());
    println!("Artifact:    {}", receipt.entry.store_reference);
    println!("Signed by:   {}", signer.key_id());
    if args.ephemeral_key && !key_source.path().exists() {
        println!("Public key:  {}", signer.public_key_base64());
    }
    println!("Chain:       {} entries", receipt.chain.length);

    Ok(ExitCode::for_status(
        receipt.attestation.summary().overall_status,
    ))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    use tessera_core::config;
    use tessera_evidence::{ChainManager, FsEvidenceStore};

    fn args(target: &Path, ephemeral_key: bool) -> AttestArgs {
        AttestArgs {
            target: target.to_path_buf(),
            project: None,
            ephemeral_key,
            output: OutputArgs {
                quiet: true,
                ..OutputArgs::default()
            },
        }
    }

    fn evidence_manager(project: &Path) -> ChainManager<FsEvidenceStore> {
        let cfg = config::load_config(Some(project)).unwrap();
        chain_manager(project, &cfg)
    }

    #[test]
    fn attest_without_key_is_config_error() {
        let tmp = tempfile::tempdir().unwrap();
        assert_eq!(
            execute(args(tmp.path(), false)).unwrap(),
            ExitCode::ConfigError
        );
    }

    #[test]
    fn attest_with_ephemeral_key_appends() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("main.tf"), "resource \"aws_vpc\" \"main\" {}\n").unwrap();

        assert_eq!(execute(args(tmp.path(), true)).unwrap(), ExitCode::Pass);
        assert_eq!(execute(args(tmp.path(), true)).unwrap(), ExitCode::Pass);

        let manager = evidence_manager(tmp.path());
        let chain = manager.load().unwrap();
        assert_eq!(chain.length, 2);
        manager.verify(&chain).unwrap();
    }

    #[test]
    fn failing_checks_are_still_recorded() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join("main.tf"),
            "resource \"aws_s3_bucket\" \"site\" {\n  acl = \"public-read\"\n}\n",
        )
        .unwrap();

        assert_eq!(
            execute(args(tmp.path(), true)).unwrap(),
            ExitCode::CheckFailed
        );
        let chain = evidence_manager(tmp.path()).load().unwrap();
        assert_eq!(chain.length, 1);
        assert!(chain.entries[0].status.is_fail());
    }
}
