//! The `verify` CLI subcommand -- checks chain linkage and entry signatures.

use anyhow::Context;
use tracing::info;

use tessera_evidence::{EvidenceError, TrustedKeys};

use crate::commands::{chain_manager, load_project_config, OutputArgs, ProjectArgs};
use crate::ExitCode;

// ---------------------------------------------------------------------------
// VerifyArgs
// ---------------------------------------------------------------------------

/// Verify the integrity of the evidence chain.
#[derive(Debug, clap::Args)]
pub struct VerifyArgs {
    #[command(flatten)]
    pub project: ProjectArgs,

    /// Check hash linkage only. Signatures are reported as not checked.
    #[arg(long)]
    pub linkage_only: bool,

    /// Additional trusted public key (base64). May be repeated.
    #[arg(long = "public-key", value_name = "B64")]
    pub public_keys: Vec<String>,

    #[command(flatten)]
    pub output: OutputArgs,
}

// ---------------------------------------------------------------------------
// execute
// ---------------------------------------------------------------------------

/// Executes the `verify` subcommand.
///
/// Returns [`ExitCode::CheckFailed`] if linkage or any signature fails, and
/// [`ExitCode::ConfigError`] if signatures must be checked but no key is trusted.
pub fn execute(args: VerifyArgs) -> Result<ExitCode, anyhow::Error> {
    args.output.init_tracing();
    let project = &args.project.project;

    let Some(cfg) = load_project_config(project) else {
        return Ok(ExitCode::ConfigError);
    };

    let mut encoded = cfg.evidence.trusted_keys.clone();
    encoded.extend(args.public_keys.iter().cloned());
    let trusted = match TrustedKeys::from_base64(&encoded) {
        Ok(keys) => keys,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            return Ok(ExitCode::ConfigError);
        }
    };

    let check_signatures = !args.linkage_only && cfg.evidence.require_signatures;
    if check_signatures && trusted.is_empty() {
        eprintln!(
            "No trusted public keys. Add evidence.trusted_keys, pass --public-key, \
             or use --linkage-only."
        );
        return Ok(ExitCode::ConfigError);
    }

    let manager = chain_manager(project, &cfg);
    let chain = match manager.load() {
        Ok(chain) => chain,
        Err(e @ EvidenceError::ChainLoad(_)) => {
            eprintln!("{e}");
            eprintln!("Run `tessera rebuild` to reconstruct the index from stored attestations.");
            return Ok(ExitCode::CheckFailed);
        }
        Err(e) => return Err(e).context("failed to load evidence chain"),
    };

    match manager.verify(&chain) {
        Ok(()) => {}
        Err(e @ EvidenceError::Integrity { .. }) => {
            eprintln!("Chain verification FAILED: {e}");
            return Ok(ExitCode::CheckFailed);
        }
        Err(e) => return Err(e).context("failed to verify evidence chain"),
    }
    println!("Linkage: OK ({} entries, chain {})", chain.length, chain.chain_id);

    if !check_signatures {
        let reason = if args.linkage_only {
            "--linkage-only"
        } else {
            "evidence.require_signatures is false"
        };
        println!("Signatures: NOT CHECKED ({reason})");
        return Ok(ExitCode::Pass);
    }

    match manager.verify_signatures(&chain, &trusted) {
        Ok(report) => {
            for entry in &report.verified {
                println!(
                    "  #{:<4} {}  signed by {}",
                    entry.position, entry.hash, entry.key_id
                );
            }
            info!(verified = report.verified.len(), "signatures verified");
            println!("Signatures: OK ({} verified)", report.verified.len());
            Ok(ExitCode::Pass)
        }
        Err(e @ (EvidenceError::EntrySignature { .. } | EvidenceError::Integrity { .. })) => {
            eprintln!("Signature verification FAILED: {e}");
            Ok(ExitCode::CheckFailed)
        }
        Err(e) => Err(e).context("failed to verify signatures"),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn args(project: &Path, linkage_only: bool) -> VerifyArgs {
        VerifyArgs {
            project: ProjectArgs {
                project: project.to_path_buf(),
            },
            linkage_only,
            public_keys: Vec::new(),
            output: OutputArgs {
                quiet: true,
                ..OutputArgs::default()
            },
        }
    }

    #[test]
    fn signatures_need_a_trusted_key() {
        let tmp = tempfile::tempdir().unwrap();
        assert_eq!(
            execute(args(tmp.path(), false)).unwrap(),
            ExitCode::ConfigError
        );
    }

    #[test]
    fn empty_chain_passes_linkage_only() {
        let tmp = tempfile::tempdir().unwrap();
        assert_eq!(execute(args(tmp.path(), true)).unwrap(), ExitCode::Pass);
    }

    #[test]
    fn invalid_public_key_is_config_error() {
        let tmp = tempfile::tempdir().unwrap();
        let mut args = args(tmp.path(), false);
        args.public_keys.push("not-a-key".to_string());
        assert_eq!(execute(args).unwrap(), ExitCode::ConfigError);
    }

    #[test]
    fn corrupt_index_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join(".tessera/attestations");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("chain.json"), "{ not json").unwrap();

        assert_eq!(execute(args(tmp.path(), true)).unwrap(), ExitCode::CheckFailed);
    }
}
