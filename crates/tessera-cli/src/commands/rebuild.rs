//! The `rebuild` CLI subcommand -- reconstructs the chain index from stored
//! attestation artifacts.

use anyhow::Context;

use crate::commands::{chain_manager, load_project_config, OutputArgs, ProjectArgs};
use crate::ExitCode;

/// Rebuild the chain index from the attestations in the evidence store.
///
/// Recovery orders attestations by their recorded timestamps, which is only
/// reliable for a single writer with a monotonic clock.
#[derive(Debug, clap::Args)]
pub struct RebuildArgs {
    #[command(flatten)]
    pub project: ProjectArgs,

    #[command(flatten)]
    pub output: OutputArgs,
}

/// Executes the `rebuild` subcommand.
pub fn execute(args: RebuildArgs) -> Result<ExitCode, anyhow::Error> {
    args.output.init_tracing();
    let project = &args.project.project;

    let Some(cfg) = load_project_config(project) else {
        return Ok(ExitCode::ConfigError);
    };

    let manager = chain_manager(project, &cfg);
    let chain = manager
        .rebuild()
        .context("failed to rebuild evidence chain")?;

    println!(
        "Rebuilt chain {} from {}",
        chain.chain_id,
        manager.store().dir().display()
    );
    println!("{}", chain.summary());
    if let Some(head) = &chain.head {
        println!("Head: {head}");
    }
    println!("Rebuilt indexes rely on timestamp order; run `tessera verify` to check signatures.");

    Ok(ExitCode::Pass)
}
