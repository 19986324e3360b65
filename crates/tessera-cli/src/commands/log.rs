//! The `log` CLI subcommand -- prints the chain summary and recent entries.

use anyhow::Context;

use tessera_evidence::EvidenceChain;

use crate::commands::{chain_manager, load_project_config, OutputArgs, ProjectArgs};
use crate::ExitCode;

// ---------------------------------------------------------------------------
// LogArgs
// ---------------------------------------------------------------------------

/// Show the evidence chain history.
#[derive(Debug, clap::Args)]
pub struct LogArgs {
    #[command(flatten)]
    pub project: ProjectArgs,

    /// Number of most recent entries to show.
    #[arg(long, short = 'n', default_value_t = 10)]
    pub limit: usize,

    /// Print the chain index as JSON.
    #[arg(long)]
    pub json: bool,

    #[command(flatten)]
    pub output: OutputArgs,
}

// ---------------------------------------------------------------------------
// execute
// ---------------------------------------------------------------------------

/// Executes the `log` subcommand.
pub fn execute(args: LogArgs) -> Result<ExitCode, anyhow::Error> {
    args.output.init_tracing();
    let project = &args.project.project;

    let Some(cfg) = load_project_config(project) else {
        return Ok(ExitCode::ConfigError);
    };

    let chain = chain_manager(project, &cfg)
        .load()
        .context("failed to load evidence chain")?;

    if args.json {
        let json =
            serde_json::to_string_pretty(&chain).context("failed to serialize evidence chain")?;
        println!("{json}");
    } else {
        print!("{}", format_log(&chain, args.limit));
    }

    Ok(ExitCode::Pass)
}

/// Renders the summary followed by the newest `limit` entries, newest first.
fn format_log(chain: &EvidenceChain, limit: usize) -> String {
    let mut out = format!("{}\n", chain.summary());

    for (position, entry) in chain.entries.iter().enumerate().rev().take(limit) {
        out.push_str(&format!(
            "\n#{position:<4} {} [{}] {}\n      run {}  parent {}\n      {}\n",
            entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
            entry.status.marker(),
            short(&entry.hash),
            entry.run_id,
            if entry.parent_hash.is_empty() {
                "(genesis)"
            } else {
                short(&entry.parent_hash)
            },
            entry.store_reference,
        ));
    }

    let hidden = chain.entries.len().saturating_sub(limit);
    if hidden > 0 {
        out.push_str(&format!("\n... {hidden} older entries\n"));
    }
    out
}

fn short(hash: &str) -> &str {
    hash.get(..12).unwrap_or(hash)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use tessera_core::CheckStatus;
    use tessera_evidence::ChainEntry;

    fn chain_with(n: usize) -> EvidenceChain {
        let mut chain = EvidenceChain::new();
        let mut parent = String::new();
        for i in 0..n {
            let hash = format!("{i:0>64}");
            chain.entries.push(ChainEntry {
                hash: hash.clone(),
                parent_hash: parent,
                timestamp: Utc.with_ymd_and_hms(2025, 6, 1, 9, i as u32, 0).unwrap(),
                run_id: format!("run-{i}"),
                status: CheckStatus::Pass,
                store_reference: format!("attestation-{i}.json"),
            });
            parent = hash;
        }
        chain.length = n;
        chain
    }

    #[test]
    fn empty_chain_log() {
        assert_eq!(format_log(&EvidenceChain::new(), 10), "Empty evidence chain\n");
    }

    #[test]
    fn log_shows_newest_first_and_limits() {
        let out = format_log(&chain_with(5), 2);
        let newest = out.find("run-4").unwrap();
        let older = out.find("run-3").unwrap();
        assert!(newest < older);
        assert!(!out.contains("run-2"));
        assert!(out.contains("3 older entries"));
    }

    #[test]
    fn genesis_entry_is_marked() {
        let out = format_log(&chain_with(1), 10);
        assert!(out.contains("(genesis)"));
        assert!(out.contains("[PASS]"));
    }
}
