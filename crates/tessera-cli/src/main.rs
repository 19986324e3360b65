use clap::{Parser, Subcommand};

use tessera_cli::commands;

/// Tessera -- policy checks with a tamper-evident evidence chain.
#[derive(Parser)]
#[command(
    name = "tessera",
    about = "Tessera -- policy checks with a tamper-evident evidence chain"
)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the configuration file, signing key and evidence store.
    Init(commands::init::InitArgs),
    /// Run policy checks without recording evidence.
    Check(commands::check::CheckArgs),
    /// Run policy checks and append a signed attestation to the chain.
    Attest(commands::attest::AttestArgs),
    /// Verify chain linkage and attestation signatures.
    Verify(commands::verify::VerifyArgs),
    /// Rebuild the chain index from stored attestations.
    Rebuild(commands::rebuild::RebuildArgs),
    /// Show the evidence chain history.
    Log(commands::log::LogArgs),
}

fn main() -> std::process::ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Init(args) => commands::init::execute(args),
        Commands::Check(args) => commands::check::execute(args),
        Commands::Attest(args) => commands::attest::execute(args),
        Commands::Verify(args) => commands::verify::execute(args),
        Commands::Rebuild(args) => commands::rebuild::execute(args),
        Commands::Log(args) => commands::log::execute(args),
    };

    match result {
        Ok(code) => tessera_cli::terminate(code),
        Err(err) => {
            eprintln!("tessera: error: {err:#}");
            tessera_cli::terminate(tessera_cli::ExitCode::EngineError)
        }
    }
}
