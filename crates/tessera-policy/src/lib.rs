//! Tessera Policy -- file discovery and infrastructure configuration rules.
//!
//! The policy engine produces the [`CheckOutcome`](tessera_core::CheckOutcome)
//! records that the evidence chain attests to. It knows nothing about
//! attestations or signing.

pub mod report;
pub mod rules;
pub mod scanner;

pub use report::{format_results, to_json, OutcomeCounts};
pub use rules::{
    PolicyEngine, PolicyRule, RequireOidcRule, S3PublicBucketRule, SecurityGroupOpenIngressRule,
};
pub use scanner::{discover_files, DiscoveredFile, DiscoveryResult, DiscoveryStats};

/// Errors from file discovery and report rendering.
#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
