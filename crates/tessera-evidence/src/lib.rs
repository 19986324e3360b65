//! Tessera Evidence -- hash-chained, signed attestations of policy check runs.
//!
//! A run's [`CheckOutcome`](tessera_core::CheckOutcome)s become an
//! [`Attestation`] that is linked into an [`EvidenceChain`], wrapped in a
//! signed envelope, and stored as an artifact next to the chain index.
//!
//! # Lifecycle
//!
//! ```text
//! AttestationBuilder ──build──▶ DraftAttestation      (no hash)
//!        ChainManager::link ──▶ Attestation           (parentHash fixed, hash final)
//!              Signer::sign ──▶ SignedAttestation     (stored as artifact)
//!      ChainManager::append ──▶ EvidenceChain         (index persisted atomically)
//! ```
//!
//! [`ChainManager::commit`] runs the last three steps as one critical section
//! under the store's exclusive lock.

use std::fmt;

pub mod attestation;
pub mod canonical;
pub mod chain;
pub mod keys;
pub mod signer;
pub mod store;
pub mod verifier;

pub use attestation::{
    Attestation, AttestationBuilder, DraftAttestation, Predicate, RunMetadata, ScannerInfo,
    Subject, Summary,
};
pub use chain::{
    ChainEntry, ChainManager, ChainSummary, CommitReceipt, EvidenceChain, SignatureReport,
    VerifiedEntry,
};
pub use keys::{EphemeralKeySource, FileKeySource, KeySource};
pub use signer::{SignedAttestation, Signer, SigningMetadata};
pub use store::{EvidenceStore, FsEvidenceStore, MemoryEvidenceStore, StoreError, StoreLock};
pub use verifier::{TrustedKeys, Verifier};

// ---------------------------------------------------------------------------
// EvidenceError
// ---------------------------------------------------------------------------

/// Error type for evidence chain operations.
#[derive(Debug, thiserror::Error)]
pub enum EvidenceError {
    /// A record could not be canonically serialized or parsed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A subject file could not be read for digesting.
    #[error("cannot digest subject '{path}': {reason}")]
    Subject { path: String, reason: String },

    /// The chain index exists but cannot be read or parsed.
    #[error("failed to load chain index: {0}")]
    ChainLoad(String),

    /// The chain index could not be durably written.
    #[error("failed to persist chain index: {0}")]
    Persist(String),

    /// Linkage verification failed. `position` is `None` for chain-level
    /// checks (length, head, genesis).
    #[error("chain integrity error at {}: {reason}", position_label(.position))]
    Integrity {
        position: Option<usize>,
        reason: IntegrityFailure,
    },

    /// The attestation was linked against a head that is no longer current.
    #[error("stale link: attestation parent '{found}' does not match chain head '{expected}'")]
    StaleLink { expected: String, found: String },

    #[error("key generation error: {0}")]
    KeyGeneration(String),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("signing error: {0}")]
    Signing(String),

    /// Signature verification of an envelope failed.
    #[error("verification error: {reason}")]
    Verification { reason: String },

    /// Signature verification of a chain entry's artifact failed.
    #[error("signature check failed at position {position}: {reason}")]
    EntrySignature { position: usize, reason: String },

    #[error("evidence store error: {0}")]
    Store(#[from] StoreError),
}

impl EvidenceError {
    pub(crate) fn verification(reason: impl Into<String>) -> Self {
        Self::Verification {
            reason: reason.into(),
        }
    }
}

fn position_label(position: &Option<usize>) -> String {
    match position {
        Some(index) => format!("position {index}"),
        None => "chain level".to_string(),
    }
}

// ---------------------------------------------------------------------------
// IntegrityFailure
// ---------------------------------------------------------------------------

/// Reason a chain failed linkage verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegrityFailure {
    NonEmptyGenesisParent,
    ParentHashMismatch,
    MissingArtifact,
    /// The recomputed content hash differs from the recorded one.
    HashMismatch,
    LengthMismatch,
    HeadGenesisMismatch,
}

impl fmt::Display for IntegrityFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Self::NonEmptyGenesisParent => "non-empty genesis parent",
            Self::ParentHashMismatch => "parent hash mismatch",
            Self::MissingArtifact => "missing artifact",
            Self::HashMismatch => "content hash mismatch",
            Self::LengthMismatch => "length mismatch",
            Self::HeadGenesisMismatch => "head/genesis mismatch",
        };
        f.write_str(reason)
    }
}
