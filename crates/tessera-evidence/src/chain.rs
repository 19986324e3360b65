//! The evidence chain: an append-only, hash-linked index of attestations.
//!
//! The index is a single artifact ([`CHAIN_INDEX_NAME`]) holding an
//! [`EvidenceChain`]. Each [`ChainEntry`] points at a signed attestation
//! artifact in the same store.
//!
//! Invariants after every mutation:
//!
//! 1. `length == entries.len()`
//! 2. an empty chain has neither `head` nor `genesis`
//! 3. `entries[0].parent_hash` is empty
//! 4. `entries[i].parent_hash == entries[i - 1].hash` for `i > 0`
//! 5. `head` is the last entry's hash and `genesis` the first's
//!
//! Writers must hold the store lock across load, link, append and persist.
//! [`ChainManager::commit`] does this.

use std::fmt;

use chrono::{DateTime, Utc};
use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use tessera_core::CheckStatus;

use crate::attestation::{Attestation, DraftAttestation};
use crate::signer::{SignedAttestation, Signer};
use crate::store::{EvidenceStore, StoreError};
use crate::verifier::TrustedKeys;
use crate::{EvidenceError, IntegrityFailure};

/// Logical name of the chain index artifact.
pub const CHAIN_INDEX_NAME: &str = "chain.json";

const ARTIFACT_PREFIX: &str = "attestation-";
const ARTIFACT_SUFFIX: &str = ".json";

// ---------------------------------------------------------------------------
// ChainEntry / EvidenceChain
// ---------------------------------------------------------------------------

/// Index record for one attestation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainEntry {
    pub hash: String,
    pub parent_hash: String,
    pub timestamp: DateTime<Utc>,
    pub run_id: String,
    /// Overall status of the attested run.
    pub status: CheckStatus,
    /// Name of the signed attestation artifact in the evidence store.
    pub store_reference: String,
}

/// The persisted chain index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvidenceChain {
    pub chain_id: String,
    pub start_time: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub length: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub head: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub genesis: Option<String>,
    #[serde(default)]
    pub entries: Vec<ChainEntry>,
}

impl EvidenceChain {
    /// An empty chain with a freshly generated id.
    #[must_use]
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            chain_id: generate_chain_id(now),
            start_time: now,
            last_updated: now,
            length: 0,
            head: None,
            genesis: None,
            entries: Vec::new(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The parent hash the next appended attestation must carry.
    #[must_use]
    pub fn next_parent_hash(&self) -> &str {
        self.head.as_deref().unwrap_or("")
    }

    /// Per-status counts and time span.
    #[must_use]
    pub fn summary(&self) -> ChainSummary {
        let mut summary = ChainSummary {
            length: self.length,
            passed: 0,
            failed: 0,
            warnings: 0,
            start_time: self.start_time,
            last_updated: self.last_updated,
        };
        for entry in &self.entries {
            match entry.status {
                CheckStatus::Pass => summary.passed += 1,
                CheckStatus::Warn => summary.warnings += 1,
                CheckStatus::Fail => summary.failed += 1,
            }
        }
        summary
    }

    fn push_entry(&mut self, entry: ChainEntry) {
        if self.entries.is_empty() {
            self.genesis = Some(entry.hash.clone());
        }
        self.head = Some(entry.hash.clone());
        self.entries.push(entry);
        self.length = self.entries.len();
        self.last_updated = Utc::now();
    }
}

impl Default for EvidenceChain {
    fn default() -> Self {
        Self::new()
    }
}

/// Aggregate view of a chain for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainSummary {
    pub length: usize,
    pub passed: usize,
    pub failed: usize,
    pub warnings: usize,
    pub start_time: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl fmt::Display for ChainSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.length == 0 {
            return f.write_str("Empty evidence chain");
        }
        write!(
            f,
            "Chain: {} attestations ({} passed, {} failed, {} warnings)\nSpan: {} to {}",
            self.length,
            self.passed,
            self.failed,
            self.warnings,
            self.start_time.format("%Y-%m-%d %H:%M:%S"),
            self.last_updated.format("%Y-%m-%d %H:%M:%S"),
        )
    }
}

/// 8-byte hex label seeded from the creation time. Not a security boundary.
fn generate_chain_id(now: DateTime<Utc>) -> String {
    let nanos = now.timestamp_nanos_opt().unwrap_or_default();
    let seed = format!("tessera-chain-{nanos}-{}", OsRng.next_u32());
    hex::encode(&Sha256::digest(seed.as_bytes())[..8])
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// Everything produced by one [`ChainManager::commit`].
#[derive(Debug, Clone)]
pub struct CommitReceipt {
    pub attestation: Attestation,
    pub signed: SignedAttestation,
    pub entry: ChainEntry,
    pub chain: EvidenceChain,
}

/// An entry whose artifact signature and content were verified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedEntry {
    pub position: usize,
    pub hash: String,
    pub key_id: String,
}

/// Result of [`ChainManager::verify_signatures`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignatureReport {
    pub verified: Vec<VerifiedEntry>,
}

// ---------------------------------------------------------------------------
// ChainManager
// ---------------------------------------------------------------------------

/// Loads, extends, verifies and rebuilds the chain held in an evidence store.
#[derive(Debug)]
pub struct ChainManager<S> {
    store: S,
}

impl<S: EvidenceStore> ChainManager<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Loads the chain index, creating and persisting an empty chain if none
    /// exists yet.
    ///
    /// # Errors
    ///
    /// - [`EvidenceError::ChainLoad`] if the index exists but cannot be read
    ///   or parsed. History is never discarded; use [`ChainManager::rebuild`].
    /// - [`EvidenceError::Persist`] if a new index cannot be written.
    pub fn load(&self) -> Result<EvidenceChain, EvidenceError> {
        match self.store.read(CHAIN_INDEX_NAME) {
            Ok(bytes) => {
                let chain: EvidenceChain = serde_json::from_slice(&bytes).map_err(|e| {
                    EvidenceError::ChainLoad(format!("{CHAIN_INDEX_NAME} is corrupt: {e}"))
                })?;
                debug!(chain_id = %chain.chain_id, length = chain.length, "chain loaded");
                Ok(chain)
            }
            Err(StoreError::NotFound(_)) => {
                let chain = EvidenceChain::new();
                self.persist(&chain)?;
                info!(chain_id = %chain.chain_id, "initialized new evidence chain");
                Ok(chain)
            }
            Err(e) => Err(EvidenceError::ChainLoad(e.to_string())),
        }
    }

    /// Atomically writes the chain index.
    ///
    /// # Errors
    ///
    /// Returns [`EvidenceError::Persist`] if the index cannot be durably written.
    pub fn persist(&self, chain: &EvidenceChain) -> Result<(), EvidenceError> {
        let bytes = serde_json::to_vec_pretty(chain)
            .map_err(|e| EvidenceError::Persist(format!("serializing chain: {e}")))?;
        self.store
            .write_atomic(CHAIN_INDEX_NAME, &bytes)
            .map_err(|e| EvidenceError::Persist(e.to_string()))
    }

    /// Links a draft to the chain's current head, producing the final attestation.
    ///
    /// # Errors
    ///
    /// Returns [`EvidenceError::Serialization`] if the hash cannot be computed.
    pub fn link(
        &self,
        chain: &EvidenceChain,
        draft: DraftAttestation,
    ) -> Result<Attestation, EvidenceError> {
        let parent = chain.next_parent_hash();
        if let Some(hint) = draft.parent_hash_hint() {
            if hint != parent {
                debug!(hint, parent, "parent hash hint superseded by chain head");
            }
        }
        draft.link(parent)
    }

    /// Appends a linked attestation whose artifact is stored under
    /// `store_reference`, then persists the index.
    ///
    /// All-or-nothing: if persisting fails, `chain` is restored to its
    /// previous state and the artifact is not part of the chain.
    ///
    /// # Errors
    ///
    /// - [`EvidenceError::StaleLink`] if the attestation's parent is not the
    ///   current head.
    /// - [`EvidenceError::Integrity`] with [`IntegrityFailure::HashMismatch`]
    ///   if the attestation's hash does not match its content.
    /// - [`EvidenceError::Persist`] if the index cannot be written.
    pub fn append(
        &self,
        chain: &mut EvidenceChain,
        attestation: &Attestation,
        store_reference: &str,
    ) -> Result<ChainEntry, EvidenceError> {
        let expected_parent = chain.next_parent_hash();
        if attestation.parent_hash() != expected_parent {
            return Err(EvidenceError::StaleLink {
                expected: expected_parent.to_string(),
                found: attestation.parent_hash().to_string(),
            });
        }

        if attestation.compute_hash()? != attestation.hash() {
            return Err(EvidenceError::Integrity {
                position: Some(chain.entries.len()),
                reason: IntegrityFailure::HashMismatch,
            });
        }

        let entry = ChainEntry {
            hash: attestation.hash().to_string(),
            parent_hash: attestation.parent_hash().to_string(),
            timestamp: attestation.timestamp(),
            run_id: attestation.run_id().to_string(),
            status: attestation.summary().overall_status,
            store_reference: store_reference.to_string(),
        };

        let previous = chain.clone();
        chain.push_entry(entry.clone());

        if let Err(e) = self.persist(chain) {
            *chain = previous;
            warn!(
                store_reference,
                error = %e,
                "chain index not persisted; artifact is orphaned"
            );
            return Err(e);
        }

        info!(
            chain_id = %chain.chain_id,
            length = chain.length,
            head = %entry.hash,
            "attestation appended"
        );
        Ok(entry)
    }

    /// Links, signs, stores and appends a draft under the store's exclusive lock.
    ///
    /// # Errors
    ///
    /// Any error from loading, linking, signing, storing the artifact, or
    /// appending. Nothing is appended unless signing and storing succeeded.
    pub fn commit(
        &self,
        draft: DraftAttestation,
        signer: &Signer,
    ) -> Result<CommitReceipt, EvidenceError> {
        let _lock = self.store.lock()?;

        let mut chain = self.load()?;
        let attestation = self.link(&chain, draft)?;
        let signed = signer.sign(&attestation)?;

        let name = signed.artifact_name(&attestation);
        self.store.write_new(&name, &signed.to_json_pretty()?)?;
        debug!(artifact = %name, "signed attestation stored");

        let entry = self.append(&mut chain, &attestation, &name)?;

        Ok(CommitReceipt {
            attestation,
            signed,
            entry,
            chain,
        })
    }

    /// Verifies chain linkage: genesis parent, parent links, artifact
    /// presence, length, head and genesis.
    ///
    /// Signatures are not checked; see [`ChainManager::verify_signatures`].
    ///
    /// # Errors
    ///
    /// Returns [`EvidenceError::Integrity`] naming the first offending
    /// position, or `None` for chain-level mismatches, and
    /// [`EvidenceError::Store`] if artifact presence cannot be determined.
    pub fn verify(&self, chain: &EvidenceChain) -> Result<(), EvidenceError> {
        let integrity = |position, reason| EvidenceError::Integrity { position, reason };

        if chain.entries.is_empty() {
            if chain.length != 0 {
                return Err(integrity(None, IntegrityFailure::LengthMismatch));
            }
            if chain.head.is_some() || chain.genesis.is_some() {
                return Err(integrity(None, IntegrityFailure::HeadGenesisMismatch));
            }
            return Ok(());
        }

        if !chain.entries[0].parent_hash.is_empty() {
            return Err(integrity(Some(0), IntegrityFailure::NonEmptyGenesisParent));
        }

        for (i, entry) in chain.entries.iter().enumerate() {
            if i > 0 && entry.parent_hash != chain.entries[i - 1].hash {
                return Err(integrity(Some(i), IntegrityFailure::ParentHashMismatch));
            }
            if !self.store.exists(&entry.store_reference)? {
                return Err(integrity(Some(i), IntegrityFailure::MissingArtifact));
            }
        }

        if chain.length != chain.entries.len() {
            return Err(integrity(None, IntegrityFailure::LengthMismatch));
        }

        let first = chain.entries.first().map(|e| e.hash.as_str());
        let last = chain.entries.last().map(|e| e.hash.as_str());
        if chain.head.as_deref() != last || chain.genesis.as_deref() != first {
            return Err(integrity(None, IntegrityFailure::HeadGenesisMismatch));
        }

        debug!(chain_id = %chain.chain_id, length = chain.length, "chain linkage verified");
        Ok(())
    }

    /// Verifies every entry's artifact: envelope signature by a trusted key,
    /// and attestation content matching the entry's hash and parent.
    ///
    /// # Errors
    ///
    /// Returns [`EvidenceError::Integrity`] for a missing artifact, or
    /// [`EvidenceError::EntrySignature`] for the first entry that fails.
    pub fn verify_signatures(
        &self,
        chain: &EvidenceChain,
        trusted: &TrustedKeys,
    ) -> Result<SignatureReport, EvidenceError> {
        let mut report = SignatureReport::default();

        for (position, entry) in chain.entries.iter().enumerate() {
            let fail = |reason: String| EvidenceError::EntrySignature { position, reason };

            let bytes = match self.store.read(&entry.store_reference) {
                Ok(bytes) => bytes,
                Err(StoreError::NotFound(_)) => {
                    return Err(EvidenceError::Integrity {
                        position: Some(position),
                        reason: IntegrityFailure::MissingArtifact,
                    })
                }
                Err(e) => return Err(e.into()),
            };

            let signed = SignedAttestation::from_json(&bytes)
                .map_err(|e| fail(format!("artifact is not a signed attestation: {e}")))?;
            let key_id = trusted.verify(&signed).map_err(|e| fail(e.to_string()))?;

            let attestation = signed.attestation().map_err(|e| fail(e.to_string()))?;
            if !attestation.verify_hash() {
                return Err(fail("attestation content does not match its hash".to_string()));
            }
            if attestation.hash() != entry.hash {
                return Err(fail(format!(
                    "artifact hash {} does not match entry hash {}",
                    attestation.hash(),
                    entry.hash
                )));
            }
            if attestation.parent_hash() != entry.parent_hash {
                return Err(fail("artifact parent hash does not match entry".to_string()));
            }

            report.verified.push(VerifiedEntry {
                position,
                hash: entry.hash.clone(),
                key_id,
            });
        }

        info!(verified = report.verified.len(), "chain signatures verified");
        Ok(report)
    }

    /// Reconstructs the chain index from the attestation artifacts in the
    /// store and persists it under a new chain id.
    ///
    /// Artifacts are ordered by their embedded timestamp and re-linked in that
    /// order. This is only correct when artifacts were produced by a single
    /// writer with a monotonic clock; concurrent or clock-skewed writers can
    /// yield a wrong order. It is a recovery path, not a substitute for an
    /// index maintained by [`ChainManager::append`].
    ///
    /// Artifacts that cannot be parsed, or whose content does not match their
    /// hash, are skipped with a warning.
    ///
    /// # Errors
    ///
    /// Returns [`EvidenceError::Store`] if the store cannot be listed, or
    /// [`EvidenceError::Persist`] if the rebuilt index cannot be written.
    pub fn rebuild(&self) -> Result<EvidenceChain, EvidenceError> {
        let _lock = self.store.lock()?;

        let mut recovered: Vec<(Attestation, String)> = Vec::new();
        for name in self.store.list()? {
            if !(name.starts_with(ARTIFACT_PREFIX) && name.ends_with(ARTIFACT_SUFFIX)) {
                continue;
            }
            match self.read_artifact(&name) {
                Ok(attestation) => recovered.push((attestation, name)),
                Err(e) => warn!(artifact = %name, error = %e, "skipping unreadable attestation"),
            }
        }

        recovered.sort_by(|a, b| {
            a.0.timestamp()
                .cmp(&b.0.timestamp())
                .then_with(|| a.1.cmp(&b.1))
        });

        let mut chain = EvidenceChain::new();
        if let Some((first, _)) = recovered.first() {
            chain.start_time = first.timestamp();
        }

        for (attestation, name) in recovered {
            let parent_hash = chain.next_parent_hash().to_string();
            if attestation.parent_hash() != parent_hash {
                warn!(
                    artifact = %name,
                    embedded = attestation.parent_hash(),
                    derived = %parent_hash,
                    "embedded parent hash differs from rebuilt order"
                );
            }
            chain.push_entry(ChainEntry {
                hash: attestation.hash().to_string(),
                parent_hash,
                timestamp: attestation.timestamp(),
                run_id: attestation.run_id().to_string(),
                status: attestation.summary().overall_status,
                store_reference: name,
            });
        }

        self.persist(&chain)?;
        info!(chain_id = %chain.chain_id, length = chain.length, "chain rebuilt from artifacts");
        Ok(chain)
    }

    /// Reads an artifact as either a signed envelope or a raw attestation.
    fn read_artifact(&self, name: &str) -> Result<Attestation, EvidenceError> {
        let bytes = self.store.read(name)?;
        let attestation = match SignedAttestation::from_json(&bytes) {
            Ok(signed) => signed.attestation()?,
            Err(_) => Attestation::from_json(&bytes)?,
        };
        if !attestation.verify_hash() {
            return Err(EvidenceError::Integrity {
                position: None,
                reason: IntegrityFailure::HashMismatch,
            });
        }
        Ok(attestation)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
