//! Attestation records and the builder that creates them.
//!
//! An attestation goes through two phases:
//!
//! 1. [`DraftAttestation`] -- built from check outcomes and run metadata. It
//!    carries no hash because its parent is not yet known.
//! 2. [`Attestation`] -- produced by linking a draft to a parent hash. The
//!    content hash is computed exactly once, at link time, and the record is
//!    immutable from then on.
//!
//! The hash covers the canonical JSON encoding (see [`crate::canonical`]) of
//! every field except `hash` itself, including `parentHash`.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use tessera_core::{CheckOutcome, CheckStatus};

use crate::canonical::{canonical_json, canonical_value_bytes, sha256_hex};
use crate::EvidenceError;

/// Schema identifier carried in every attestation.
pub const PREDICATE_TYPE: &str = "tessera/policy-check/v1";

/// Digest algorithm label used in subject digests.
pub const DIGEST_ALGORITHM: &str = "sha256";

// ---------------------------------------------------------------------------
// Record types
// ---------------------------------------------------------------------------

/// A file covered by an attestation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    /// Path relative to the scan root.
    pub name: String,
    /// Algorithm name to lowercase hex digest of the file content.
    pub digest: BTreeMap<String, String>,
}

/// Per-status counts and the overall status of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub total_checks: usize,
    pub passed: usize,
    pub failed: usize,
    pub warnings: usize,
    pub overall_status: CheckStatus,
}

impl Summary {
    /// Tallies `outcomes`. The overall status is `fail` if anything failed,
    /// else `warn` if anything warned, else `pass`.
    #[must_use]
    pub fn from_outcomes(outcomes: &[CheckOutcome]) -> Self {
        let mut passed = 0;
        let mut failed = 0;
        let mut warnings = 0;
        for outcome in outcomes {
            match outcome.status {
                CheckStatus::Pass => passed += 1,
                CheckStatus::Warn => warnings += 1,
                CheckStatus::Fail => failed += 1,
            }
        }

        let overall_status = if failed > 0 {
            CheckStatus::Fail
        } else if warnings > 0 {
            CheckStatus::Warn
        } else {
            CheckStatus::Pass
        };

        Self {
            total_checks: outcomes.len(),
            passed,
            failed,
            warnings,
            overall_status,
        }
    }
}

/// Identifies the tool that produced the outcomes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScannerInfo {
    pub name: String,
    pub version: String,
    pub rules_used: Vec<String>,
}

/// The attested statement: outcomes, their summary, and run context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Predicate {
    pub results: Vec<CheckOutcome>,
    pub summary: Summary,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow: Option<String>,
    pub scanner: ScannerInfo,
    pub files_scanned: Vec<String>,
}

/// Context describing the run being attested.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunMetadata {
    pub repository: Option<String>,
    pub branch: Option<String>,
    pub commit: Option<String>,
    pub workflow: Option<String>,
    /// Paths relative to the scan root; each becomes a subject.
    pub files_scanned: Vec<String>,
    pub rules_used: Vec<String>,
    /// Expected parent, typically the chain head when the run started.
    /// Advisory only: the chain manager assigns the real parent at link time.
    pub parent_hash_hint: Option<String>,
}

// ---------------------------------------------------------------------------
// DraftAttestation
// ---------------------------------------------------------------------------

/// An attestation that has not been linked into a chain yet.
///
/// A draft deliberately has no hash. Use
/// [`ChainManager::link`](crate::ChainManager::link) to obtain the final
/// [`Attestation`].
#[derive(Debug, Clone, PartialEq)]
pub struct DraftAttestation {
    predicate_type: String,
    subjects: Vec<Subject>,
    predicate: Predicate,
    timestamp: DateTime<Utc>,
    run_id: String,
    parent_hash_hint: Option<String>,
}

impl DraftAttestation {
    #[must_use]
    pub fn predicate(&self) -> &Predicate {
        &self.predicate
    }

    #[must_use]
    pub fn subjects(&self) -> &[Subject] {
        &self.subjects
    }

    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    #[must_use]
    pub fn parent_hash_hint(&self) -> Option<&str> {
        self.parent_hash_hint.as_deref()
    }

    /// Fixes the parent hash and computes the final content hash.
    ///
    /// An empty `parent_hash` marks a genesis attestation.
    ///
    /// # Errors
    ///
    /// Returns [`EvidenceError::Serialization`] if the record cannot be
    /// canonically encoded.
    pub fn link(self, parent_hash: impl Into<String>) -> Result<Attestation, EvidenceError> {
        let mut attestation = Attestation {
            predicate_type: self.predicate_type,
            subjects: self.subjects,
            predicate: self.predicate,
            timestamp: self.timestamp,
            run_id: self.run_id,
            parent_hash: parent_hash.into(),
            hash: String::new(),
        };
        attestation.hash = attestation.compute_hash()?;
        Ok(attestation)
    }
}

// ---------------------------------------------------------------------------
// Attestation
// ---------------------------------------------------------------------------

/// A linked, content-hashed record of one check run.
///
/// Fields are read-only; deserialized attestations should be checked with
/// [`Attestation::verify_hash`] before being trusted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attestation {
    predicate_type: String,
    subjects: Vec<Subject>,
    predicate: Predicate,
    timestamp: DateTime<Utc>,
    run_id: String,
    #[serde(default)]
    parent_hash: String,
    hash: String,
}

impl Attestation {
    #[must_use]
    pub fn predicate_type(&self) -> &str {
        &self.predicate_type
    }

    #[must_use]
    pub fn subjects(&self) -> &[Subject] {
        &self.subjects
    }

    #[must_use]
    pub fn predicate(&self) -> &Predicate {
        &self.predicate
    }

    #[must_use]
    pub fn summary(&self) -> &Summary {
        &self.predicate.summary
    }

    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Hash of the preceding attestation, empty for a genesis record.
    #[must_use]
    pub fn parent_hash(&self) -> &str {
        &self.parent_hash
    }

    #[must_use]
    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// Computes the content hash over every field except `hash`.
    ///
    /// # Errors
    ///
    /// Returns [`EvidenceError::Serialization`] if the record cannot be
    /// canonically encoded.
    pub fn compute_hash(&self) -> Result<String, EvidenceError> {
        let mut value =
            serde_json::to_value(self).map_err(|e| EvidenceError::Serialization(e.to_string()))?;
        if let Some(map) = value.as_object_mut() {
            map.remove("hash");
        }
        let bytes = canonical_value_bytes(value)?;
        Ok(sha256_hex(&bytes))
    }

    /// Returns `true` if the recorded hash matches the content.
    #[must_use]
    pub fn verify_hash(&self) -> bool {
        self.compute_hash().is_ok_and(|h| h == self.hash)
    }

    /// Canonical JSON encoding, the exact bytes carried in a signed envelope.
    ///
    /// # Errors
    ///
    /// Returns [`EvidenceError::Serialization`] on encoding failure.
    pub fn to_canonical_json(&self) -> Result<Vec<u8>, EvidenceError> {
        canonical_json(self)
    }

    /// Parses an attestation from JSON without checking its hash.
    ///
    /// # Errors
    ///
    /// Returns [`EvidenceError::Serialization`] if `bytes` is not an attestation.
    pub fn from_json(bytes: &[u8]) -> Result<Self, EvidenceError> {
        serde_json::from_slice(bytes).map_err(|e| EvidenceError::Serialization(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// AttestationBuilder
// ---------------------------------------------------------------------------

/// Builder for a [`DraftAttestation`].
pub struct AttestationBuilder {
    outcomes: Vec<CheckOutcome>,
    metadata: RunMetadata,
    root: PathBuf,
    scanner_name: String,
    scanner_version: String,
    timestamp: Option<DateTime<Utc>>,
    run_id: Option<String>,
}

impl AttestationBuilder {
    /// Creates a builder for the given outcomes. Subjects are read relative
    /// to the current directory unless [`AttestationBuilder::root`] is set.
    pub fn new(outcomes: Vec<CheckOutcome>) -> Self {
        Self {
            outcomes,
            metadata: RunMetadata::default(),
            root: PathBuf::from("."),
            scanner_name: "tessera".to_string(),
            scanner_version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: None,
            run_id: None,
        }
    }

    pub fn metadata(mut self, metadata: RunMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Directory the scanned file paths are relative to.
    pub fn root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    pub fn scanner(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        self.scanner_name = name.into();
        self.scanner_version = version.into();
        self
    }

    /// Overrides the run timestamp (defaults to now).
    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Overrides the run id (defaults to a fresh random token).
    pub fn run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    /// Digests every scanned file and assembles the draft.
    ///
    /// # Errors
    ///
    /// Returns [`EvidenceError::Subject`] if a scanned file cannot be read.
    pub fn build(self) -> Result<DraftAttestation, EvidenceError> {
        let subjects = self
            .metadata
            .files_scanned
            .iter()
            .map(|name| digest_subject(&self.root, name))
            .collect::<Result<Vec<_>, _>>()?;

        let timestamp = self.timestamp.unwrap_or_else(Utc::now);
        let run_id = self.run_id.unwrap_or_else(|| generate_run_id(timestamp));
        let summary = Summary::from_outcomes(&self.outcomes);

        debug!(
            run_id = %run_id,
            subjects = subjects.len(),
            checks = summary.total_checks,
            status = %summary.overall_status,
            "built draft attestation"
        );

        let RunMetadata {
            repository,
            branch,
            commit,
            workflow,
            files_scanned,
            rules_used,
            parent_hash_hint,
        } = self.metadata;

        Ok(DraftAttestation {
            predicate_type: PREDICATE_TYPE.to_string(),
            subjects,
            predicate: Predicate {
                results: self.outcomes,
                summary,
                repository,
                branch,
                commit,
                workflow,
                scanner: ScannerInfo {
                    name: self.scanner_name,
                    version: self.scanner_version,
                    rules_used,
                },
                files_scanned,
            },
            timestamp,
            run_id,
            parent_hash_hint,
        })
    }
}

/// Streams the file content through SHA-256.
fn digest_subject(root: &Path, name: &str) -> Result<Subject, EvidenceError> {
    let subject_err = |e: io::Error| EvidenceError::Subject {
        path: name.to_string(),
        reason: e.to_string(),
    };

    let mut file = File::open(root.join(name)).map_err(subject_err)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf).map_err(subject_err)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    let mut digest = BTreeMap::new();
    digest.insert(DIGEST_ALGORITHM.to_string(), hex::encode(hasher.finalize()));
    Ok(Subject {
        name: name.to_string(),
        digest,
    })
}

/// Opaque per-run token: 8 bytes of SHA-256 over the timestamp and fresh randomness.
fn generate_run_id(timestamp: DateTime<Utc>) -> String {
    let nanos = timestamp.timestamp_nanos_opt().unwrap_or_default();
    let seed = format!("tessera-run-{nanos}-{}", OsRng.next_u64());
    let digest = Sha256::digest(seed.as_bytes());
    hex::encode(&digest[..8])
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
