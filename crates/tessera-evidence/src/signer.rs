//! Detached-signature envelopes for attestations.
//!
//! The envelope follows the DSSE layout: the attestation's canonical JSON is
//! the payload, and each signature covers the pre-authentication encoding
//! (PAE) of the payload type and payload, so a signature made for one
//! payload type never verifies for another.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use ed25519_dalek::{Signer as _, SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::attestation::Attestation;
use crate::EvidenceError;

/// Versioned media type of the envelope payload.
pub const PAYLOAD_TYPE: &str = "application/vnd.tessera.attestation.v1+json";

/// Signature algorithm label recorded in [`SigningMetadata`].
pub const ALGORITHM: &str = "ed25519";

/// Number of leading SHA-256 bytes of the public key that form a key id.
pub const KEY_ID_LEN_BYTES: usize = 8;

// ---------------------------------------------------------------------------
// Envelope types
// ---------------------------------------------------------------------------

/// One signature over an envelope's PAE bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvelopeSignature {
    pub key_id: String,
    /// Base64-encoded signature.
    pub signature: String,
}

/// Payload plus its declared type and signatures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub payload_type: String,
    /// Base64-encoded canonical attestation JSON.
    pub payload: String,
    pub signatures: Vec<EnvelopeSignature>,
}

/// Provenance of a signature. Informational only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SigningMetadata {
    pub key_id: String,
    pub algorithm: String,
    pub timestamp: DateTime<Utc>,
    /// `github-actions`, `ci`, or `local-<hostname>`.
    pub source: String,
}

/// A signed attestation as stored in the evidence store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedAttestation {
    pub envelope: Envelope,
    pub signing_metadata: SigningMetadata,
}

impl SignedAttestation {
    /// Decodes the raw payload bytes.
    ///
    /// # Errors
    ///
    /// Returns [`EvidenceError::Verification`] if the payload is not valid base64.
    pub fn payload_bytes(&self) -> Result<Vec<u8>, EvidenceError> {
        BASE64
            .decode(&self.envelope.payload)
            .map_err(|e| EvidenceError::verification(format!("malformed payload encoding: {e}")))
    }

    /// Decodes the payload as an [`Attestation`].
    ///
    /// This does not check the signature.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be decoded or parsed.
    pub fn attestation(&self) -> Result<Attestation, EvidenceError> {
        Attestation::from_json(&self.payload_bytes()?)
    }

    /// Parses a stored artifact.
    ///
    /// # Errors
    ///
    /// Returns [`EvidenceError::Serialization`] if `bytes` is not a signed attestation.
    pub fn from_json(bytes: &[u8]) -> Result<Self, EvidenceError> {
        serde_json::from_slice(bytes).map_err(|e| EvidenceError::Serialization(e.to_string()))
    }

    /// Pretty-printed JSON for storage.
    ///
    /// # Errors
    ///
    /// Returns [`EvidenceError::Serialization`] on encoding failure.
    pub fn to_json_pretty(&self) -> Result<Vec<u8>, EvidenceError> {
        serde_json::to_vec_pretty(self).map_err(|e| EvidenceError::Serialization(e.to_string()))
    }

    /// Deterministic artifact name: `attestation-<YYYYMMDD-HHMMSS-mmm>-<keyId prefix>.json`,
    /// built from the attestation timestamp so names sort chronologically.
    #[must_use]
    pub fn artifact_name(&self, attestation: &Attestation) -> String {
        let key_prefix: String = self.signing_metadata.key_id.chars().take(8).collect();
        format!(
            "attestation-{}-{key_prefix}.json",
            attestation.timestamp().format("%Y%m%d-%H%M%S-%3f")
        )
    }
}

/// DSSE pre-authentication encoding:
/// `"DSSEv1" SP len(type) SP type SP len(payload) SP payload`.
#[must_use]
pub fn pae(payload_type: &str, payload: &[u8]) -> Vec<u8> {
    let header = format!(
        "DSSEv1 {} {payload_type} {} ",
        payload_type.len(),
        payload.len()
    );
    let mut out = Vec::with_capacity(header.len() + payload.len());
    out.extend_from_slice(header.as_bytes());
    out.extend_from_slice(payload);
    out
}

/// Key id of a public key: hex of the first [`KEY_ID_LEN_BYTES`] bytes of
/// SHA-256 over the raw 32-byte key.
#[must_use]
pub fn key_id(key: &VerifyingKey) -> String {
    let digest = Sha256::digest(key.as_bytes());
    hex::encode(&digest[..KEY_ID_LEN_BYTES])
}

// ---------------------------------------------------------------------------
// Signer
// ---------------------------------------------------------------------------

/// Signs attestations with an injected Ed25519 key.
pub struct Signer {
    signing_key: SigningKey,
    key_id: String,
}

impl Signer {
    pub fn new(signing_key: SigningKey) -> Self {
        let key_id = key_id(&signing_key.verifying_key());
        Self {
            signing_key,
            key_id,
        }
    }

    #[must_use]
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    #[must_use]
    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// Public key in base64, the form accepted by `trusted_keys`.
    #[must_use]
    pub fn public_key_base64(&self) -> String {
        BASE64.encode(self.verifying_key().as_bytes())
    }

    /// Wraps `attestation` in a signed envelope.
    ///
    /// # Errors
    ///
    /// Returns [`EvidenceError::Signing`] if the attestation cannot be encoded
    /// or the signature cannot be produced.
    pub fn sign(&self, attestation: &Attestation) -> Result<SignedAttestation, EvidenceError> {
        let payload = attestation
            .to_canonical_json()
            .map_err(|e| EvidenceError::Signing(format!("encoding payload: {e}")))?;

        let signature = self
            .signing_key
            .try_sign(&pae(PAYLOAD_TYPE, &payload))
            .map_err(|e| EvidenceError::Signing(e.to_string()))?;

        debug!(key_id = %self.key_id, hash = %attestation.hash(), "attestation signed");

        Ok(SignedAttestation {
            envelope: Envelope {
                payload_type: PAYLOAD_TYPE.to_string(),
                payload: BASE64.encode(&payload),
                signatures: vec![EnvelopeSignature {
                    key_id: self.key_id.clone(),
                    signature: BASE64.encode(signature.to_bytes()),
                }],
            },
            signing_metadata: SigningMetadata {
                key_id: self.key_id.clone(),
                algorithm: ALGORITHM.to_string(),
                timestamp: Utc::now(),
                source: signing_source(),
            },
        })
    }
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signer")
            .field("key_id", &self.key_id)
            .finish_non_exhaustive()
    }
}

/// Where the signature was produced.
fn signing_source() -> String {
    let env_is_true = |name: &str| std::env::var(name).is_ok_and(|v| v == "true");
    if env_is_true("GITHUB_ACTIONS") {
        return "github-actions".to_string();
    }
    if env_is_true("CI") {
        return "ci".to_string();
    }
    match hostname() {
        Some(host) => format!("local-{host}"),
        None => "local".to_string(),
    }
}

fn hostname() -> Option<String> {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .ok()
        .or_else(|| std::fs::read_to_string("/etc/hostname").ok())
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
