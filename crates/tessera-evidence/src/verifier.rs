//! Signature verification of signed attestations.

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use ed25519_dalek::{Signature, VerifyingKey};
use tracing::debug;

use crate::keys::decode_public_key;
use crate::signer::{key_id, pae, SignedAttestation, ALGORITHM, PAYLOAD_TYPE};
use crate::EvidenceError;

// ---------------------------------------------------------------------------
// Verifier
// ---------------------------------------------------------------------------

/// Checks envelopes against one Ed25519 public key.
#[derive(Debug, Clone)]
pub struct Verifier {
    key: VerifyingKey,
    key_id: String,
}

impl Verifier {
    pub fn new(key: VerifyingKey) -> Self {
        let key_id = key_id(&key);
        Self { key, key_id }
    }

    #[must_use]
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Verifies the envelope signature made by this verifier's key.
    ///
    /// Checks the payload type and algorithm, selects the signature carrying
    /// this key's id, and verifies it over the PAE of the embedded payload.
    ///
    /// # Errors
    ///
    /// Returns [`EvidenceError::Verification`] for an unsupported payload type
    /// or algorithm, a malformed envelope, or a signature that does not verify.
    pub fn verify(&self, signed: &SignedAttestation) -> Result<(), EvidenceError> {
        let envelope = &signed.envelope;

        if envelope.payload_type != PAYLOAD_TYPE {
            return Err(EvidenceError::verification(format!(
                "unsupported payload type '{}'",
                envelope.payload_type
            )));
        }
        if signed.signing_metadata.algorithm != ALGORITHM {
            return Err(EvidenceError::verification(format!(
                "unsupported algorithm '{}'",
                signed.signing_metadata.algorithm
            )));
        }

        let entry = envelope
            .signatures
            .iter()
            .find(|s| s.key_id == self.key_id)
            .ok_or_else(|| {
                EvidenceError::verification(format!("no signature by key {}", self.key_id))
            })?;

        let payload = signed.payload_bytes()?;
        let sig_bytes = BASE64
            .decode(&entry.signature)
            .map_err(|e| EvidenceError::verification(format!("malformed signature encoding: {e}")))?;
        let signature = Signature::from_slice(&sig_bytes)
            .map_err(|e| EvidenceError::verification(format!("malformed signature: {e}")))?;

        self.key
            .verify_strict(&pae(&envelope.payload_type, &payload), &signature)
            .map_err(|_| EvidenceError::verification("signature mismatch"))?;

        debug!(key_id = %self.key_id, "envelope signature verified");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// TrustedKeys
// ---------------------------------------------------------------------------

/// Public keys accepted for signature verification, indexed by key id.
#[derive(Debug, Clone, Default)]
pub struct TrustedKeys {
    keys: BTreeMap<String, VerifyingKey>,
}

impl TrustedKeys {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses base64-encoded public keys.
    ///
    /// # Errors
    ///
    /// Returns [`EvidenceError::InvalidKey`] for the first value that is not a key.
    pub fn from_base64<S: AsRef<str>>(encoded: &[S]) -> Result<Self, EvidenceError> {
        let mut keys = Self::new();
        for value in encoded {
            keys.insert(decode_public_key(value.as_ref())?);
        }
        Ok(keys)
    }

    /// Adds a key and returns its id.
    pub fn insert(&mut self, key: VerifyingKey) -> String {
        let id = key_id(&key);
        self.keys.insert(id.clone(), key);
        id
    }

    #[must_use]
    pub fn get(&self, key_id: &str) -> Option<&VerifyingKey> {
        self.keys.get(key_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Verifies `signed` with the trusted key named in its signatures.
    /// Returns the id of the key that verified.
    ///
    /// # Errors
    ///
    /// Returns [`EvidenceError::Verification`] if no signature is by a trusted
    /// key or the signature does not verify.
    pub fn verify(&self, signed: &SignedAttestation) -> Result<String, EvidenceError> {
        let key = signed
            .envelope
            .signatures
            .iter()
            .find_map(|s| self.keys.get(&s.key_id))
            .ok_or_else(|| {
                EvidenceError::verification(format!(
                    "no trusted key for signer {}",
                    signed.signing_metadata.key_id
                ))
            })?;
        let verifier = Verifier::new(*key);
        verifier.verify(signed)?;
        Ok(verifier.key_id)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attestation::{Attestation, AttestationBuilder};
    use crate::signer::Signer;
    use chrono::{TimeZone, Utc};
    use ed25519_dalek::SigningKey;
    use tessera_core::{CheckOutcome, CheckStatus};

    fn key(seed: u8) -> SigningKey {
        SigningKey::from_bytes(&[seed; 32])
    }

    fn attestation() -> Attestation {
        AttestationBuilder::new(vec![CheckOutcome::new("r", CheckStatus::Fail, "bad")])
            .timestamp(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap())
            .run_id("run")
            .build()
            .unwrap()
            .link("")
            .unwrap()
    }

    fn signed_by(seed: u8) -> SignedAttestation {
        Signer::new(key(seed)).sign(&attestation()).unwrap()
    }

    fn reason(err: EvidenceError) -> String {
        match err {
            EvidenceError::Verification { reason } => reason,
            other => panic!("expected Verification error, got {other:?}"),
        }
    }

    #[test]
    fn verify_with_matching_key() {
        let signed = signed_by(42);
        Verifier::new(key(42).verifying_key()).verify(&signed).unwrap();
    }

    #[test]
    fn verify_with_other_key_fails() {
        let signed = signed_by(42);
        let err = Verifier::new(key(99).verifying_key()).verify(&signed).unwrap_err();
        assert!(reason(err).contains("no signature by key"));
    }

    #[test]
    fn verify_with_other_key_relabelled_fails() {
        // Claim the signature is by key 99; the bytes still belong to key 42.
        let mut signed = signed_by(42);
        let other = Verifier::new(key(99).verifying_key());
        signed.envelope.signatures[0].key_id = other.key_id().to_string();

        let err = other.verify(&signed).unwrap_err();
        assert_eq!(reason(err), "signature mismatch");
    }

    #[test]
    fn flipped_payload_bit_fails() {
        let mut signed = signed_by(42);
        let mut payload = BASE64.decode(&signed.envelope.payload).unwrap();
        payload[10] ^= 0x01;
        signed.envelope.payload = BASE64.encode(&payload);

        let err = Verifier::new(key(42).verifying_key()).verify(&signed).unwrap_err();
        assert_eq!(reason(err), "signature mismatch");
    }

    #[test]
    fn flipped_signature_bit_fails() {
        let mut signed = signed_by(42);
        let mut sig = BASE64.decode(&signed.envelope.signatures[0].signature).unwrap();
        sig[0] ^= 0x80;
        signed.envelope.signatures[0].signature = BASE64.encode(&sig);

        assert!(Verifier::new(key(42).verifying_key()).verify(&signed).is_err());
    }

    #[test]
    fn payload_type_is_bound() {
        let mut signed = signed_by(42);
        signed.envelope.payload_type = "application/vnd.in-toto+json".to_string();

        let err = Verifier::new(key(42).verifying_key()).verify(&signed).unwrap_err();
        assert!(reason(err).contains("unsupported payload type"));
    }

    #[test]
    fn unsupported_algorithm_rejected() {
        let mut signed = signed_by(42);
        signed.signing_metadata.algorithm = "ECDSA-SHA256".to_string();

        let err = Verifier::new(key(42).verifying_key()).verify(&signed).unwrap_err();
        assert!(reason(err).contains("unsupported algorithm"));
    }

    #[test]
    fn malformed_signature_rejected() {
        let mut signed = signed_by(42);
        signed.envelope.signatures[0].signature = BASE64.encode([0u8; 10]);

        let err = Verifier::new(key(42).verifying_key()).verify(&signed).unwrap_err();
        assert!(reason(err).contains("malformed signature"));
    }

    #[test]
    fn trusted_keys_select_by_key_id() {
        let mut trusted = TrustedKeys::new();
        trusted.insert(key(1).verifying_key());
        let id = trusted.insert(key(42).verifying_key());
        assert_eq!(trusted.len(), 2);

        assert_eq!(trusted.verify(&signed_by(42)).unwrap(), id);
        assert!(trusted.verify(&signed_by(7)).is_err());
    }

    #[test]
    fn trusted_keys_from_base64() {
        let encoded = BASE64.encode(key(42).verifying_key().as_bytes());
        let trusted = TrustedKeys::from_base64(&[encoded]).unwrap();
        assert!(trusted.verify(&signed_by(42)).is_ok());

        assert!(TrustedKeys::from_base64(&["AAAA"]).is_err());
    }
}
