//! Signing key acquisition.
//!
//! A [`KeySource`] hands a [`SigningKey`] to [`Signer::new`](crate::Signer::new).
//! Key material is never generated inside the signer itself.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use ed25519_dalek::{SigningKey, VerifyingKey, SECRET_KEY_LENGTH};
use rand_core::OsRng;
use tracing::info;

use crate::EvidenceError;

/// Something that can provide an Ed25519 signing key.
pub trait KeySource {
    /// # Errors
    ///
    /// Returns [`EvidenceError::KeyGeneration`] or [`EvidenceError::InvalidKey`]
    /// if no usable key can be produced.
    fn signing_key(&self) -> Result<SigningKey, EvidenceError>;
}

// ---------------------------------------------------------------------------
// FileKeySource
// ---------------------------------------------------------------------------

/// A 32-byte seed stored base64-encoded in a file.
#[derive(Debug, Clone)]
pub struct FileKeySource {
    path: PathBuf,
}

impl FileKeySource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Generates a fresh key and writes it, refusing to replace an existing file.
    ///
    /// # Errors
    ///
    /// Returns [`EvidenceError::KeyGeneration`] if the file exists or cannot be written.
    pub fn generate(&self) -> Result<SigningKey, EvidenceError> {
        let key = generate_key()?;
        self.write_key(&key)?;
        info!(path = %self.path.display(), "generated signing key");
        Ok(key)
    }

    fn write_key(&self, key: &SigningKey) -> Result<(), EvidenceError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                EvidenceError::KeyGeneration(format!("creating '{}': {e}", parent.display()))
            })?;
        }

        let mut options = fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let mut file = options.open(&self.path).map_err(|e| {
            EvidenceError::KeyGeneration(format!("creating '{}': {e}", self.path.display()))
        })?;
        let encoded = BASE64.encode(key.to_bytes());
        file.write_all(encoded.as_bytes())
            .and_then(|()| file.write_all(b"\n"))
            .and_then(|()| file.sync_all())
            .map_err(|e| {
                EvidenceError::KeyGeneration(format!("writing '{}': {e}", self.path.display()))
            })
    }
}

impl KeySource for FileKeySource {
    fn signing_key(&self) -> Result<SigningKey, EvidenceError> {
        let content = fs::read_to_string(&self.path).map_err(|e| {
            EvidenceError::InvalidKey(format!("reading '{}': {e}", self.path.display()))
        })?;
        let bytes = BASE64.decode(content.trim()).map_err(|e| {
            EvidenceError::InvalidKey(format!("'{}' is not base64: {e}", self.path.display()))
        })?;
        let seed: [u8; SECRET_KEY_LENGTH] = bytes.as_slice().try_into().map_err(|_| {
            EvidenceError::InvalidKey(format!(
                "'{}' holds {} bytes, expected {SECRET_KEY_LENGTH}",
                self.path.display(),
                bytes.len()
            ))
        })?;
        Ok(SigningKey::from_bytes(&seed))
    }
}

// ---------------------------------------------------------------------------
// EphemeralKeySource
// ---------------------------------------------------------------------------

/// Generates a new random key on every call. Signatures made with it can only
/// be verified while its public key is still known.
#[derive(Debug, Clone, Copy, Default)]
pub struct EphemeralKeySource;

impl KeySource for EphemeralKeySource {
    fn signing_key(&self) -> Result<SigningKey, EvidenceError> {
        generate_key()
    }
}

fn generate_key() -> Result<SigningKey, EvidenceError> {
    let mut seed = [0u8; SECRET_KEY_LENGTH];
    rand_core::RngCore::try_fill_bytes(&mut OsRng, &mut seed)
        .map_err(|e| EvidenceError::KeyGeneration(format!("system randomness unavailable: {e}")))?;
    Ok(SigningKey::from_bytes(&seed))
}

/// Decodes a base64 Ed25519 public key.
///
/// # Errors
///
/// Returns [`EvidenceError::InvalidKey`] if the value is not a valid key.
pub fn decode_public_key(encoded: &str) -> Result<VerifyingKey, EvidenceError> {
    let bytes = BASE64
        .decode(encoded.trim())
        .map_err(|e| EvidenceError::InvalidKey(format!("public key is not base64: {e}")))?;
    let raw: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
        EvidenceError::InvalidKey(format!("public key has {} bytes, expected 32", bytes.len()))
    })?;
    VerifyingKey::from_bytes(&raw)
        .map_err(|e| EvidenceError::InvalidKey(format!("invalid ed25519 public key: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_key_source_generate_then_load() {
        let tmp = tempfile::tempdir().unwrap();
        let source = FileKeySource::new(tmp.path().join("keys/signing.key"));

        let generated = source.generate().unwrap();
        let loaded = source.signing_key().unwrap();

        assert_eq!(generated.to_bytes(), loaded.to_bytes());
    }

    #[cfg(unix)]
    #[test]
    fn generated_key_file_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempfile::tempdir().unwrap();
        let source = FileKeySource::new(tmp.path().join("signing.key"));
        source.generate().unwrap();

        let mode = fs::metadata(source.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn generate_refuses_to_overwrite() {
        let tmp = tempfile::tempdir().unwrap();
        let source = FileKeySource::new(tmp.path().join("signing.key"));
        source.generate().unwrap();

        assert!(matches!(source.generate(), Err(EvidenceError::KeyGeneration(_))));
    }

    #[test]
    fn load_rejects_wrong_length() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("signing.key");
        fs::write(&path, BASE64.encode([1u8; 16])).unwrap();

        let err = FileKeySource::new(&path).signing_key().unwrap_err();
        assert!(err.to_string().contains("expected 32"), "got: {err}");
    }

    #[test]
    fn load_missing_file_is_invalid_key() {
        let tmp = tempfile::tempdir().unwrap();
        let result = FileKeySource::new(tmp.path().join("absent.key")).signing_key();
        assert!(matches!(result, Err(EvidenceError::InvalidKey(_))));
    }

    #[test]
    fn ephemeral_keys_differ() {
        let a = EphemeralKeySource.signing_key().unwrap();
        let b = EphemeralKeySource.signing_key().unwrap();
        assert_ne!(a.to_bytes(), b.to_bytes());
    }

    #[test]
    fn public_key_roundtrip() {
        let key = SigningKey::from_bytes(&[7u8; 32]).verifying_key();
        let decoded = decode_public_key(&BASE64.encode(key.as_bytes())).unwrap();
        assert_eq!(decoded, key);
        assert!(decode_public_key("not base64!").is_err());
    }
}
