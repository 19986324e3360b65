//! Configuration loading and merging for Tessera.
//!
//! Tessera resolves configuration from multiple sources with CLI > project > home > defaults
//! precedence. Configuration is loaded from `.tessera.yaml` files.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::CoreError;

/// File name of the configuration file looked up in the home and project directories.
pub const CONFIG_FILE_NAME: &str = ".tessera.yaml";

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Top-level Tessera configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TesseraConfig {
    /// File discovery settings.
    pub scan: ScanConfig,
    /// Evidence store and signing settings.
    pub evidence: EvidenceConfig,
}

// ---------------------------------------------------------------------------
// ScanConfig
// ---------------------------------------------------------------------------

/// File discovery configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Directory names that are never descended into.
    pub exclude_dirs: Vec<String>,
    /// Hidden directories that are scanned anyway.
    pub include_hidden: Vec<String>,
    /// Maximum file size in KiB. Larger files are skipped.
    pub max_file_size_kb: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            exclude_dirs: vec![
                "node_modules".into(),
                "vendor".into(),
                ".terraform".into(),
            ],
            include_hidden: vec![".github".into()],
            max_file_size_kb: 1024,
        }
    }
}

// ---------------------------------------------------------------------------
// EvidenceConfig
// ---------------------------------------------------------------------------

/// Evidence store and signing configuration.
///
/// Relative paths are resolved against the project directory by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvidenceConfig {
    /// Directory holding the chain index and attestation artifacts.
    pub dir: String,
    /// Path of the base64-encoded Ed25519 signing key seed.
    pub signing_key: String,
    /// Trusted Ed25519 public keys (base64-encoded) accepted by `verify`.
    pub trusted_keys: Vec<String>,
    /// Whether `verify` checks signatures unless told to do linkage only.
    pub require_signatures: bool,
}

impl Default for EvidenceConfig {
    fn default() -> Self {
        Self {
            dir: ".tessera/attestations".to_string(),
            signing_key: ".tessera/signing.key".to_string(),
            trusted_keys: Vec::new(),
            require_signatures: true,
        }
    }
}

impl EvidenceConfig {
    /// Resolves the evidence directory against `project_dir`.
    #[must_use]
    pub fn evidence_dir(&self, project_dir: &Path) -> PathBuf {
        resolve(project_dir, &self.dir)
    }

    /// Resolves the signing key path against `project_dir`.
    #[must_use]
    pub fn signing_key_path(&self, project_dir: &Path) -> PathBuf {
        resolve(project_dir, &self.signing_key)
    }
}

fn resolve(base: &Path, value: &str) -> PathBuf {
    let path = Path::new(value);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Load and merge configuration from multiple sources.
///
/// Resolution order (highest priority first):
/// 1. CLI overrides (applied by the caller after loading)
/// 2. `.tessera.yaml` in the project directory
/// 3. `.tessera.yaml` in the user home directory
/// 4. Built-in defaults
///
/// # Errors
///
/// Returns [`CoreError::Config`] if a config file exists but is malformed.
pub fn load_config(project_dir: Option<&Path>) -> Result<TesseraConfig, CoreError> {
    let mut config = TesseraConfig::default();

    if let Some(home) = home_dir() {
        let home_config = home.join(CONFIG_FILE_NAME);
        if home_config.is_file() {
            debug!(path = %home_config.display(), "loading home config");
            let layer = load_config_file(&home_config)?;
            config = merge_config(config, layer);
        }
    }

    if let Some(dir) = project_dir {
        let project_config = dir.join(CONFIG_FILE_NAME);
        if project_config.is_file() {
            debug!(path = %project_config.display(), "loading project config");
            let layer = load_config_file(&project_config)?;
            config = merge_config(config, layer);
        }
    }

    info!("configuration loaded");
    Ok(config)
}

/// Load a single config file and deserialize it.
fn load_config_file(path: &Path) -> Result<TesseraConfig, CoreError> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        CoreError::Config(format!(
            "failed to read config file '{}': {e}",
            path.display()
        ))
    })?;

    serde_yml::from_str(&content).map_err(|e| {
        CoreError::Config(format!(
            "failed to parse config file '{}': {e}",
            path.display()
        ))
    })
}

/// Serializes `config` as YAML, for `tessera init`.
///
/// # Errors
///
/// Returns [`CoreError::Config`] if YAML serialization fails.
pub fn to_yaml(config: &TesseraConfig) -> Result<String, CoreError> {
    serde_yml::to_string(config)
        .map_err(|e| CoreError::Config(format!("failed to serialize config: {e}")))
}

/// Merge `overlay` on top of `base`, section by section.
fn merge_config(base: TesseraConfig, overlay: TesseraConfig) -> TesseraConfig {
    TesseraConfig {
        scan: merge_scan(base.scan, overlay.scan),
        evidence: merge_evidence(base.evidence, overlay.evidence),
    }
}

fn merge_scan(base: ScanConfig, overlay: ScanConfig) -> ScanConfig {
    ScanConfig {
        exclude_dirs: union(base.exclude_dirs, overlay.exclude_dirs),
        include_hidden: union(base.include_hidden, overlay.include_hidden),
        max_file_size_kb: overlay.max_file_size_kb,
    }
}

fn merge_evidence(base: EvidenceConfig, overlay: EvidenceConfig) -> EvidenceConfig {
    EvidenceConfig {
        dir: overlay.dir,
        signing_key: overlay.signing_key,
        trusted_keys: union(base.trusted_keys, overlay.trusted_keys),
        require_signatures: overlay.require_signatures,
    }
}

/// Appends the entries of `overlay` missing from `base`, preserving order.
fn union(base: Vec<String>, overlay: Vec<String>) -> Vec<String> {
    let mut merged = base;
    for item in overlay {
        if !merged.contains(&item) {
            merged.push(item);
        }
    }
    merged
}

/// Get the user home directory.
fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
