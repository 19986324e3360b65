//! File discovery for policy checks.
//!
//! Walks a project tree and collects the infrastructure and CI configuration
//! files the built-in rules know how to inspect:
//!
//! - Terraform / HCL (`.tf`, `.tfvars`, `.hcl`)
//! - YAML and JSON configuration (`.yml`, `.yaml`, `.json`)
//! - `Dockerfile` and `docker-compose.{yml,yaml}`
//!
//! Hidden directories are skipped except those listed in
//! [`ScanConfig::include_hidden`] (`.github` by default), and directories named
//! in [`ScanConfig::exclude_dirs`] are never entered.

use std::path::{Path, PathBuf};

use ignore::WalkBuilder;
use tracing::{debug, info, warn};

use tessera_core::config::ScanConfig;

use crate::PolicyError;

/// File extensions (with leading dot) treated as relevant.
const RELEVANT_EXTENSIONS: &[&str] = &[".tf", ".tfvars", ".yml", ".yaml", ".json", ".hcl"];

/// Exact file names treated as relevant regardless of extension.
const RELEVANT_FILE_NAMES: &[&str] = &["Dockerfile", "docker-compose.yml", "docker-compose.yaml"];

// ---------------------------------------------------------------------------
// DiscoveredFile
// ---------------------------------------------------------------------------

/// A configuration file discovered during directory walking.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct DiscoveredFile {
    /// Path relative to the scan root (normalized with forward slashes, no leading `./`).
    pub relative_path: String,
    /// Absolute path to the file.
    pub path: PathBuf,
    /// UTF-8 file content (lossy).
    pub content: String,
}

// ---------------------------------------------------------------------------
// DiscoveryStats
// ---------------------------------------------------------------------------

/// Statistics collected during file discovery.
#[derive(Debug, Clone, Default)]
pub struct DiscoveryStats {
    /// Total files examined (before filtering).
    pub total_entries: u64,
    /// Files accepted for checking.
    pub accepted: u64,
    /// Files skipped because they are not configuration files.
    pub skipped_irrelevant: u64,
    /// Files skipped because they appear to be binary.
    pub skipped_binary: u64,
    /// Files skipped because they exceed the size limit.
    pub skipped_large: u64,
    /// Files skipped due to I/O or walk errors.
    pub skipped_errors: u64,
}

/// The result of file discovery: discovered files and statistics.
#[derive(Debug, Clone)]
pub struct DiscoveryResult {
    /// Canonical scan root.
    pub root: PathBuf,
    /// Discovered files, sorted by relative path.
    pub files: Vec<DiscoveredFile>,
    pub stats: DiscoveryStats,
}

impl DiscoveryResult {
    /// Relative paths of all discovered files, in discovery order.
    #[must_use]
    pub fn relative_paths(&self) -> Vec<String> {
        self.files.iter().map(|f| f.relative_path.clone()).collect()
    }
}

// ---------------------------------------------------------------------------
// discover_files
// ---------------------------------------------------------------------------

/// Walk `root` recursively and collect relevant configuration files.
///
/// `.gitignore` rules are not applied: ignored files may still hold deployed
/// configuration and must be visible to the checks.
///
/// # Errors
///
/// Returns [`PolicyError::Io`] if `root` does not exist or is not readable.
pub fn discover_files(root: &Path, config: &ScanConfig) -> Result<DiscoveryResult, PolicyError> {
    let root = root.canonicalize().map_err(|e| {
        PolicyError::Io(std::io::Error::new(
            e.kind(),
            format!("cannot access target directory '{}': {e}", root.display()),
        ))
    })?;

    let exclude_dirs = config.exclude_dirs.clone();
    let include_hidden = config.include_hidden.clone();
    let max_bytes = config.max_file_size_kb.saturating_mul(1024);

    let mut walker = WalkBuilder::new(&root);
    walker
        .follow_links(false)
        .git_ignore(false)
        .git_global(false)
        .git_exclude(false)
        .ignore(false)
        .parents(false)
        // Hidden entries are filtered below so `.github` can be let through.
        .hidden(false)
        .filter_entry(move |entry| {
            let is_dir = entry.file_type().is_some_and(|ft| ft.is_dir());
            if !is_dir || entry.depth() == 0 {
                return true;
            }
            let name = entry.file_name().to_string_lossy();
            if exclude_dirs.iter().any(|d| d == name.as_ref()) {
                return false;
            }
            !name.starts_with('.') || include_hidden.iter().any(|d| d == name.as_ref())
        })
        .sort_by_file_path(|a, b| a.cmp(b));

    let mut stats = DiscoveryStats::default();
    let mut files = Vec::new();

    for entry_result in walker.build() {
        let entry = match entry_result {
            Ok(e) => e,
            Err(err) => {
                warn!(error = %err, "error walking directory entry");
                stats.skipped_errors += 1;
                continue;
            }
        };

        if !entry.file_type().is_some_and(|ft| ft.is_file()) {
            continue;
        }

        stats.total_entries += 1;
        let path = entry.path();

        if !is_relevant_file(path) {
            debug!(path = %path.display(), "skipping irrelevant file");
            stats.skipped_irrelevant += 1;
            continue;
        }

        let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
        if size > max_bytes {
            debug!(path = %path.display(), size, "skipping oversized file");
            stats.skipped_large += 1;
            continue;
        }

        let bytes = match std::fs::read(path) {
            Ok(b) => b,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "failed to read file");
                stats.skipped_errors += 1;
                continue;
            }
        };

        if bytes.iter().take(8192).any(|b| *b == 0) {
            debug!(path = %path.display(), "skipping binary file");
            stats.skipped_binary += 1;
            continue;
        }

        let relative_path = path
            .strip_prefix(&root)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/");

        files.push(DiscoveredFile {
            relative_path,
            path: path.to_path_buf(),
            content: String::from_utf8_lossy(&bytes).into_owned(),
        });
    }

    files.sort();
    stats.accepted = files.len() as u64;

    info!(
        accepted = stats.accepted,
        skipped_irrelevant = stats.skipped_irrelevant,
        skipped_binary = stats.skipped_binary,
        skipped_large = stats.skipped_large,
        skipped_errors = stats.skipped_errors,
        "file discovery complete"
    );

    Ok(DiscoveryResult { root, files, stats })
}

/// Returns `true` if the file name or extension marks a configuration file.
pub fn is_relevant_file(path: &Path) -> bool {
    let file_name = match path.file_name().and_then(|n| n.to_str()) {
        Some(name) => name,
        None => return false,
    };

    if RELEVANT_FILE_NAMES.contains(&file_name) {
        return true;
    }

    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => RELEVANT_EXTENSIONS.contains(&format!(".{ext}").as_str()),
        None => false,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
