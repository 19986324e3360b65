//! Named-artifact storage for the chain index and signed attestations.
//!
//! [`FsEvidenceStore`] keeps every artifact as a file in one directory.
//! Replacements go through a temporary file in the same directory that is
//! fsynced and renamed over the target, so readers see either the old or the
//! new content. [`MemoryEvidenceStore`] backs tests and can simulate write
//! failures.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use fs2::FileExt;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

/// Name of the advisory lock file inside a [`FsEvidenceStore`] directory.
pub const LOCK_FILE_NAME: &str = "chain.lock";

// ---------------------------------------------------------------------------
// StoreError
// ---------------------------------------------------------------------------

/// Error type for evidence store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("artifact not found: {0}")]
    NotFound(String),

    #[error("artifact already exists: {0}")]
    AlreadyExists(String),

    #[error("invalid artifact name: '{0}'")]
    InvalidName(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("lock error: {0}")]
    Lock(String),
}

// ---------------------------------------------------------------------------
// EvidenceStore
// ---------------------------------------------------------------------------

/// Durable storage of byte artifacts by flat name.
///
/// Names are single path components: no separators, no leading dot.
pub trait EvidenceStore {
    /// Reads an artifact.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] if no artifact has that name.
    fn read(&self, name: &str) -> Result<Vec<u8>, StoreError>;

    /// Creates or atomically replaces an artifact.
    fn write_atomic(&self, name: &str, data: &[u8]) -> Result<(), StoreError>;

    /// Creates an artifact that must not exist yet.
    ///
    /// # Errors
    ///
    /// [`StoreError::AlreadyExists`] if the name is taken.
    fn write_new(&self, name: &str, data: &[u8]) -> Result<(), StoreError>;

    /// # Errors
    ///
    /// [`StoreError::Io`] if presence cannot be determined. A missing
    /// artifact is `Ok(false)`, never an error.
    fn exists(&self, name: &str) -> Result<bool, StoreError>;

    /// Lists artifact names in lexicographic order.
    fn list(&self) -> Result<Vec<String>, StoreError>;

    /// Blocks until this caller holds the store's exclusive writer lock.
    /// The lock is released when the returned guard is dropped.
    fn lock(&self) -> Result<StoreLock, StoreError>;
}

/// Guard for the exclusive writer lock.
#[derive(Debug)]
pub struct StoreLock {
    held: Held,
}

#[derive(Debug)]
enum Held {
    File(File),
    Gate(Arc<WriterGate>),
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        match &self.held {
            Held::File(file) => {
                if let Err(e) = FileExt::unlock(file) {
                    warn!(error = %e, "failed to release evidence store lock");
                }
            }
            Held::Gate(gate) => gate.release(),
        }
    }
}

/// In-process exclusive lock: a flag guarded by a mutex, waited on with a condvar.
#[derive(Debug, Default)]
struct WriterGate {
    held: Mutex<bool>,
    released: Condvar,
}

impl WriterGate {
    fn acquire(self: &Arc<Self>) -> StoreLock {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        while *held {
            held = self
                .released
                .wait(held)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *held = true;
        StoreLock {
            held: Held::Gate(Arc::clone(self)),
        }
    }

    fn release(&self) {
        *self.held.lock().unwrap_or_else(PoisonError::into_inner) = false;
        self.released.notify_one();
    }
}

pub(crate) fn validate_name(name: &str) -> Result<(), StoreError> {
    let invalid = name.is_empty()
        || name.starts_with('.')
        || name.contains('/')
        || name.contains('\\')
        || name.contains('\0');
    if invalid {
        return Err(StoreError::InvalidName(name.to_string()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// FsEvidenceStore
// ---------------------------------------------------------------------------

/// Directory-backed evidence store.
#[derive(Debug, Clone)]
pub struct FsEvidenceStore {
    dir: PathBuf,
}

impl FsEvidenceStore {
    /// Uses `dir` as the store root. The directory is created on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_of(&self, name: &str) -> Result<PathBuf, StoreError> {
        validate_name(name)?;
        Ok(self.dir.join(name))
    }

    fn ensure_dir(&self) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir).map_err(|e| {
            StoreError::Io(format!(
                "cannot create evidence directory '{}': {e}",
                self.dir.display()
            ))
        })
    }

    /// Writes `data` to a synced temporary file in the store directory.
    fn stage(&self, name: &str, data: &[u8]) -> Result<NamedTempFile, StoreError> {
        self.ensure_dir()?;
        let mut tmp = NamedTempFile::new_in(&self.dir)
            .map_err(|e| StoreError::Io(format!("creating temp file for {name}: {e}")))?;
        tmp.write_all(data)
            .map_err(|e| StoreError::Io(format!("writing {name}: {e}")))?;
        tmp.as_file()
            .sync_all()
            .map_err(|e| StoreError::Io(format!("syncing {name}: {e}")))?;
        Ok(tmp)
    }

    /// Best-effort fsync of the directory so the rename itself is durable.
    fn sync_dir(&self) {
        if !cfg!(unix) {
            return;
        }
        if let Err(e) = File::open(&self.dir).and_then(|d| d.sync_all()) {
            debug!(dir = %self.dir.display(), error = %e, "directory sync failed");
        }
    }
}

impl EvidenceStore for FsEvidenceStore {
    fn read(&self, name: &str) -> Result<Vec<u8>, StoreError> {
        let path = self.path_of(name)?;
        fs::read(&path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => StoreError::NotFound(name.to_string()),
            _ => StoreError::Io(format!("reading '{}': {e}", path.display())),
        })
    }

    fn write_atomic(&self, name: &str, data: &[u8]) -> Result<(), StoreError> {
        let path = self.path_of(name)?;
        let tmp = self.stage(name, data)?;
        tmp.persist(&path)
            .map_err(|e| StoreError::Io(format!("replacing '{}': {}", path.display(), e.error)))?;
        self.sync_dir();
        debug!(path = %path.display(), bytes = data.len(), "artifact replaced");
        Ok(())
    }

    fn write_new(&self, name: &str, data: &[u8]) -> Result<(), StoreError> {
        let path = self.path_of(name)?;
        let tmp = self.stage(name, data)?;
        tmp.persist_noclobber(&path).map_err(|e| match e.error.kind() {
            io::ErrorKind::AlreadyExists => StoreError::AlreadyExists(name.to_string()),
            _ => StoreError::Io(format!("creating '{}': {}", path.display(), e.error)),
        })?;
        self.sync_dir();
        debug!(path = %path.display(), bytes = data.len(), "artifact created");
        Ok(())
    }

    fn exists(&self, name: &str) -> Result<bool, StoreError> {
        let path = self.path_of(name)?;
        match fs::metadata(&path) {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StoreError::Io(format!(
                "inspecting '{}': {e}",
                path.display()
            ))),
        }
    }

    fn list(&self) -> Result<Vec<String>, StoreError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(StoreError::Io(format!(
                    "listing '{}': {e}",
                    self.dir.display()
                )))
            }
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::Io(format!("listing entry: {e}")))?;
            if !entry.file_type().is_ok_and(|ft| ft.is_file()) {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if validate_name(name).is_ok() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    fn lock(&self) -> Result<StoreLock, StoreError> {
        self.ensure_dir()?;
        let path = self.dir.join(LOCK_FILE_NAME);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| StoreError::Lock(format!("opening '{}': {e}", path.display())))?;
        FileExt::lock_exclusive(&file).map_err(|e| {
            StoreError::Lock(format!("acquiring exclusive lock '{}': {e}", path.display()))
        })?;
        debug!(path = %path.display(), "evidence store locked");
        Ok(StoreLock {
            held: Held::File(file),
        })
    }
}

// ---------------------------------------------------------------------------
// MemoryEvidenceStore
// ---------------------------------------------------------------------------

/// In-memory evidence store for tests.
///
/// Not durable. `lock` serialises writers sharing this store instance.
#[derive(Debug, Default)]
pub struct MemoryEvidenceStore {
    artifacts: Mutex<BTreeMap<String, Vec<u8>>>,
    fail_writes: AtomicBool,
    writer: Arc<WriterGate>,
}

impl MemoryEvidenceStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent write fail with [`StoreError::Io`].
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Deletes an artifact, returning whether it existed.
    pub fn remove(&self, name: &str) -> bool {
        self.artifacts().remove(name).is_some()
    }

    fn artifacts(&self) -> MutexGuard<'_, BTreeMap<String, Vec<u8>>> {
        // A poisoned map is still structurally valid.
        self.artifacts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_writable(&self, name: &str) -> Result<(), StoreError> {
        validate_name(name)?;
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Io(format!("simulated write failure for {name}")));
        }
        Ok(())
    }
}

impl EvidenceStore for MemoryEvidenceStore {
    fn read(&self, name: &str) -> Result<Vec<u8>, StoreError> {
        validate_name(name)?;
        self.artifacts()
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(name.to_string()))
    }

    fn write_atomic(&self, name: &str, data: &[u8]) -> Result<(), StoreError> {
        self.check_writable(name)?;
        self.artifacts().insert(name.to_string(), data.to_vec());
        Ok(())
    }

    fn write_new(&self, name: &str, data: &[u8]) -> Result<(), StoreError> {
        self.check_writable(name)?;
        let mut artifacts = self.artifacts();
        if artifacts.contains_key(name) {
            return Err(StoreError::AlreadyExists(name.to_string()));
        }
        artifacts.insert(name.to_string(), data.to_vec());
        Ok(())
    }

    fn exists(&self, name: &str) -> Result<bool, StoreError> {
        validate_name(name)?;
        Ok(self.artifacts().contains_key(name))
    }

    fn list(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.artifacts().keys().cloned().collect())
    }

    fn lock(&self) -> Result<StoreLock, StoreError> {
        Ok(self.writer.acquire())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
