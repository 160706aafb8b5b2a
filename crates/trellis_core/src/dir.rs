//! Store directory management.
//!
//! ```text
//! <store>/
//! ├─ LOCK            # Advisory lock for single-process access
//! ├─ journal.jrnl    # Write-ahead journal
//! └─ <name>.dat      # One file per component
//! ```
//!
//! The LOCK file ensures only one process opens the store at a time; the
//! journal is only safe to replay by the process that owns it.

use crate::error::{CoreError, CoreResult};
use crate::journal::Journal;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use trellis_storage::FileBackend;

const LOCK_FILE: &str = "LOCK";
const JOURNAL_FILE: &str = "journal.jrnl";
const COMPONENT_EXT: &str = "dat";

/// An opened store directory, holding its lock until dropped.
///
/// # Example
///
/// ```rust
/// use trellis_core::StoreDir;
///
/// let tmp = tempfile::tempdir().unwrap();
/// let dir = StoreDir::open(tmp.path(), true).unwrap();
/// assert!(dir.journal_path().ends_with("journal.jrnl"));
/// ```
#[derive(Debug)]
pub struct StoreDir {
    path: PathBuf,
    _lock_file: File,
}

impl StoreDir {
    /// Opens or creates a store directory and takes its lock.
    ///
    /// # Errors
    ///
    /// Returns `StoreLocked` if another process holds the lock, or
    /// `InvalidArgument` if the directory is missing (and may not be
    /// created) or is not a directory.
    pub fn open(path: &Path, create_if_missing: bool) -> CoreResult<Self> {
        if !path.exists() {
            if create_if_missing {
                fs::create_dir_all(path)?;
            } else {
                return Err(CoreError::invalid_argument(format!(
                    "store directory does not exist: {}",
                    path.display()
                )));
            }
        }
        if !path.is_dir() {
            return Err(CoreError::invalid_argument(format!(
                "path is not a directory: {}",
                path.display()
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(CoreError::StoreLocked);
        }

        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// Returns the store directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the journal file path.
    #[must_use]
    pub fn journal_path(&self) -> PathBuf {
        journal_path(&self.path)
    }

    /// Returns the file path for the component named `name`.
    #[must_use]
    pub fn component_path(&self, name: &str) -> PathBuf {
        self.path.join(format!("{name}.{COMPONENT_EXT}"))
    }

    /// Opens the journal file.
    pub fn open_journal(&self, sync_on_commit: bool) -> CoreResult<Journal> {
        let backend = FileBackend::open(&self.journal_path())?;
        Ok(Journal::new(Box::new(backend), sync_on_commit))
    }

    /// Opens the file of the component named `name`.
    pub fn open_backend(&self, name: &str) -> CoreResult<FileBackend> {
        if name.is_empty() || name.contains(['/', '\\']) {
            return Err(CoreError::invalid_argument(format!(
                "bad component file name: {name:?}"
            )));
        }
        Ok(FileBackend::open(&self.component_path(name))?)
    }
}

/// Returns where the journal of the store at `dir` lives, without locking it.
///
/// Offline tools use this to inspect a journal.
#[must_use]
pub fn journal_path(dir: &Path) -> PathBuf {
    dir.join(JOURNAL_FILE)
}
