//! CLI command implementations.

pub mod dump_journal;
pub mod inspect;
pub mod verify;

use clap::ValueEnum;
use std::path::{Path, PathBuf};
use thiserror::Error;
use trellis_core::{journal_path, CoreError, Journal};
use trellis_storage::{FileBackend, StorageError};
use tracing::debug;

/// Result type for CLI commands.
pub type CliResult<T> = Result<T, CliError>;

/// Errors reported by CLI commands.
#[derive(Debug, Error)]
pub enum CliError {
    /// The directory holds no journal.
    #[error("no journal found at {}", .0.display())]
    NoJournal(PathBuf),

    /// The journal would be refused by recovery.
    #[error("verification failed: {0}")]
    VerificationFailed(String),

    /// Core error.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Storage error.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON output failed.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// How results are printed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text.
    Text,
    /// Pretty-printed JSON.
    Json,
}

/// Opens the journal of the store at `dir` without creating it.
///
/// The journal is opened without the store lock; run these tools only while
/// no process has the store open.
pub fn open_journal(dir: &Path) -> CliResult<Journal> {
    let path = journal_path(dir);
    if !path.is_file() {
        return Err(CliError::NoJournal(path));
    }
    let backend = FileBackend::open(&path)?;
    debug!(path = %path.display(), "journal opened");
    Ok(Journal::new(Box::new(backend), false))
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
