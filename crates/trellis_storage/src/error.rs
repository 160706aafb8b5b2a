//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Attempted to read beyond the end of storage.
    #[error("read beyond end of storage: offset {offset}, len {len}, size {size}")]
    ReadPastEnd {
        /// The requested read offset.
        offset: u64,
        /// The requested read length.
        len: usize,
        /// The current storage size.
        size: u64,
    },

    /// Attempted to truncate to a size larger than the storage.
    #[error("cannot truncate to size {requested} which is greater than current size {size}")]
    TruncateBeyondEnd {
        /// The requested size.
        requested: u64,
        /// The current storage size.
        size: u64,
    },

    /// A slot write did not match the file's slot size.
    #[error("bad slot size: expected {expected} bytes, got {actual}")]
    BadSlotSize {
        /// The slot size of the file.
        expected: usize,
        /// The length supplied by the caller.
        actual: usize,
    },

    /// A record is larger than the on-disk length prefix can express.
    #[error("record too large: {len} bytes")]
    RecordTooLarge {
        /// Length of the rejected record.
        len: usize,
    },

    /// The storage file is corrupted.
    #[error("storage corrupted: {0}")]
    Corrupted(String),

    /// The storage is closed.
    #[error("storage is closed")]
    Closed,
}
