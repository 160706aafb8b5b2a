//! Error types for Trellis core.
//!
//! Errors fall into two kinds. Ordinary errors (usage mistakes, I/O failures
//! before the COMMIT marker, bad positions) leave nothing changed on disk and
//! are handed back to the caller. Fatal errors ([`CoreError::is_fatal`]) mean
//! the outcome of a commit is settled by the journal rather than by memory:
//! the coordinator stops accepting work until it is restarted and recovery
//! has run.

use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in Trellis core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] trellis_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The caller broke the transaction protocol.
    #[error("usage error: {message}")]
    Usage {
        /// What was attempted.
        message: String,
    },

    /// A journal entry could not be decoded.
    #[error("journal corruption at offset {offset}: {message}")]
    JournalCorruption {
        /// Offset of the entry that failed to decode.
        offset: u64,
        /// Description of the corruption.
        message: String,
        /// Offset of the following entry, when the entry length was readable.
        resume: Option<u64>,
    },

    /// A journal entry failed its checksum.
    #[error("checksum mismatch at offset {offset}: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Offset of the entry.
        offset: u64,
        /// Stored checksum.
        expected: u32,
        /// Computed checksum.
        actual: u32,
        /// Offset of the following entry.
        next: u64,
    },

    /// A read addressed a position outside the visible region.
    #[error("bad position {position}: visible limit is {limit}")]
    BadPosition {
        /// The requested position.
        position: u64,
        /// The first position past the visible region.
        limit: u64,
    },

    /// The writer slot (or exclusive mode) could not be acquired in time.
    #[error("operation would block")]
    WouldBlock,

    /// A component failed to apply a change after the COMMIT marker was durable.
    #[error("enactment failed in component {component}: {message}")]
    Enactment {
        /// The component that failed.
        component: String,
        /// Description of the failure.
        message: String,
    },

    /// Writing or syncing the COMMIT marker failed; the outcome is unknown
    /// until recovery runs.
    #[error("commit outcome unknown: {message}")]
    CommitOutcomeUnknown {
        /// Description of the failure.
        message: String,
    },

    /// The coordinator stopped after a fatal error.
    #[error("coordinator halted after fatal error: {reason}")]
    Halted {
        /// The fatal error that halted the coordinator.
        reason: String,
    },

    /// Components can only be added or removed before `start()`.
    #[error("configuration is locked once the coordinator has started")]
    ConfigurationLocked,

    /// The coordinator has not been started.
    #[error("coordinator not started")]
    NotStarted,

    /// The coordinator has been shut down.
    #[error("coordinator is shut down")]
    Shutdown,

    /// No registered component has the given id.
    #[error("component not found: {id}")]
    ComponentNotFound {
        /// The id that was looked up.
        id: String,
    },

    /// A component with the same id is already registered.
    #[error("duplicate component: {id}")]
    DuplicateComponent {
        /// The id that was registered twice.
        id: String,
    },

    /// An argument was malformed.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of the problem.
        message: String,
    },

    /// The store directory is locked by another process.
    #[error("store locked: another process has exclusive access")]
    StoreLocked,
}

impl CoreError {
    /// Creates a usage error.
    pub fn usage(message: impl Into<String>) -> Self {
        Self::Usage {
            message: message.into(),
        }
    }

    /// Creates a journal corruption error that a scan cannot step over.
    pub fn journal_corruption(offset: u64, message: impl Into<String>) -> Self {
        Self::JournalCorruption {
            offset,
            message: message.into(),
            resume: None,
        }
    }

    /// Creates a journal corruption error for an entry whose length is known.
    pub fn journal_corruption_at(offset: u64, next: u64, message: impl Into<String>) -> Self {
        Self::JournalCorruption {
            offset,
            message: message.into(),
            resume: Some(next),
        }
    }

    /// Creates an enactment error.
    pub fn enactment(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Enactment {
            component: component.into(),
            message: message.into(),
        }
    }

    /// Creates a commit-outcome-unknown error.
    pub fn commit_outcome_unknown(message: impl Into<String>) -> Self {
        Self::CommitOutcomeUnknown {
            message: message.into(),
        }
    }

    /// Creates an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Returns true for errors after which the coordinator must not serve
    /// further transactions until recovery has run.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Enactment { .. } | Self::CommitOutcomeUnknown { .. } | Self::Halted { .. }
        )
    }

    /// Returns true if this error describes undecodable journal content.
    #[must_use]
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Self::JournalCorruption { .. } | Self::ChecksumMismatch { .. }
        )
    }

    /// For a decode error, the offset at which a journal scan can continue.
    #[must_use]
    pub fn resume_offset(&self) -> Option<u64> {
        match self {
            Self::JournalCorruption { resume, .. } => *resume,
            Self::ChecksumMismatch { next, .. } => Some(*next),
            _ => None,
        }
    }

    /// For a decode error, the offset of the entry that failed.
    #[must_use]
    pub fn corruption_offset(&self) -> Option<u64> {
        match self {
            Self::JournalCorruption { offset, .. } | Self::ChecksumMismatch { offset, .. } => {
                Some(*offset)
            }
            _ => None,
        }
    }
}
