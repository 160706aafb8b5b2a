//! The transactional component contract.
//!
//! A component is anything that keeps state the coordinator must commit
//! atomically with everything else: the record, slot and blob adapters in
//! this crate, or an index supplied by a client. The coordinator drives
//! every registered component through the same lifecycle:
//!
//! ```text
//! begin -> (reads/writes) -> commit_prepare -> [COMMIT] -> commit_enact -> complete
//!                         \-> abort ------------------------------------> complete
//! ```
//!
//! and, at startup, `start_recovery -> recover* -> finish_recovery` or
//! `clean_start`.

mod group;
mod id;

pub use group::ComponentGroup;
pub use id::{ComponentId, ComponentIdAllocator, TOKEN_LEN};

use crate::error::CoreResult;
use crate::journal::{encode_block, EntryType, JournalEntry};
pub use crate::types::TxnInfo;

/// Redo data a component hands the coordinator at prepare time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedEntry {
    entry_type: EntryType,
    payload: Vec<u8>,
}

impl PreparedEntry {
    /// Creates an OBJECT entry.
    #[must_use]
    pub fn object(payload: Vec<u8>) -> Self {
        Self {
            entry_type: EntryType::Object,
            payload,
        }
    }

    /// Creates a BLOCK entry.
    #[must_use]
    pub fn block(index: u64, contents: &[u8]) -> Self {
        Self {
            entry_type: EntryType::Block,
            payload: encode_block(index, contents),
        }
    }

    /// Creates a BUFFER entry.
    #[must_use]
    pub fn buffer(payload: Vec<u8>) -> Self {
        Self {
            entry_type: EntryType::Buffer,
            payload,
        }
    }

    /// Returns the entry type.
    #[must_use]
    pub fn entry_type(&self) -> EntryType {
        self.entry_type
    }

    /// Returns the payload.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
}

/// A participant in coordinated transactions.
///
/// All methods take `&self`; implementations keep per-transaction state
/// behind their own locks, keyed by [`TxnInfo::id`].
///
/// # Failure semantics
///
/// An error from [`commit_prepare`](Self::commit_prepare) aborts the whole
/// transaction and nothing reaches the journal. An error from
/// [`commit_enact`](Self::commit_enact) happens after the COMMIT marker is
/// durable and is fatal: the journal becomes the source of truth and
/// recovery re-applies the change, so [`recover`](Self::recover) must be
/// idempotent.
pub trait TransactionalComponent: Send + Sync {
    /// Returns the id used to route journal entries to this component.
    fn component_id(&self) -> &ComponentId;

    /// Sets up per-transaction state. No I/O.
    fn begin(&self, txn: &TxnInfo) -> CoreResult<()>;

    /// Produces redo entries for the buffered change without touching base
    /// storage. Called only for write transactions.
    fn commit_prepare(&self, txn: &TxnInfo) -> CoreResult<Vec<PreparedEntry>>;

    /// Applies the buffered change to base storage and clears the buffer.
    /// Called only after the COMMIT marker is durable.
    fn commit_enact(&self, txn: &TxnInfo) -> CoreResult<()>;

    /// Discards the buffer. Base storage is untouched.
    fn abort(&self, txn: &TxnInfo) -> CoreResult<()>;

    /// Releases whatever is left of the transaction's state. Called by `end`
    /// for every transaction, after commit or abort.
    fn complete(&self, txn: &TxnInfo);

    /// Called at startup when the journal is empty and no recovery is needed.
    fn clean_start(&self) -> CoreResult<()> {
        Ok(())
    }

    /// Called once before the first [`recover`](Self::recover) of a replay.
    fn start_recovery(&self) -> CoreResult<()>;

    /// Replays one committed journal entry onto base storage.
    fn recover(&self, entry: &JournalEntry) -> CoreResult<()>;

    /// Syncs base storage and reloads in-memory state after replay.
    fn finish_recovery(&self) -> CoreResult<()>;

    /// Called when the coordinator shuts down.
    fn shutdown(&self) -> CoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prepared_entries_carry_types() {
        assert_eq!(PreparedEntry::object(vec![1]).entry_type(), EntryType::Object);
        assert_eq!(PreparedEntry::buffer(vec![]).entry_type(), EntryType::Buffer);

        let block = PreparedEntry::block(3, b"ab");
        assert_eq!(block.entry_type(), EntryType::Block);
        assert_eq!(&block.payload()[..8], &3u64.to_le_bytes());
        assert_eq!(&block.payload()[8..], b"ab");
    }
}
