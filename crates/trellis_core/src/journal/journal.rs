//! Journal writer and reader.

use crate::component::ComponentId;
use crate::error::{CoreError, CoreResult};
use crate::journal::entry::{encode_entry, EntryHandle, EntryType, JournalEntry};
use crate::journal::iterator::JournalIterator;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use trellis_storage::{InMemoryBackend, StorageBackend};
use tracing::debug;

/// The write-ahead journal.
///
/// The journal only grows by appending entries and only shrinks by being
/// truncated, normally to zero once everything in it has been enacted.
pub struct Journal {
    backend: Mutex<Box<dyn StorageBackend>>,
    sync_on_commit: bool,
    closed: AtomicBool,
}

impl Journal {
    /// Creates a journal over a byte channel.
    ///
    /// With `sync_on_commit`, writing a COMMIT marker syncs the channel
    /// before returning.
    pub fn new(backend: Box<dyn StorageBackend>, sync_on_commit: bool) -> Self {
        Self {
            backend: Mutex::new(backend),
            sync_on_commit,
            closed: AtomicBool::new(false),
        }
    }

    /// Creates a journal held purely in memory.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(Box::new(InMemoryBackend::with_label("journal")), true)
    }

    /// Appends one entry and returns where it landed.
    ///
    /// Data entries (`OBJECT`, `BLOCK`, `BUFFER`) need a component; markers
    /// must not have one.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for a malformed entry, or a storage error if
    /// the medium rejects the write.
    pub fn write(
        &self,
        entry_type: EntryType,
        component: Option<&ComponentId>,
        payload: &[u8],
    ) -> CoreResult<EntryHandle> {
        let data = encode_entry(entry_type, component, payload)?;
        self.append(&data)
    }

    /// Appends an already-built entry.
    pub fn write_entry(&self, entry: &JournalEntry) -> CoreResult<EntryHandle> {
        let data = entry.encode()?;
        self.append(&data)
    }

    /// Appends a COMMIT, ABORT or CHECKPOINT marker.
    ///
    /// A COMMIT marker is synced before this returns (unless the journal was
    /// built without `sync_on_commit`). Once it returns, the transaction in
    /// front of it has happened.
    pub fn write_marker(&self, marker: EntryType) -> CoreResult<EntryHandle> {
        let data = encode_entry(marker, None, &[])?;
        self.ensure_open()?;
        let mut backend = self.backend.lock();
        let start = backend.append(&data)?;
        if marker == EntryType::Commit && self.sync_on_commit {
            backend.sync()?;
        } else {
            backend.flush()?;
        }
        Ok(EntryHandle {
            start,
            end: start + data.len() as u64,
        })
    }

    fn append(&self, data: &[u8]) -> CoreResult<EntryHandle> {
        self.ensure_open()?;
        let start = self.backend.lock().append(data)?;
        Ok(EntryHandle {
            start,
            end: start + data.len() as u64,
        })
    }

    /// Returns a streaming iterator over entries starting at `from`.
    ///
    /// The iterator holds the journal lock; drop it before writing.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be accessed.
    pub fn entries(&self, from: u64) -> CoreResult<JournalIterator<'_>> {
        JournalIterator::new(self.backend.lock(), from)
    }

    /// Reads every decodable entry.
    ///
    /// For large journals, prefer [`entries`](Self::entries).
    pub fn read_all(&self) -> CoreResult<Vec<(u64, JournalEntry)>> {
        self.entries(0)?.collect()
    }

    /// Searches the raw bytes from `from` onwards for an encoded COMMIT
    /// marker and returns the end offset of the last one found.
    ///
    /// Recovery uses this when a decode failure leaves part of the journal
    /// unread, so a COMMIT behind the failure is never mistaken for absent.
    pub(crate) fn last_commit_marker_end(&self, from: u64) -> CoreResult<Option<u64>> {
        let marker = encode_entry(EntryType::Commit, None, &[])?;
        let backend = self.backend.lock();
        let size = backend.size()?;
        if from >= size {
            return Ok(None);
        }
        let len = usize::try_from(size - from).map_err(|_| {
            CoreError::invalid_argument(format!(
                "journal tail of {} bytes is not addressable",
                size - from
            ))
        })?;
        let bytes = backend.read_at(from, len)?;
        Ok(bytes
            .windows(marker.len())
            .rposition(|window| window == marker.as_slice())
            .map(|at| from + (at + marker.len()) as u64))
    }

    /// Returns the write cursor (the offset the next entry will get).
    pub fn position(&self) -> CoreResult<u64> {
        self.size()
    }

    /// Returns the journal length in bytes.
    pub fn size(&self) -> CoreResult<u64> {
        Ok(self.backend.lock().size()?)
    }

    /// Returns true for the canonical clean state.
    pub fn is_empty(&self) -> CoreResult<bool> {
        Ok(self.size()? == 0)
    }

    /// Discards everything from `offset` onwards.
    pub fn truncate(&self, offset: u64) -> CoreResult<()> {
        self.ensure_open()?;
        self.backend.lock().truncate(offset)?;
        Ok(())
    }

    /// Empties the journal and syncs.
    ///
    /// Only call this once every entry has been enacted onto base storage.
    pub fn reset(&self) -> CoreResult<()> {
        self.ensure_open()?;
        let mut backend = self.backend.lock();
        backend.truncate(0)?;
        backend.sync()?;
        debug!(journal = %backend.label(), "journal reset");
        Ok(())
    }

    /// Forces written bytes to durable storage.
    pub fn sync(&self) -> CoreResult<()> {
        self.ensure_open()?;
        self.backend.lock().sync()?;
        Ok(())
    }

    /// Syncs and closes the journal. Idempotent.
    pub fn close(&self) -> CoreResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.backend.lock().sync()?;
        Ok(())
    }

    /// Returns true once [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Returns the label of the underlying channel.
    #[must_use]
    pub fn label(&self) -> String {
        self.backend.lock().label()
    }

    fn ensure_open(&self) -> CoreResult<()> {
        if self.is_closed() {
            Err(CoreError::Storage(trellis_storage::StorageError::Closed))
        } else {
            Ok(())
        }
    }
}

impl std::fmt::Debug for Journal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Journal")
            .field("sync_on_commit", &self.sync_on_commit)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::TOKEN_LEN;
    use tempfile::tempdir;
    use trellis_storage::FileBackend;

    fn cid() -> ComponentId {
        ComponentId::new("c", [1; TOKEN_LEN])
    }

    #[test]
    fn new_journal_is_empty() {
        let journal = Journal::in_memory();
        assert!(journal.is_empty().unwrap());
        assert_eq!(journal.position().unwrap(), 0);
        assert_eq!(journal.label(), "journal");
    }

    #[test]
    fn handles_are_contiguous() {
        let journal = Journal::in_memory();
        let a = journal.write(EntryType::Object, Some(&cid()), b"xyz").unwrap();
        let b = journal.write_marker(EntryType::Commit).unwrap();

        assert_eq!(a.start, 0);
        assert_eq!(a.end, b.start);
        assert_eq!(b.end, journal.size().unwrap());
        assert_eq!(b.len(), 10);
    }

    #[test]
    fn rejects_malformed_writes() {
        let journal = Journal::in_memory();
        assert!(journal.write(EntryType::Object, None, b"x").is_err());
        assert!(journal.write(EntryType::Commit, Some(&cid()), b"").is_err());
        assert!(journal.write_marker(EntryType::Buffer).is_err());
        assert!(journal.is_empty().unwrap());
    }

    #[test]
    fn reset_discards_everything() {
        let journal = Journal::in_memory();
        journal.write(EntryType::Buffer, Some(&cid()), b"x").unwrap();
        journal.write_marker(EntryType::Commit).unwrap();

        journal.reset().unwrap();
        assert!(journal.is_empty().unwrap());
        assert!(journal.read_all().unwrap().is_empty());
    }

    #[test]
    fn truncate_to_handle() {
        let journal = Journal::in_memory();
        journal.write(EntryType::Buffer, Some(&cid()), b"keep").unwrap();
        let dropped = journal.write(EntryType::Buffer, Some(&cid()), b"drop").unwrap();

        journal.truncate(dropped.start).unwrap();
        let entries = journal.read_all().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].1.payload(), b"keep");
    }

    #[test]
    fn closed_journal_rejects_writes() {
        let journal = Journal::in_memory();
        journal.close().unwrap();
        journal.close().unwrap();
        assert!(journal.write_marker(EntryType::Commit).is_err());
    }

    #[test]
    fn file_journal_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("journal.jrnl");

        {
            let journal = Journal::new(Box::new(FileBackend::open(&path).unwrap()), true);
            journal.write(EntryType::Object, Some(&cid()), b"durable").unwrap();
            journal.write_marker(EntryType::Commit).unwrap();
        }

        let journal = Journal::new(Box::new(FileBackend::open(&path).unwrap()), true);
        let entries = journal.read_all().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].1.payload(), b"durable");
        assert_eq!(entries[0].1.component(), Some(&cid()));
    }

    #[test]
    fn finds_last_commit_marker_in_raw_bytes() {
        let journal = Journal::in_memory();
        journal.write(EntryType::Buffer, Some(&cid()), b"a").unwrap();
        let first = journal.write_marker(EntryType::Commit).unwrap();
        journal.write(EntryType::Buffer, Some(&cid()), b"b").unwrap();
        let last = journal.write_marker(EntryType::Commit).unwrap();

        assert_eq!(journal.last_commit_marker_end(0).unwrap(), Some(last.end));
        assert_eq!(journal.last_commit_marker_end(last.start + 1).unwrap(), None);
        assert_eq!(journal.last_commit_marker_end(first.end).unwrap(), Some(last.end));
        assert_eq!(journal.last_commit_marker_end(last.end).unwrap(), None);
    }
}
