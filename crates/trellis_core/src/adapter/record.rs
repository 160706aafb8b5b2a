//! Transactional record file.

use super::{missing_view, unexpected_entry};
use crate::component::{ComponentId, PreparedEntry, TransactionalComponent, TxnInfo};
use crate::error::{CoreError, CoreResult};
use crate::journal::{EntryType, JournalEntry};
use crate::transaction::Transaction;
use crate::types::TxnId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use trellis_storage::{encode_record, RecordFile, StorageError, RECORD_HEADER_SIZE};
use tracing::debug;

/// Length of the offset prefix of an OBJECT payload.
const OFFSET_PREFIX: usize = 8;

struct RecordView {
    /// Base length when the transaction began (or last committed).
    snapshot_len: u64,
    /// Encoded records written by this transaction.
    buffer: Vec<u8>,
}

/// A [`RecordFile`] whose appends commit with the transaction.
///
/// `write` returns the offset the record will have once committed, and the
/// same transaction can read it back through that offset straight away.
pub struct TransRecordFile {
    id: ComponentId,
    file: RecordFile,
    committed_len: AtomicU64,
    views: Mutex<HashMap<TxnId, RecordView>>,
}

impl TransRecordFile {
    /// Wraps a record file.
    pub fn new(id: ComponentId, file: RecordFile) -> CoreResult<Self> {
        let committed_len = file.length()?;
        Ok(Self {
            id,
            file,
            committed_len: AtomicU64::new(committed_len),
            views: Mutex::new(HashMap::new()),
        })
    }

    /// Buffers a record and returns its offset.
    pub fn write(&self, txn: &Transaction<'_>, bytes: &[u8]) -> CoreResult<u64> {
        txn.write_with(|| {
            let encoded = encode_record(bytes)?;
            let mut views = self.views.lock();
            let view = views
                .get_mut(&txn.id())
                .ok_or_else(|| missing_view(&self.id, txn.id()))?;
            let position = view.snapshot_len + view.buffer.len() as u64;
            view.buffer.extend_from_slice(&encoded);
            Ok(position)
        })
    }

    /// Reads the record at `position` as `txn` sees the file.
    ///
    /// # Errors
    ///
    /// Returns `BadPosition` if `position` is past everything `txn` can see.
    pub fn read(&self, txn: &Transaction<'_>, position: u64) -> CoreResult<Vec<u8>> {
        txn.ensure_readable()?;
        let views = self.views.lock();
        let view = views
            .get(&txn.id())
            .ok_or_else(|| missing_view(&self.id, txn.id()))?;
        if position < view.snapshot_len {
            drop(views);
            return Ok(self.file.read(position)?);
        }
        let limit = view.snapshot_len + view.buffer.len() as u64;
        let bad = CoreError::BadPosition { position, limit };
        let Ok(relative) = usize::try_from(position - view.snapshot_len) else {
            return Err(bad);
        };
        decode_buffered(&view.buffer, relative).ok_or(bad)
    }

    /// Reads a committed record outside any transaction.
    pub fn read_committed(&self, position: u64) -> CoreResult<Vec<u8>> {
        let limit = self.committed_length();
        if position >= limit {
            return Err(CoreError::BadPosition { position, limit });
        }
        Ok(self.file.read(position)?)
    }

    /// Length of the committed file.
    #[must_use]
    pub fn committed_length(&self) -> u64 {
        self.committed_len.load(Ordering::SeqCst)
    }

    /// Returns the underlying record file.
    #[must_use]
    pub fn file(&self) -> &RecordFile {
        &self.file
    }

    fn refresh(&self) -> CoreResult<()> {
        self.committed_len.store(self.file.length()?, Ordering::SeqCst);
        Ok(())
    }
}

/// Decodes the record at `offset` of a buffer of encoded records.
fn decode_buffered(buffer: &[u8], offset: usize) -> Option<Vec<u8>> {
    let body = offset.checked_add(RECORD_HEADER_SIZE)?;
    let header = buffer.get(offset..body)?;
    let len = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
    buffer.get(body..body.checked_add(len)?).map(<[u8]>::to_vec)
}

impl TransactionalComponent for TransRecordFile {
    fn component_id(&self) -> &ComponentId {
        &self.id
    }

    fn begin(&self, txn: &TxnInfo) -> CoreResult<()> {
        let view = RecordView {
            snapshot_len: self.committed_length(),
            buffer: Vec::new(),
        };
        self.views.lock().insert(txn.id(), view);
        Ok(())
    }

    fn commit_prepare(&self, txn: &TxnInfo) -> CoreResult<Vec<PreparedEntry>> {
        let views = self.views.lock();
        let view = views
            .get(&txn.id())
            .ok_or_else(|| missing_view(&self.id, txn.id()))?;
        if view.buffer.is_empty() {
            return Ok(Vec::new());
        }
        let base_len = self.file.length()?;
        if base_len != view.snapshot_len {
            return Err(CoreError::Storage(StorageError::Corrupted(format!(
                "{} changed outside a transaction: length {base_len}, expected {}",
                self.id, view.snapshot_len
            ))));
        }
        let mut payload = Vec::with_capacity(OFFSET_PREFIX + view.buffer.len());
        payload.extend_from_slice(&view.snapshot_len.to_le_bytes());
        payload.extend_from_slice(&view.buffer);
        Ok(vec![PreparedEntry::object(payload)])
    }

    fn commit_enact(&self, txn: &TxnInfo) -> CoreResult<()> {
        let mut views = self.views.lock();
        let view = views
            .get_mut(&txn.id())
            .ok_or_else(|| missing_view(&self.id, txn.id()))?;
        if view.buffer.is_empty() {
            return Ok(());
        }
        let buffer = std::mem::take(&mut view.buffer);
        let offset = self.file.append_encoded(&buffer)?;
        if offset != view.snapshot_len {
            return Err(CoreError::Storage(StorageError::Corrupted(format!(
                "{} appended at {offset}, promised {}",
                self.id, view.snapshot_len
            ))));
        }
        self.file.sync()?;
        let new_len = offset + buffer.len() as u64;
        view.snapshot_len = new_len;
        self.committed_len.store(new_len, Ordering::SeqCst);
        Ok(())
    }

    fn abort(&self, txn: &TxnInfo) -> CoreResult<()> {
        if let Some(view) = self.views.lock().get_mut(&txn.id()) {
            view.buffer.clear();
        }
        Ok(())
    }

    fn complete(&self, txn: &TxnInfo) {
        self.views.lock().remove(&txn.id());
    }

    fn clean_start(&self) -> CoreResult<()> {
        self.refresh()
    }

    fn start_recovery(&self) -> CoreResult<()> {
        Ok(())
    }

    fn recover(&self, entry: &JournalEntry) -> CoreResult<()> {
        if entry.entry_type() != EntryType::Object {
            return Err(unexpected_entry(&self.id, entry.entry_type()));
        }
        let payload = entry.payload();
        if payload.len() < OFFSET_PREFIX {
            return Err(CoreError::invalid_argument(format!(
                "{}: OBJECT payload of {} bytes has no offset",
                self.id,
                payload.len()
            )));
        }
        let (prefix, records) = payload.split_at(OFFSET_PREFIX);
        let mut raw = [0u8; OFFSET_PREFIX];
        raw.copy_from_slice(prefix);
        let offset = u64::from_le_bytes(raw);

        let base_len = self.file.length()?;
        if base_len < offset {
            return Err(CoreError::Storage(StorageError::Corrupted(format!(
                "{} ends at {base_len} but the journal appends at {offset}",
                self.id
            ))));
        }
        if base_len > offset {
            debug!(component = %self.id, from = base_len, to = offset, "cutting back partly enacted records");
            self.file.truncate(offset)?;
        }
        self.file.append_encoded(records)?;
        Ok(())
    }

    fn finish_recovery(&self) -> CoreResult<()> {
        self.file.sync()?;
        self.refresh()
    }

    fn shutdown(&self) -> CoreResult<()> {
        Ok(self.file.sync()?)
    }
}

impl std::fmt::Debug for TransRecordFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransRecordFile")
            .field("id", &self.id)
            .field("committed_len", &self.committed_length())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::ComponentIdAllocator;
    use crate::types::{TxnMode, TxnState};
    use crate::TransactionCoordinator;
    use std::sync::Arc;
    use trellis_storage::InMemoryBackend;

    fn setup() -> (TransactionCoordinator, Arc<TransRecordFile>, InMemoryBackend) {
        let coordinator = TransactionCoordinator::in_memory();
        let backend = InMemoryBackend::with_label("records");
        let file = RecordFile::new(Box::new(backend.clone()));
        let records = Arc::new(
            TransRecordFile::new(coordinator.alloc_component_id("records"), file).unwrap(),
        );
        coordinator
            .add(Arc::clone(&records) as Arc<dyn TransactionalComponent>)
            .unwrap();
        coordinator.start().unwrap();
        (coordinator, records, backend)
    }

    #[test]
    fn read_your_writes_before_commit() {
        let (coordinator, records, backend) = setup();
        let txn = coordinator.begin(TxnMode::Write).unwrap();
        let pos = records.write(&txn, b"hello").unwrap();
        assert_eq!(records.read(&txn, pos).unwrap(), b"hello");
        assert!(backend.data().is_empty());
    }

    #[test]
    fn empty_and_small_records_have_distinct_offsets() {
        let (coordinator, records, _) = setup();
        let mut txn = coordinator.begin(TxnMode::Write).unwrap();
        let empty = records.write(&txn, b"").unwrap();
        let dollar = records.write(&txn, b"$").unwrap();
        assert_ne!(empty, dollar);
        coordinator.commit(&mut txn).unwrap();
        drop(txn);

        assert_eq!(records.read_committed(empty).unwrap(), b"");
        assert_eq!(records.read_committed(dollar).unwrap(), b"$");
        coordinator
            .execute_read(|txn| {
                assert_eq!(records.read(txn, empty)?, b"");
                assert_eq!(records.read(txn, dollar)?, b"$");
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn provisional_positions_follow_committed_data() {
        let (coordinator, records, _) = setup();
        let first = coordinator
            .execute_write(|txn| records.write(txn, b"first"))
            .unwrap();
        assert_eq!(first, 0);

        let txn = coordinator.begin(TxnMode::Write).unwrap();
        let second = records.write(&txn, b"second").unwrap();
        assert_eq!(second, records.committed_length());
        assert_eq!(records.read(&txn, first).unwrap(), b"first");
        assert_eq!(records.read(&txn, second).unwrap(), b"second");
    }

    #[test]
    fn position_past_buffer_is_bad() {
        let (coordinator, records, _) = setup();
        let txn = coordinator.begin(TxnMode::Write).unwrap();
        let pos = records.write(&txn, b"abc").unwrap();
        let err = records.read(&txn, pos + 100).unwrap_err();
        assert!(matches!(err, CoreError::BadPosition { limit: 7, .. }));
        assert!(matches!(
            records.read_committed(0),
            Err(CoreError::BadPosition { limit: 0, .. })
        ));
    }

    #[test]
    fn far_position_is_bad_not_wrapped() {
        let (coordinator, records, _) = setup();
        let txn = coordinator.begin(TxnMode::Write).unwrap();
        records.write(&txn, b"abc").unwrap();
        for position in [u64::MAX, u64::MAX - 6, 1 << 40] {
            let err = records.read(&txn, position).unwrap_err();
            assert!(matches!(err, CoreError::BadPosition { limit: 7, .. }));
        }
        assert!(txn.is_active());
    }

    #[test]
    fn reader_does_not_see_uncommitted_or_later_records() {
        let (coordinator, records, _) = setup();
        let reader = coordinator.begin(TxnMode::Read).unwrap();
        let mut writer = coordinator.begin(TxnMode::Write).unwrap();
        let pos = records.write(&writer, b"later").unwrap();
        assert!(records.read(&reader, pos).is_err());

        coordinator.commit(&mut writer).unwrap();
        assert!(records.read(&reader, pos).is_err());
        assert_eq!(records.read(&writer, pos).unwrap(), b"later");
    }

    #[test]
    fn read_transaction_cannot_write() {
        let (coordinator, records, _) = setup();
        let txn = coordinator.begin(TxnMode::Read).unwrap();
        assert!(matches!(
            records.write(&txn, b"x"),
            Err(CoreError::Usage { .. })
        ));
        assert_eq!(txn.state(), TxnState::Aborted);
    }

    #[test]
    fn abort_leaves_base_untouched() {
        let (coordinator, records, backend) = setup();
        let mut txn = coordinator.begin(TxnMode::Write).unwrap();
        records.write(&txn, b"gone").unwrap();
        coordinator.abort(&mut txn).unwrap();
        drop(txn);
        assert!(backend.data().is_empty());
        assert!(coordinator.journal().is_empty().unwrap());
        assert_eq!(records.committed_length(), 0);
    }

    #[test]
    fn recovery_appends_at_recorded_offset() {
        let alloc = ComponentIdAllocator::local();
        let id = alloc.alloc_local("records");
        let records =
            TransRecordFile::new(id.clone(), RecordFile::new(Box::new(InMemoryBackend::new())))
                .unwrap();

        let mut payload = 0u64.to_le_bytes().to_vec();
        payload.extend(encode_record(b"replayed").unwrap());
        let entry = JournalEntry::object(id, payload);

        records.start_recovery().unwrap();
        records.recover(&entry).unwrap();
        // replaying again cuts back and re-appends
        records.recover(&entry).unwrap();
        records.finish_recovery().unwrap();

        assert_eq!(records.read_committed(0).unwrap(), b"replayed");
        assert_eq!(records.committed_length(), 12);
    }

    #[test]
    fn recovery_rejects_gap_before_offset() {
        let id = ComponentIdAllocator::local().alloc_local("records");
        let records =
            TransRecordFile::new(id.clone(), RecordFile::new(Box::new(InMemoryBackend::new())))
                .unwrap();
        let mut payload = 40u64.to_le_bytes().to_vec();
        payload.extend(encode_record(b"x").unwrap());
        assert!(records.recover(&JournalEntry::object(id, payload)).is_err());
    }

    #[test]
    fn decode_buffered_bounds() {
        let mut buf = encode_record(b"ab").unwrap();
        buf.extend(encode_record(b"").unwrap());
        assert_eq!(decode_buffered(&buf, 0), Some(b"ab".to_vec()));
        assert_eq!(decode_buffered(&buf, 6), Some(Vec::new()));
        assert_eq!(decode_buffered(&buf, 10), None);
        assert_eq!(decode_buffered(&buf, 8), None);
    }
}
