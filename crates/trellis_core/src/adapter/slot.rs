//! Transactional slot file.

use super::{missing_view, unexpected_entry};
use crate::component::{ComponentId, PreparedEntry, TransactionalComponent, TxnInfo};
use crate::error::{CoreError, CoreResult};
use crate::journal::{EntryType, JournalEntry};
use crate::transaction::Transaction;
use crate::types::{DataVersion, TxnId};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use trellis_storage::SlotFile;

struct SlotView {
    version: DataVersion,
    num_slots: u64,
    pending: BTreeMap<u64, Vec<u8>>,
}

impl SlotView {
    /// Slots visible to the transaction, including ones it appended.
    fn visible_slots(&self) -> u64 {
        match self.pending.keys().next_back() {
            Some(&last) => self.num_slots.max(last + 1),
            None => self.num_slots,
        }
    }
}

/// Pre-images of overwritten slots, keyed by the data version they belong to.
type History = BTreeMap<u64, HashMap<u64, Vec<u8>>>;

/// A [`SlotFile`] whose slot writes commit with the transaction.
///
/// Slots are overwritten in place at enactment. A reader that began before
/// an overwrite keeps seeing the old contents: the enacting writer saves the
/// slot's previous bytes, and they are dropped once no reader that old
/// remains.
pub struct TransSlotFile {
    id: ComponentId,
    file: SlotFile,
    committed_slots: AtomicU64,
    views: Mutex<HashMap<TxnId, SlotView>>,
    history: RwLock<History>,
}

impl TransSlotFile {
    /// Wraps a slot file.
    pub fn new(id: ComponentId, file: SlotFile) -> CoreResult<Self> {
        let committed_slots = file.num_slots()?;
        Ok(Self {
            id,
            file,
            committed_slots: AtomicU64::new(committed_slots),
            views: Mutex::new(HashMap::new()),
            history: RwLock::new(BTreeMap::new()),
        })
    }

    /// Fixed slot size in bytes.
    #[must_use]
    pub fn slot_size(&self) -> usize {
        self.file.slot_size()
    }

    /// Buffers a write of slot `index`.
    ///
    /// `index` may name an existing slot or the slot just past the end.
    pub fn write_slot(&self, txn: &Transaction<'_>, index: u64, bytes: &[u8]) -> CoreResult<()> {
        txn.write_with(|| {
            self.file.check_size(bytes)?;
            let mut views = self.views.lock();
            let view = views
                .get_mut(&txn.id())
                .ok_or_else(|| missing_view(&self.id, txn.id()))?;
            let limit = view.visible_slots();
            if index > limit {
                return Err(CoreError::BadPosition {
                    position: index,
                    limit,
                });
            }
            view.pending.insert(index, bytes.to_vec());
            Ok(())
        })
    }

    /// Reads slot `index` as `txn` sees the file.
    pub fn read_slot(&self, txn: &Transaction<'_>, index: u64) -> CoreResult<Vec<u8>> {
        txn.ensure_readable()?;
        let (version, num_slots) = {
            let views = self.views.lock();
            let view = views
                .get(&txn.id())
                .ok_or_else(|| missing_view(&self.id, txn.id()))?;
            if let Some(bytes) = view.pending.get(&index) {
                return Ok(bytes.clone());
            }
            (view.version, view.num_slots)
        };
        if index >= num_slots {
            return Err(CoreError::BadPosition {
                position: index,
                limit: num_slots,
            });
        }
        let history = self.history.read();
        let saved = history
            .range(version.as_u64()..)
            .find_map(|(_, images)| images.get(&index));
        match saved {
            Some(bytes) => Ok(bytes.clone()),
            None => Ok(self.file.read_slot(index)?),
        }
    }

    /// Reads a committed slot outside any transaction.
    pub fn read_slot_committed(&self, index: u64) -> CoreResult<Vec<u8>> {
        let _enacting = self.history.read();
        let limit = self.committed_slots.load(Ordering::SeqCst);
        if index >= limit {
            return Err(CoreError::BadPosition {
                position: index,
                limit,
            });
        }
        Ok(self.file.read_slot(index)?)
    }

    /// Number of slots `txn` sees.
    pub fn num_slots(&self, txn: &Transaction<'_>) -> CoreResult<u64> {
        txn.ensure_readable()?;
        let views = self.views.lock();
        let view = views
            .get(&txn.id())
            .ok_or_else(|| missing_view(&self.id, txn.id()))?;
        Ok(view.visible_slots())
    }

    /// Number of committed slots.
    #[must_use]
    pub fn committed_slots(&self) -> u64 {
        self.committed_slots.load(Ordering::SeqCst)
    }

    /// Number of data versions with saved pre-images.
    #[must_use]
    pub fn retained_versions(&self) -> usize {
        self.history.read().len()
    }

    fn refresh(&self) -> CoreResult<()> {
        self.committed_slots
            .store(self.file.num_slots()?, Ordering::SeqCst);
        Ok(())
    }
}

impl TransactionalComponent for TransSlotFile {
    fn component_id(&self) -> &ComponentId {
        &self.id
    }

    fn begin(&self, txn: &TxnInfo) -> CoreResult<()> {
        let view = SlotView {
            version: txn.data_version(),
            num_slots: self.committed_slots(),
            pending: BTreeMap::new(),
        };
        self.views.lock().insert(txn.id(), view);
        Ok(())
    }

    fn commit_prepare(&self, txn: &TxnInfo) -> CoreResult<Vec<PreparedEntry>> {
        let views = self.views.lock();
        let view = views
            .get(&txn.id())
            .ok_or_else(|| missing_view(&self.id, txn.id()))?;
        Ok(view
            .pending
            .iter()
            .map(|(&index, bytes)| PreparedEntry::block(index, bytes))
            .collect())
    }

    fn commit_enact(&self, txn: &TxnInfo) -> CoreResult<()> {
        let mut views = self.views.lock();
        let others_open = views.len() > 1;
        let view = views
            .get_mut(&txn.id())
            .ok_or_else(|| missing_view(&self.id, txn.id()))?;
        if view.pending.is_empty() {
            return Ok(());
        }
        let pending = std::mem::take(&mut view.pending);
        let version = view.version.as_u64();
        let existing = self.committed_slots();

        {
            let mut history = self.history.write();
            if others_open {
                let images = history.entry(version).or_default();
                for &index in pending.keys().filter(|&&i| i < existing) {
                    if !images.contains_key(&index) {
                        images.insert(index, self.file.read_slot(index)?);
                    }
                }
            }
            for (&index, bytes) in &pending {
                self.file.write_slot(index, bytes)?;
            }
        }
        self.file.sync()?;
        self.refresh()?;
        view.version = view.version.next();
        view.num_slots = self.committed_slots();
        Ok(())
    }

    fn abort(&self, txn: &TxnInfo) -> CoreResult<()> {
        if let Some(view) = self.views.lock().get_mut(&txn.id()) {
            view.pending.clear();
        }
        Ok(())
    }

    fn complete(&self, txn: &TxnInfo) {
        let mut views = self.views.lock();
        views.remove(&txn.id());
        let mut history = self.history.write();
        match views.values().map(|v| v.version.as_u64()).min() {
            Some(oldest) => history.retain(|&version, _| version >= oldest),
            None => history.clear(),
        }
    }

    fn clean_start(&self) -> CoreResult<()> {
        self.refresh()
    }

    fn start_recovery(&self) -> CoreResult<()> {
        Ok(())
    }

    fn recover(&self, entry: &JournalEntry) -> CoreResult<()> {
        if entry.entry_type() != EntryType::Block {
            return Err(unexpected_entry(&self.id, entry.entry_type()));
        }
        let (index, contents) = entry.block_parts()?;
        self.file.write_slot(index, contents)?;
        Ok(())
    }

    fn finish_recovery(&self) -> CoreResult<()> {
        self.file.sync()?;
        self.history.write().clear();
        self.refresh()
    }

    fn shutdown(&self) -> CoreResult<()> {
        Ok(self.file.sync()?)
    }
}

impl std::fmt::Debug for TransSlotFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransSlotFile")
            .field("id", &self.id)
            .field("slot_size", &self.slot_size())
            .field("committed_slots", &self.committed_slots())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{TxnMode, TxnState};
    use crate::TransactionCoordinator;
    use std::sync::Arc;
    use trellis_storage::InMemoryBackend;

    const SIZE: usize = 4;

    fn setup() -> (TransactionCoordinator, Arc<TransSlotFile>) {
        let coordinator = TransactionCoordinator::in_memory();
        let file = SlotFile::new(Box::new(InMemoryBackend::with_label("slots")), SIZE);
        let slots =
            Arc::new(TransSlotFile::new(coordinator.alloc_component_id("slots"), file).unwrap());
        coordinator
            .add(Arc::clone(&slots) as Arc<dyn TransactionalComponent>)
            .unwrap();
        coordinator.start().unwrap();
        (coordinator, slots)
    }

    fn fill(slots: &TransSlotFile, coordinator: &TransactionCoordinator, values: &[[u8; SIZE]]) {
        coordinator
            .execute_write(|txn| {
                for (i, v) in values.iter().enumerate() {
                    slots.write_slot(txn, i as u64, v)?;
                }
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn append_and_overwrite() {
        let (coordinator, slots) = setup();
        fill(&slots, &coordinator, &[[1; SIZE], [2; SIZE]]);
        assert_eq!(slots.committed_slots(), 2);

        coordinator
            .execute_write(|txn| slots.write_slot(txn, 0, &[9; SIZE]))
            .unwrap();
        assert_eq!(slots.read_slot_committed(0).unwrap(), vec![9; SIZE]);
        assert_eq!(slots.read_slot_committed(1).unwrap(), vec![2; SIZE]);
        assert!(coordinator.journal().is_empty().unwrap());
    }

    #[test]
    fn writes_must_be_contiguous_and_sized() {
        let (coordinator, slots) = setup();
        let gap = coordinator.begin(TxnMode::Write).unwrap();
        assert!(matches!(
            slots.write_slot(&gap, 1, &[0; SIZE]),
            Err(CoreError::BadPosition { limit: 0, .. })
        ));
        assert_eq!(gap.state(), TxnState::Aborted);
        drop(gap);

        let short = coordinator.begin(TxnMode::Write).unwrap();
        slots.write_slot(&short, 0, &[1; SIZE]).unwrap();
        assert!(matches!(
            slots.write_slot(&short, 1, &[0; 3]),
            Err(CoreError::Storage(_))
        ));
        assert_eq!(short.state(), TxnState::Aborted);
        assert_eq!(slots.num_slots(&short).unwrap(), 0);
        drop(short);

        let txn = coordinator.begin(TxnMode::Write).unwrap();
        slots.write_slot(&txn, 0, &[0; SIZE]).unwrap();
        slots.write_slot(&txn, 1, &[0; SIZE]).unwrap();
        assert_eq!(slots.num_slots(&txn).unwrap(), 2);
    }

    #[test]
    fn rejected_write_frees_writer_slot() {
        let (coordinator, slots) = setup();
        let txn = coordinator.begin(TxnMode::Write).unwrap();
        assert!(slots.write_slot(&txn, 0, &[0; SIZE + 1]).is_err());
        assert_eq!(txn.state(), TxnState::Aborted);

        let next = coordinator
            .try_begin(TxnMode::Write, std::time::Duration::from_millis(10))
            .unwrap();
        slots.write_slot(&next, 0, &[4; SIZE]).unwrap();
        assert!(matches!(
            slots.write_slot(&txn, 0, &[0; SIZE]),
            Err(CoreError::Usage { .. })
        ));
    }

    #[test]
    fn reader_keeps_snapshot_across_overwrite() {
        let (coordinator, slots) = setup();
        fill(&slots, &coordinator, &[[1; SIZE]]);

        let reader = coordinator.begin(TxnMode::Read).unwrap();
        coordinator
            .execute_write(|txn| {
                slots.write_slot(txn, 0, &[2; SIZE])?;
                slots.write_slot(txn, 1, &[3; SIZE])
            })
            .unwrap();

        assert_eq!(slots.read_slot(&reader, 0).unwrap(), vec![1; SIZE]);
        assert!(slots.read_slot(&reader, 1).is_err());
        assert_eq!(slots.retained_versions(), 1);
        drop(reader);

        assert_eq!(slots.retained_versions(), 0);
        coordinator
            .execute_read(|txn| {
                assert_eq!(slots.read_slot(txn, 0)?, vec![2; SIZE]);
                assert_eq!(slots.read_slot(txn, 1)?, vec![3; SIZE]);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn snapshot_survives_two_overwrites() {
        let (coordinator, slots) = setup();
        fill(&slots, &coordinator, &[[1; SIZE]]);
        let oldest = coordinator.begin(TxnMode::Read).unwrap();
        fill(&slots, &coordinator, &[[2; SIZE]]);
        let middle = coordinator.begin(TxnMode::Read).unwrap();
        fill(&slots, &coordinator, &[[3; SIZE]]);

        assert_eq!(slots.read_slot(&oldest, 0).unwrap(), vec![1; SIZE]);
        assert_eq!(slots.read_slot(&middle, 0).unwrap(), vec![2; SIZE]);
        assert_eq!(slots.read_slot_committed(0).unwrap(), vec![3; SIZE]);

        drop(oldest);
        assert_eq!(slots.retained_versions(), 1);
        assert_eq!(slots.read_slot(&middle, 0).unwrap(), vec![2; SIZE]);
    }

    #[test]
    fn uncommitted_write_is_private() {
        let (coordinator, slots) = setup();
        fill(&slots, &coordinator, &[[1; SIZE]]);
        let writer = coordinator.begin(TxnMode::Write).unwrap();
        slots.write_slot(&writer, 0, &[5; SIZE]).unwrap();
        let reader = coordinator.begin(TxnMode::Read).unwrap();
        assert_eq!(slots.read_slot(&writer, 0).unwrap(), vec![5; SIZE]);
        assert_eq!(slots.read_slot(&reader, 0).unwrap(), vec![1; SIZE]);
    }

    #[test]
    fn recover_writes_blocks() {
        let id = crate::component::ComponentIdAllocator::local().alloc_local("slots");
        let slots = TransSlotFile::new(
            id.clone(),
            SlotFile::new(Box::new(InMemoryBackend::new()), SIZE),
        )
        .unwrap();
        let entry = JournalEntry::block(id.clone(), 0, &[7; SIZE]);
        slots.start_recovery().unwrap();
        slots.recover(&entry).unwrap();
        slots.recover(&entry).unwrap();
        slots.finish_recovery().unwrap();
        assert_eq!(slots.committed_slots(), 1);
        assert_eq!(slots.read_slot_committed(0).unwrap(), vec![7; SIZE]);

        let wrong = JournalEntry::buffer(id, vec![1]);
        assert!(slots.recover(&wrong).is_err());
    }
}
