//! Transactional single-value blob.

use super::{missing_view, unexpected_entry};
use crate::component::{ComponentId, PreparedEntry, TransactionalComponent, TxnInfo};
use crate::error::{CoreError, CoreResult};
use crate::journal::{EntryType, JournalEntry};
use crate::transaction::Transaction;
use crate::types::TxnId;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use trellis_storage::{StorageBackend, StorageError};

/// Size of the length prefix in front of the stored value.
const LEN_SIZE: usize = 4;

struct BlobView {
    snapshot: Arc<Vec<u8>>,
    pending: Option<Vec<u8>>,
}

/// One byte-string value that changes only by committed transactions.
///
/// On disk the value is stored as `[len:u32 LE][bytes]` at offset 0. The
/// committed value is also kept in memory, so reads never touch storage.
pub struct TransBlob {
    id: ComponentId,
    backend: Mutex<Box<dyn StorageBackend>>,
    committed: RwLock<Arc<Vec<u8>>>,
    views: Mutex<HashMap<TxnId, BlobView>>,
}

impl TransBlob {
    /// Wraps a byte channel, loading the value it holds.
    ///
    /// An empty channel holds the empty value.
    pub fn new(id: ComponentId, backend: Box<dyn StorageBackend>) -> CoreResult<Self> {
        let value = load(&*backend)?;
        Ok(Self {
            id,
            backend: Mutex::new(backend),
            committed: RwLock::new(Arc::new(value)),
            views: Mutex::new(HashMap::new()),
        })
    }

    /// Replaces the value within `txn`.
    pub fn set(&self, txn: &Transaction<'_>, value: &[u8]) -> CoreResult<()> {
        txn.write_with(|| {
            if u32::try_from(value.len()).is_err() {
                return Err(StorageError::RecordTooLarge { len: value.len() }.into());
            }
            let mut views = self.views.lock();
            let view = views
                .get_mut(&txn.id())
                .ok_or_else(|| missing_view(&self.id, txn.id()))?;
            view.pending = Some(value.to_vec());
            Ok(())
        })
    }

    /// Returns the value as `txn` sees it.
    pub fn get(&self, txn: &Transaction<'_>) -> CoreResult<Vec<u8>> {
        txn.ensure_readable()?;
        let views = self.views.lock();
        let view = views
            .get(&txn.id())
            .ok_or_else(|| missing_view(&self.id, txn.id()))?;
        Ok(match &view.pending {
            Some(value) => value.clone(),
            None => view.snapshot.as_ref().clone(),
        })
    }

    /// Returns the committed value.
    #[must_use]
    pub fn get_committed(&self) -> Vec<u8> {
        self.committed.read().as_ref().clone()
    }

    fn store(&self, value: &[u8]) -> CoreResult<()> {
        let len = u32::try_from(value.len())
            .map_err(|_| StorageError::RecordTooLarge { len: value.len() })?;
        let mut encoded = Vec::with_capacity(LEN_SIZE + value.len());
        encoded.extend_from_slice(&len.to_le_bytes());
        encoded.extend_from_slice(value);

        let mut backend = self.backend.lock();
        backend.write_at(0, &encoded)?;
        if backend.size()? > encoded.len() as u64 {
            backend.truncate(encoded.len() as u64)?;
        }
        backend.sync()?;
        Ok(())
    }

    fn reload(&self) -> CoreResult<()> {
        let value = load(&**self.backend.lock())?;
        *self.committed.write() = Arc::new(value);
        Ok(())
    }
}

fn load(backend: &dyn StorageBackend) -> CoreResult<Vec<u8>> {
    let size = backend.size()?;
    if size == 0 {
        return Ok(Vec::new());
    }
    if size < LEN_SIZE as u64 {
        return Err(StorageError::Corrupted(format!(
            "blob {} is {size} bytes, too short for its length prefix",
            backend.label()
        ))
        .into());
    }
    let header = backend.read_at(0, LEN_SIZE)?;
    let len = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as u64;
    if LEN_SIZE as u64 + len > size {
        return Err(StorageError::Corrupted(format!(
            "blob {} claims {len} bytes but holds {}",
            backend.label(),
            size - LEN_SIZE as u64
        ))
        .into());
    }
    Ok(backend.read_at(LEN_SIZE as u64, len as usize)?)
}

impl TransactionalComponent for TransBlob {
    fn component_id(&self) -> &ComponentId {
        &self.id
    }

    fn begin(&self, txn: &TxnInfo) -> CoreResult<()> {
        let view = BlobView {
            snapshot: Arc::clone(&self.committed.read()),
            pending: None,
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
            .as_ref()
            .map(|value| PreparedEntry::buffer(value.clone()))
            .into_iter()
            .collect())
    }

    fn commit_enact(&self, txn: &TxnInfo) -> CoreResult<()> {
        let mut views = self.views.lock();
        let view = views
            .get_mut(&txn.id())
            .ok_or_else(|| missing_view(&self.id, txn.id()))?;
        let Some(value) = view.pending.take() else {
            return Ok(());
        };
        self.store(&value)?;
        let value = Arc::new(value);
        view.snapshot = Arc::clone(&value);
        *self.committed.write() = value;
        Ok(())
    }

    fn abort(&self, txn: &TxnInfo) -> CoreResult<()> {
        if let Some(view) = self.views.lock().get_mut(&txn.id()) {
            view.pending = None;
        }
        Ok(())
    }

    fn complete(&self, txn: &TxnInfo) {
        self.views.lock().remove(&txn.id());
    }

    fn start_recovery(&self) -> CoreResult<()> {
        Ok(())
    }

    fn recover(&self, entry: &JournalEntry) -> CoreResult<()> {
        if entry.entry_type() != EntryType::Buffer {
            return Err(unexpected_entry(&self.id, entry.entry_type()));
        }
        self.store(entry.payload())
    }

    fn finish_recovery(&self) -> CoreResult<()> {
        self.backend.lock().sync()?;
        self.reload()
    }

    fn shutdown(&self) -> CoreResult<()> {
        self.backend.lock().sync().map_err(CoreError::from)
    }
}

impl std::fmt::Debug for TransBlob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransBlob")
            .field("id", &self.id)
            .field("len", &self.committed.read().len())
            .finish_non_exhaustive()
    }
}
