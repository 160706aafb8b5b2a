//! Random-access file of fixed-size slots.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;

/// A file divided into slots of `slot_size` bytes.
///
/// Slot `i` lives at byte offset `i * slot_size`. Writing a slot past the
/// end grows the file; any skipped slots read back as zeros.
pub struct SlotFile {
    backend: RwLock<Box<dyn StorageBackend>>,
    slot_size: usize,
}

impl SlotFile {
    /// Creates a slot file over a byte channel.
    ///
    /// # Panics
    ///
    /// Panics if `slot_size` is zero.
    pub fn new(backend: Box<dyn StorageBackend>, slot_size: usize) -> Self {
        assert!(slot_size > 0, "slot size must be non-zero");
        Self {
            backend: RwLock::new(backend),
            slot_size,
        }
    }

    /// Returns the fixed slot size in bytes.
    #[must_use]
    pub fn slot_size(&self) -> usize {
        self.slot_size
    }

    /// Returns the number of whole slots in the file.
    pub fn num_slots(&self) -> StorageResult<u64> {
        Ok(self.backend.read().size()? / self.slot_size as u64)
    }

    /// Reads slot `index`.
    pub fn read_slot(&self, index: u64) -> StorageResult<Vec<u8>> {
        self.backend
            .read()
            .read_at(self.offset_of(index), self.slot_size)
    }

    /// Overwrites (or creates) slot `index`.
    pub fn write_slot(&self, index: u64, bytes: &[u8]) -> StorageResult<()> {
        self.check_size(bytes)?;
        self.backend.write().write_at(self.offset_of(index), bytes)
    }

    /// Checks that `bytes` is exactly one slot long.
    pub fn check_size(&self, bytes: &[u8]) -> StorageResult<()> {
        if bytes.len() != self.slot_size {
            return Err(StorageError::BadSlotSize {
                expected: self.slot_size,
                actual: bytes.len(),
            });
        }
        Ok(())
    }

    /// Shrinks the file to `count` slots.
    pub fn truncate_slots(&self, count: u64) -> StorageResult<()> {
        self.backend.write().truncate(self.offset_of(count))
    }

    /// Forces written slots to durable storage.
    pub fn sync(&self) -> StorageResult<()> {
        self.backend.write().sync()
    }

    /// Returns the label of the underlying channel.
    pub fn label(&self) -> String {
        self.backend.read().label()
    }

    fn offset_of(&self, index: u64) -> u64 {
        index * self.slot_size as u64
    }
}

impl std::fmt::Debug for SlotFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotFile")
            .field("label", &self.label())
            .field("slot_size", &self.slot_size)
            .finish_non_exhaustive()
    }
}
