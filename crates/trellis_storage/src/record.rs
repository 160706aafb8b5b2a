//! Append-only file of variable-length records.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

/// Size of the length prefix in front of every record.
pub const RECORD_HEADER_SIZE: usize = 4;

/// Encodes one record as it is laid out on disk.
///
/// ```text
/// | length (4, LE) | bytes (length) |
/// ```
///
/// # Errors
///
/// Returns [`StorageError::RecordTooLarge`] if the record does not fit the
/// 4-byte length prefix.
pub fn encode_record(bytes: &[u8]) -> StorageResult<Vec<u8>> {
    let len = u32::try_from(bytes.len())
        .map_err(|_| StorageError::RecordTooLarge { len: bytes.len() })?;
    let mut buf = Vec::with_capacity(RECORD_HEADER_SIZE + bytes.len());
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(bytes);
    Ok(buf)
}

/// An append-only record store.
///
/// Records are addressed by the absolute offset of their length prefix.
/// Offsets are stable: a record, once written, is never moved, so an
/// offset handed to a caller stays valid for the life of the file.
pub struct RecordFile {
    backend: RwLock<Box<dyn StorageBackend>>,
    closed: AtomicBool,
}

impl RecordFile {
    /// Creates a record file over a byte channel.
    pub fn new(backend: Box<dyn StorageBackend>) -> Self {
        Self {
            backend: RwLock::new(backend),
            closed: AtomicBool::new(false),
        }
    }

    /// Appends one record and returns its offset.
    pub fn write(&self, bytes: &[u8]) -> StorageResult<u64> {
        let encoded = encode_record(bytes)?;
        self.append_encoded(&encoded)
    }

    /// Appends bytes that are already a sequence of encoded records.
    ///
    /// Returns the offset of the first byte written.
    pub fn append_encoded(&self, encoded: &[u8]) -> StorageResult<u64> {
        self.ensure_open()?;
        self.backend.write().append(encoded)
    }

    /// Reads the record starting at `offset`.
    pub fn read(&self, offset: u64) -> StorageResult<Vec<u8>> {
        self.ensure_open()?;
        let backend = self.backend.read();
        let header = backend.read_at(offset, RECORD_HEADER_SIZE)?;
        let len = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
        let body_offset = offset + RECORD_HEADER_SIZE as u64;
        let size = backend.size()?;
        if body_offset + len as u64 > size {
            return Err(StorageError::Corrupted(format!(
                "record at offset {offset} claims {len} bytes but file ends at {size}"
            )));
        }
        backend.read_at(body_offset, len)
    }

    /// Returns the length of the file in bytes (the offset of the next record).
    pub fn length(&self) -> StorageResult<u64> {
        self.ensure_open()?;
        self.backend.read().size()
    }

    /// Discards everything from `length` onwards.
    pub fn truncate(&self, length: u64) -> StorageResult<()> {
        self.ensure_open()?;
        self.backend.write().truncate(length)
    }

    /// Forces written records to durable storage.
    pub fn sync(&self) -> StorageResult<()> {
        self.ensure_open()?;
        self.backend.write().sync()
    }

    /// Syncs and closes the file. Later calls fail with [`StorageError::Closed`].
    pub fn close(&self) -> StorageResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.backend.write().sync()
    }

    /// Returns the label of the underlying channel.
    pub fn label(&self) -> String {
        self.backend.read().label()
    }

    fn ensure_open(&self) -> StorageResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(StorageError::Closed)
        } else {
            Ok(())
        }
    }
}

impl std::fmt::Debug for RecordFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordFile")
            .field("label", &self.label())
            .finish_non_exhaustive()
    }
}
