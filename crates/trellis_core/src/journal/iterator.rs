//! Streaming journal entry iterator.
//!
//! Entries are read one at a time from the locked backend, so replaying a
//! large journal never needs the whole file in memory.

use crate::component::{ComponentId, TOKEN_LEN};
use crate::error::{CoreError, CoreResult};
use crate::journal::entry::{
    compute_crc32, EntryType, JournalEntry, CRC_SIZE, ENTRY_PREFIX_SIZE, PAYLOAD_LEN_SIZE,
};
use parking_lot::MutexGuard;
use trellis_storage::StorageBackend;

/// A forward-only iterator over journal entries.
///
/// Yields `(offset, entry)` pairs. The iterator holds the journal lock for
/// as long as it lives, so nothing can be appended underneath it.
///
/// # Error Handling
///
/// - A short read of the prefix, component id, length, payload or CRC at the
///   end of the journal is a torn write: iteration ends cleanly and
///   [`is_torn`](Self::is_torn) reports it.
/// - A CRC mismatch, or a marker carrying a payload, yields an error that
///   knows where the next entry starts; iteration continues from there.
/// - An unknown type byte, or a component id length that does not fit the
///   type, yields an error. If the entry can still be framed with a
///   plausible component id length, iteration resumes after it; otherwise
///   the entry length is unknown and iteration ends.
pub struct JournalIterator<'a> {
    backend: MutexGuard<'a, Box<dyn StorageBackend>>,
    total_size: u64,
    offset: u64,
    finished: bool,
    torn: bool,
}

impl<'a> JournalIterator<'a> {
    /// Creates an iterator starting at `start_offset`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend size cannot be determined.
    pub fn new(
        backend: MutexGuard<'a, Box<dyn StorageBackend>>,
        start_offset: u64,
    ) -> CoreResult<Self> {
        let total_size = backend.size()?;
        Ok(Self {
            backend,
            total_size,
            offset: start_offset.min(total_size),
            finished: false,
            torn: false,
        })
    }

    /// Offset of the next entry to be read.
    #[must_use]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Total journal size when the iterator was created.
    #[must_use]
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// True once iteration stopped at an incomplete trailing entry.
    #[must_use]
    pub fn is_torn(&self) -> bool {
        self.torn
    }

    fn torn_end(&mut self) -> CoreResult<Option<(u64, JournalEntry)>> {
        self.finished = true;
        self.torn = true;
        Ok(None)
    }

    /// Reports an entry whose type or component id length is wrong.
    ///
    /// One of the two header bytes is still likely intact, so the entry is
    /// framed with each plausible component id length in turn. If a framing
    /// fits inside the journal the scan resumes after it; otherwise the
    /// entry length cannot be located and iteration ends.
    fn bad_header(
        &mut self,
        start: u64,
        expected_cid_len: Option<usize>,
        cid_len: usize,
        message: String,
    ) -> CoreResult<Option<(u64, JournalEntry)>> {
        let declared = (cid_len == 0 || cid_len == TOKEN_LEN).then_some(cid_len);
        for candidate in [expected_cid_len, declared].into_iter().flatten() {
            if let Some(end) = self.framed_end(start, candidate)? {
                self.offset = end;
                return Err(CoreError::journal_corruption_at(start, end, message));
            }
        }
        self.finished = true;
        Err(CoreError::journal_corruption(start, message))
    }

    /// End of the entry at `start` if it carries a `cid_len`-byte component
    /// id, or `None` if that framing runs past the end of the journal.
    fn framed_end(&self, start: u64, cid_len: usize) -> CoreResult<Option<u64>> {
        let len_offset = start + (ENTRY_PREFIX_SIZE + cid_len) as u64;
        if len_offset + PAYLOAD_LEN_SIZE as u64 > self.total_size {
            return Ok(None);
        }
        let len_bytes = self.backend.read_at(len_offset, PAYLOAD_LEN_SIZE)?;
        let payload_len =
            u32::from_le_bytes([len_bytes[0], len_bytes[1], len_bytes[2], len_bytes[3]]) as u64;
        let end = len_offset + (PAYLOAD_LEN_SIZE + CRC_SIZE) as u64 + payload_len;
        Ok((end <= self.total_size).then_some(end))
    }

    fn read_next_entry(&mut self) -> CoreResult<Option<(u64, JournalEntry)>> {
        let start = self.offset;
        let remaining = self.total_size - start;
        if remaining == 0 {
            self.finished = true;
            return Ok(None);
        }
        if remaining < ENTRY_PREFIX_SIZE as u64 {
            return self.torn_end();
        }

        let prefix = self.backend.read_at(start, ENTRY_PREFIX_SIZE)?;
        let type_byte = prefix[0];
        let cid_len = prefix[1] as usize;

        let entry_type = EntryType::from_byte(type_byte);
        let expected_cid_len = entry_type.map(|t| if t.is_marker() { 0 } else { TOKEN_LEN });
        let Some(entry_type) = entry_type.filter(|_| expected_cid_len == Some(cid_len)) else {
            let message = match entry_type {
                Some(t) => format!("{t} entry with component id length {cid_len}"),
                None => format!("unknown entry type {type_byte}"),
            };
            return self.bad_header(start, expected_cid_len, cid_len, message);
        };

        let len_offset = start + (ENTRY_PREFIX_SIZE + cid_len) as u64;
        if len_offset + PAYLOAD_LEN_SIZE as u64 > self.total_size {
            return self.torn_end();
        }
        let len_bytes = self.backend.read_at(len_offset, PAYLOAD_LEN_SIZE)?;
        let payload_len =
            u32::from_le_bytes([len_bytes[0], len_bytes[1], len_bytes[2], len_bytes[3]]) as u64;

        let payload_offset = len_offset + PAYLOAD_LEN_SIZE as u64;
        let end = payload_offset + payload_len + CRC_SIZE as u64;
        if end > self.total_size {
            return self.torn_end();
        }

        let raw = self.backend.read_at(start, (end - start) as usize)?;
        let body_len = raw.len() - CRC_SIZE;
        let stored_crc = u32::from_le_bytes([
            raw[body_len],
            raw[body_len + 1],
            raw[body_len + 2],
            raw[body_len + 3],
        ]);
        let computed_crc = compute_crc32(&raw[..body_len]);

        // Length was readable, so the scan can step over this entry.
        self.offset = end;

        if stored_crc != computed_crc {
            return Err(CoreError::ChecksumMismatch {
                offset: start,
                expected: stored_crc,
                actual: computed_crc,
                next: end,
            });
        }
        if entry_type.is_marker() && payload_len != 0 {
            return Err(CoreError::journal_corruption_at(
                start,
                end,
                format!("{entry_type} marker with {payload_len} payload bytes"),
            ));
        }

        let component = if cid_len == 0 {
            None
        } else {
            Some(ComponentId::from_bytes(
                &raw[ENTRY_PREFIX_SIZE..ENTRY_PREFIX_SIZE + cid_len],
            )?)
        };
        let payload_start = ENTRY_PREFIX_SIZE + cid_len + PAYLOAD_LEN_SIZE;
        let payload = raw[payload_start..body_len].to_vec();

        Ok(Some((
            start,
            JournalEntry::from_parts(entry_type, component, payload),
        )))
    }
}

impl<'a> Iterator for JournalIterator<'a> {
    type Item = CoreResult<(u64, JournalEntry)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        match self.read_next_entry() {
            Ok(Some(item)) => Some(Ok(item)),
            Ok(None) => None,
            Err(e) => {
                if e.resume_offset().is_none() {
                    self.finished = true;
                }
                Some(Err(e))
            }
        }
    }
}
