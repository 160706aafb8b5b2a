//! Write-ahead journal for atomic commits and crash recovery.
//!
//! Every transaction writes its redo entries here, then a COMMIT marker,
//! before any base storage is touched. After the components have enacted
//! the change the journal is truncated back to zero, so an empty journal is
//! the normal resting state. A non-empty journal at startup means the last
//! process stopped somewhere inside a commit.
//!
//! ## Entry Format
//!
//! ```text
//! | type (1) | cid len (1) | cid | payload len (4) | payload | crc32 (4) |
//! ```
//!
//! ## Recovery Policy
//!
//! ### Tolerated (clean end of journal)
//!
//! - **Torn entry**: any short read at the end of the file. The bytes are the
//!   remains of a write cut off by a crash.
//!
//! ### Reported
//!
//! - **CRC mismatch** or **marker with payload**: `Err`, and the iterator
//!   steps over the entry.
//! - **Unknown type** or **bad component id length**: `Err`. The iterator
//!   steps over the entry if some plausible framing fits; otherwise
//!   iteration ends.
//!
//! Whether a reported error is fatal depends on where it sits relative to
//! the last COMMIT; that decision belongs to
//! [`JournalControl`](crate::JournalControl).

mod entry;
mod iterator;
#[allow(clippy::module_inception)]
mod journal;

pub use entry::{
    compute_crc32, decode_block, encode_block, EntryHandle, EntryType, JournalEntry, CRC_SIZE,
    ENTRY_PREFIX_SIZE, PAYLOAD_LEN_SIZE,
};
pub use iterator::JournalIterator;
pub use journal::Journal;
