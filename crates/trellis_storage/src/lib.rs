//! # Trellis Storage
//!
//! Flat, non-transactional storage for Trellis.
//!
//! Everything in this crate is an **opaque byte store**. Nothing here knows
//! about journals, transactions or components; `trellis_core` wraps these
//! types to make them transactional.
//!
//! ## Layers
//!
//! - [`StorageBackend`] - a positional byte channel (read, write, append,
//!   truncate, sync)
//!   - [`InMemoryBackend`] - for testing and ephemeral stores
//!   - [`FileBackend`] - persistent storage using OS file APIs
//! - [`RecordFile`] - an append-only file of variable-length records
//! - [`SlotFile`] - a random-access file of fixed-size slots
//!
//! ## Example
//!
//! ```rust
//! use trellis_storage::{InMemoryBackend, RecordFile};
//!
//! let records = RecordFile::new(Box::new(InMemoryBackend::new()));
//! let offset = records.write(b"hello world").unwrap();
//! assert_eq!(records.read(offset).unwrap(), b"hello world");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;
mod record;
mod slot;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
pub use record::{encode_record, RecordFile, RECORD_HEADER_SIZE};
pub use slot::SlotFile;
