//! # Trellis Core
//!
//! A single-node transaction layer that commits changes to several storage
//! components atomically through one write-ahead journal.
//!
//! This crate provides:
//! - [`Journal`] - an append-only log of typed, checksummed redo entries
//! - [`TransactionalComponent`] - the contract every participant implements
//! - [`TransRecordFile`], [`TransSlotFile`], [`TransBlob`] - adapters that
//!   make flat storage transactional
//! - [`TransactionCoordinator`] - multiple readers, single writer, and the
//!   prepare / COMMIT / enact / checkpoint sequence
//! - [`JournalControl`] - startup recovery from the journal
//! - [`StoreDir`] - on-disk layout and locking
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use trellis_core::{TransBlob, TransactionCoordinator, TransactionalComponent};
//! use trellis_storage::InMemoryBackend;
//!
//! let coordinator = TransactionCoordinator::in_memory();
//! let blob = Arc::new(
//!     TransBlob::new(coordinator.alloc_component_id("blob"), Box::new(InMemoryBackend::new()))
//!         .unwrap(),
//! );
//! coordinator.add(Arc::clone(&blob) as Arc<dyn TransactionalComponent>).unwrap();
//! coordinator.start().unwrap();
//!
//! coordinator.execute_write(|txn| blob.set(txn, b"Hello World")).unwrap();
//! let value = coordinator.execute_read(|txn| blob.get(txn)).unwrap();
//! assert_eq!(value, b"Hello World");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod adapter;
mod component;
mod config;
mod dir;
mod error;
mod journal;
mod recovery;
mod stats;
mod transaction;
mod types;

pub use adapter::{TransBlob, TransRecordFile, TransSlotFile};
pub use component::{
    ComponentGroup, ComponentId, ComponentIdAllocator, PreparedEntry, TransactionalComponent,
    TOKEN_LEN,
};
pub use config::CoordinatorConfig;
pub use dir::{journal_path, StoreDir};
pub use error::{CoreError, CoreResult};
pub use journal::{
    compute_crc32, decode_block, encode_block, EntryHandle, EntryType, Journal, JournalEntry,
    JournalIterator, CRC_SIZE, ENTRY_PREFIX_SIZE, PAYLOAD_LEN_SIZE,
};
pub use recovery::{CorruptEntry, JournalControl, JournalScan, RecoveryReport};
pub use stats::{CoordinatorStats, StatsSnapshot};
pub use transaction::{Transaction, TransactionCoordinator, TransactionListener};
pub use types::{DataVersion, TxnId, TxnInfo, TxnMode, TxnState};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
