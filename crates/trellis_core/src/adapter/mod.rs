//! Transactional adapters over flat storage.
//!
//! Each adapter wraps one non-transactional store and registers with the
//! coordinator as a [`TransactionalComponent`](crate::TransactionalComponent).
//! Writes land in a per-transaction buffer; base storage only changes in
//! `commit_enact` (after the COMMIT marker is durable) or during recovery.
//!
//! | Adapter | Base store | Redo entry |
//! |---|---|---|
//! | [`TransRecordFile`] | `RecordFile` | one `OBJECT`: `[offset:u64][records]` |
//! | [`TransSlotFile`] | `SlotFile` | one `BLOCK` per written slot |
//! | [`TransBlob`] | `StorageBackend` | one `BUFFER`: the new value |
//!
//! Every reader captures a snapshot when its transaction begins and keeps
//! seeing it until the transaction ends, whatever commits meanwhile.
//!
//! Base storage must not be written except through the adapter while it is
//! registered.

mod blob;
mod record;
mod slot;

pub use blob::TransBlob;
pub use record::TransRecordFile;
pub use slot::TransSlotFile;

use crate::component::ComponentId;
use crate::error::CoreError;
use crate::types::TxnId;

fn missing_view(component: &ComponentId, txn: TxnId) -> CoreError {
    CoreError::usage(format!(
        "{component} has no state for {txn}; it was not registered when the transaction began"
    ))
}

fn unexpected_entry(component: &ComponentId, found: crate::journal::EntryType) -> CoreError {
    CoreError::invalid_argument(format!("{component} cannot replay a {found} entry"))
}
