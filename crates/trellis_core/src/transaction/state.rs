//! Transaction handle.

use crate::error::{CoreError, CoreResult};
use crate::transaction::coordinator::TransactionCoordinator;
use crate::types::{DataVersion, TxnId, TxnInfo, TxnMode, TxnState};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

/// A transaction begun on a [`TransactionCoordinator`].
///
/// Pass it by reference to adapter reads and writes. A write the adapter
/// rejects aborts the transaction. Dropping the handle ends the
/// transaction; an uncommitted write transaction is aborted first.
pub struct Transaction<'c> {
    coordinator: &'c TransactionCoordinator,
    info: TxnInfo,
    state: Mutex<TxnState>,
    holds_writer: AtomicBool,
}

impl<'c> Transaction<'c> {
    pub(crate) fn new(coordinator: &'c TransactionCoordinator, info: TxnInfo) -> Self {
        Self {
            coordinator,
            info,
            state: Mutex::new(TxnState::Active),
            holds_writer: AtomicBool::new(info.is_write()),
        }
    }

    /// Returns the transaction ID.
    #[must_use]
    pub fn id(&self) -> TxnId {
        self.info.id()
    }

    /// Returns the mode.
    #[must_use]
    pub fn mode(&self) -> TxnMode {
        self.info.mode()
    }

    /// Returns the data version this transaction reads.
    #[must_use]
    pub fn data_version(&self) -> DataVersion {
        self.info.data_version()
    }

    /// Returns what components are told about this transaction.
    #[must_use]
    pub fn info(&self) -> &TxnInfo {
        &self.info
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> TxnState {
        *self.state.lock()
    }

    /// Checks if the transaction is still active.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state() == TxnState::Active
    }

    /// Returns true for the write transaction.
    #[must_use]
    pub fn is_write(&self) -> bool {
        self.info.is_write()
    }

    /// Fails unless this is an active write transaction.
    ///
    /// A write attempted in an active READ transaction aborts it.
    pub fn ensure_writable(&self) -> CoreResult<()> {
        let state = self.state();
        if state != TxnState::Active {
            return Err(CoreError::usage(format!(
                "write attempted in {state:?} transaction {}",
                self.id()
            )));
        }
        if !self.is_write() {
            return Err(self.abort_with(CoreError::usage(format!(
                "write attempted in READ transaction {}",
                self.id()
            ))));
        }
        Ok(())
    }

    /// Runs a buffered write for this transaction.
    ///
    /// If the transaction is not an active write transaction, or `write`
    /// fails, the transaction is aborted and the error returned. `write`
    /// must not hold locks a component's `abort` takes once it returns.
    pub fn write_with<T>(&self, write: impl FnOnce() -> CoreResult<T>) -> CoreResult<T> {
        self.ensure_writable()?;
        write().map_err(|e| self.abort_with(e))
    }

    /// Aborts the transaction, if still active, because of `err`, and
    /// returns `err`.
    pub fn abort_with(&self, err: CoreError) -> CoreError {
        if self.is_active() {
            self.coordinator.abort_rejected(self, &err);
        }
        err
    }

    /// Fails once the transaction has ended.
    pub fn ensure_readable(&self) -> CoreResult<()> {
        if self.state() == TxnState::Ended {
            return Err(CoreError::usage(format!(
                "read attempted in ended transaction {}",
                self.id()
            )));
        }
        Ok(())
    }

    pub(crate) fn coordinator(&self) -> &'c TransactionCoordinator {
        self.coordinator
    }

    pub(crate) fn set_state(&self, state: TxnState) {
        *self.state.lock() = state;
    }

    pub(crate) fn holds_writer(&self) -> bool {
        self.holds_writer.load(Ordering::SeqCst)
    }

    pub(crate) fn clear_writer(&self) {
        self.holds_writer.store(false, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for Transaction<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id())
            .field("mode", &self.mode())
            .field("data_version", &self.data_version())
            .field("state", &self.state())
            .finish()
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        let coordinator = self.coordinator;
        coordinator.end(self);
    }
}
