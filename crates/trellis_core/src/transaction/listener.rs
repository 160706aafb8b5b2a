//! Transaction lifecycle listeners.

use crate::types::TxnInfo;

/// Observes transaction lifecycle events.
///
/// Every hook defaults to a no-op. Hooks run on the thread driving the
/// transaction, inside the coordinator call, so they should be quick and
/// must not call back into the coordinator.
pub trait TransactionListener: Send + Sync {
    /// A transaction has begun.
    fn on_begin(&self, _txn: &TxnInfo) {}

    /// Components are about to prepare.
    fn on_prepare_start(&self, _txn: &TxnInfo) {}

    /// All components prepared.
    fn on_prepare_finish(&self, _txn: &TxnInfo) {}

    /// The journal write and enactment are about to start.
    fn on_commit_start(&self, _txn: &TxnInfo) {}

    /// The commit finished.
    fn on_commit_finish(&self, _txn: &TxnInfo) {}

    /// An abort is starting.
    fn on_abort_start(&self, _txn: &TxnInfo) {}

    /// The abort finished.
    fn on_abort_finish(&self, _txn: &TxnInfo) {}

    /// The transaction ended.
    fn on_end(&self, _txn: &TxnInfo) {}
}
