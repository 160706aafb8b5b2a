//! Transactions and their coordination.
//!
//! The [`TransactionCoordinator`] admits any number of read transactions and
//! a single write transaction at a time. A write commit follows a fixed
//! sequence:
//!
//! 1. every component prepares its redo entries (nothing touches storage);
//! 2. the entries and a COMMIT marker are appended to the journal, which is
//!    synced: from here on the transaction has happened;
//! 3. every component enacts its change on base storage;
//! 4. the journal is truncated.
//!
//! A crash between 2 and 4 is repaired at the next start by replaying the
//! journal.

mod coordinator;
mod gate;
mod listener;
mod state;

pub use coordinator::TransactionCoordinator;
pub use listener::TransactionListener;
pub use state::Transaction;
