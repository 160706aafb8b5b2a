//! Coordinator statistics.
//!
//! # Usage
//!
//! ```rust
//! use trellis_core::TransactionCoordinator;
//!
//! let coordinator = TransactionCoordinator::in_memory();
//! coordinator.start().unwrap();
//! coordinator.execute_read(|_txn| Ok(())).unwrap();
//!
//! let stats = coordinator.stats().snapshot();
//! assert_eq!(stats.begun_read, 1);
//! assert_eq!(stats.finished, 1);
//! ```

use crate::types::TxnMode;
use std::sync::atomic::{AtomicU64, Ordering};

/// Coordinator counters.
///
/// All counters are atomic and can be read while transactions are running.
/// Values only grow, except the `active_*` gauges.
#[derive(Debug, Default)]
pub struct CoordinatorStats {
    begun_read: AtomicU64,
    begun_write: AtomicU64,
    committed: AtomicU64,
    aborted: AtomicU64,
    finished: AtomicU64,
    active_readers: AtomicU64,
    active_writers: AtomicU64,
    checkpoints: AtomicU64,
    would_block: AtomicU64,
    recoveries: AtomicU64,
    replayed_transactions: AtomicU64,
    fatal_errors: AtomicU64,
}

impl CoordinatorStats {
    /// Creates a new stats instance.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_begin(&self, mode: TxnMode) {
        match mode {
            TxnMode::Read => {
                self.begun_read.fetch_add(1, Ordering::Relaxed);
                self.active_readers.fetch_add(1, Ordering::Relaxed);
            }
            TxnMode::Write => {
                self.begun_write.fetch_add(1, Ordering::Relaxed);
                self.active_writers.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub(crate) fn record_end(&self, mode: TxnMode) {
        self.finished.fetch_add(1, Ordering::Relaxed);
        let gauge = match mode {
            TxnMode::Read => &self.active_readers,
            TxnMode::Write => &self.active_writers,
        };
        // never below zero
        let _ = gauge.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| v.checked_sub(1));
    }

    pub(crate) fn record_commit(&self) {
        self.committed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_abort(&self) {
        self.aborted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_checkpoint(&self) {
        self.checkpoints.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_would_block(&self) {
        self.would_block.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_recovery(&self, transactions: u64) {
        self.recoveries.fetch_add(1, Ordering::Relaxed);
        self.replayed_transactions
            .fetch_add(transactions, Ordering::Relaxed);
    }

    pub(crate) fn record_fatal(&self) {
        self.fatal_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Total transactions begun.
    pub fn begun(&self) -> u64 {
        self.begun_read() + self.begun_write()
    }

    /// Read transactions begun.
    pub fn begun_read(&self) -> u64 {
        self.begun_read.load(Ordering::Relaxed)
    }

    /// Write transactions begun.
    pub fn begun_write(&self) -> u64 {
        self.begun_write.load(Ordering::Relaxed)
    }

    /// Transactions committed (read commits included).
    pub fn committed(&self) -> u64 {
        self.committed.load(Ordering::Relaxed)
    }

    /// Transactions aborted.
    pub fn aborted(&self) -> u64 {
        self.aborted.load(Ordering::Relaxed)
    }

    /// Transactions ended.
    pub fn finished(&self) -> u64 {
        self.finished.load(Ordering::Relaxed)
    }

    /// Read transactions begun and not yet ended.
    pub fn active_readers(&self) -> u64 {
        self.active_readers.load(Ordering::Relaxed)
    }

    /// Write transactions begun and not yet ended.
    pub fn active_writers(&self) -> u64 {
        self.active_writers.load(Ordering::Relaxed)
    }

    /// Journal truncations after enactment.
    pub fn checkpoints(&self) -> u64 {
        self.checkpoints.load(Ordering::Relaxed)
    }

    /// Begins that gave up waiting.
    pub fn would_block(&self) -> u64 {
        self.would_block.load(Ordering::Relaxed)
    }

    /// Startups that replayed a non-empty journal.
    pub fn recoveries(&self) -> u64 {
        self.recoveries.load(Ordering::Relaxed)
    }

    /// Committed transactions replayed by recovery.
    pub fn replayed_transactions(&self) -> u64 {
        self.replayed_transactions.load(Ordering::Relaxed)
    }

    /// Fatal errors that halted the coordinator.
    pub fn fatal_errors(&self) -> u64 {
        self.fatal_errors.load(Ordering::Relaxed)
    }

    /// Returns a snapshot of all stats.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            begun: self.begun(),
            begun_read: self.begun_read(),
            begun_write: self.begun_write(),
            committed: self.committed(),
            aborted: self.aborted(),
            finished: self.finished(),
            active_readers: self.active_readers(),
            active_writers: self.active_writers(),
            checkpoints: self.checkpoints(),
            would_block: self.would_block(),
            recoveries: self.recoveries(),
            replayed_transactions: self.replayed_transactions(),
            fatal_errors: self.fatal_errors(),
        }
    }
}

/// A point-in-time copy of [`CoordinatorStats`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    /// Total transactions begun.
    pub begun: u64,
    /// Read transactions begun.
    pub begun_read: u64,
    /// Write transactions begun.
    pub begun_write: u64,
    /// Transactions committed.
    pub committed: u64,
    /// Transactions aborted.
    pub aborted: u64,
    /// Transactions ended.
    pub finished: u64,
    /// Active read transactions.
    pub active_readers: u64,
    /// Active write transactions.
    pub active_writers: u64,
    /// Journal checkpoints.
    pub checkpoints: u64,
    /// Begins that timed out.
    pub would_block: u64,
    /// Recoveries run at startup.
    pub recoveries: u64,
    /// Transactions replayed by recovery.
    pub replayed_transactions: u64,
    /// Fatal errors.
    pub fatal_errors: u64,
}
