//! Admission control: the writer slot and exclusive mode.

use crate::types::TxnMode;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::time::Instant;

#[derive(Debug, Default)]
struct GateState {
    /// Held by the write transaction, or by `block_writers`.
    writer_held: bool,
    /// The writer slot is held by `block_writers` rather than a transaction.
    writers_blocked: bool,
    /// Transactions begun and not yet ended.
    active: usize,
    /// Exclusive mode is held or being acquired; new transactions wait.
    exclusive: bool,
}

/// Decides when a transaction may begin.
///
/// Readers wait only for exclusive mode. The writer additionally waits for
/// the writer slot. All waits take an optional deadline.
#[derive(Debug, Default)]
pub(crate) struct TxnGate {
    state: Mutex<GateState>,
    changed: Condvar,
}

impl TxnGate {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Waits until `mode` may begin, then registers the transaction.
    /// Returns false if the deadline passed first.
    pub(crate) fn enter(&self, mode: TxnMode, deadline: Option<Instant>) -> bool {
        let mut state = self.state.lock();
        loop {
            let admissible = !state.exclusive && (mode == TxnMode::Read || !state.writer_held);
            if admissible {
                state.active += 1;
                if mode == TxnMode::Write {
                    state.writer_held = true;
                }
                return true;
            }
            if !self.wait(&mut state, deadline) {
                return false;
            }
        }
    }

    /// Unregisters a transaction, releasing the writer slot if it still holds it.
    pub(crate) fn leave(&self, release_writer: bool) {
        let mut state = self.state.lock();
        state.active = state.active.saturating_sub(1);
        if release_writer {
            state.writer_held = false;
        }
        drop(state);
        self.changed.notify_all();
    }

    /// Releases the writer slot held by a transaction that has committed or aborted.
    pub(crate) fn release_writer(&self) {
        self.state.lock().writer_held = false;
        self.changed.notify_all();
    }

    /// Takes the writer slot without a transaction.
    pub(crate) fn block_writers(&self, deadline: Option<Instant>) -> bool {
        let mut state = self.state.lock();
        loop {
            if !state.writer_held {
                state.writer_held = true;
                state.writers_blocked = true;
                return true;
            }
            if !self.wait(&mut state, deadline) {
                return false;
            }
        }
    }

    /// Gives back a slot taken by [`block_writers`](Self::block_writers).
    /// Returns false if writers were not blocked.
    pub(crate) fn enable_writers(&self) -> bool {
        let mut state = self.state.lock();
        if !state.writers_blocked {
            return false;
        }
        state.writers_blocked = false;
        state.writer_held = false;
        drop(state);
        self.changed.notify_all();
        true
    }

    /// Holds back new transactions and waits for active ones to end.
    pub(crate) fn start_exclusive(&self, deadline: Option<Instant>) -> bool {
        let mut state = self.state.lock();
        while state.exclusive {
            if !self.wait(&mut state, deadline) {
                return false;
            }
        }
        state.exclusive = true;
        while state.active > 0 {
            if !self.wait(&mut state, deadline) {
                state.exclusive = false;
                drop(state);
                self.changed.notify_all();
                return false;
            }
        }
        true
    }

    /// Leaves exclusive mode. Returns false if it was not held.
    pub(crate) fn finish_exclusive(&self) -> bool {
        let mut state = self.state.lock();
        if !state.exclusive {
            return false;
        }
        state.exclusive = false;
        drop(state);
        self.changed.notify_all();
        true
    }

    pub(crate) fn active(&self) -> usize {
        self.state.lock().active
    }

    #[cfg(test)]
    pub(crate) fn is_exclusive(&self) -> bool {
        self.state.lock().exclusive
    }

    #[cfg(test)]
    pub(crate) fn writers_blocked(&self) -> bool {
        self.state.lock().writers_blocked
    }

    /// Returns false on timeout.
    fn wait(&self, state: &mut MutexGuard<'_, GateState>, deadline: Option<Instant>) -> bool {
        match deadline {
            None => {
                self.changed.wait(state);
                true
            }
            Some(deadline) => !self.changed.wait_until(state, deadline).timed_out(),
        }
    }
}
