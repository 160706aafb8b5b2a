//! Fault injection for crash testing.
//!
//! [`CrashableBackend`] wraps a byte channel and fails on command. It is
//! handed to the code under test by value, so it is steered through a
//! [`CrashSwitch`] that shares its state.
//!
//! ## Crash points
//!
//! - **Torn write**: [`CrashSwitch::crash_after`] lets the next writes
//!   through up to a byte budget, writes the part of the crossing write that
//!   still fits, then fails everything.
//! - **Failed sync**: [`CrashSwitch::fail_sync`] makes `sync` (and `flush`)
//!   fail after the bytes have been written.
//! - **Failed truncate**: [`CrashSwitch::fail_truncate`] makes `truncate`
//!   fail, which is how a journal checkpoint is made to miss.
//!
//! ## Usage
//!
//! ```rust
//! use trellis_storage::{InMemoryBackend, StorageBackend};
//! use trellis_testkit::CrashableBackend;
//!
//! let mut backend = CrashableBackend::new(Box::new(InMemoryBackend::new()));
//! let switch = backend.switch();
//! switch.crash_after(4);
//! assert!(backend.append(b"too long").is_err());
//! assert!(switch.has_crashed());
//! ```

use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use trellis_storage::{StorageBackend, StorageError, StorageResult};

/// Where a simulated crash interrupts a commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrashPoint {
    /// While the redo entries are being appended.
    DuringEntries,
    /// While the COMMIT marker is being appended.
    DuringCommitMarker,
    /// The COMMIT marker is written but the sync after it fails.
    CommitSync,
    /// A component fails while enacting.
    DuringEnact,
    /// Everything is enacted but the journal is not truncated.
    BeforeCheckpoint,
}

impl CrashPoint {
    /// All crash points, in commit order.
    pub const ALL: [CrashPoint; 5] = [
        CrashPoint::DuringEntries,
        CrashPoint::DuringCommitMarker,
        CrashPoint::CommitSync,
        CrashPoint::DuringEnact,
        CrashPoint::BeforeCheckpoint,
    ];

    /// Whether the interrupted transaction must be visible after recovery.
    #[must_use]
    pub fn survives(self) -> bool {
        matches!(
            self,
            CrashPoint::CommitSync | CrashPoint::DuringEnact | CrashPoint::BeforeCheckpoint
        )
    }
}

#[derive(Debug)]
struct CrashState {
    budget: AtomicUsize,
    written: AtomicUsize,
    crashed: AtomicBool,
    fail_sync: AtomicBool,
    fail_truncate: AtomicBool,
}

impl Default for CrashState {
    fn default() -> Self {
        Self {
            budget: AtomicUsize::new(usize::MAX),
            written: AtomicUsize::new(0),
            crashed: AtomicBool::new(false),
            fail_sync: AtomicBool::new(false),
            fail_truncate: AtomicBool::new(false),
        }
    }
}

/// Steers a [`CrashableBackend`] after it has been handed away.
#[derive(Debug, Clone)]
pub struct CrashSwitch {
    state: Arc<CrashState>,
}

impl CrashSwitch {
    /// Lets `bytes` more bytes through, then fails every write.
    pub fn crash_after(&self, bytes: usize) {
        self.state.written.store(0, Ordering::SeqCst);
        self.state.budget.store(bytes, Ordering::SeqCst);
    }

    /// Sets whether `sync` and `flush` fail.
    pub fn fail_sync(&self, fail: bool) {
        self.state.fail_sync.store(fail, Ordering::SeqCst);
    }

    /// Sets whether `truncate` fails.
    pub fn fail_truncate(&self, fail: bool) {
        self.state.fail_truncate.store(fail, Ordering::SeqCst);
    }

    /// Clears every fault.
    pub fn reset(&self) {
        self.state.budget.store(usize::MAX, Ordering::SeqCst);
        self.state.written.store(0, Ordering::SeqCst);
        self.state.crashed.store(false, Ordering::SeqCst);
        self.state.fail_sync.store(false, Ordering::SeqCst);
        self.state.fail_truncate.store(false, Ordering::SeqCst);
    }

    /// Returns whether a fault has fired.
    #[must_use]
    pub fn has_crashed(&self) -> bool {
        self.state.crashed.load(Ordering::SeqCst)
    }
}

/// A byte channel that fails on command.
pub struct CrashableBackend {
    inner: Box<dyn StorageBackend>,
    state: Arc<CrashState>,
}

impl CrashableBackend {
    /// Wraps a byte channel. No faults are armed.
    pub fn new(inner: Box<dyn StorageBackend>) -> Self {
        Self {
            inner,
            state: Arc::new(CrashState::default()),
        }
    }

    /// Returns a switch sharing this backend's fault state.
    #[must_use]
    pub fn switch(&self) -> CrashSwitch {
        CrashSwitch {
            state: Arc::clone(&self.state),
        }
    }

    /// How much of a `len`-byte write may go through; `None` if all of it.
    fn admit(&self, len: usize) -> Option<usize> {
        let budget = self.state.budget.load(Ordering::SeqCst);
        let written = self.state.written.fetch_add(len, Ordering::SeqCst);
        if written.saturating_add(len) <= budget {
            return None;
        }
        self.state.crashed.store(true, Ordering::SeqCst);
        Some(budget.saturating_sub(written))
    }

    fn fault(&self, what: &str) -> StorageError {
        self.state.crashed.store(true, Ordering::SeqCst);
        StorageError::Io(io::Error::new(
            io::ErrorKind::Other,
            format!("simulated crash during {what}"),
        ))
    }
}

impl StorageBackend for CrashableBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        self.inner.read_at(offset, len)
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> StorageResult<()> {
        match self.admit(data.len()) {
            None => self.inner.write_at(offset, data),
            Some(partial) => {
                if partial > 0 {
                    self.inner.write_at(offset, &data[..partial])?;
                }
                Err(self.fault("write"))
            }
        }
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        match self.admit(data.len()) {
            None => self.inner.append(data),
            Some(partial) => {
                if partial > 0 {
                    self.inner.append(&data[..partial])?;
                }
                Err(self.fault("append"))
            }
        }
    }

    fn flush(&mut self) -> StorageResult<()> {
        if self.state.fail_sync.load(Ordering::SeqCst) {
            return Err(self.fault("flush"));
        }
        self.inner.flush()
    }

    fn size(&self) -> StorageResult<u64> {
        self.inner.size()
    }

    fn sync(&mut self) -> StorageResult<()> {
        if self.state.fail_sync.load(Ordering::SeqCst) {
            return Err(self.fault("sync"));
        }
        self.inner.sync()
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        if self.state.fail_truncate.load(Ordering::SeqCst) {
            return Err(self.fault("truncate"));
        }
        self.inner.truncate(new_size)
    }

    fn label(&self) -> String {
        format!("crashable:{}", self.inner.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_storage::InMemoryBackend;

    #[test]
    fn normal_operation_passes_through() {
        let mut backend = CrashableBackend::new(Box::new(InMemoryBackend::new()));
        let offset = backend.append(b"test data").unwrap();
        backend.sync().unwrap();
        assert_eq!(backend.read_at(offset, 9).unwrap(), b"test data");
        assert!(!backend.switch().has_crashed());
    }

    #[test]
    fn torn_append_keeps_prefix() {
        let inner = InMemoryBackend::new();
        let mut backend = CrashableBackend::new(Box::new(inner.clone()));
        let switch = backend.switch();
        switch.crash_after(6);

        backend.append(&[1; 4]).unwrap();
        assert!(backend.append(&[2; 4]).is_err());
        assert!(switch.has_crashed());
        assert_eq!(inner.data(), vec![1, 1, 1, 1, 2, 2]);

        assert!(backend.append(&[3]).is_err());
        assert_eq!(inner.data().len(), 6);
    }

    #[test]
    fn failing_sync_keeps_bytes() {
        let inner = InMemoryBackend::new();
        let mut backend = CrashableBackend::new(Box::new(inner.clone()));
        let switch = backend.switch();
        switch.fail_sync(true);

        backend.append(b"kept").unwrap();
        assert!(backend.sync().is_err());
        assert_eq!(inner.data(), b"kept");
    }

    #[test]
    fn failing_truncate() {
        let mut backend = CrashableBackend::new(Box::new(InMemoryBackend::new()));
        let switch = backend.switch();
        backend.append(b"abc").unwrap();
        switch.fail_truncate(true);
        assert!(backend.truncate(0).is_err());
        switch.reset();
        backend.truncate(0).unwrap();
        assert_eq!(backend.size().unwrap(), 0);
    }

    #[test]
    fn survivors_follow_commit_marker() {
        let survivors: Vec<_> = CrashPoint::ALL.iter().filter(|p| p.survives()).collect();
        assert_eq!(survivors.len(), 3);
        assert!(!CrashPoint::DuringCommitMarker.survives());
    }
}
