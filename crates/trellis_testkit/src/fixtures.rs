//! Test fixtures and store helpers.
//!
//! A [`TestStore`] wires a coordinator with one adapter of each kind:
//! a record file, a slot file and a blob. Components are always registered
//! in the same order, so reopening a store over the same media gets the
//! same component ids and recovery can route the journal back to them.

use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use trellis_core::{
    CoordinatorConfig, CoreResult, Journal, RecoveryReport, StoreDir, TransBlob, TransRecordFile,
    TransSlotFile, TransactionCoordinator, TransactionalComponent,
};
use trellis_storage::{InMemoryBackend, RecordFile, SlotFile, StorageBackend};

/// Slot size of the slot file in every test store.
pub const SLOT_SIZE: usize = 8;

/// Component file names inside a store directory.
pub const RECORDS_NAME: &str = "records";
/// See [`RECORDS_NAME`].
pub const SLOTS_NAME: &str = "slots";
/// See [`RECORDS_NAME`].
pub const BLOB_NAME: &str = "blob";

/// In-memory media for one store.
///
/// Clones share their bytes, so a store can be dropped and opened again over
/// the same media to simulate a process restart.
#[derive(Debug, Clone)]
pub struct StoreMedia {
    /// Journal bytes.
    pub journal: InMemoryBackend,
    /// Record file bytes.
    pub records: InMemoryBackend,
    /// Slot file bytes.
    pub slots: InMemoryBackend,
    /// Blob bytes.
    pub blob: InMemoryBackend,
}

impl StoreMedia {
    /// Creates empty media.
    #[must_use]
    pub fn new() -> Self {
        Self {
            journal: InMemoryBackend::with_label("journal"),
            records: InMemoryBackend::with_label(RECORDS_NAME),
            slots: InMemoryBackend::with_label(SLOTS_NAME),
            blob: InMemoryBackend::with_label(BLOB_NAME),
        }
    }

    /// Returns byte channels over this media.
    ///
    /// Replace any of them with a wrapper (for example a
    /// [`CrashableBackend`](crate::CrashableBackend)) before opening.
    #[must_use]
    pub fn backends(&self) -> StoreBackends {
        StoreBackends {
            journal: Box::new(self.journal.clone()),
            records: Box::new(self.records.clone()),
            slots: Box::new(self.slots.clone()),
            blob: Box::new(self.blob.clone()),
        }
    }
}

impl Default for StoreMedia {
    fn default() -> Self {
        Self::new()
    }
}

/// The byte channels a store is opened over.
pub struct StoreBackends {
    /// Journal channel.
    pub journal: Box<dyn StorageBackend>,
    /// Record file channel.
    pub records: Box<dyn StorageBackend>,
    /// Slot file channel.
    pub slots: Box<dyn StorageBackend>,
    /// Blob channel.
    pub blob: Box<dyn StorageBackend>,
}

/// A started coordinator with a record file, a slot file and a blob.
pub struct TestStore {
    /// The coordinator.
    pub coordinator: TransactionCoordinator,
    /// The record file adapter.
    pub records: Arc<TransRecordFile>,
    /// The slot file adapter.
    pub slots: Arc<TransSlotFile>,
    /// The blob adapter.
    pub blob: Arc<TransBlob>,
    /// What `start()` recovered.
    pub report: RecoveryReport,
    media: Option<StoreMedia>,
    dir: Option<StoreDir>,
    _temp_dir: Option<TempDir>,
}

impl TestStore {
    /// Creates a store over fresh in-memory media.
    pub fn memory() -> Self {
        Self::open_media(&StoreMedia::new()).expect("Failed to open in-memory store")
    }

    /// Creates a store in a fresh temporary directory.
    pub fn file() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let mut store = Self::open_dir(temp_dir.path()).expect("Failed to open file store");
        store._temp_dir = Some(temp_dir);
        store
    }

    /// Opens (and recovers) a store over existing in-memory media.
    pub fn open_media(media: &StoreMedia) -> CoreResult<Self> {
        let mut store = Self::open_backends(media.backends(), CoordinatorConfig::default())?;
        store.media = Some(media.clone());
        Ok(store)
    }

    /// Opens (and recovers) a store in a directory.
    pub fn open_dir(path: &Path) -> CoreResult<Self> {
        let config = CoordinatorConfig::default();
        let dir = StoreDir::open(path, config.create_if_missing)?;
        let backends = StoreBackends {
            journal: Box::new(trellis_storage::FileBackend::open(&dir.journal_path())?),
            records: Box::new(dir.open_backend(RECORDS_NAME)?),
            slots: Box::new(dir.open_backend(SLOTS_NAME)?),
            blob: Box::new(dir.open_backend(BLOB_NAME)?),
        };
        let mut store = Self::open_backends(backends, config)?;
        store.dir = Some(dir);
        Ok(store)
    }

    /// Opens (and recovers) a store over explicit byte channels.
    pub fn open_backends(backends: StoreBackends, config: CoordinatorConfig) -> CoreResult<Self> {
        let journal = Journal::new(backends.journal, config.sync_on_commit);
        let coordinator = TransactionCoordinator::new(journal, config);

        let records = Arc::new(TransRecordFile::new(
            coordinator.alloc_component_id(RECORDS_NAME),
            RecordFile::new(backends.records),
        )?);
        let slots = Arc::new(TransSlotFile::new(
            coordinator.alloc_component_id(SLOTS_NAME),
            SlotFile::new(backends.slots, SLOT_SIZE),
        )?);
        let blob = Arc::new(TransBlob::new(
            coordinator.alloc_component_id(BLOB_NAME),
            backends.blob,
        )?);

        coordinator.add(Arc::clone(&records) as Arc<dyn TransactionalComponent>)?;
        coordinator.add(Arc::clone(&slots) as Arc<dyn TransactionalComponent>)?;
        coordinator.add(Arc::clone(&blob) as Arc<dyn TransactionalComponent>)?;
        let report = coordinator.start()?;

        Ok(Self {
            coordinator,
            records,
            slots,
            blob,
            report,
            media: None,
            dir: None,
            _temp_dir: None,
        })
    }

    /// Drops the store without shutting it down and opens it again over the
    /// same media or directory, as a restarting process would.
    pub fn reopen(self) -> CoreResult<Self> {
        let TestStore {
            coordinator,
            records,
            slots,
            blob,
            media,
            dir,
            _temp_dir,
            ..
        } = self;
        let path = dir.as_ref().map(|dir| dir.path().to_path_buf());
        drop((records, slots, blob, coordinator, dir));

        match (media, path) {
            (Some(media), _) => Self::open_media(&media),
            (None, Some(path)) => {
                let mut store = Self::open_dir(&path)?;
                store._temp_dir = _temp_dir;
                Ok(store)
            }
            (None, None) => Err(trellis_core::CoreError::usage(
                "store was opened over explicit backends and cannot be reopened",
            )),
        }
    }

    /// Returns the in-memory media, if the store has any.
    #[must_use]
    pub fn media(&self) -> Option<&StoreMedia> {
        self.media.as_ref()
    }

    /// Returns the store directory, if the store is file based.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.dir.as_ref().map(StoreDir::path)
    }
}

impl std::ops::Deref for TestStore {
    type Target = TransactionCoordinator;

    fn deref(&self) -> &Self::Target {
        &self.coordinator
    }
}

/// Runs a test with a temporary in-memory store.
///
/// # Example
///
/// ```rust
/// use trellis_testkit::with_temp_store;
///
/// with_temp_store(|store| {
///     store
///         .execute_write(|txn| store.blob.set(txn, b"value"))
///         .unwrap();
///     assert_eq!(store.blob.get_committed(), b"value");
/// });
/// ```
pub fn with_temp_store<F, R>(f: F) -> R
where
    F: FnOnce(&TestStore) -> R,
{
    let store = TestStore::memory();
    f(&store)
}

/// Runs a test with a temporary file-based store.
pub fn with_file_store<F, R>(f: F) -> R
where
    F: FnOnce(&TestStore, &Path) -> R,
{
    let store = TestStore::file();
    let path = store
        .path()
        .expect("File store should have a path")
        .to_path_buf();
    f(&store, &path)
}

/// Returns a slot value filled with `byte`.
#[must_use]
pub fn slot_value(byte: u8) -> Vec<u8> {
    vec![byte; SLOT_SIZE]
}
