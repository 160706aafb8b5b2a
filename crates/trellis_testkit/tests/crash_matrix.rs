//! Crash tests: a fault is injected at each step of a commit, the store is
//! reopened over the same media, and recovery must produce either the whole
//! transaction or none of it.

use std::sync::Arc;
use trellis_core::{
    ComponentGroup, ComponentIdAllocator, CoordinatorConfig, CoreError, EntryType, Journal,
    JournalControl, JournalEntry, TransactionalComponent, TxnMode,
};
use trellis_storage::{FileBackend, StorageBackend};
use trellis_testkit::{
    slot_value, CrashPoint, CrashSwitch, CrashableBackend, StoreMedia, TestStore, BLOB_NAME,
};

/// Which byte channel the fault is injected into.
enum Target {
    Journal,
    Records,
}

fn open_with_fault(media: &StoreMedia, target: Target) -> (TestStore, CrashSwitch) {
    let mut backends = media.backends();
    let switch = match target {
        Target::Journal => {
            let journal = CrashableBackend::new(backends.journal);
            let switch = journal.switch();
            backends.journal = Box::new(journal);
            switch
        }
        Target::Records => {
            let records = CrashableBackend::new(backends.records);
            let switch = records.switch();
            backends.records = Box::new(records);
            switch
        }
    };
    let store = TestStore::open_backends(backends, CoordinatorConfig::default()).unwrap();
    (store, switch)
}

/// Commits the state every crash test starts from.
fn seed(store: &TestStore) -> u64 {
    store
        .execute_write(|txn| {
            store.slots.write_slot(txn, 0, &slot_value(1))?;
            store.blob.set(txn, b"before")?;
            store.records.write(txn, b"before")
        })
        .unwrap()
}

/// The transaction every crash test interrupts. Returns the record position.
fn interrupted(store: &TestStore) -> Result<u64, CoreError> {
    store.execute_write(|txn| {
        store.slots.write_slot(txn, 0, &slot_value(2))?;
        store.slots.write_slot(txn, 1, &slot_value(3))?;
        store.blob.set(txn, b"after")?;
        store.records.write(txn, b"after")
    })
}

fn assert_before(store: &TestStore, seeded: u64) {
    assert_eq!(store.records.read_committed(seeded).unwrap(), b"before");
    assert_eq!(store.records.committed_length(), 4 + 6);
    assert_eq!(store.slots.committed_slots(), 1);
    assert_eq!(store.slots.read_slot_committed(0).unwrap(), slot_value(1));
    assert_eq!(store.blob.get_committed(), b"before");
}

fn assert_after(store: &TestStore, seeded: u64, position: u64) {
    assert_eq!(store.records.read_committed(seeded).unwrap(), b"before");
    assert_eq!(store.records.read_committed(position).unwrap(), b"after");
    assert_eq!(store.records.committed_length(), 4 + 6 + 4 + 5);
    assert_eq!(store.slots.committed_slots(), 2);
    assert_eq!(store.slots.read_slot_committed(0).unwrap(), slot_value(2));
    assert_eq!(store.slots.read_slot_committed(1).unwrap(), slot_value(3));
    assert_eq!(store.blob.get_committed(), b"after");
}

/// Size of the journal entries the interrupted transaction writes.
fn interrupted_entries_len() -> usize {
    let id = ComponentIdAllocator::stable().alloc_local("any");
    let mut records_payload = vec![0u8; 8];
    records_payload.extend_from_slice(&[0u8; 4 + 5]);
    JournalEntry::object(id.clone(), records_payload).encoded_len()
        + JournalEntry::block(id.clone(), 0, &slot_value(2)).encoded_len()
        + JournalEntry::block(id.clone(), 1, &slot_value(3)).encoded_len()
        + JournalEntry::buffer(id, b"after".to_vec()).encoded_len()
}

/// Runs the interrupted transaction with a fault at `point`, then reopens.
/// Returns the reopened store, the seeded record position and the position
/// the interrupted transaction was given.
fn crash_at(point: CrashPoint) -> (TestStore, u64, u64) {
    let media = StoreMedia::new();
    let expected_position = 4 + 6;
    let target = match point {
        CrashPoint::DuringEnact => Target::Records,
        _ => Target::Journal,
    };
    let (store, switch) = open_with_fault(&media, target);
    let seeded = seed(&store);

    match point {
        CrashPoint::DuringEntries => switch.crash_after(interrupted_entries_len() / 2),
        CrashPoint::DuringCommitMarker => switch.crash_after(interrupted_entries_len() + 3),
        CrashPoint::CommitSync => switch.fail_sync(true),
        CrashPoint::DuringEnact => switch.crash_after(3),
        CrashPoint::BeforeCheckpoint => switch.fail_truncate(true),
    }

    let result = interrupted(&store);
    match point {
        CrashPoint::DuringEntries => {
            let err = result.unwrap_err();
            assert!(!err.is_fatal());
            assert!(!store.is_halted());
            assert!(store.journal().is_empty().unwrap());
        }
        CrashPoint::DuringCommitMarker | CrashPoint::CommitSync => {
            assert!(matches!(result, Err(CoreError::CommitOutcomeUnknown { .. })));
            assert!(store.is_halted());
            assert!(matches!(
                store.begin(TxnMode::Read),
                Err(CoreError::Halted { .. })
            ));
        }
        CrashPoint::DuringEnact => {
            assert!(matches!(result, Err(CoreError::Enactment { .. })));
            assert!(store.is_halted());
        }
        CrashPoint::BeforeCheckpoint => {
            assert_eq!(result.unwrap(), expected_position);
            assert!(!store.is_halted());
            assert!(!store.journal().is_empty().unwrap());
        }
    }
    assert!(switch.has_crashed());
    drop(store);

    let store = TestStore::open_media(&media).unwrap();
    assert!(store.journal().is_empty().unwrap());
    assert!(media.journal.data().is_empty());
    (store, seeded, expected_position)
}

#[test]
fn crash_during_entries_keeps_old_state() {
    let (store, seeded, _) = crash_at(CrashPoint::DuringEntries);
    assert_before(&store, seeded);
    assert_eq!(store.report.transactions_replayed, 0);
}

#[test]
fn crash_during_commit_marker_discards_transaction() {
    let (store, seeded, _) = crash_at(CrashPoint::DuringCommitMarker);
    assert_before(&store, seeded);
    assert_eq!(store.report.transactions_replayed, 0);
    assert_eq!(store.report.discarded_entries, 4);
    assert!(store.report.torn_tail);
}

#[test]
fn failed_commit_sync_replays_transaction() {
    let (store, seeded, position) = crash_at(CrashPoint::CommitSync);
    assert_after(&store, seeded, position);
    assert_eq!(store.report.transactions_replayed, 1);
    assert_eq!(store.report.entries_replayed, 4);
}

#[test]
fn failed_enactment_replays_at_promised_offset() {
    let (store, seeded, position) = crash_at(CrashPoint::DuringEnact);
    assert_after(&store, seeded, position);
    assert_eq!(store.report.transactions_replayed, 1);
}

#[test]
fn missed_checkpoint_replays_idempotently() {
    let (store, seeded, position) = crash_at(CrashPoint::BeforeCheckpoint);
    assert_after(&store, seeded, position);
    assert_eq!(store.report.transactions_replayed, 1);
}

#[test]
fn every_crash_point_is_all_or_nothing() {
    for point in CrashPoint::ALL {
        let (store, seeded, position) = crash_at(point);
        if point.survives() {
            assert_after(&store, seeded, position);
        } else {
            assert_before(&store, seeded);
        }
        // the reopened store takes new commits
        store
            .execute_write(|txn| store.blob.set(txn, b"later"))
            .unwrap();
        assert_eq!(store.blob.get_committed(), b"later");
    }
}

#[test]
fn store_recovers_from_entry_fault_without_restart() {
    let media = StoreMedia::new();
    let (store, switch) = open_with_fault(&media, Target::Journal);
    let seeded = seed(&store);
    switch.crash_after(10);
    assert!(interrupted(&store).is_err());
    switch.reset();

    let position = interrupted(&store).unwrap();
    assert_after(&store, seeded, position);
}

#[test]
fn uncheckpointed_commits_replay_in_order() {
    let media = StoreMedia::new();
    let (store, switch) = open_with_fault(&media, Target::Journal);
    switch.fail_truncate(true);
    for value in [b"one", b"two"] {
        store.execute_write(|txn| store.blob.set(txn, value)).unwrap();
    }
    store
        .execute_write(|txn| store.slots.write_slot(txn, 0, &slot_value(7)))
        .unwrap();
    assert_eq!(store.stats().checkpoints(), 0);
    drop(store);

    let scanned = JournalControl::scan(&Journal::new(Box::new(media.journal.clone()), true)).unwrap();
    assert_eq!(scanned.commits, 3);
    assert!(scanned.fatal_corruption().is_none());

    let store = TestStore::open_media(&media).unwrap();
    assert_eq!(store.report.transactions_replayed, 3);
    assert_eq!(store.blob.get_committed(), b"two");
    assert_eq!(store.slots.read_slot_committed(0).unwrap(), slot_value(7));
}

#[test]
fn replaying_twice_matches_replaying_once() {
    let media = StoreMedia::new();
    let (store, switch) = open_with_fault(&media, Target::Journal);
    seed(&store);
    switch.fail_truncate(true);
    let position = interrupted(&store).unwrap();
    let enacted = (media.records.data(), media.slots.data(), media.blob.data());

    let mut group = ComponentGroup::new();
    group
        .add(Arc::clone(&store.records) as Arc<dyn TransactionalComponent>)
        .unwrap();
    group
        .add(Arc::clone(&store.slots) as Arc<dyn TransactionalComponent>)
        .unwrap();
    group
        .add(Arc::clone(&store.blob) as Arc<dyn TransactionalComponent>)
        .unwrap();
    let control = JournalControl::new(store.journal(), &group);

    let first = control.replay().unwrap();
    let once = (media.records.data(), media.slots.data(), media.blob.data());
    let second = control.replay().unwrap();
    let twice = (media.records.data(), media.slots.data(), media.blob.data());

    assert_eq!(first, second);
    assert_eq!(first.transactions_replayed, 1);
    assert_eq!(once, enacted);
    assert_eq!(twice, once);
    assert_eq!(store.records.read_committed(position).unwrap(), b"after");
}

#[test]
fn torn_tail_after_commit_is_discarded() {
    let media = StoreMedia::new();
    let (store, switch) = open_with_fault(&media, Target::Journal);
    switch.fail_truncate(true);
    store
        .execute_write(|txn| store.blob.set(txn, b"committed"))
        .unwrap();
    drop(store);

    let ids = ComponentIdAllocator::stable();
    ids.alloc_local("records");
    ids.alloc_local("slots");
    let tail = JournalEntry::buffer(ids.alloc_local(BLOB_NAME), b"torn".to_vec())
        .encode()
        .unwrap();
    let mut bytes = media.journal.data();
    bytes.extend_from_slice(&tail[..tail.len() - 2]);
    media.journal.set_data(bytes);

    let store = TestStore::open_media(&media).unwrap();
    assert!(store.report.torn_tail);
    assert_eq!(store.report.transactions_replayed, 1);
    assert_eq!(store.blob.get_committed(), b"committed");
    assert!(media.journal.data().is_empty());
}

/// Commits a blob value without checkpointing, damages the journal with
/// `corrupt`, and checks that the store refuses to open and leaves the
/// journal as it found it.
fn assert_refuses_to_start(corrupt: impl FnOnce(&mut Vec<u8>)) {
    let media = StoreMedia::new();
    let (store, switch) = open_with_fault(&media, Target::Journal);
    switch.fail_truncate(true);
    store
        .execute_write(|txn| store.blob.set(txn, b"value"))
        .unwrap();
    drop(store);

    let mut bytes = media.journal.data();
    corrupt(&mut bytes);
    media.journal.set_data(bytes.clone());

    let err = TestStore::open_media(&media).err().unwrap();
    assert!(err.is_corruption());
    assert_eq!(media.journal.data(), bytes);
}

#[test]
fn corruption_before_commit_refuses_to_start() {
    // first payload byte of the BUFFER entry
    assert_refuses_to_start(|bytes| bytes[2 + 16 + 4] ^= 0xff);
}

#[test]
fn unknown_entry_type_before_commit_refuses_to_start() {
    assert_refuses_to_start(|bytes| bytes[0] = 0x42);
}

#[test]
fn bad_component_id_length_before_commit_refuses_to_start() {
    assert_refuses_to_start(|bytes| bytes[1] = 0xff);
}

#[test]
fn unframeable_entry_before_commit_refuses_to_start() {
    assert_refuses_to_start(|bytes| {
        bytes[0] = 0x42;
        bytes[1] = 0xff;
    });
}

#[test]
fn file_store_recovers_journal_written_offline() {
    let store = TestStore::file();
    let path = store.path().unwrap().to_path_buf();
    store.shutdown().unwrap();

    let ids = ComponentIdAllocator::stable();
    ids.alloc_local("records");
    ids.alloc_local("slots");
    let blob_id = ids.alloc_local(BLOB_NAME);
    {
        let backend = FileBackend::open(&trellis_core::journal_path(&path)).unwrap();
        let journal = Journal::new(Box::new(backend), true);
        journal
            .write(EntryType::Buffer, Some(&blob_id), b"from the journal")
            .unwrap();
        journal.write_marker(EntryType::Commit).unwrap();
        journal.close().unwrap();
    }

    let store = store.reopen().unwrap();
    assert_eq!(store.report.transactions_replayed, 1);
    assert_eq!(store.blob.get_committed(), b"from the journal");
    let backend = FileBackend::open(&trellis_core::journal_path(&path)).unwrap();
    assert_eq!(backend.size().unwrap(), 0);
}
