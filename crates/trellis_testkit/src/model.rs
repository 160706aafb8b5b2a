//! A reference model of a [`TestStore`] for property tests.
//!
//! The model applies the same operations to plain collections. After every
//! transaction the committed state of the store must equal the model.

use crate::fixtures::{slot_value, TestStore, RECORDS_NAME};
use trellis_core::{CoreResult, Transaction, TxnMode};
use trellis_storage::RECORD_HEADER_SIZE;

/// One write against a test store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    /// Appends a record.
    AppendRecord(Vec<u8>),
    /// Writes a slot filled with `fill`. The index is clamped to the number
    /// of slots the transaction sees, so the write either overwrites a slot
    /// or extends the file by one.
    WriteSlot {
        /// Requested slot index.
        index: u64,
        /// Fill byte.
        fill: u8,
    },
    /// Replaces the blob value.
    SetBlob(Vec<u8>),
}

impl StoreOp {
    /// Applies the operation inside `txn`.
    pub fn apply(&self, store: &TestStore, txn: &Transaction<'_>) -> CoreResult<()> {
        match self {
            StoreOp::AppendRecord(bytes) => {
                store.records.write(txn, bytes)?;
            }
            StoreOp::WriteSlot { index, fill } => {
                let index = (*index).min(store.slots.num_slots(txn)?);
                store.slots.write_slot(txn, index, &slot_value(*fill))?;
            }
            StoreOp::SetBlob(value) => store.blob.set(txn, value)?,
        }
        Ok(())
    }
}

/// A write transaction to run: its operations, then commit or abort.
#[derive(Debug, Clone)]
pub struct TxnPlan {
    /// Operations, in order.
    pub ops: Vec<StoreOp>,
    /// Whether the transaction commits.
    pub commit: bool,
}

impl TxnPlan {
    /// Runs the plan as one write transaction on `store`.
    pub fn run(&self, store: &TestStore) -> CoreResult<()> {
        let mut txn = store.begin(TxnMode::Write)?;
        for op in &self.ops {
            op.apply(store, &txn)?;
        }
        if self.commit {
            store.commit(&mut txn)
        } else {
            store.abort(&mut txn)
        }
    }
}

/// The committed state a store should be in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreModel {
    /// Records with their positions.
    pub records: Vec<(u64, Vec<u8>)>,
    /// Length of the record file.
    pub record_len: u64,
    /// Slot contents.
    pub slots: Vec<Vec<u8>>,
    /// Blob value.
    pub blob: Vec<u8>,
}

impl StoreModel {
    /// Creates the model of an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies a plan. Aborted plans leave the model unchanged.
    pub fn apply(&mut self, plan: &TxnPlan) {
        if !plan.commit {
            return;
        }
        for op in &plan.ops {
            match op {
                StoreOp::AppendRecord(bytes) => {
                    self.records.push((self.record_len, bytes.clone()));
                    self.record_len += (RECORD_HEADER_SIZE + bytes.len()) as u64;
                }
                StoreOp::WriteSlot { index, fill } => {
                    let index = (*index).min(self.slots.len() as u64) as usize;
                    let value = slot_value(*fill);
                    if index == self.slots.len() {
                        self.slots.push(value);
                    } else {
                        self.slots[index] = value;
                    }
                }
                StoreOp::SetBlob(value) => self.blob = value.clone(),
            }
        }
    }

    /// Compares the committed state of `store` with the model and describes
    /// the first difference.
    #[must_use]
    pub fn mismatch(&self, store: &TestStore) -> Option<String> {
        let length = store.records.committed_length();
        if length != self.record_len {
            return Some(format!(
                "{RECORDS_NAME} length is {length}, expected {}",
                self.record_len
            ));
        }
        for (position, expected) in &self.records {
            match store.records.read_committed(*position) {
                Ok(bytes) if &bytes == expected => {}
                Ok(bytes) => {
                    return Some(format!("record at {position} is {bytes:?}, expected {expected:?}"))
                }
                Err(e) => return Some(format!("record at {position}: {e}")),
            }
        }

        let count = store.slots.committed_slots();
        if count != self.slots.len() as u64 {
            return Some(format!("{count} slots, expected {}", self.slots.len()));
        }
        for (index, expected) in self.slots.iter().enumerate() {
            match store.slots.read_slot_committed(index as u64) {
                Ok(bytes) if &bytes == expected => {}
                Ok(bytes) => {
                    return Some(format!("slot {index} is {bytes:?}, expected {expected:?}"))
                }
                Err(e) => return Some(format!("slot {index}: {e}")),
            }
        }

        let blob = store.blob.get_committed();
        if blob != self.blob {
            return Some(format!("blob is {blob:?}, expected {:?}", self.blob));
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_tracks_committed_plans() {
        let store = TestStore::memory();
        let mut model = StoreModel::new();
        let plans = [
            TxnPlan {
                ops: vec![
                    StoreOp::AppendRecord(b"a".to_vec()),
                    StoreOp::WriteSlot { index: 5, fill: 1 },
                    StoreOp::SetBlob(b"x".to_vec()),
                ],
                commit: true,
            },
            TxnPlan {
                ops: vec![
                    StoreOp::WriteSlot { index: 0, fill: 2 },
                    StoreOp::AppendRecord(Vec::new()),
                ],
                commit: false,
            },
            TxnPlan {
                ops: vec![
                    StoreOp::WriteSlot { index: 0, fill: 3 },
                    StoreOp::WriteSlot { index: 9, fill: 4 },
                ],
                commit: true,
            },
        ];
        for plan in &plans {
            plan.run(&store).unwrap();
            model.apply(plan);
            assert_eq!(model.mismatch(&store), None);
        }
        assert_eq!(model.slots, vec![slot_value(3), slot_value(4)]);
        assert_eq!(model.record_len, 5);
    }

    #[test]
    fn mismatch_is_reported() {
        let store = TestStore::memory();
        let model = StoreModel {
            blob: b"missing".to_vec(),
            ..StoreModel::default()
        };
        assert!(model.mismatch(&store).unwrap().contains("blob"));
    }
}
