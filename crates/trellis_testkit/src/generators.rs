//! Property-based test generators using proptest.

use crate::model::{StoreOp, TxnPlan};
use proptest::prelude::*;
use trellis_core::{ComponentId, EntryType, JournalEntry, TOKEN_LEN};

/// Strategy for record contents, including the empty record.
pub fn record_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..64)
}

/// Strategy for blob values.
pub fn blob_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..128)
}

/// Strategy for a single store write.
pub fn store_op_strategy() -> impl Strategy<Value = StoreOp> {
    prop_oneof![
        3 => record_strategy().prop_map(StoreOp::AppendRecord),
        2 => (0u64..6, any::<u8>()).prop_map(|(index, fill)| StoreOp::WriteSlot { index, fill }),
        1 => blob_strategy().prop_map(StoreOp::SetBlob),
    ]
}

/// Strategy for one write transaction; most of them commit.
pub fn txn_plan_strategy() -> impl Strategy<Value = TxnPlan> {
    (
        prop::collection::vec(store_op_strategy(), 0..8),
        prop::bool::weighted(0.75),
    )
        .prop_map(|(ops, commit)| TxnPlan { ops, commit })
}

/// Strategy for a run of write transactions.
pub fn txn_plans_strategy(max: usize) -> impl Strategy<Value = Vec<TxnPlan>> {
    prop::collection::vec(txn_plan_strategy(), 1..max)
}

/// Strategy for component ids.
pub fn component_id_strategy() -> impl Strategy<Value = ComponentId> {
    (
        prop::string::string_regex("[a-z]{1,12}").expect("Invalid regex"),
        prop::array::uniform16(any::<u8>()),
    )
        .prop_map(|(label, token): (String, [u8; TOKEN_LEN])| ComponentId::new(label, token))
}

fn data_entry_parts() -> impl Strategy<Value = (ComponentId, Vec<u8>)> {
    (
        component_id_strategy(),
        prop::collection::vec(any::<u8>(), 0..256),
    )
}

/// Strategy for well-formed journal entries of every type.
pub fn journal_entry_strategy() -> impl Strategy<Value = JournalEntry> {
    prop_oneof![
        data_entry_parts().prop_map(|(id, payload)| JournalEntry::object(id, payload)),
        data_entry_parts().prop_map(|(id, payload)| JournalEntry::buffer(id, payload)),
        (data_entry_parts(), any::<u64>())
            .prop_map(|((id, contents), index)| JournalEntry::block(id, index, &contents)),
        prop_oneof![
            Just(EntryType::Commit),
            Just(EntryType::Abort),
            Just(EntryType::Checkpoint),
        ]
        .prop_map(|marker| JournalEntry::marker(marker).expect("markers are valid")),
    ]
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Creates a configuration for tests that open and reopen stores.
    #[must_use]
    pub fn stores() -> Self {
        Self {
            cases: 16,
            max_shrink_iters: 50,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}
