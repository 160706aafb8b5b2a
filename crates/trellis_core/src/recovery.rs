//! Journal recovery.
//!
//! Recovery runs once at startup, before any transaction is admitted, and
//! uses two streaming passes over the journal:
//!
//! 1. **Scan**: decode every entry, remember where the last COMMIT ends and
//!    where decoding failed. Nothing is kept in memory but counters.
//! 2. **Replay**: walk the entries up to the end of the last COMMIT, group
//!    them by the marker that closes them, and hand every committed entry to
//!    its component's `recover`.
//!
//! A decode failure in front of the last COMMIT means committed data is
//! unreadable; startup fails. A decode failure after it is the remains of a
//! transaction that never committed and is dropped.

use crate::component::{ComponentGroup, ComponentId};
use crate::error::{CoreError, CoreResult};
use crate::journal::{EntryType, Journal, JournalEntry};
use std::collections::HashSet;
use tracing::{error, info, warn};

/// An entry the scan could not decode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorruptEntry {
    /// Offset of the entry.
    pub offset: u64,
    /// The decode error.
    pub message: String,
    /// Whether the scan could step over the entry.
    pub resumable: bool,
}

/// What a scan found in the journal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JournalScan {
    /// Journal length in bytes.
    pub size: u64,
    /// Entries decoded.
    pub entries: u64,
    /// OBJECT entries.
    pub objects: u64,
    /// BLOCK entries.
    pub blocks: u64,
    /// BUFFER entries.
    pub buffers: u64,
    /// COMMIT markers.
    pub commits: u64,
    /// ABORT markers.
    pub aborts: u64,
    /// CHECKPOINT markers.
    pub checkpoints: u64,
    /// Offset just past the last COMMIT marker.
    pub last_commit_end: Option<u64>,
    /// Entries that failed to decode.
    pub corruptions: Vec<CorruptEntry>,
    /// The journal ends in an incomplete entry.
    pub torn_tail: bool,
}

impl JournalScan {
    /// True if the journal is not in the clean (empty) state.
    #[must_use]
    pub fn needs_recovery(&self) -> bool {
        self.size > 0
    }

    /// The first corrupt entry in front of the last COMMIT, if any.
    #[must_use]
    pub fn fatal_corruption(&self) -> Option<&CorruptEntry> {
        let limit = self.last_commit_end?;
        self.corruptions.iter().find(|c| c.offset < limit)
    }

    fn record(&mut self, entry_type: EntryType) {
        self.entries += 1;
        match entry_type {
            EntryType::Object => self.objects += 1,
            EntryType::Block => self.blocks += 1,
            EntryType::Buffer => self.buffers += 1,
            EntryType::Commit => self.commits += 1,
            EntryType::Abort => self.aborts += 1,
            EntryType::Checkpoint => self.checkpoints += 1,
        }
    }
}

/// Outcome of a replay.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Entries decoded by the scan.
    pub entries_scanned: u64,
    /// Data entries handed to components.
    pub entries_replayed: u64,
    /// COMMIT groups replayed.
    pub transactions_replayed: u64,
    /// Entries dropped: aborted, uncommitted, or for unknown components.
    pub discarded_entries: u64,
    /// The journal ended in an incomplete entry.
    pub torn_tail: bool,
}

/// Replays the journal onto registered components.
pub struct JournalControl<'a> {
    journal: &'a Journal,
    components: &'a ComponentGroup,
}

impl<'a> JournalControl<'a> {
    /// Creates a recovery driver.
    pub fn new(journal: &'a Journal, components: &'a ComponentGroup) -> Self {
        Self {
            journal,
            components,
        }
    }

    /// First pass: decode the whole journal and classify what is there.
    ///
    /// Needs no components, so offline tools can call it too.
    pub fn scan(journal: &Journal) -> CoreResult<JournalScan> {
        let mut scan = JournalScan {
            size: journal.size()?,
            ..JournalScan::default()
        };
        let mut iter = journal.entries(0)?;
        while let Some(item) = iter.next() {
            match item {
                Ok((offset, entry)) => {
                    scan.record(entry.entry_type());
                    if entry.entry_type() == EntryType::Commit {
                        scan.last_commit_end = Some(offset + entry.encoded_len() as u64);
                    }
                }
                Err(e) if e.is_corruption() => {
                    scan.corruptions.push(CorruptEntry {
                        offset: e.corruption_offset().unwrap_or_else(|| iter.offset()),
                        message: e.to_string(),
                        resumable: e.resume_offset().is_some(),
                    });
                }
                Err(e) => return Err(e),
            }
        }
        scan.torn_tail = iter.is_torn();
        drop(iter);

        // Framing after a decode failure is a guess; a COMMIT the iterator
        // missed still makes everything in front of it committed.
        if let Some(first_bad) = scan.corruptions.first().map(|c| c.offset) {
            if let Some(end) = journal.last_commit_marker_end(first_bad + 1)? {
                if scan.last_commit_end.is_none_or(|limit| end > limit) {
                    warn!(offset = first_bad, commit_end = end, "COMMIT marker found behind an undecodable entry");
                    scan.last_commit_end = Some(end);
                }
            }
        }
        Ok(scan)
    }

    /// Replays committed transactions without truncating the journal.
    ///
    /// Replaying the same journal twice leaves base storage as replaying it
    /// once does.
    ///
    /// # Errors
    ///
    /// Returns `JournalCorruption` if an entry in front of the last COMMIT
    /// cannot be decoded, or the first error a component reports.
    pub fn replay(&self) -> CoreResult<RecoveryReport> {
        let scan = Self::scan(self.journal)?;
        let mut report = RecoveryReport {
            entries_scanned: scan.entries,
            torn_tail: scan.torn_tail,
            ..RecoveryReport::default()
        };
        if !scan.needs_recovery() {
            return Ok(report);
        }

        if let Some(bad) = scan.fatal_corruption() {
            error!(offset = bad.offset, error = %bad.message, "corrupt journal entry before last commit");
            return Err(CoreError::journal_corruption(
                bad.offset,
                format!("entry before last COMMIT is unreadable: {}", bad.message),
            ));
        }

        let Some(limit) = scan.last_commit_end else {
            warn!(
                entries = scan.entries,
                size = scan.size,
                "journal holds no committed transaction; discarding"
            );
            report.discarded_entries = scan.entries + scan.corruptions.len() as u64;
            return Ok(report);
        };

        if !scan.corruptions.is_empty() || scan.torn_tail {
            warn!(
                corrupt = scan.corruptions.len(),
                torn = scan.torn_tail,
                "discarding uncommitted journal tail"
            );
        }
        info!(size = scan.size, entries = scan.entries, commits = scan.commits, "replaying journal");

        let mut touched: HashSet<ComponentId> = HashSet::new();
        let mut pending: Vec<JournalEntry> = Vec::new();
        let mut consumed = 0u64;

        let mut iter = self.journal.entries(0)?;
        while iter.offset() < limit {
            let Some(item) = iter.next() else { break };
            let (_, entry) = item?;
            consumed += 1;
            match entry.entry_type() {
                EntryType::Commit => {
                    report.transactions_replayed += 1;
                    for redo in pending.drain(..) {
                        self.apply(&redo, &mut touched, &mut report)?;
                    }
                }
                EntryType::Abort | EntryType::Checkpoint => {
                    report.discarded_entries += pending.len() as u64;
                    pending.clear();
                }
                _ => pending.push(entry),
            }
        }
        drop(iter);
        report.discarded_entries += scan.entries - consumed + scan.corruptions.len() as u64;

        for component in self.components.iter() {
            if touched.contains(component.component_id()) {
                component.finish_recovery()?;
            }
        }
        Ok(report)
    }

    /// Replays committed transactions, then empties the journal.
    pub fn recover(&self) -> CoreResult<RecoveryReport> {
        let report = self.replay()?;
        if !self.journal.is_empty()? {
            self.journal.reset()?;
        }
        info!(
            replayed = report.transactions_replayed,
            entries = report.entries_replayed,
            discarded = report.discarded_entries,
            "journal recovery complete"
        );
        Ok(report)
    }

    fn apply(
        &self,
        entry: &JournalEntry,
        touched: &mut HashSet<ComponentId>,
        report: &mut RecoveryReport,
    ) -> CoreResult<()> {
        let Some(id) = entry.component() else {
            return Ok(());
        };
        let Some(component) = self.components.find(id) else {
            warn!(component = %id, kind = %entry.entry_type(), "journal entry for unknown component; skipping");
            report.discarded_entries += 1;
            return Ok(());
        };
        if touched.insert(id.clone()) {
            component.start_recovery()?;
        }
        component.recover(entry)?;
        report.entries_replayed += 1;
        Ok(())
    }
}
