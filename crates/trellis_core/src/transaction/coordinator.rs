//! The transaction coordinator.

use crate::component::{
    ComponentGroup, ComponentId, ComponentIdAllocator, PreparedEntry, TransactionalComponent,
};
use crate::config::CoordinatorConfig;
use crate::error::{CoreError, CoreResult};
use crate::journal::{EntryType, Journal};
use crate::recovery::{JournalControl, RecoveryReport};
use crate::stats::CoordinatorStats;
use crate::transaction::gate::TxnGate;
use crate::transaction::listener::TransactionListener;
use crate::transaction::state::Transaction;
use crate::types::{DataVersion, TxnId, TxnInfo, TxnMode, TxnState};
use parking_lot::{Mutex, RwLock};
use std::ptr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Configuring,
    Running,
    Shutdown,
}

/// Coordinates transactions across registered components over one journal.
///
/// Any number of read transactions may run alongside at most one write
/// transaction. A write commit runs the components through prepare, writes
/// their redo entries and a COMMIT marker to the journal, enacts the change
/// on every component, then empties the journal.
///
/// # Lifecycle
///
/// ```rust
/// use trellis_core::{CoordinatorConfig, Journal, TransactionCoordinator, TxnMode};
///
/// let coordinator = TransactionCoordinator::new(Journal::in_memory(), CoordinatorConfig::default());
/// // register components with `add` here
/// coordinator.start().unwrap();
///
/// let mut txn = coordinator.begin(TxnMode::Write).unwrap();
/// coordinator.commit(&mut txn).unwrap();
/// drop(txn);
///
/// coordinator.shutdown().unwrap();
/// ```
pub struct TransactionCoordinator {
    journal: Journal,
    components: RwLock<ComponentGroup>,
    listeners: RwLock<Vec<Arc<dyn TransactionListener>>>,
    allocator: ComponentIdAllocator,
    config: CoordinatorConfig,
    gate: TxnGate,
    /// Held shared while a transaction captures its snapshot, exclusively
    /// while a commit is enacted.
    enact_lock: RwLock<()>,
    next_txn_id: AtomicU64,
    data_version: AtomicU64,
    lifecycle: Mutex<Lifecycle>,
    halted: RwLock<Option<String>>,
    stats: CoordinatorStats,
}

impl TransactionCoordinator {
    /// Creates a coordinator over a journal.
    ///
    /// Component ids come from the stable allocator, so a store that
    /// registers its components in the same order after a restart gets the
    /// ids its journal entries were written with.
    pub fn new(journal: Journal, config: CoordinatorConfig) -> Self {
        Self::with_allocator(journal, config, ComponentIdAllocator::stable())
    }

    /// Creates a coordinator with a specific id allocator.
    pub fn with_allocator(
        journal: Journal,
        config: CoordinatorConfig,
        allocator: ComponentIdAllocator,
    ) -> Self {
        Self {
            journal,
            components: RwLock::new(ComponentGroup::new()),
            listeners: RwLock::new(Vec::new()),
            allocator,
            config,
            gate: TxnGate::new(),
            enact_lock: RwLock::new(()),
            next_txn_id: AtomicU64::new(1),
            data_version: AtomicU64::new(0),
            lifecycle: Mutex::new(Lifecycle::Configuring),
            halted: RwLock::new(None),
            stats: CoordinatorStats::new(),
        }
    }

    /// Creates a coordinator over an in-memory journal.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(Journal::in_memory(), CoordinatorConfig::default())
    }

    // =========================================================================
    // Configuration
    // =========================================================================

    /// Allocates an id for a component about to be registered.
    pub fn alloc_component_id(&self, label: impl Into<String>) -> ComponentId {
        self.allocator.alloc_local(label)
    }

    /// Returns the id allocator.
    #[must_use]
    pub fn allocator(&self) -> &ComponentIdAllocator {
        &self.allocator
    }

    /// Registers a component. Registration order is prepare and enact order.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationLocked` once the coordinator has started, or
    /// `DuplicateComponent` if the id is taken.
    pub fn add(&self, component: Arc<dyn TransactionalComponent>) -> CoreResult<()> {
        let lifecycle = self.lifecycle.lock();
        if *lifecycle != Lifecycle::Configuring {
            return Err(CoreError::ConfigurationLocked);
        }
        let id = component.component_id().clone();
        self.components.write().add(component)?;
        debug!(component = %id, "component registered");
        Ok(())
    }

    /// Unregisters a component before start.
    pub fn remove(&self, id: &ComponentId) -> CoreResult<Arc<dyn TransactionalComponent>> {
        let lifecycle = self.lifecycle.lock();
        if *lifecycle != Lifecycle::Configuring {
            return Err(CoreError::ConfigurationLocked);
        }
        self.components.write().remove(id)
    }

    /// Returns the registered component ids in registration order.
    #[must_use]
    pub fn components(&self) -> Vec<ComponentId> {
        self.components.read().ids()
    }

    /// Adds a lifecycle listener.
    pub fn add_listener(&self, listener: Arc<dyn TransactionListener>) {
        self.listeners.write().push(listener);
    }

    /// Recovers from the journal, or clean-starts components if it is empty,
    /// then opens the coordinator for transactions.
    ///
    /// # Errors
    ///
    /// Fails if recovery fails; the coordinator then stays unstarted and
    /// the journal is left as it was found.
    pub fn start(&self) -> CoreResult<RecoveryReport> {
        let mut lifecycle = self.lifecycle.lock();
        match *lifecycle {
            Lifecycle::Running => return Err(CoreError::usage("coordinator already started")),
            Lifecycle::Shutdown => return Err(CoreError::Shutdown),
            Lifecycle::Configuring => {}
        }

        let components = self.components.read();
        let report = if self.journal.is_empty()? {
            for component in components.iter() {
                component.clean_start()?;
            }
            RecoveryReport::default()
        } else {
            let report = JournalControl::new(&self.journal, &components).recover()?;
            self.stats.record_recovery(report.transactions_replayed);
            report
        };

        *lifecycle = Lifecycle::Running;
        info!(
            components = components.len(),
            journal = %self.journal.label(),
            "transaction coordinator started"
        );
        Ok(report)
    }

    // =========================================================================
    // Transactions
    // =========================================================================

    /// Begins a transaction.
    ///
    /// A write transaction waits for the writer slot, up to
    /// `begin_write_timeout` if one is configured. A read transaction waits
    /// only while exclusive mode is held.
    pub fn begin(&self, mode: TxnMode) -> CoreResult<Transaction<'_>> {
        let deadline = match mode {
            TxnMode::Read => None,
            TxnMode::Write => self.config.begin_write_timeout.map(|t| Instant::now() + t),
        };
        self.begin_until(mode, deadline)
    }

    /// Begins a transaction, failing with `WouldBlock` after `timeout`.
    pub fn try_begin(&self, mode: TxnMode, timeout: Duration) -> CoreResult<Transaction<'_>> {
        self.begin_until(mode, Some(Instant::now() + timeout))
    }

    fn begin_until(&self, mode: TxnMode, deadline: Option<Instant>) -> CoreResult<Transaction<'_>> {
        self.ensure_running()?;
        if !self.gate.enter(mode, deadline) {
            self.stats.record_would_block();
            return Err(CoreError::WouldBlock);
        }
        let is_write = mode == TxnMode::Write;
        if let Err(e) = self.ensure_running() {
            self.gate.leave(is_write);
            return Err(e);
        }

        let info = {
            let _snapshot = self.enact_lock.read();
            let info = TxnInfo::new(
                TxnId::new(self.next_txn_id.fetch_add(1, Ordering::SeqCst)),
                mode,
                DataVersion::new(self.data_version.load(Ordering::SeqCst)),
            );
            if let Err(e) = begin_components(&self.components.read(), &info) {
                self.gate.leave(is_write);
                return Err(e);
            }
            info
        };

        self.stats.record_begin(mode);
        debug!(txn = %info.id(), mode = %mode, version = %info.data_version(), "transaction begun");
        self.notify(|l| l.on_begin(&info));
        Ok(Transaction::new(self, info))
    }

    /// Commits a transaction.
    ///
    /// For a read transaction this only marks it committed. For the write
    /// transaction it prepares every component, journals their entries and a
    /// COMMIT marker, enacts the change, and checkpoints the journal. The
    /// writer slot is released on return, whatever the outcome.
    ///
    /// # Errors
    ///
    /// Errors before the COMMIT marker is written abort the transaction and
    /// leave storage untouched. Errors after it are fatal
    /// ([`CoreError::is_fatal`]) and halt the coordinator.
    pub fn commit(&self, txn: &mut Transaction<'_>) -> CoreResult<()> {
        self.check_owner(txn)?;
        if txn.state() != TxnState::Active {
            return Err(CoreError::usage(format!(
                "commit of {:?} transaction {}",
                txn.state(),
                txn.id()
            )));
        }
        if !txn.is_write() {
            txn.set_state(TxnState::Committed);
            self.stats.record_commit();
            return Ok(());
        }
        self.ensure_not_halted()?;

        let info = *txn.info();
        let components = self.components.read();

        self.notify(|l| l.on_prepare_start(&info));
        txn.set_state(TxnState::Preparing);
        let prepared = match prepare_components(&components, &info) {
            Ok(prepared) => prepared,
            Err(e) => {
                debug!(txn = %info.id(), error = %e, "prepare failed; aborting");
                self.log_rollback(txn, &components);
                return Err(e);
            }
        };
        self.notify(|l| l.on_prepare_finish(&info));
        self.notify(|l| l.on_commit_start(&info));

        let journaled = !prepared.is_empty();
        if journaled {
            if let Err(e) = self.write_prepared(&prepared) {
                self.log_rollback(txn, &components);
                return Err(e);
            }
            if let Err(e) = self.journal.write_marker(EntryType::Commit) {
                let err = CoreError::commit_outcome_unknown(format!("{}: {e}", info.id()));
                self.halt(&err);
                return Err(err);
            }
        }

        {
            let _enacting = self.enact_lock.write();
            for component in components.iter() {
                if let Err(e) = component.commit_enact(&info) {
                    let err = CoreError::enactment(component.component_id().to_string(), e.to_string());
                    txn.set_state(TxnState::Committed);
                    self.halt(&err);
                    return Err(err);
                }
            }
            self.data_version.fetch_add(1, Ordering::SeqCst);
        }

        if journaled {
            match self.journal.reset() {
                Ok(()) => self.stats.record_checkpoint(),
                Err(e) => {
                    warn!(txn = %info.id(), error = %e, "journal checkpoint failed; entries will be replayed at next start");
                }
            }
        }

        self.gate.release_writer();
        txn.clear_writer();
        txn.set_state(TxnState::Committed);
        self.stats.record_commit();
        debug!(txn = %info.id(), entries = prepared.len(), "transaction committed");
        self.notify(|l| l.on_commit_finish(&info));
        Ok(())
    }

    /// Aborts an active transaction. Components are visited in reverse
    /// registration order and nothing reaches the journal.
    ///
    /// # Errors
    ///
    /// Returns a usage error if the transaction is not active, or the first
    /// error a component reported (the transaction is aborted regardless).
    pub fn abort(&self, txn: &mut Transaction<'_>) -> CoreResult<()> {
        self.check_owner(txn)?;
        if txn.state() != TxnState::Active {
            return Err(CoreError::usage(format!(
                "abort of {:?} transaction {}",
                txn.state(),
                txn.id()
            )));
        }
        let components = self.components.read();
        self.rollback(txn, &components)
    }

    /// Ends a transaction. Idempotent and never fails.
    ///
    /// A write transaction still active here is aborted first.
    pub fn end(&self, txn: &mut Transaction<'_>) {
        if txn.state() == TxnState::Ended || !ptr::eq(txn.coordinator(), self) {
            return;
        }
        let info = *txn.info();
        let components = self.components.read();
        if txn.is_write() && txn.state() == TxnState::Active {
            warn!(txn = %info.id(), "write transaction ended without commit or abort; aborting");
            self.log_rollback(txn, &components);
        }
        for component in components.iter() {
            component.complete(&info);
        }
        drop(components);

        self.gate.leave(txn.holds_writer());
        txn.clear_writer();
        txn.set_state(TxnState::Ended);
        self.stats.record_end(info.mode());
        self.notify(|l| l.on_end(&info));
    }

    /// Runs `f` in a write transaction, committing if it returns `Ok` and
    /// aborting otherwise.
    pub fn execute_write<F, T>(&self, f: F) -> CoreResult<T>
    where
        F: FnOnce(&Transaction<'_>) -> CoreResult<T>,
    {
        let mut txn = self.begin(TxnMode::Write)?;
        match f(&txn) {
            Ok(value) => {
                self.commit(&mut txn)?;
                Ok(value)
            }
            Err(e) => {
                if txn.is_active() {
                    if let Err(abort_err) = self.abort(&mut txn) {
                        warn!(txn = %txn.id(), error = %abort_err, "abort after failed write closure");
                    }
                }
                Err(e)
            }
        }
    }

    /// Runs `f` in a read transaction.
    pub fn execute_read<F, T>(&self, f: F) -> CoreResult<T>
    where
        F: FnOnce(&Transaction<'_>) -> CoreResult<T>,
    {
        let mut txn = self.begin(TxnMode::Read)?;
        let value = f(&txn)?;
        self.commit(&mut txn)?;
        Ok(value)
    }

    // =========================================================================
    // Exclusive mode and writer blocking
    // =========================================================================

    /// Waits for every transaction to end and holds back new ones until
    /// [`finish_exclusive_mode`](Self::finish_exclusive_mode).
    ///
    /// Calling this from a thread with an open transaction deadlocks.
    pub fn start_exclusive_mode(&self) -> CoreResult<()> {
        self.ensure_running()?;
        self.gate.start_exclusive(None);
        debug!("exclusive mode started");
        Ok(())
    }

    /// Enters exclusive mode only if no transaction is active.
    pub fn try_exclusive_mode(&self) -> CoreResult<bool> {
        self.ensure_running()?;
        Ok(self.gate.start_exclusive(Some(Instant::now())))
    }

    /// Leaves exclusive mode.
    pub fn finish_exclusive_mode(&self) -> CoreResult<()> {
        if !self.gate.finish_exclusive() {
            return Err(CoreError::usage("exclusive mode is not held"));
        }
        debug!("exclusive mode finished");
        Ok(())
    }

    /// Runs `f` in exclusive mode.
    pub fn execute_exclusive<F, T>(&self, f: F) -> CoreResult<T>
    where
        F: FnOnce() -> T,
    {
        self.start_exclusive_mode()?;
        let value = f();
        self.finish_exclusive_mode()?;
        Ok(value)
    }

    /// Takes the writer slot without a transaction. Readers continue.
    pub fn block_writers(&self) -> CoreResult<()> {
        self.ensure_running()?;
        self.gate.block_writers(None);
        Ok(())
    }

    /// Takes the writer slot only if it is free.
    pub fn try_block_writers(&self) -> CoreResult<bool> {
        self.ensure_running()?;
        Ok(self.gate.block_writers(Some(Instant::now())))
    }

    /// Gives back the slot taken by [`block_writers`](Self::block_writers).
    pub fn enable_writers(&self) -> CoreResult<()> {
        if !self.gate.enable_writers() {
            return Err(CoreError::usage("writers are not blocked"));
        }
        Ok(())
    }

    /// Runs `f` while holding the writer slot.
    pub fn execute_as_writer<F, T>(&self, f: F) -> CoreResult<T>
    where
        F: FnOnce() -> T,
    {
        self.block_writers()?;
        let value = f();
        self.enable_writers()?;
        Ok(value)
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Number of successful write commits.
    #[must_use]
    pub fn data_version(&self) -> DataVersion {
        DataVersion::new(self.data_version.load(Ordering::SeqCst))
    }

    /// Returns the coordinator counters.
    #[must_use]
    pub fn stats(&self) -> &CoordinatorStats {
        &self.stats
    }

    /// Returns the journal.
    #[must_use]
    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// True once [`start`](Self::start) has succeeded and before shutdown.
    #[must_use]
    pub fn is_running(&self) -> bool {
        *self.lifecycle.lock() == Lifecycle::Running
    }

    /// True after a fatal error.
    #[must_use]
    pub fn is_halted(&self) -> bool {
        self.halted.read().is_some()
    }

    /// The fatal error that halted the coordinator, if any.
    #[must_use]
    pub fn halt_reason(&self) -> Option<String> {
        self.halted.read().clone()
    }

    /// Transactions begun and not yet ended.
    #[must_use]
    pub fn active_transactions(&self) -> usize {
        self.gate.active()
    }

    /// Shuts the coordinator down. Idempotent.
    ///
    /// Components get their `shutdown` call and the journal is synced and
    /// closed. Transactions still open are left to end on their own; no new
    /// ones are admitted.
    pub fn shutdown(&self) -> CoreResult<()> {
        let mut lifecycle = self.lifecycle.lock();
        if *lifecycle == Lifecycle::Shutdown {
            return Ok(());
        }
        let active = self.gate.active();
        if active > 0 {
            warn!(active, "shutting down with active transactions");
        }

        let mut first_err = None;
        for component in self.components.read().iter() {
            if let Err(e) = component.shutdown() {
                warn!(component = %component.component_id(), error = %e, "component shutdown failed");
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
        }
        *lifecycle = Lifecycle::Shutdown;
        drop(lifecycle);

        self.journal.close()?;
        info!("transaction coordinator shut down");
        first_err.map_or(Ok(()), Err)
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn ensure_running(&self) -> CoreResult<()> {
        self.ensure_not_halted()?;
        match *self.lifecycle.lock() {
            Lifecycle::Configuring => Err(CoreError::NotStarted),
            Lifecycle::Shutdown => Err(CoreError::Shutdown),
            Lifecycle::Running => Ok(()),
        }
    }

    fn ensure_not_halted(&self) -> CoreResult<()> {
        match self.halted.read().as_ref() {
            Some(reason) => Err(CoreError::Halted {
                reason: reason.clone(),
            }),
            None => Ok(()),
        }
    }

    fn check_owner(&self, txn: &Transaction<'_>) -> CoreResult<()> {
        if ptr::eq(txn.coordinator(), self) {
            Ok(())
        } else {
            Err(txn.abort_with(CoreError::usage(format!(
                "transaction {} belongs to another coordinator",
                txn.id()
            ))))
        }
    }

    /// Appends prepared entries, cutting the journal back to where it was on
    /// failure.
    fn write_prepared(&self, prepared: &[(ComponentId, PreparedEntry)]) -> CoreResult<()> {
        let start = self.journal.position()?;
        for (id, entry) in prepared {
            if let Err(e) = self.journal.write(entry.entry_type(), Some(id), entry.payload()) {
                if let Err(te) = self.journal.truncate(start) {
                    warn!(error = %te, offset = start, "could not cut back partial journal write");
                }
                return Err(e);
            }
        }
        Ok(())
    }

    fn rollback(&self, txn: &Transaction<'_>, components: &ComponentGroup) -> CoreResult<()> {
        let info = *txn.info();
        self.notify(|l| l.on_abort_start(&info));
        let mut first_err = None;
        for component in components.iter().rev() {
            if let Err(e) = component.abort(&info) {
                warn!(component = %component.component_id(), txn = %info.id(), error = %e, "component abort failed");
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
        }
        if txn.holds_writer() {
            self.gate.release_writer();
            txn.clear_writer();
        }
        txn.set_state(TxnState::Aborted);
        self.stats.record_abort();
        debug!(txn = %info.id(), "transaction aborted");
        self.notify(|l| l.on_abort_finish(&info));
        first_err.map_or(Ok(()), Err)
    }

    fn log_rollback(&self, txn: &Transaction<'_>, components: &ComponentGroup) {
        if let Err(e) = self.rollback(txn, components) {
            warn!(txn = %txn.id(), error = %e, "abort reported an error");
        }
    }

    /// Aborts a transaction whose operation an adapter rejected.
    pub(crate) fn abort_rejected(&self, txn: &Transaction<'_>, err: &CoreError) {
        debug!(txn = %txn.id(), error = %err, "operation rejected; aborting transaction");
        let components = self.components.read();
        self.log_rollback(txn, &components);
    }

    fn halt(&self, err: &CoreError) {
        error!(error = %err, "fatal commit failure; coordinator halted until restart and recovery");
        self.stats.record_fatal();
        let mut halted = self.halted.write();
        if halted.is_none() {
            *halted = Some(err.to_string());
        }
    }

    fn notify(&self, event: impl Fn(&dyn TransactionListener)) {
        for listener in self.listeners.read().iter() {
            event(listener.as_ref());
        }
    }
}

/// Calls `begin` on every component; on failure, unwinds the ones already begun.
fn begin_components(components: &ComponentGroup, info: &TxnInfo) -> CoreResult<()> {
    let mut begun: Vec<&Arc<dyn TransactionalComponent>> = Vec::new();
    for component in components.iter() {
        if let Err(e) = component.begin(info) {
            for done in begun.iter().rev() {
                if let Err(abort_err) = done.abort(info) {
                    warn!(component = %done.component_id(), error = %abort_err, "abort after failed begin");
                }
                done.complete(info);
            }
            component.complete(info);
            return Err(e);
        }
        begun.push(component);
    }
    Ok(())
}

fn prepare_components(
    components: &ComponentGroup,
    info: &TxnInfo,
) -> CoreResult<Vec<(ComponentId, PreparedEntry)>> {
    let mut prepared = Vec::new();
    for component in components.iter() {
        let id = component.component_id();
        for entry in component.commit_prepare(info)? {
            prepared.push((id.clone(), entry));
        }
    }
    Ok(prepared)
}

impl std::fmt::Debug for TransactionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionCoordinator")
            .field("components", &self.components.read().len())
            .field("data_version", &self.data_version())
            .field("active", &self.gate.active())
            .field("halted", &self.is_halted())
            .finish_non_exhaustive()
    }
}
