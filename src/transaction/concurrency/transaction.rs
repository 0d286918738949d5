// Represents an active database transaction.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;

use crate::common::types::{Lsn, PageId, Rid, TableOid, TxnId};
use crate::transaction::concurrency::lock_manager::LockMode;
use crate::transaction::wal::log_manager::{LogManager, LogRecordType};

/// Transaction isolation levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
}

/// Transaction states. A transaction grows its lock set until the first
/// unlock of a shared or exclusive lock flips it to shrinking (by isolation
/// level); committed and aborted are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Growing,
    Shrinking,
    Committed,
    Aborted,
}

/// Errors that can occur during transaction lifecycle processing
#[derive(Error, Debug)]
pub enum TransactionError {
    #[error("Transaction {0} is already committed or aborted")]
    InvalidState(TxnId),
}

/// An active transaction: its identity, isolation level, two-phase-locking
/// state, the lock sets the lock manager maintains on its behalf, and the
/// queue of page latches it holds while inside a B+Tree operation.
pub struct Transaction {
    id: TxnId,
    isolation_level: IsolationLevel,
    state: Mutex<TransactionState>,

    log_manager: Arc<LogManager>,
    first_lsn: AtomicU64,
    last_lsn: AtomicU64,

    shared_table_lock_set: Mutex<HashSet<TableOid>>,
    exclusive_table_lock_set: Mutex<HashSet<TableOid>>,
    intention_shared_table_lock_set: Mutex<HashSet<TableOid>>,
    intention_exclusive_table_lock_set: Mutex<HashSet<TableOid>>,
    shared_intention_exclusive_table_lock_set: Mutex<HashSet<TableOid>>,

    shared_row_lock_set: Mutex<HashMap<TableOid, HashSet<Rid>>>,
    exclusive_row_lock_set: Mutex<HashMap<TableOid, HashSet<Rid>>>,

    latched_pages: Mutex<VecDeque<PageId>>,
}

impl Transaction {
    pub fn new(id: TxnId, log_manager: Arc<LogManager>, isolation_level: IsolationLevel) -> Self {
        Self {
            id,
            isolation_level,
            state: Mutex::new(TransactionState::Growing),
            log_manager,
            first_lsn: AtomicU64::new(0),
            last_lsn: AtomicU64::new(0),
            shared_table_lock_set: Mutex::new(HashSet::new()),
            exclusive_table_lock_set: Mutex::new(HashSet::new()),
            intention_shared_table_lock_set: Mutex::new(HashSet::new()),
            intention_exclusive_table_lock_set: Mutex::new(HashSet::new()),
            shared_intention_exclusive_table_lock_set: Mutex::new(HashSet::new()),
            shared_row_lock_set: Mutex::new(HashMap::new()),
            exclusive_row_lock_set: Mutex::new(HashMap::new()),
            latched_pages: Mutex::new(VecDeque::new()),
        }
    }

    pub fn id(&self) -> TxnId {
        self.id
    }

    pub fn isolation_level(&self) -> IsolationLevel {
        self.isolation_level
    }

    pub fn state(&self) -> TransactionState {
        *self.state.lock()
    }

    pub fn set_state(&self, state: TransactionState) {
        *self.state.lock() = state;
    }

    /// Write the BEGIN record.
    pub fn begin(&self) -> Lsn {
        let lsn = self.log_manager.append_record(self.id, 0, LogRecordType::Begin);
        self.first_lsn.store(lsn, Ordering::SeqCst);
        self.last_lsn.store(lsn, Ordering::SeqCst);
        lsn
    }

    /// Write the COMMIT record and move to the committed state.
    pub fn commit(&self) -> Result<Lsn, TransactionError> {
        let mut state = self.state.lock();
        if matches!(*state, TransactionState::Committed | TransactionState::Aborted) {
            return Err(TransactionError::InvalidState(self.id));
        }
        let prev = self.last_lsn.load(Ordering::SeqCst);
        let lsn = self
            .log_manager
            .append_record(self.id, prev, LogRecordType::Commit);
        self.last_lsn.store(lsn, Ordering::SeqCst);
        *state = TransactionState::Committed;
        Ok(lsn)
    }

    /// Write the ABORT record and move to the aborted state. Aborting a
    /// transaction the deadlock detector already marked aborted is fine;
    /// only committed transactions cannot abort.
    pub fn abort(&self) -> Result<Lsn, TransactionError> {
        let mut state = self.state.lock();
        if *state == TransactionState::Committed {
            return Err(TransactionError::InvalidState(self.id));
        }
        let prev = self.last_lsn.load(Ordering::SeqCst);
        let lsn = self
            .log_manager
            .append_record(self.id, prev, LogRecordType::Abort);
        self.last_lsn.store(lsn, Ordering::SeqCst);
        *state = TransactionState::Aborted;
        Ok(lsn)
    }

    pub fn first_lsn(&self) -> Lsn {
        self.first_lsn.load(Ordering::SeqCst)
    }

    pub fn last_lsn(&self) -> Lsn {
        self.last_lsn.load(Ordering::SeqCst)
    }

    /// The table-lock set for one lock mode. The lock manager owns the
    /// protocol; the sets live here so commit/abort can walk them.
    pub fn table_lock_set(&self, mode: LockMode) -> &Mutex<HashSet<TableOid>> {
        match mode {
            LockMode::Shared => &self.shared_table_lock_set,
            LockMode::Exclusive => &self.exclusive_table_lock_set,
            LockMode::IntentionShared => &self.intention_shared_table_lock_set,
            LockMode::IntentionExclusive => &self.intention_exclusive_table_lock_set,
            LockMode::SharedIntentionExclusive => &self.shared_intention_exclusive_table_lock_set,
        }
    }

    /// The row-lock map for one lock mode; rows only come in S and X.
    pub fn row_lock_set(&self, mode: LockMode) -> &Mutex<HashMap<TableOid, HashSet<Rid>>> {
        match mode {
            LockMode::Shared => &self.shared_row_lock_set,
            LockMode::Exclusive => &self.exclusive_row_lock_set,
            _ => unreachable!("intention locks are never taken on rows"),
        }
    }

    /// Does this transaction hold a table lock on `oid` in any of `modes`?
    pub fn holds_table_lock_in(&self, oid: TableOid, modes: &[LockMode]) -> bool {
        modes
            .iter()
            .any(|&mode| self.table_lock_set(mode).lock().contains(&oid))
    }

    /// Does this transaction still hold any row lock under table `oid`?
    pub fn holds_row_locks_on(&self, oid: TableOid) -> bool {
        [LockMode::Shared, LockMode::Exclusive].iter().any(|&mode| {
            self.row_lock_set(mode)
                .lock()
                .get(&oid)
                .is_some_and(|rids| !rids.is_empty())
        })
    }

    /// Record a page latch taken by a B+Tree operation on our behalf.
    pub fn record_page_latch(&self, page_id: PageId) {
        self.latched_pages.lock().push_back(page_id);
    }

    /// Drop a page latch record once the latch is released.
    pub fn forget_page_latch(&self, page_id: PageId) {
        let mut latched = self.latched_pages.lock();
        if let Some(pos) = latched.iter().position(|&p| p == page_id) {
            latched.remove(pos);
        }
    }

    /// Page ids of latches currently held, oldest first.
    pub fn latched_pages(&self) -> Vec<PageId> {
        self.latched_pages.lock().iter().copied().collect()
    }
}
