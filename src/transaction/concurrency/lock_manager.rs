use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use thiserror::Error;

use crate::common::types::{Rid, TableOid, TxnId};
use crate::transaction::concurrency::transaction::{
    IsolationLevel, Transaction, TransactionState,
};
use crate::transaction::concurrency::waits_for::WaitsFor;

/// How often the background detector scans the waits-for graph.
pub const DEADLOCK_DETECTION_INTERVAL: Duration = Duration::from_millis(50);

/// Multi-granularity lock modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    IntentionShared,
    IntentionExclusive,
    Shared,
    SharedIntentionExclusive,
    Exclusive,
}

/// Why a lock call aborted its transaction.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    #[error("lock requested while in the shrinking state")]
    LockOnShrinking,
    #[error("another transaction is already upgrading on this queue")]
    UpgradeConflict,
    #[error("requested lock upgrade is incompatible")]
    IncompatibleUpgrade,
    #[error("shared lock requested under read-uncommitted isolation")]
    LockSharedOnReadUncommitted,
    #[error("intention lock requested on a row")]
    AttemptedIntentionLockOnRow,
    #[error("row lock requested without an appropriate table lock")]
    TableLockNotPresent,
    #[error("unlock requested but no lock is held")]
    AttemptedUnlockButNoLockHeld,
    #[error("table unlocked before its row locks")]
    TableUnlockedBeforeUnlockingRows,
    #[error("chosen as deadlock victim")]
    Deadlock,
}

/// The "thrown" abort surfaced by lock calls. The transaction's state has
/// already been set to aborted when this is returned.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("transaction {txn_id} aborted: {reason}")]
pub struct TransactionAbortError {
    pub txn_id: TxnId,
    pub reason: AbortReason,
}

/// One table- or row-lock request as it sits in its queue.
struct LockRequest {
    txn_id: TxnId,
    mode: LockMode,
    #[allow(dead_code)]
    oid: TableOid,
    #[allow(dead_code)]
    rid: Option<Rid>,
    granted: bool,
}

#[derive(Default)]
struct QueueInner {
    requests: Vec<LockRequest>,
    /// Transaction currently upgrading on this queue. While set, no other
    /// waiter may be granted.
    upgrading: Option<TxnId>,
}

#[derive(Default)]
struct LockRequestQueue {
    inner: Mutex<QueueInner>,
    cv: Condvar,
}

/// Hierarchical lock manager: table and row locks in five modes, lock
/// upgrades, isolation-level gating, and cycle-breaking deadlock detection
/// run by a background thread.
///
/// The two map mutexes only guard map growth; each queue carries its own
/// mutex and condvar, and waiters re-check grantability (and the terminate
/// slot) under the queue mutex on every wake-up.
pub struct LockManager {
    table_lock_map: Arc<Mutex<HashMap<TableOid, Arc<LockRequestQueue>>>>,
    row_lock_map: Arc<Mutex<HashMap<Rid, Arc<LockRequestQueue>>>>,
    waits_for: Arc<WaitsFor>,
    detector_running: Arc<AtomicBool>,
    detector: Mutex<Option<JoinHandle<()>>>,
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

impl LockManager {
    pub fn new() -> Self {
        Self::with_detection_interval(DEADLOCK_DETECTION_INTERVAL)
    }

    pub fn with_detection_interval(interval: Duration) -> Self {
        let manager = Self {
            table_lock_map: Arc::new(Mutex::new(HashMap::new())),
            row_lock_map: Arc::new(Mutex::new(HashMap::new())),
            waits_for: Arc::new(WaitsFor::new()),
            detector_running: Arc::new(AtomicBool::new(true)),
            detector: Mutex::new(None),
        };
        manager.spawn_detector(interval);
        manager
    }

    /// Acquire a table lock, blocking until grantable. Re-requesting a held
    /// mode succeeds immediately; requesting a different held mode attempts
    /// an upgrade.
    pub fn lock_table(
        &self,
        txn: &Transaction,
        mode: LockMode,
        oid: TableOid,
    ) -> Result<(), TransactionAbortError> {
        self.validate_lock_request(txn, mode, false)?;
        let queue = Self::queue_for(&self.table_lock_map, oid);
        self.lock_on_queue(txn, mode, oid, None, &queue)
    }

    /// Release a table lock. All row locks on the table must have been
    /// released first.
    pub fn unlock_table(
        &self,
        txn: &Transaction,
        oid: TableOid,
    ) -> Result<(), TransactionAbortError> {
        let queue = self
            .table_lock_map
            .lock()
            .get(&oid)
            .cloned()
            .ok_or_else(|| self.abort(txn, AbortReason::AttemptedUnlockButNoLockHeld))?;

        let mut inner = queue.inner.lock();
        let pos = inner
            .requests
            .iter()
            .position(|r| r.txn_id == txn.id() && r.granted)
            .ok_or_else(|| self.abort(txn, AbortReason::AttemptedUnlockButNoLockHeld))?;
        if txn.holds_row_locks_on(oid) {
            return Err(self.abort(txn, AbortReason::TableUnlockedBeforeUnlockingRows));
        }

        let mode = inner.requests.remove(pos).mode;
        txn.table_lock_set(mode).lock().remove(&oid);
        Self::update_state_on_unlock(txn, mode);
        drop(inner);
        queue.cv.notify_all();
        Ok(())
    }

    /// Acquire a row lock. Rows support only S and X, and require a
    /// suitable table lock to be held already.
    pub fn lock_row(
        &self,
        txn: &Transaction,
        mode: LockMode,
        oid: TableOid,
        rid: Rid,
    ) -> Result<(), TransactionAbortError> {
        self.validate_lock_request(txn, mode, true)?;

        let required: &[LockMode] = match mode {
            LockMode::Exclusive => &[
                LockMode::Exclusive,
                LockMode::IntentionExclusive,
                LockMode::SharedIntentionExclusive,
            ],
            _ => &[
                LockMode::Shared,
                LockMode::IntentionShared,
                LockMode::Exclusive,
                LockMode::IntentionExclusive,
                LockMode::SharedIntentionExclusive,
            ],
        };
        if !txn.holds_table_lock_in(oid, required) {
            return Err(self.abort(txn, AbortReason::TableLockNotPresent));
        }

        let queue = Self::queue_for(&self.row_lock_map, rid);
        self.lock_on_queue(txn, mode, oid, Some(rid), &queue)
    }

    /// Release a row lock.
    pub fn unlock_row(
        &self,
        txn: &Transaction,
        oid: TableOid,
        rid: Rid,
    ) -> Result<(), TransactionAbortError> {
        let queue = self
            .row_lock_map
            .lock()
            .get(&rid)
            .cloned()
            .ok_or_else(|| self.abort(txn, AbortReason::AttemptedUnlockButNoLockHeld))?;

        let mut inner = queue.inner.lock();
        let pos = inner
            .requests
            .iter()
            .position(|r| r.txn_id == txn.id() && r.granted)
            .ok_or_else(|| self.abort(txn, AbortReason::AttemptedUnlockButNoLockHeld))?;

        let mode = inner.requests.remove(pos).mode;
        if let Some(rids) = txn.row_lock_set(mode).lock().get_mut(&oid) {
            rids.remove(&rid);
        }
        Self::update_state_on_unlock(txn, mode);
        drop(inner);
        queue.cv.notify_all();
        Ok(())
    }

    /// Release every lock a finished transaction still holds: rows first,
    /// then tables. Terminal transactions see no state transitions.
    pub fn release_all_locks(&self, txn: &Transaction) {
        debug_assert!(matches!(
            txn.state(),
            TransactionState::Committed | TransactionState::Aborted
        ));
        for mode in [LockMode::Shared, LockMode::Exclusive] {
            let rows: Vec<(TableOid, Rid)> = txn
                .row_lock_set(mode)
                .lock()
                .iter()
                .flat_map(|(&oid, rids)| rids.iter().map(move |&rid| (oid, rid)))
                .collect();
            for (oid, rid) in rows {
                if let Err(e) = self.unlock_row(txn, oid, rid) {
                    log::warn!("releasing row lock {rid} of txn {}: {e}", txn.id());
                }
            }
        }
        for mode in [
            LockMode::Shared,
            LockMode::Exclusive,
            LockMode::IntentionShared,
            LockMode::IntentionExclusive,
            LockMode::SharedIntentionExclusive,
        ] {
            let tables: Vec<TableOid> = txn.table_lock_set(mode).lock().iter().copied().collect();
            for oid in tables {
                if let Err(e) = self.unlock_table(txn, oid) {
                    log::warn!("releasing table lock {oid} of txn {}: {e}", txn.id());
                }
            }
        }
    }

    /// Shared queue protocol for tables and rows.
    fn lock_on_queue(
        &self,
        txn: &Transaction,
        mode: LockMode,
        oid: TableOid,
        rid: Option<Rid>,
        queue: &Arc<LockRequestQueue>,
    ) -> Result<(), TransactionAbortError> {
        let txn_id = txn.id();
        let mut inner = queue.inner.lock();

        // Re-entry or upgrade?
        let mut upgrading_from = None;
        match inner.requests.iter().position(|r| r.txn_id == txn_id) {
            Some(pos) => {
                let existing = &inner.requests[pos];
                assert!(existing.granted, "transaction waiting in two queues");
                let existing_mode = existing.mode;
                if existing_mode == mode {
                    return Ok(());
                }
                if inner.upgrading.is_some() {
                    return Err(self.abort(txn, AbortReason::UpgradeConflict));
                }
                let valid = match rid {
                    // Rows only know S -> X.
                    Some(_) => existing_mode == LockMode::Shared && mode == LockMode::Exclusive,
                    None => Self::valid_upgrade(existing_mode, mode),
                };
                if !valid {
                    return Err(self.abort(txn, AbortReason::IncompatibleUpgrade));
                }
                upgrading_from = Some(existing_mode);
                inner.upgrading = Some(txn_id);
            }
            None => {
                inner.requests.push(LockRequest {
                    txn_id,
                    mode,
                    oid,
                    rid,
                    granted: false,
                });
            }
        }

        // Wait until grantable, re-checking the terminate slot and the
        // blocking set under the queue mutex on every wake-up.
        loop {
            if self.waits_for.take_victim_if(txn_id) {
                if let Some(pos) = inner
                    .requests
                    .iter()
                    .position(|r| r.txn_id == txn_id && !r.granted)
                {
                    inner.requests.remove(pos);
                }
                if inner.upgrading == Some(txn_id) {
                    inner.upgrading = None;
                }
                drop(inner);
                queue.cv.notify_all();
                log::warn!("transaction {txn_id} aborted as deadlock victim");
                return Err(self.abort(txn, AbortReason::Deadlock));
            }

            let may_grant = match inner.upgrading {
                // An upgrader has absolute priority on the queue.
                Some(upgrader) => upgrader == txn_id && !Self::is_blocked(&inner, txn_id, mode),
                None => !Self::is_blocked(&inner, txn_id, mode),
            };
            if may_grant {
                break;
            }

            let blockers = Self::blocking_set(&inner, txn_id, mode);
            self.waits_for.set_waits(txn_id, blockers);
            queue.cv.wait(&mut inner);
        }
        self.waits_for.clear_waits(txn_id);

        // Grant: mutate the transaction's lock sets under the queue mutex.
        if let Some(old_mode) = upgrading_from {
            match rid {
                Some(rid) => {
                    if let Some(rids) = txn.row_lock_set(old_mode).lock().get_mut(&oid) {
                        rids.remove(&rid);
                    }
                }
                None => {
                    txn.table_lock_set(old_mode).lock().remove(&oid);
                }
            }
            inner.upgrading = None;
        }
        let request = inner
            .requests
            .iter_mut()
            .find(|r| r.txn_id == txn_id)
            .expect("request disappeared while waiting");
        request.mode = mode;
        request.granted = true;
        match rid {
            Some(rid) => {
                txn.row_lock_set(mode)
                    .lock()
                    .entry(oid)
                    .or_default()
                    .insert(rid);
            }
            None => {
                txn.table_lock_set(mode).lock().insert(oid);
            }
        }
        drop(inner);
        // Another waiter may now be grantable alongside us.
        queue.cv.notify_all();
        Ok(())
    }

    fn queue_for<Key: std::hash::Hash + Eq + Copy>(
        map: &Mutex<HashMap<Key, Arc<LockRequestQueue>>>,
        key: Key,
    ) -> Arc<LockRequestQueue> {
        map.lock().entry(key).or_default().clone()
    }

    /// Is some other granted request (or a foreign upgrader) in the way?
    fn is_blocked(inner: &QueueInner, txn_id: TxnId, mode: LockMode) -> bool {
        if inner.upgrading.is_some_and(|u| u != txn_id) {
            return true;
        }
        inner
            .requests
            .iter()
            .any(|r| r.granted && r.txn_id != txn_id && !Self::compatible(r.mode, mode))
    }

    /// Transactions currently blocking `txn_id` on this queue.
    fn blocking_set(inner: &QueueInner, txn_id: TxnId, mode: LockMode) -> BTreeSet<TxnId> {
        let mut blockers: BTreeSet<TxnId> = inner
            .requests
            .iter()
            .filter(|r| r.granted && r.txn_id != txn_id && !Self::compatible(r.mode, mode))
            .map(|r| r.txn_id)
            .collect();
        if let Some(upgrader) = inner.upgrading {
            if upgrader != txn_id {
                blockers.insert(upgrader);
            }
        }
        blockers
    }

    /// Symmetric lock-mode compatibility matrix.
    pub fn compatible(held: LockMode, requested: LockMode) -> bool {
        use LockMode::*;
        match (held, requested) {
            (IntentionShared, Exclusive) | (Exclusive, IntentionShared) => false,
            (IntentionShared, _) | (_, IntentionShared) => true,
            (IntentionExclusive, IntentionExclusive) => true,
            (Shared, Shared) => true,
            _ => false,
        }
    }

    /// Permitted upgrades: IS -> {S, X, SIX}, S -> {X, SIX},
    /// IX -> {X, SIX}, SIX -> X.
    fn valid_upgrade(from: LockMode, to: LockMode) -> bool {
        use LockMode::*;
        match from {
            IntentionShared => matches!(to, Shared | Exclusive | SharedIntentionExclusive),
            Shared | IntentionExclusive => matches!(to, Exclusive | SharedIntentionExclusive),
            SharedIntentionExclusive => to == Exclusive,
            Exclusive => false,
        }
    }

    /// Isolation-level gating applied before a request enters its queue.
    fn validate_lock_request(
        &self,
        txn: &Transaction,
        mode: LockMode,
        is_row: bool,
    ) -> Result<(), TransactionAbortError> {
        use LockMode::*;
        if is_row && !matches!(mode, Shared | Exclusive) {
            return Err(self.abort(txn, AbortReason::AttemptedIntentionLockOnRow));
        }
        let shrinking = txn.state() == TransactionState::Shrinking;
        match txn.isolation_level() {
            IsolationLevel::RepeatableRead => {
                if shrinking {
                    return Err(self.abort(txn, AbortReason::LockOnShrinking));
                }
            }
            IsolationLevel::ReadCommitted => {
                if shrinking && !matches!(mode, Shared | IntentionShared) {
                    return Err(self.abort(txn, AbortReason::LockOnShrinking));
                }
            }
            IsolationLevel::ReadUncommitted => {
                if matches!(mode, Shared | IntentionShared | SharedIntentionExclusive) {
                    return Err(self.abort(txn, AbortReason::LockSharedOnReadUncommitted));
                }
                if shrinking {
                    return Err(self.abort(txn, AbortReason::LockOnShrinking));
                }
            }
        }
        Ok(())
    }

    /// Only unlocking S or X moves the two-phase-locking state, and only
    /// for live transactions.
    fn update_state_on_unlock(txn: &Transaction, mode: LockMode) {
        match txn.state() {
            TransactionState::Committed | TransactionState::Aborted => return,
            TransactionState::Growing | TransactionState::Shrinking => {}
        }
        if !matches!(mode, LockMode::Shared | LockMode::Exclusive) {
            return;
        }
        match txn.isolation_level() {
            IsolationLevel::RepeatableRead => txn.set_state(TransactionState::Shrinking),
            IsolationLevel::ReadCommitted => {
                if mode == LockMode::Exclusive {
                    txn.set_state(TransactionState::Shrinking);
                }
            }
            IsolationLevel::ReadUncommitted => {
                if mode == LockMode::Exclusive {
                    txn.set_state(TransactionState::Shrinking);
                } else {
                    unreachable!("shared lock held under read uncommitted");
                }
            }
        }
    }

    /// Mark the transaction aborted and build the error to surface.
    fn abort(&self, txn: &Transaction, reason: AbortReason) -> TransactionAbortError {
        txn.set_state(TransactionState::Aborted);
        TransactionAbortError {
            txn_id: txn.id(),
            reason,
        }
    }

    fn spawn_detector(&self, interval: Duration) {
        let waits_for = Arc::clone(&self.waits_for);
        let running = Arc::clone(&self.detector_running);
        let table_map = Arc::clone(&self.table_lock_map);
        let row_map = Arc::clone(&self.row_lock_map);
        let handle = std::thread::Builder::new()
            .name("deadlock-detector".into())
            .spawn(move || {
                while running.load(Ordering::Relaxed) {
                    std::thread::sleep(interval);
                    if !running.load(Ordering::Relaxed) {
                        break;
                    }
                    if let Some(victim) = waits_for.detect() {
                        log::warn!("deadlock detected, victim is transaction {victim}");
                        // Wake every queue; the victim consumes the
                        // terminate slot on its next re-check.
                        for queue in table_map.lock().values() {
                            queue.cv.notify_all();
                        }
                        for queue in row_map.lock().values() {
                            queue.cv.notify_all();
                        }
                    }
                }
            })
            .expect("failed to spawn deadlock detector");
        *self.detector.lock() = Some(handle);
    }
}

impl Drop for LockManager {
    fn drop(&mut self) {
        self.detector_running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.detector.lock().take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compatibility_matrix_is_symmetric() {
        use LockMode::*;
        let modes = [
            IntentionShared,
            IntentionExclusive,
            Shared,
            SharedIntentionExclusive,
            Exclusive,
        ];
        for &a in &modes {
            for &b in &modes {
                assert_eq!(
                    LockManager::compatible(a, b),
                    LockManager::compatible(b, a),
                    "asymmetry between {a:?} and {b:?}"
                );
            }
        }
    }

    #[test]
    fn test_compatibility_matrix_entries() {
        use LockMode::*;
        // Row order: held IS, IX, S, SIX, X; column order matches.
        let expected = [
            [true, true, true, true, false],
            [true, true, false, false, false],
            [true, false, true, false, false],
            [true, false, false, false, false],
            [false, false, false, false, false],
        ];
        let modes = [
            IntentionShared,
            IntentionExclusive,
            Shared,
            SharedIntentionExclusive,
            Exclusive,
        ];
        for (i, &held) in modes.iter().enumerate() {
            for (j, &requested) in modes.iter().enumerate() {
                assert_eq!(
                    LockManager::compatible(held, requested),
                    expected[i][j],
                    "held {held:?}, requested {requested:?}"
                );
            }
        }
    }

    #[test]
    fn test_permitted_upgrades() {
        use LockMode::*;
        assert!(LockManager::valid_upgrade(IntentionShared, Shared));
        assert!(LockManager::valid_upgrade(IntentionShared, Exclusive));
        assert!(LockManager::valid_upgrade(
            IntentionShared,
            SharedIntentionExclusive
        ));
        assert!(LockManager::valid_upgrade(Shared, Exclusive));
        assert!(LockManager::valid_upgrade(Shared, SharedIntentionExclusive));
        assert!(LockManager::valid_upgrade(IntentionExclusive, Exclusive));
        assert!(LockManager::valid_upgrade(
            IntentionExclusive,
            SharedIntentionExclusive
        ));
        assert!(LockManager::valid_upgrade(SharedIntentionExclusive, Exclusive));

        assert!(!LockManager::valid_upgrade(Shared, IntentionShared));
        assert!(!LockManager::valid_upgrade(Exclusive, Shared));
        assert!(!LockManager::valid_upgrade(
            SharedIntentionExclusive,
            Shared
        ));
        assert!(!LockManager::valid_upgrade(
            IntentionExclusive,
            Shared
        ));
    }
}
