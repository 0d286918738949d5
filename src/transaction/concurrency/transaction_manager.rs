use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::common::types::TxnId;
use crate::transaction::concurrency::lock_manager::LockManager;
use crate::transaction::concurrency::transaction::{
    IsolationLevel, Transaction, TransactionError,
};
use crate::transaction::wal::log_manager::LogManager;

/// Creates and tracks transactions, and releases their locks when they
/// finish.
pub struct TransactionManager {
    next_txn_id: AtomicU32,
    log_manager: Arc<LogManager>,
    lock_manager: Arc<LockManager>,
    active_transactions: Mutex<HashMap<TxnId, Arc<Transaction>>>,
}

impl TransactionManager {
    pub fn new(log_manager: Arc<LogManager>, lock_manager: Arc<LockManager>) -> Self {
        Self {
            next_txn_id: AtomicU32::new(1),
            log_manager,
            lock_manager,
            active_transactions: Mutex::new(HashMap::new()),
        }
    }

    /// Begin a new transaction at the given isolation level.
    pub fn begin(&self, isolation_level: IsolationLevel) -> Arc<Transaction> {
        let txn_id = self.next_txn_id.fetch_add(1, Ordering::SeqCst);
        let txn = Arc::new(Transaction::new(
            txn_id,
            self.log_manager.clone(),
            isolation_level,
        ));
        txn.begin();
        self.active_transactions.lock().insert(txn_id, txn.clone());
        txn
    }

    /// Commit: write the commit record, then release every held lock.
    pub fn commit(&self, txn: &Arc<Transaction>) -> Result<(), TransactionError> {
        txn.commit()?;
        self.lock_manager.release_all_locks(txn);
        self.active_transactions.lock().remove(&txn.id());
        Ok(())
    }

    /// Abort: write the abort record, then release every held lock. Also
    /// the path for cleaning up a deadlock victim.
    pub fn abort(&self, txn: &Arc<Transaction>) -> Result<(), TransactionError> {
        txn.abort()?;
        self.lock_manager.release_all_locks(txn);
        self.active_transactions.lock().remove(&txn.id());
        Ok(())
    }

    pub fn get_transaction(&self, txn_id: TxnId) -> Option<Arc<Transaction>> {
        self.active_transactions.lock().get(&txn_id).cloned()
    }

    pub fn active_transaction_ids(&self) -> Vec<TxnId> {
        self.active_transactions.lock().keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::concurrency::transaction::TransactionState;

    fn test_manager() -> TransactionManager {
        TransactionManager::new(Arc::new(LogManager::new()), Arc::new(LockManager::new()))
    }

    #[test]
    fn test_begin_assigns_monotonic_ids() {
        let manager = test_manager();
        let t1 = manager.begin(IsolationLevel::RepeatableRead);
        let t2 = manager.begin(IsolationLevel::ReadCommitted);
        assert!(t2.id() > t1.id());
        assert_eq!(manager.active_transaction_ids().len(), 2);
    }

    #[test]
    fn test_commit_removes_from_active_set() {
        let manager = test_manager();
        let txn = manager.begin(IsolationLevel::RepeatableRead);
        manager.commit(&txn).unwrap();
        assert_eq!(txn.state(), TransactionState::Committed);
        assert!(manager.get_transaction(txn.id()).is_none());
    }

    #[test]
    fn test_double_commit_fails() {
        let manager = test_manager();
        let txn = manager.begin(IsolationLevel::ReadCommitted);
        manager.commit(&txn).unwrap();
        assert!(manager.commit(&txn).is_err());
    }
}
