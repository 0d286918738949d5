use std::sync::Arc;
use std::thread;
use std::time::Duration;

use ladogadb::transaction::{
    IsolationLevel, LockManager, LockMode, LogManager, LogRecordType, TransactionManager,
    TransactionState,
};

mod common;

const TABLE_A: u32 = 1;

fn test_stack() -> (Arc<LogManager>, Arc<LockManager>, TransactionManager) {
    let log_manager = Arc::new(LogManager::new());
    let lock_manager = Arc::new(LockManager::new());
    let txn_manager = TransactionManager::new(log_manager.clone(), lock_manager.clone());
    (log_manager, lock_manager, txn_manager)
}

#[test]
fn test_commit_writes_lifecycle_records() {
    let (log_manager, _lock_manager, txn_manager) = test_stack();

    let txn = txn_manager.begin(IsolationLevel::RepeatableRead);
    assert_eq!(txn.state(), TransactionState::Growing);
    txn_manager.commit(&txn).unwrap();

    let records = log_manager.records();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].record_type, LogRecordType::Begin);
    assert_eq!(records[1].record_type, LogRecordType::Commit);
    assert_eq!(records[1].prev_lsn, records[0].lsn);
    assert_eq!(records[0].txn_id, txn.id());
}

#[test]
fn test_commit_releases_locks() {
    let (_log_manager, lock_manager, txn_manager) = test_stack();

    let t1 = txn_manager.begin(IsolationLevel::RepeatableRead);
    lock_manager.lock_table(&t1, LockMode::Exclusive, TABLE_A).unwrap();
    txn_manager.commit(&t1).unwrap();
    assert!(t1.table_lock_set(LockMode::Exclusive).lock().is_empty());

    // The released lock is immediately available to another transaction.
    let t2 = txn_manager.begin(IsolationLevel::RepeatableRead);
    lock_manager.lock_table(&t2, LockMode::Exclusive, TABLE_A).unwrap();
    txn_manager.commit(&t2).unwrap();
}

#[test]
fn test_abort_releases_row_and_table_locks() {
    let (_log_manager, lock_manager, txn_manager) = test_stack();

    let t1 = txn_manager.begin(IsolationLevel::RepeatableRead);
    let rid = ladogadb::common::types::Rid::new(2, 3);
    lock_manager
        .lock_table(&t1, LockMode::IntentionExclusive, TABLE_A)
        .unwrap();
    lock_manager.lock_row(&t1, LockMode::Exclusive, TABLE_A, rid).unwrap();

    txn_manager.abort(&t1).unwrap();
    assert_eq!(t1.state(), TransactionState::Aborted);
    assert!(t1
        .table_lock_set(LockMode::IntentionExclusive)
        .lock()
        .is_empty());
    assert!(!t1.holds_row_locks_on(TABLE_A));
}

// A waiter blocked on a committed transaction's lock is woken by the
// release that commit performs.
#[test]
fn test_commit_wakes_waiters() {
    let (_log_manager, lock_manager, txn_manager) = test_stack();
    let txn_manager = Arc::new(txn_manager);

    let t1 = txn_manager.begin(IsolationLevel::RepeatableRead);
    lock_manager.lock_table(&t1, LockMode::Exclusive, TABLE_A).unwrap();

    let waiter = {
        let lock_manager = lock_manager.clone();
        let txn_manager = txn_manager.clone();
        thread::spawn(move || {
            let t2 = txn_manager.begin(IsolationLevel::RepeatableRead);
            lock_manager.lock_table(&t2, LockMode::Shared, TABLE_A)
        })
    };

    thread::sleep(Duration::from_millis(50));
    txn_manager.commit(&t1).unwrap();
    waiter.join().unwrap().unwrap();
}

#[test]
fn test_deadlock_victim_cleanup_via_manager() {
    let log_manager = Arc::new(LogManager::new());
    let lock_manager = Arc::new(LockManager::with_detection_interval(Duration::from_millis(
        10,
    )));
    let txn_manager = Arc::new(TransactionManager::new(
        log_manager,
        lock_manager.clone(),
    ));

    let t1 = txn_manager.begin(IsolationLevel::RepeatableRead);
    let t2 = txn_manager.begin(IsolationLevel::RepeatableRead);
    lock_manager.lock_table(&t1, LockMode::Exclusive, 1).unwrap();
    lock_manager.lock_table(&t2, LockMode::Exclusive, 2).unwrap();

    let older = {
        let lock_manager = lock_manager.clone();
        let t1 = t1.clone();
        thread::spawn(move || lock_manager.lock_table(&t1, LockMode::Exclusive, 2))
    };
    let younger = {
        let lock_manager = lock_manager.clone();
        let txn_manager = txn_manager.clone();
        let t2 = t2.clone();
        thread::spawn(move || {
            let result = lock_manager.lock_table(&t2, LockMode::Exclusive, 1);
            if result.is_err() {
                txn_manager.abort(&t2).unwrap();
            }
            result
        })
    };

    assert!(younger.join().unwrap().is_err());
    older.join().unwrap().unwrap();
    assert_eq!(t2.state(), TransactionState::Aborted);
    txn_manager.commit(&t1).unwrap();
}
