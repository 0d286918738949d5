use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::common::types::{Lsn, TxnId};

/// Kinds of transaction lifecycle records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogRecordType {
    Begin,
    Commit,
    Abort,
}

/// A transaction lifecycle record. Records of one transaction chain
/// backwards through `prev_lsn`.
#[derive(Debug, Clone)]
pub struct LogRecord {
    pub lsn: Lsn,
    pub prev_lsn: Lsn,
    pub txn_id: TxnId,
    pub record_type: LogRecordType,
}

/// Log-manager sink: allocates LSNs and retains appended records in order.
/// Recovery and durable log storage live outside this core; transactions
/// only need a sequencing sink to chain their lifecycle records through.
pub struct LogManager {
    next_lsn: AtomicU64,
    records: Mutex<Vec<LogRecord>>,
}

impl Default for LogManager {
    fn default() -> Self {
        Self::new()
    }
}

impl LogManager {
    pub fn new() -> Self {
        Self {
            next_lsn: AtomicU64::new(1),
            records: Mutex::new(Vec::new()),
        }
    }

    /// Append a record, returning its LSN.
    pub fn append_record(&self, txn_id: TxnId, prev_lsn: Lsn, record_type: LogRecordType) -> Lsn {
        let lsn = self.next_lsn.fetch_add(1, Ordering::SeqCst);
        self.records.lock().push(LogRecord {
            lsn,
            prev_lsn,
            txn_id,
            record_type,
        });
        lsn
    }

    /// Highest LSN handed out so far; 0 when nothing has been appended.
    pub fn latest_lsn(&self) -> Lsn {
        self.next_lsn.load(Ordering::SeqCst) - 1
    }

    /// Snapshot of the appended records, in LSN order.
    pub fn records(&self) -> Vec<LogRecord> {
        self.records.lock().clone()
    }
}
