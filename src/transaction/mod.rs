// Transaction management module

pub mod concurrency;
pub mod wal;

// Public exports
pub use concurrency::lock_manager::{AbortReason, LockManager, LockMode, TransactionAbortError};
pub use concurrency::transaction::{
    IsolationLevel, Transaction, TransactionError, TransactionState,
};
pub use concurrency::transaction_manager::TransactionManager;
pub use wal::log_manager::{LogManager, LogRecord, LogRecordType};
