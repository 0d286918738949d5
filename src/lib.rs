// Export public modules
pub mod common;
pub mod container;
pub mod index;
pub mod storage;
pub mod transaction;

// Re-export key items for convenient access
pub use container::ExtendibleHashTable;
pub use index::btree::BPlusTree;
pub use storage::buffer::replacer::LruKReplacer;
pub use storage::buffer::BufferPoolError;
pub use storage::buffer::BufferPoolManager;
pub use storage::disk::DiskManager;
pub use transaction::{
    IsolationLevel, LockManager, LockMode, Transaction, TransactionManager, TransactionState,
};
