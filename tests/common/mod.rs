use std::sync::Arc;

use anyhow::Result;
use tempfile::NamedTempFile;

use ladogadb::storage::buffer::BufferPoolManager;
use ladogadb::transaction::{IsolationLevel, LogManager, Transaction};

// Create a temporary database file for testing
#[allow(dead_code)]
pub fn create_temp_db_file() -> Result<(NamedTempFile, String)> {
    let file = NamedTempFile::new()?;
    let path = file.path().to_str().unwrap().to_string();
    Ok((file, path))
}

// Create a buffer pool manager backed by a temporary database
#[allow(dead_code)]
pub fn create_test_buffer_pool(
    pool_size: usize,
    replacer_k: usize,
) -> Result<(Arc<BufferPoolManager>, NamedTempFile)> {
    let (file, path) = create_temp_db_file()?;
    let buffer_pool = Arc::new(BufferPoolManager::new(pool_size, replacer_k, path)?);
    Ok((buffer_pool, file))
}

// A standalone transaction for exercising index and lock operations
#[allow(dead_code)]
pub fn create_test_transaction(id: u32, isolation_level: IsolationLevel) -> Arc<Transaction> {
    Arc::new(Transaction::new(id, Arc::new(LogManager::new()), isolation_level))
}
