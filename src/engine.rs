use std::path::PathBuf;
use std::sync::Arc;

use log::info;
use serde::{Serialize, Deserialize};

use crate::concurrency::{LockManager, TransactionManager};
use crate::storage::buffer::{BufferPoolError, ParallelBufferPool};
use crate::storage::disk::DiskManager;

/// Storage engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Path of the database file
    pub db_path: PathBuf,
    /// Frames per buffer pool instance
    pub pool_size_per_instance: usize,
    /// Number of buffer pool instances (page IDs shard across them)
    pub num_instances: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("basalt.db"),
            pool_size_per_instance: 64,
            num_instances: 4,
        }
    }
}

/// Wires the storage and concurrency core together: one disk manager, a
/// sharded buffer pool over it, and the lock/transaction managers.
pub struct StorageEngine {
    disk_manager: Arc<DiskManager>,
    buffer_pool: Arc<ParallelBufferPool>,
    lock_manager: Arc<LockManager>,
    transaction_manager: Arc<TransactionManager>,
}

impl StorageEngine {
    pub fn open(config: &EngineConfig) -> Result<Self, BufferPoolError> {
        let disk_manager = Arc::new(DiskManager::new(&config.db_path)?);
        let buffer_pool = Arc::new(ParallelBufferPool::new(
            config.num_instances,
            config.pool_size_per_instance,
            disk_manager.clone(),
        ));
        let lock_manager = Arc::new(LockManager::new());
        let transaction_manager = Arc::new(TransactionManager::new(lock_manager.clone()));

        info!(
            "storage engine opened at {:?}: {} instances x {} frames",
            config.db_path, config.num_instances, config.pool_size_per_instance
        );

        Ok(Self {
            disk_manager,
            buffer_pool,
            lock_manager,
            transaction_manager,
        })
    }

    pub fn buffer_pool(&self) -> &Arc<ParallelBufferPool> {
        &self.buffer_pool
    }

    pub fn lock_manager(&self) -> &Arc<LockManager> {
        &self.lock_manager
    }

    pub fn transaction_manager(&self) -> &Arc<TransactionManager> {
        &self.transaction_manager
    }

    pub fn disk_manager(&self) -> &Arc<DiskManager> {
        &self.disk_manager
    }

    /// Flush every resident page to disk
    pub fn flush(&self) -> Result<(), BufferPoolError> {
        self.buffer_pool.flush_all_pages()
    }
}
