// Export public modules
pub mod common;
pub mod concurrency;
pub mod engine;
pub mod index;
pub mod storage;

// Re-export key items for convenient access
pub use storage::buffer::{BufferPool, BufferPoolError, BufferPoolInstance, ParallelBufferPool};
pub use storage::disk::DiskManager;
pub use index::btree::BPlusTree;
pub use index::hash::ExtendibleHashIndex;
pub use concurrency::{IsolationLevel, LockManager, Transaction, TransactionManager};
pub use engine::{EngineConfig, StorageEngine};
