use std::sync::Arc;
use anyhow::Result;
use tempfile::NamedTempFile;

use basaltdb::storage::buffer::{BufferPoolInstance, ParallelBufferPool};
use basaltdb::storage::disk::DiskManager;

// Create a temporary database file for testing
#[allow(dead_code)]
pub fn create_temp_db_file() -> Result<(NamedTempFile, String)> {
    let file = NamedTempFile::new()?;
    let path = file.path().to_str().unwrap().to_string();
    Ok((file, path))
}

// Create a disk manager backed by a temporary database
#[allow(dead_code)]
pub fn create_test_disk_manager() -> Result<(Arc<DiskManager>, NamedTempFile)> {
    let (file, path) = create_temp_db_file()?;
    let disk_manager = Arc::new(DiskManager::new(path)?);
    Ok((disk_manager, file))
}

// Create a single buffer pool instance with a temporary database
#[allow(dead_code)]
pub fn create_test_buffer_pool(pool_size: usize) -> Result<(Arc<BufferPoolInstance>, NamedTempFile)> {
    let (disk_manager, file) = create_test_disk_manager()?;
    let buffer_pool = Arc::new(BufferPoolInstance::new(pool_size, disk_manager));
    Ok((buffer_pool, file))
}

// Create a parallel buffer pool sharded over `num_instances` instances
#[allow(dead_code)]
pub fn create_parallel_buffer_pool(
    num_instances: usize,
    pool_size_per_instance: usize,
) -> Result<(Arc<ParallelBufferPool>, NamedTempFile)> {
    let (disk_manager, file) = create_test_disk_manager()?;
    let buffer_pool = Arc::new(ParallelBufferPool::new(
        num_instances,
        pool_size_per_instance,
        disk_manager,
    ));
    Ok((buffer_pool, file))
}
