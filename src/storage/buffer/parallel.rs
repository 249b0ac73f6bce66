use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::common::types::{PageId, PagePtr};
use crate::storage::disk::DiskManager;
use crate::storage::buffer::error::BufferPoolError;
use crate::storage::buffer::instance::BufferPoolInstance;

/// A thin router over N independent [`BufferPoolInstance`]s.
///
/// Page-addressed operations go to `instances[page_id % N]`. New-page
/// allocation round-robins across instances starting from a rotating index
/// so allocation pressure spreads evenly.
pub struct ParallelBufferPool {
    instances: Vec<Arc<BufferPoolInstance>>,
    start_index: AtomicUsize,
}

impl ParallelBufferPool {
    pub fn new(num_instances: usize, pool_size_per_instance: usize, disk_manager: Arc<DiskManager>) -> Self {
        assert!(num_instances > 0, "a parallel pool needs at least one instance");
        let instances = (0..num_instances)
            .map(|i| {
                Arc::new(BufferPoolInstance::new_sharded(
                    pool_size_per_instance,
                    num_instances as u32,
                    i as u32,
                    disk_manager.clone(),
                ))
            })
            .collect();

        Self {
            instances,
            start_index: AtomicUsize::new(0),
        }
    }

    fn instance_for(&self, page_id: PageId) -> &BufferPoolInstance {
        &self.instances[page_id as usize % self.instances.len()]
    }

    pub fn fetch_page(&self, page_id: PageId) -> Result<PagePtr, BufferPoolError> {
        self.instance_for(page_id).fetch_page(page_id)
    }

    /// Try each instance once, starting from a rotating index; fail only
    /// after a full rotation of failures.
    pub fn new_page(&self) -> Result<(PagePtr, PageId), BufferPoolError> {
        let n = self.instances.len();
        let start = self.start_index.fetch_add(1, Ordering::Relaxed) % n;
        for i in 0..n {
            match self.instances[(start + i) % n].new_page() {
                Ok(result) => return Ok(result),
                Err(BufferPoolError::BufferPoolFull) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(BufferPoolError::BufferPoolFull)
    }

    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> Result<(), BufferPoolError> {
        self.instance_for(page_id).unpin_page(page_id, is_dirty)
    }

    pub fn flush_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        self.instance_for(page_id).flush_page(page_id)
    }

    pub fn delete_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        self.instance_for(page_id).delete_page(page_id)
    }

    pub fn flush_all_pages(&self) -> Result<(), BufferPoolError> {
        for instance in &self.instances {
            instance.flush_all_pages()?;
        }
        Ok(())
    }

    /// Total number of frames across all instances
    pub fn pool_size(&self) -> usize {
        self.instances.len() * self.instances[0].pool_size()
    }

    pub fn num_instances(&self) -> usize {
        self.instances.len()
    }
}
