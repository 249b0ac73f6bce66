use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use log::debug;
use parking_lot::Mutex;
use anyhow::Result;

use crate::common::types::{Page, PageId, PagePtr, Frame, FrameId, FramePtr, INVALID_PAGE_ID};
use crate::storage::disk::DiskManager;
use crate::storage::buffer::error::BufferPoolError;
use crate::storage::buffer::replacer::LruReplacer;

/// One shard of the buffer pool: a fixed frame array, a page table, a free
/// list and an LRU replacer, all serialized under a single mutex.
///
/// Page IDs are allocated locally with a stride of `num_instances`, so every
/// ID this instance hands out satisfies `id % num_instances == instance_index`.
pub struct BufferPoolInstance {
    pool_size: usize,
    num_instances: u32,
    instance_index: u32,
    frames: Vec<FramePtr>,
    replacer: LruReplacer,
    disk_manager: Arc<DiskManager>,
    state: Mutex<PoolState>,
}

struct PoolState {
    page_table: HashMap<PageId, FrameId>,
    free_list: VecDeque<FrameId>,
    next_page_id: PageId,
}

impl BufferPoolInstance {
    /// Create a standalone instance (the whole pool is this one shard)
    pub fn new(pool_size: usize, disk_manager: Arc<DiskManager>) -> Self {
        Self::new_sharded(pool_size, 1, 0, disk_manager)
    }

    /// Create one shard of a parallel pool
    pub fn new_sharded(
        pool_size: usize,
        num_instances: u32,
        instance_index: u32,
        disk_manager: Arc<DiskManager>,
    ) -> Self {
        assert!(num_instances > 0, "a pool needs at least one instance");
        assert!(
            instance_index < num_instances,
            "instance index {} out of range for {} instances",
            instance_index,
            num_instances
        );

        let mut frames = Vec::with_capacity(pool_size);
        let mut free_list = VecDeque::with_capacity(pool_size);
        for i in 0..pool_size {
            let frame_id = i as FrameId;
            let frame = Frame::new(frame_id, Arc::new(parking_lot::RwLock::new(Page::new(INVALID_PAGE_ID))));
            frames.push(Arc::new(parking_lot::RwLock::new(frame)));
            free_list.push_back(frame_id);
        }

        Self {
            pool_size,
            num_instances,
            instance_index,
            frames,
            replacer: LruReplacer::new(pool_size),
            disk_manager,
            state: Mutex::new(PoolState {
                page_table: HashMap::new(),
                free_list,
                next_page_id: instance_index,
            }),
        }
    }

    /// Fetch a page, reading it from disk if it is not resident.
    /// The returned page is pinned; the caller must unpin it exactly once.
    pub fn fetch_page(&self, page_id: PageId) -> Result<PagePtr, BufferPoolError> {
        if page_id == INVALID_PAGE_ID {
            return Err(BufferPoolError::InvalidOperation("cannot fetch the invalid page ID".to_string()));
        }

        let mut state = self.state.lock();

        // Already resident: pin and return
        if let Some(&frame_id) = state.page_table.get(&page_id) {
            let frame = &self.frames[frame_id as usize];
            let mut frame_guard = frame.write();
            frame_guard.pin_count += 1;
            self.replacer.pin(frame_id);
            return Ok(frame_guard.page.clone());
        }

        // Not resident: take a frame, read from disk, publish the mapping
        let frame_id = self.take_frame(&mut state)?;
        let frame = &self.frames[frame_id as usize];
        let page_ptr = {
            let mut frame_guard = frame.write();
            {
                let mut page_guard = frame_guard.page.write();
                self.disk_manager.read_page(page_id, &mut page_guard)?;
            }
            frame_guard.pin_count = 1;
            frame_guard.is_dirty = false;
            frame_guard.page.clone()
        };

        state.page_table.insert(page_id, frame_id);
        self.replacer.pin(frame_id);

        Ok(page_ptr)
    }

    /// Allocate a fresh page ID and bind it to a zeroed frame.
    /// The returned page is pinned; the caller must unpin it exactly once.
    pub fn new_page(&self) -> Result<(PagePtr, PageId), BufferPoolError> {
        let mut state = self.state.lock();

        let frame_id = self.take_frame(&mut state)?;
        let page_id = state.next_page_id;
        state.next_page_id += self.num_instances;
        debug_assert_eq!(page_id % self.num_instances, self.instance_index);

        let frame = &self.frames[frame_id as usize];
        let page_ptr = {
            let mut frame_guard = frame.write();
            {
                let mut page_guard = frame_guard.page.write();
                page_guard.reset();
                page_guard.page_id = page_id;
            }
            frame_guard.pin_count = 1;
            frame_guard.is_dirty = false;
            frame_guard.page.clone()
        };

        state.page_table.insert(page_id, frame_id);
        self.replacer.pin(frame_id);

        Ok((page_ptr, page_id))
    }

    /// Drop one pin; merge in the dirty flag. A page whose pin count reaches
    /// zero becomes evictable.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> Result<(), BufferPoolError> {
        let state = self.state.lock();

        let frame_id = match state.page_table.get(&page_id) {
            Some(&id) => id,
            None => return Err(BufferPoolError::PageNotFound(page_id)),
        };

        let frame = &self.frames[frame_id as usize];
        let mut frame_guard = frame.write();
        if frame_guard.pin_count == 0 {
            return Err(BufferPoolError::PageNotPinned(page_id));
        }

        // A previously dirty page stays dirty
        if is_dirty {
            frame_guard.is_dirty = true;
        }
        frame_guard.pin_count -= 1;
        if frame_guard.pin_count == 0 {
            self.replacer.unpin(frame_id);
        }

        Ok(())
    }

    /// Write a resident page to disk unconditionally and clear its dirty flag
    pub fn flush_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        let state = self.state.lock();

        let frame_id = match state.page_table.get(&page_id) {
            Some(&id) => id,
            None => return Err(BufferPoolError::PageNotFound(page_id)),
        };

        let frame = &self.frames[frame_id as usize];
        let mut frame_guard = frame.write();
        {
            let page_guard = frame_guard.page.read();
            self.disk_manager.write_page(&page_guard)?;
        }
        frame_guard.is_dirty = false;

        Ok(())
    }

    /// Flush every resident page in this instance
    pub fn flush_all_pages(&self) -> Result<(), BufferPoolError> {
        let _state = self.state.lock();

        for frame in &self.frames {
            let mut frame_guard = frame.write();
            {
                let page_guard = frame_guard.page.read();
                if page_guard.page_id == INVALID_PAGE_ID {
                    continue;
                }
                self.disk_manager.write_page(&page_guard)?;
            }
            frame_guard.is_dirty = false;
        }

        Ok(())
    }

    /// Delete a page. A page that is not resident is vacuously deleted; a
    /// pinned page cannot be deleted.
    pub fn delete_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        let mut state = self.state.lock();

        let frame_id = match state.page_table.get(&page_id) {
            Some(&id) => id,
            None => return Ok(()),
        };

        let frame = &self.frames[frame_id as usize];
        let mut frame_guard = frame.write();
        if frame_guard.pin_count != 0 {
            return Err(BufferPoolError::PagePinned(page_id));
        }

        if frame_guard.is_dirty {
            let page_guard = frame_guard.page.read();
            self.disk_manager.write_page(&page_guard)?;
        }

        state.page_table.remove(&page_id);
        {
            let mut page_guard = frame_guard.page.write();
            page_guard.reset();
        }
        frame_guard.is_dirty = false;

        self.replacer.pin(frame_id);
        state.free_list.push_back(frame_id);

        Ok(())
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Pick a frame: free list first, then a replacer victim. A dirty victim
    /// is written back before the frame is reused.
    fn take_frame(&self, state: &mut PoolState) -> Result<FrameId, BufferPoolError> {
        if let Some(frame_id) = state.free_list.pop_front() {
            return Ok(frame_id);
        }

        let frame_id = match self.replacer.victim() {
            Some(id) => id,
            None => return Err(BufferPoolError::BufferPoolFull),
        };

        let frame = &self.frames[frame_id as usize];
        let mut frame_guard = frame.write();
        let old_page_id = {
            let page_guard = frame_guard.page.read();
            if frame_guard.is_dirty {
                self.disk_manager.write_page(&page_guard)?;
            }
            page_guard.page_id
        };
        frame_guard.is_dirty = false;

        if old_page_id != INVALID_PAGE_ID {
            debug!("evicting page {} from frame {}", old_page_id, frame_id);
            state.page_table.remove(&old_page_id);
        }

        Ok(frame_id)
    }
}
