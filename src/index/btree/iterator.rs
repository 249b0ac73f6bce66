use std::marker::PhantomData;
use std::sync::Arc;

use crate::common::types::{PageId, PagePtr, INVALID_PAGE_ID};
use crate::index::btree::page as view;
use crate::index::key::Storable;
use crate::storage::buffer::BufferPool;

/// Cursor over the leaf chain in ascending key order.
///
/// The iterator pins the leaf it is positioned on and drops the pin when it
/// advances past it or is dropped; entries are read under a transient read
/// latch per step.
pub struct TreeIterator<K, V> {
    buffer_pool: Arc<dyn BufferPool>,
    current: Option<(PageId, PagePtr)>,
    index: usize,
    _phantom: PhantomData<(K, V)>,
}

impl<K, V> TreeIterator<K, V>
where
    K: Storable + Ord,
    V: Storable,
{
    pub(crate) fn new(buffer_pool: Arc<dyn BufferPool>, current: Option<(PageId, PagePtr)>, index: usize) -> Self {
        Self {
            buffer_pool,
            current,
            index,
            _phantom: PhantomData,
        }
    }

    /// True once the cursor has run off the last leaf
    pub fn is_end(&self) -> bool {
        self.current.is_none()
    }
}

impl<K, V> Iterator for TreeIterator<K, V>
where
    K: Storable + Ord,
    V: Storable,
{
    type Item = (K, V);

    fn next(&mut self) -> Option<(K, V)> {
        loop {
            let (current_pid, ptr) = self.current.as_ref()?;
            let current_pid = *current_pid;

            let step = {
                let page = ptr.read();
                if self.index < view::size(&page) as usize {
                    Ok(view::leaf_entry_at::<K, V>(&page, self.index))
                } else {
                    Err(view::leaf_next_page_id(&page))
                }
            };

            match step {
                Ok(entry) => {
                    self.index += 1;
                    return Some(entry);
                }
                Err(next_pid) => {
                    self.current = None;
                    let _ = self.buffer_pool.unpin_page(current_pid, false);
                    if next_pid == INVALID_PAGE_ID {
                        return None;
                    }
                    match self.buffer_pool.fetch_page(next_pid) {
                        Ok(next_ptr) => {
                            self.current = Some((next_pid, next_ptr));
                            self.index = 0;
                        }
                        Err(_) => return None,
                    }
                }
            }
        }
    }
}

impl<K, V> Drop for TreeIterator<K, V> {
    fn drop(&mut self) {
        if let Some((page_id, _)) = self.current.take() {
            let _ = self.buffer_pool.unpin_page(page_id, false);
        }
    }
}
