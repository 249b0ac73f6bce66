use std::collections::VecDeque;
use std::marker::PhantomData;
use std::sync::Arc;

use log::debug;
use parking_lot::{ArcRwLockWriteGuard, Mutex, MutexGuard};

use crate::common::types::{Page, PageId, INVALID_PAGE_ID};
use crate::concurrency::transaction::Transaction;
use crate::index::btree::error::BTreeError;
use crate::index::btree::iterator::TreeIterator;
use crate::index::btree::page as view;
use crate::index::key::Storable;
use crate::storage::buffer::BufferPool;
use crate::storage::page::HeaderPage;

type WriteLatch = (PageId, ArcRwLockWriteGuard<parking_lot::RawRwLock, Page>);

/// Kind of structural operation a write descent performs; determines when a
/// page is "safe" and its ancestors' latches can be released.
#[derive(Clone, Copy, PartialEq, Eq)]
enum WriteOp {
    Insert,
    Delete,
}

/// Per-operation latch state: the root-id mutex guard plus the chain of
/// still-latched ancestors, released front to back.
struct LatchContext<'a> {
    root: Option<MutexGuard<'a, PageId>>,
    path: VecDeque<WriteLatch>,
}

/// Concurrent B+tree over buffer-pool pages.
///
/// A leaf splits when it reaches `leaf_max_size` entries; an internal page
/// splits when it reaches `internal_max_size + 1` (its slot-0 key is unused,
/// which grants one extra admissible entry). Descents latch-crab: each page
/// is write-latched on the way down and the ancestor chain is released as
/// soon as the current page cannot split or merge.
pub struct BPlusTree<K, V> {
    index_name: String,
    header_page_id: PageId,
    root_page_id: Mutex<PageId>,
    buffer_pool: Arc<dyn BufferPool>,
    leaf_max_size: u32,
    internal_max_size: u32,
    _phantom: PhantomData<(K, V)>,
}

impl<K, V> BPlusTree<K, V>
where
    K: Storable + Ord,
    V: Storable,
{
    /// Open or create the index named `index_name`. Its root page ID is
    /// persisted as a record in the header page; an existing record is
    /// picked up so the tree survives reopening.
    pub fn new(
        index_name: impl Into<String>,
        buffer_pool: Arc<dyn BufferPool>,
        header_page_id: PageId,
        leaf_max_size: u32,
        internal_max_size: u32,
    ) -> Result<Self, BTreeError> {
        let index_name = index_name.into();
        if leaf_max_size < 3 || leaf_max_size as usize > view::leaf_capacity::<K, V>() {
            return Err(BTreeError::InvalidOrder(format!(
                "leaf_max_size {} out of range (3..={})",
                leaf_max_size,
                view::leaf_capacity::<K, V>()
            )));
        }
        if internal_max_size < 3 || (internal_max_size + 1) as usize > view::internal_capacity::<K>() {
            return Err(BTreeError::InvalidOrder(format!(
                "internal_max_size {} out of range (3..={})",
                internal_max_size,
                view::internal_capacity::<K>() - 1
            )));
        }

        let tree = Self {
            index_name,
            header_page_id,
            root_page_id: Mutex::new(INVALID_PAGE_ID),
            buffer_pool,
            leaf_max_size,
            internal_max_size,
            _phantom: PhantomData,
        };

        let header_ptr = tree.buffer_pool.fetch_page(header_page_id)?;
        let existing = {
            let page = header_ptr.read();
            HeaderPage::get_root(&page, &tree.index_name)?
        };
        match existing {
            Some(root) => {
                *tree.root_page_id.lock() = root;
                tree.buffer_pool.unpin_page(header_page_id, false)?;
            }
            None => {
                {
                    let mut page = header_ptr.write();
                    HeaderPage::new(&mut page).set_root(&tree.index_name, INVALID_PAGE_ID)?;
                }
                tree.buffer_pool.unpin_page(header_page_id, true)?;
            }
        }

        Ok(tree)
    }

    pub fn is_empty(&self) -> bool {
        *self.root_page_id.lock() == INVALID_PAGE_ID
    }

    pub fn root_page_id(&self) -> PageId {
        *self.root_page_id.lock()
    }

    /// Point lookup
    pub fn get(&self, key: &K) -> Result<Option<V>, BTreeError> {
        let root_guard = self.root_page_id.lock();
        let mut current_pid = *root_guard;
        if current_pid == INVALID_PAGE_ID {
            return Ok(None);
        }
        let ptr = self.buffer_pool.fetch_page(current_pid)?;
        let mut guard = ptr.read_arc();
        drop(root_guard);

        loop {
            if view::is_leaf(&guard) {
                let result = view::leaf_lookup::<K, V>(&guard, key);
                drop(guard);
                self.buffer_pool.unpin_page(current_pid, false)?;
                return Ok(result);
            }
            let child_pid = view::internal_lookup::<K>(&guard, key);
            let child_ptr = self.buffer_pool.fetch_page(child_pid)?;
            let child_guard = child_ptr.read_arc();
            drop(guard);
            self.buffer_pool.unpin_page(current_pid, false)?;
            current_pid = child_pid;
            guard = child_guard;
        }
    }

    /// Insert a key/value pair. Keys are unique: inserting a key that is
    /// already present returns `false` and changes nothing.
    pub fn insert(&self, key: &K, value: &V, txn: &Transaction) -> Result<bool, BTreeError> {
        let mut ctx = LatchContext {
            root: Some(self.root_page_id.lock()),
            path: VecDeque::new(),
        };
        let result = self.insert_inner(key, value, &mut ctx);
        if result.is_err() {
            let _ = self.release_ancestors(&mut ctx);
        }
        drop(ctx);
        let inserted = result?;
        self.drain_deleted_pages(txn)?;
        Ok(inserted)
    }

    fn insert_inner(&self, key: &K, value: &V, ctx: &mut LatchContext) -> Result<bool, BTreeError> {
        let root_pid = **ctx
            .root
            .as_ref()
            .ok_or_else(|| BTreeError::Corrupted("root latch released before descent".to_string()))?;
        if root_pid == INVALID_PAGE_ID {
            self.start_new_tree(key, value, ctx)?;
            return Ok(true);
        }

        let (leaf_pid, mut leaf_guard) = self.descend_for_write(key, WriteOp::Insert, ctx)?;
        if view::leaf_lookup::<K, V>(&leaf_guard, key).is_some() {
            drop(leaf_guard);
            self.buffer_pool.unpin_page(leaf_pid, false)?;
            self.release_ancestors(ctx)?;
            return Ok(false);
        }

        let new_size = view::leaf_insert::<K, V>(&mut leaf_guard, key, value)
            .ok_or_else(|| BTreeError::Corrupted("duplicate key appeared mid-insert".to_string()))?;

        if new_size == self.leaf_max_size {
            self.split_leaf(leaf_pid, leaf_guard, ctx)?;
        } else {
            drop(leaf_guard);
            self.buffer_pool.unpin_page(leaf_pid, true)?;
        }
        self.release_ancestors(ctx)?;
        Ok(true)
    }

    /// Remove a key; removing an absent key is a no-op
    pub fn remove(&self, key: &K, txn: &Transaction) -> Result<(), BTreeError> {
        let mut ctx = LatchContext {
            root: Some(self.root_page_id.lock()),
            path: VecDeque::new(),
        };
        let result = self.remove_inner(key, txn, &mut ctx);
        if result.is_err() {
            let _ = self.release_ancestors(&mut ctx);
        }
        drop(ctx);
        // deleted pages are unlinked only after every latch is gone
        let drained = self.drain_deleted_pages(txn);
        result.and(drained)
    }

    fn remove_inner(&self, key: &K, txn: &Transaction, ctx: &mut LatchContext) -> Result<(), BTreeError> {
        let root_pid = **ctx
            .root
            .as_ref()
            .ok_or_else(|| BTreeError::Corrupted("root latch released before descent".to_string()))?;
        if root_pid == INVALID_PAGE_ID {
            ctx.root = None;
            return Ok(());
        }

        let (leaf_pid, mut leaf_guard) = self.descend_for_write(key, WriteOp::Delete, ctx)?;
        let new_size = match view::leaf_remove::<K, V>(&mut leaf_guard, key) {
            Some(size) => size,
            None => {
                drop(leaf_guard);
                self.buffer_pool.unpin_page(leaf_pid, false)?;
                return self.release_ancestors(ctx);
            }
        };

        if new_size < view::min_size(&leaf_guard) {
            self.coalesce_or_redistribute(leaf_pid, leaf_guard, txn, ctx)?;
        } else {
            drop(leaf_guard);
            self.buffer_pool.unpin_page(leaf_pid, true)?;
        }
        self.release_ancestors(ctx)
    }

    /// Iterate every entry in key order, starting at the leftmost leaf
    pub fn iter(&self) -> Result<TreeIterator<K, V>, BTreeError> {
        match self.find_leaf_for_scan(None)? {
            Some((pid, ptr)) => Ok(TreeIterator::new(self.buffer_pool.clone(), Some((pid, ptr)), 0)),
            None => Ok(TreeIterator::new(self.buffer_pool.clone(), None, 0)),
        }
    }

    /// Iterate entries with keys `>= key` in key order
    pub fn iter_from(&self, key: &K) -> Result<TreeIterator<K, V>, BTreeError> {
        match self.find_leaf_for_scan(Some(key))? {
            Some((pid, ptr)) => {
                let index = {
                    let page = ptr.read();
                    view::leaf_key_index::<K, V>(&page, key).unwrap_or(view::size(&page) as usize)
                };
                Ok(TreeIterator::new(self.buffer_pool.clone(), Some((pid, ptr)), index))
            }
            None => Ok(TreeIterator::new(self.buffer_pool.clone(), None, 0)),
        }
    }

    // -----------------------------------------------------------------------
    // Descent and latch bookkeeping
    // -----------------------------------------------------------------------

    fn descend_for_write(
        &self,
        key: &K,
        op: WriteOp,
        ctx: &mut LatchContext,
    ) -> Result<(PageId, ArcRwLockWriteGuard<parking_lot::RawRwLock, Page>), BTreeError> {
        let mut current_pid = **ctx
            .root
            .as_ref()
            .ok_or_else(|| BTreeError::Corrupted("root latch released before descent".to_string()))?;

        loop {
            let ptr = self.buffer_pool.fetch_page(current_pid)?;
            let guard = ptr.write_arc();

            let safe = match op {
                WriteOp::Insert => {
                    if view::is_leaf(&guard) {
                        view::size(&guard) < view::max_size(&guard) - 1
                    } else {
                        view::size(&guard) < view::max_size(&guard)
                    }
                }
                WriteOp::Delete => view::size(&guard) > view::min_size(&guard),
            };
            if safe {
                self.release_ancestors(ctx)?;
            }

            if view::is_leaf(&guard) {
                return Ok((current_pid, guard));
            }
            let child_pid = view::internal_lookup::<K>(&guard, key);
            ctx.path.push_back((current_pid, guard));
            current_pid = child_pid;
        }
    }

    /// Unlatch and unpin every retained ancestor and release the root mutex
    fn release_ancestors(&self, ctx: &mut LatchContext) -> Result<(), BTreeError> {
        ctx.root = None;
        while let Some((pid, guard)) = ctx.path.pop_front() {
            drop(guard);
            self.buffer_pool.unpin_page(pid, true)?;
        }
        Ok(())
    }

    fn drain_deleted_pages(&self, txn: &Transaction) -> Result<(), BTreeError> {
        for pid in txn.take_deleted_pages() {
            self.buffer_pool.delete_page(pid)?;
        }
        Ok(())
    }

    fn update_root_record(&self, root: PageId) -> Result<(), BTreeError> {
        let header_ptr = self.buffer_pool.fetch_page(self.header_page_id)?;
        {
            let mut page = header_ptr.write();
            HeaderPage::new(&mut page).set_root(&self.index_name, root)?;
        }
        self.buffer_pool.unpin_page(self.header_page_id, true)?;
        Ok(())
    }

    fn reparent_children(&self, children: &[PageId], new_parent: PageId) -> Result<(), BTreeError> {
        for &child_pid in children {
            let ptr = self.buffer_pool.fetch_page(child_pid)?;
            {
                let mut page = ptr.write();
                view::set_parent_page_id(&mut page, new_parent);
            }
            self.buffer_pool.unpin_page(child_pid, true)?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Insertion internals
    // -----------------------------------------------------------------------

    fn start_new_tree(&self, key: &K, value: &V, ctx: &mut LatchContext) -> Result<(), BTreeError> {
        let (ptr, pid) = self.buffer_pool.new_page()?;
        {
            let mut page = ptr.write();
            view::leaf_init::<K, V>(&mut page, pid, INVALID_PAGE_ID, self.leaf_max_size);
            let _ = view::leaf_insert::<K, V>(&mut page, key, value);
        }
        self.buffer_pool.unpin_page(pid, true)?;

        let root = ctx
            .root
            .as_mut()
            .ok_or_else(|| BTreeError::Corrupted("root latch released before root update".to_string()))?;
        **root = pid;
        self.update_root_record(pid)?;
        ctx.root = None;
        debug!("started new tree at root page {}", pid);
        Ok(())
    }

    fn split_leaf(
        &self,
        leaf_pid: PageId,
        mut leaf_guard: ArcRwLockWriteGuard<parking_lot::RawRwLock, Page>,
        ctx: &mut LatchContext,
    ) -> Result<(), BTreeError> {
        let (new_ptr, new_pid) = self.buffer_pool.new_page()?;
        let mut new_guard = new_ptr.write_arc();
        view::leaf_init::<K, V>(
            &mut new_guard,
            new_pid,
            view::parent_page_id(&leaf_guard),
            self.leaf_max_size,
        );
        view::leaf_move_half_to::<K, V>(&mut leaf_guard, &mut new_guard);
        view::set_leaf_next_page_id(&mut new_guard, view::leaf_next_page_id(&leaf_guard));
        view::set_leaf_next_page_id(&mut leaf_guard, new_pid);

        let separator = view::leaf_key_at::<K, V>(&new_guard, 0);
        debug!("split leaf {} into new leaf {}", leaf_pid, new_pid);
        self.insert_into_parent(leaf_pid, leaf_guard, separator, new_pid, new_guard, ctx)
    }

    fn insert_into_parent(
        &self,
        old_pid: PageId,
        mut old_guard: ArcRwLockWriteGuard<parking_lot::RawRwLock, Page>,
        key: K,
        new_pid: PageId,
        mut new_guard: ArcRwLockWriteGuard<parking_lot::RawRwLock, Page>,
        ctx: &mut LatchContext,
    ) -> Result<(), BTreeError> {
        if view::parent_page_id(&old_guard) == INVALID_PAGE_ID {
            // the root split: grow the tree by one level
            let (root_ptr, root_pid) = self.buffer_pool.new_page()?;
            {
                let mut root_page = root_ptr.write();
                view::internal_init::<K>(&mut root_page, root_pid, INVALID_PAGE_ID, self.internal_max_size);
                view::internal_populate_new_root::<K>(&mut root_page, old_pid, &key, new_pid);
            }
            view::set_parent_page_id(&mut old_guard, root_pid);
            view::set_parent_page_id(&mut new_guard, root_pid);
            drop(old_guard);
            drop(new_guard);
            self.buffer_pool.unpin_page(old_pid, true)?;
            self.buffer_pool.unpin_page(new_pid, true)?;
            self.buffer_pool.unpin_page(root_pid, true)?;

            let root = ctx
                .root
                .as_mut()
                .ok_or_else(|| BTreeError::Corrupted("root latch released before root split".to_string()))?;
            **root = root_pid;
            self.update_root_record(root_pid)?;
            ctx.root = None;
            debug!("root split: new root page {}", root_pid);
            return Ok(());
        }

        // the parent is the deepest retained ancestor
        let (parent_pid, mut parent_guard) = ctx
            .path
            .pop_back()
            .ok_or_else(|| BTreeError::Corrupted("parent latch missing during split".to_string()))?;
        view::set_parent_page_id(&mut new_guard, parent_pid);
        drop(old_guard);
        self.buffer_pool.unpin_page(old_pid, true)?;
        let parent_size = view::internal_insert_node_after::<K>(&mut parent_guard, old_pid, &key, new_pid);
        drop(new_guard);
        self.buffer_pool.unpin_page(new_pid, true)?;

        if parent_size == self.internal_max_size + 1 {
            let (split_ptr, split_pid) = self.buffer_pool.new_page()?;
            let mut split_guard = split_ptr.write_arc();
            view::internal_init::<K>(
                &mut split_guard,
                split_pid,
                view::parent_page_id(&parent_guard),
                self.internal_max_size,
            );
            let moved = view::internal_move_half_to::<K>(&mut parent_guard, &mut split_guard);
            self.reparent_children(&moved, split_pid)?;
            let separator = view::internal_key_at::<K>(&split_guard, 0);
            debug!("split internal {} into {}", parent_pid, split_pid);
            return self.insert_into_parent(parent_pid, parent_guard, separator, split_pid, split_guard, ctx);
        }

        drop(parent_guard);
        self.buffer_pool.unpin_page(parent_pid, true)?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Deletion internals
    // -----------------------------------------------------------------------

    fn coalesce_or_redistribute(
        &self,
        pid: PageId,
        mut guard: ArcRwLockWriteGuard<parking_lot::RawRwLock, Page>,
        txn: &Transaction,
        ctx: &mut LatchContext,
    ) -> Result<(), BTreeError> {
        if view::parent_page_id(&guard) == INVALID_PAGE_ID {
            return self.adjust_root(pid, guard, txn, ctx);
        }

        let (parent_pid, mut parent_guard) = ctx
            .path
            .pop_back()
            .ok_or_else(|| BTreeError::Corrupted("parent latch missing during merge".to_string()))?;
        let index = view::internal_child_index::<K>(&parent_guard, pid)
            .ok_or_else(|| BTreeError::Corrupted("page missing from its parent".to_string()))?;
        let parent_size = view::size(&parent_guard) as usize;
        let node_is_leaf = view::is_leaf(&guard);

        // 1) Steal one entry from a sibling that can spare it
        let mut left: Option<WriteLatch> = None;
        if index > 0 {
            let left_pid = view::internal_child_at::<K>(&parent_guard, index - 1);
            let left_ptr = self.buffer_pool.fetch_page(left_pid)?;
            let mut left_guard = left_ptr.write_arc();
            if view::size(&left_guard) > view::min_size(&left_guard) {
                if node_is_leaf {
                    view::leaf_move_last_to_front_of::<K, V>(&mut left_guard, &mut guard);
                    let separator = view::leaf_key_at::<K, V>(&guard, 0);
                    view::internal_set_key_at::<K>(&mut parent_guard, index, &separator);
                } else {
                    let middle = view::internal_key_at::<K>(&parent_guard, index);
                    let left_size = view::size(&left_guard) as usize;
                    let separator = view::internal_key_at::<K>(&left_guard, left_size - 1);
                    let moved_child =
                        view::internal_move_last_to_front_of::<K>(&mut left_guard, &mut guard, &middle);
                    view::internal_set_key_at::<K>(&mut parent_guard, index, &separator);
                    drop(guard);
                    self.reparent_children(&[moved_child], pid)?;
                    self.buffer_pool.unpin_page(pid, true)?;
                    drop(left_guard);
                    self.buffer_pool.unpin_page(left_pid, true)?;
                    drop(parent_guard);
                    self.buffer_pool.unpin_page(parent_pid, true)?;
                    return Ok(());
                }
                drop(left_guard);
                self.buffer_pool.unpin_page(left_pid, true)?;
                drop(guard);
                self.buffer_pool.unpin_page(pid, true)?;
                drop(parent_guard);
                self.buffer_pool.unpin_page(parent_pid, true)?;
                return Ok(());
            }
            left = Some((left_pid, left_guard));
        }

        let mut right: Option<WriteLatch> = None;
        if index + 1 < parent_size {
            let right_pid = view::internal_child_at::<K>(&parent_guard, index + 1);
            let right_ptr = self.buffer_pool.fetch_page(right_pid)?;
            let mut right_guard = right_ptr.write_arc();
            if view::size(&right_guard) > view::min_size(&right_guard) {
                if let Some((left_pid, left_guard)) = left.take() {
                    drop(left_guard);
                    self.buffer_pool.unpin_page(left_pid, false)?;
                }
                if node_is_leaf {
                    view::leaf_move_first_to_end_of::<K, V>(&mut right_guard, &mut guard);
                    let separator = view::leaf_key_at::<K, V>(&right_guard, 0);
                    view::internal_set_key_at::<K>(&mut parent_guard, index + 1, &separator);
                } else {
                    let middle = view::internal_key_at::<K>(&parent_guard, index + 1);
                    let separator = view::internal_key_at::<K>(&right_guard, 1);
                    let moved_child =
                        view::internal_move_first_to_end_of::<K>(&mut right_guard, &mut guard, &middle);
                    view::internal_set_key_at::<K>(&mut parent_guard, index + 1, &separator);
                    drop(guard);
                    self.reparent_children(&[moved_child], pid)?;
                    self.buffer_pool.unpin_page(pid, true)?;
                    drop(right_guard);
                    self.buffer_pool.unpin_page(right_pid, true)?;
                    drop(parent_guard);
                    self.buffer_pool.unpin_page(parent_pid, true)?;
                    return Ok(());
                }
                drop(right_guard);
                self.buffer_pool.unpin_page(right_pid, true)?;
                drop(guard);
                self.buffer_pool.unpin_page(pid, true)?;
                drop(parent_guard);
                self.buffer_pool.unpin_page(parent_pid, true)?;
                return Ok(());
            }
            right = Some((right_pid, right_guard));
        }

        // 2) No sibling can donate: coalesce. Prefer merging into the left
        //    neighbor; otherwise merge the right neighbor into this page.
        if let Some((left_pid, mut left_guard)) = left {
            if let Some((right_pid, right_guard)) = right {
                drop(right_guard);
                self.buffer_pool.unpin_page(right_pid, false)?;
            }
            let moved_children = if node_is_leaf {
                view::leaf_move_all_to::<K, V>(&guard, &mut left_guard);
                Vec::new()
            } else {
                let middle = view::internal_key_at::<K>(&parent_guard, index);
                view::internal_move_all_to::<K>(&guard, &mut left_guard, &middle)
            };
            txn.add_deleted_page(pid);
            drop(guard);
            self.buffer_pool.unpin_page(pid, true)?;
            drop(left_guard);
            self.buffer_pool.unpin_page(left_pid, true)?;
            self.reparent_children(&moved_children, left_pid)?;
            view::internal_remove_at::<K>(&mut parent_guard, index);
            debug!("coalesced page {} into left sibling {}", pid, left_pid);
        } else {
            let (right_pid, right_guard) = right
                .ok_or_else(|| BTreeError::Corrupted("underflowing page has no sibling".to_string()))?;
            let moved_children = if node_is_leaf {
                view::leaf_move_all_to::<K, V>(&right_guard, &mut guard);
                Vec::new()
            } else {
                let middle = view::internal_key_at::<K>(&parent_guard, index + 1);
                view::internal_move_all_to::<K>(&right_guard, &mut guard, &middle)
            };
            txn.add_deleted_page(right_pid);
            drop(right_guard);
            self.buffer_pool.unpin_page(right_pid, true)?;
            drop(guard);
            self.buffer_pool.unpin_page(pid, true)?;
            self.reparent_children(&moved_children, pid)?;
            view::internal_remove_at::<K>(&mut parent_guard, index + 1);
            debug!("coalesced right sibling {} into page {}", right_pid, pid);
        }

        if view::size(&parent_guard) < view::min_size(&parent_guard) {
            return self.coalesce_or_redistribute(parent_pid, parent_guard, txn, ctx);
        }
        drop(parent_guard);
        self.buffer_pool.unpin_page(parent_pid, true)?;
        Ok(())
    }

    fn adjust_root(
        &self,
        pid: PageId,
        guard: ArcRwLockWriteGuard<parking_lot::RawRwLock, Page>,
        txn: &Transaction,
        ctx: &mut LatchContext,
    ) -> Result<(), BTreeError> {
        let size = view::size(&guard);

        if !view::is_leaf(&guard) && size == 1 {
            // an internal root with a single child: the child becomes the root
            let child_pid = view::internal_child_at::<K>(&guard, 0);
            let child_ptr = self.buffer_pool.fetch_page(child_pid)?;
            {
                let mut child = child_ptr.write();
                view::set_parent_page_id(&mut child, INVALID_PAGE_ID);
            }
            self.buffer_pool.unpin_page(child_pid, true)?;

            let root = ctx
                .root
                .as_mut()
                .ok_or_else(|| BTreeError::Corrupted("root latch released before root change".to_string()))?;
            **root = child_pid;
            self.update_root_record(child_pid)?;
            txn.add_deleted_page(pid);
            drop(guard);
            self.buffer_pool.unpin_page(pid, true)?;
            ctx.root = None;
            debug!("root collapsed into child page {}", child_pid);
            return Ok(());
        }

        if view::is_leaf(&guard) && size == 0 {
            // the whole tree is empty now
            let root = ctx
                .root
                .as_mut()
                .ok_or_else(|| BTreeError::Corrupted("root latch released before root change".to_string()))?;
            **root = INVALID_PAGE_ID;
            self.update_root_record(INVALID_PAGE_ID)?;
            txn.add_deleted_page(pid);
            drop(guard);
            self.buffer_pool.unpin_page(pid, true)?;
            ctx.root = None;
            debug!("tree became empty");
            return Ok(());
        }

        drop(guard);
        self.buffer_pool.unpin_page(pid, true)?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Integrity checks (test support; panics on violation)
    // -----------------------------------------------------------------------

    /// Walk the whole tree and assert its structural invariants: size
    /// bounds, separator ordering, parent pointers, uniform height, and an
    /// ascending leaf chain. Intended for quiescent trees.
    pub fn verify_integrity(&self) -> Result<(), BTreeError> {
        let root_pid = self.root_page_id();
        if root_pid == INVALID_PAGE_ID {
            return Ok(());
        }
        self.verify_subtree(root_pid, INVALID_PAGE_ID)?;

        let mut last_key: Option<K> = None;
        for (key, _) in self.iter()? {
            if let Some(prev) = &last_key {
                assert!(prev < &key, "leaf chain out of order or duplicated");
            }
            last_key = Some(key);
        }
        Ok(())
    }

    /// Returns the subtree's (minimum key, height)
    fn verify_subtree(&self, pid: PageId, expected_parent: PageId) -> Result<(K, u32), BTreeError> {
        let ptr = self.buffer_pool.fetch_page(pid)?;
        let is_root = expected_parent == INVALID_PAGE_ID;

        let (entries, is_leaf) = {
            let page = ptr.read();
            assert_eq!(view::stored_page_id(&page), pid, "page header id mismatch");
            assert_eq!(view::parent_page_id(&page), expected_parent, "parent pointer mismatch");

            let size = view::size(&page);
            if view::is_leaf(&page) {
                assert!(size > 0, "an empty leaf must never stay in the tree");
                if !is_root {
                    assert!(size >= view::min_size(&page), "leaf {} underflowed", pid);
                    assert!(size <= view::max_size(&page) - 1, "leaf {} overflowed", pid);
                }
                let entries = view::leaf_entries::<K, V>(&page);
                for pair in entries.windows(2) {
                    assert!(pair[0].0 < pair[1].0, "leaf {} keys out of order", pid);
                }
                (vec![(entries[0].0.clone(), INVALID_PAGE_ID)], true)
            } else {
                assert!(size >= 2, "internal page {} has fewer than two children", pid);
                if !is_root {
                    assert!(size >= view::min_size(&page), "internal {} underflowed", pid);
                    assert!(size <= view::max_size(&page), "internal {} overflowed", pid);
                }
                let entries = view::internal_entries::<K>(&page);
                for pair in entries[1..].windows(2) {
                    assert!(pair[0].0 < pair[1].0, "internal {} separators out of order", pid);
                }
                (entries, false)
            }
        };
        self.buffer_pool.unpin_page(pid, false)?;

        if is_leaf {
            return Ok((entries[0].0.clone(), 1));
        }

        let mut min_key = None;
        let mut height = None;
        for (i, (separator, child_pid)) in entries.iter().enumerate() {
            let (child_min, child_height) = self.verify_subtree(*child_pid, pid)?;
            if i == 0 {
                min_key = Some(child_min);
            } else {
                // Separators are lower bounds: deletions may leave a
                // separator pointing at a key that is gone from its subtree
                assert!(
                    &child_min >= separator,
                    "separator {} of internal {} exceeds its subtree's least key",
                    i, pid
                );
            }
            match height {
                None => height = Some(child_height),
                Some(h) => assert_eq!(h, child_height, "subtrees of {} differ in height", pid),
            }
        }

        Ok((
            min_key.ok_or_else(|| BTreeError::Corrupted("internal page with no children".to_string()))?,
            height.unwrap_or(0) + 1,
        ))
    }

    // -----------------------------------------------------------------------
    // Scans
    // -----------------------------------------------------------------------

    /// Read-crab down to the leaf for `key` (or the leftmost leaf when no key
    /// is given) and return it pinned but unlatched for iteration.
    fn find_leaf_for_scan(&self, key: Option<&K>) -> Result<Option<(PageId, crate::common::types::PagePtr)>, BTreeError> {
        let root_guard = self.root_page_id.lock();
        let mut current_pid = *root_guard;
        if current_pid == INVALID_PAGE_ID {
            return Ok(None);
        }
        let mut current_ptr = self.buffer_pool.fetch_page(current_pid)?;
        let mut guard = current_ptr.read_arc();
        drop(root_guard);

        loop {
            if view::is_leaf(&guard) {
                drop(guard);
                return Ok(Some((current_pid, current_ptr)));
            }
            let child_pid = match key {
                Some(k) => view::internal_lookup::<K>(&guard, k),
                None => view::internal_child_at::<K>(&guard, 0),
            };
            let child_ptr = self.buffer_pool.fetch_page(child_pid)?;
            let child_guard = child_ptr.read_arc();
            drop(guard);
            self.buffer_pool.unpin_page(current_pid, false)?;
            current_pid = child_pid;
            current_ptr = child_ptr;
            guard = child_guard;
        }
    }
}
