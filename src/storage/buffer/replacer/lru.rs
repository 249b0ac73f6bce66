use linked_hash_map::LinkedHashMap;
use parking_lot::Mutex;

use crate::common::types::FrameId;

/// LRU (Least Recently Used) eviction policy over frame indices.
///
/// Only unpinned frames are tracked. The front of the list is the least
/// recently unpinned frame and is the next victim. An `unpin` of a frame
/// that is already tracked is a no-op: frames are not re-promoted.
pub struct LruReplacer {
    inner: Mutex<LinkedHashMap<FrameId, ()>>,
    num_pages: usize,
}

impl LruReplacer {
    pub fn new(num_pages: usize) -> Self {
        Self {
            inner: Mutex::new(LinkedHashMap::new()),
            num_pages,
        }
    }

    /// Remove and return the least recently used frame, if any
    pub fn victim(&self) -> Option<FrameId> {
        let mut frames = self.inner.lock();
        frames.pop_front().map(|(frame_id, _)| frame_id)
    }

    /// A page was pinned into the frame; it must no longer be evictable
    pub fn pin(&self, frame_id: FrameId) {
        let mut frames = self.inner.lock();
        frames.remove(&frame_id);
    }

    /// The frame's pin count dropped to zero; it becomes evictable.
    /// Tracked frames keep their position.
    pub fn unpin(&self, frame_id: FrameId) {
        let mut frames = self.inner.lock();
        if frames.contains_key(&frame_id) {
            return;
        }
        frames.insert(frame_id, ());
        if frames.len() > self.num_pages {
            frames.pop_front();
        }
    }

    /// Number of evictable frames
    pub fn size(&self) -> usize {
        self.inner.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_victim_order_is_fifo_over_unpins() {
        let replacer = LruReplacer::new(7);
        for frame_id in [1, 2, 3, 4, 5, 6] {
            replacer.unpin(frame_id);
        }
        assert_eq!(replacer.size(), 6);

        assert_eq!(replacer.victim(), Some(1));
        assert_eq!(replacer.victim(), Some(2));
        assert_eq!(replacer.victim(), Some(3));
        assert_eq!(replacer.size(), 3);
    }

    #[test]
    fn test_pin_removes_frame() {
        let replacer = LruReplacer::new(7);
        for frame_id in [1, 2, 3] {
            replacer.unpin(frame_id);
        }

        replacer.pin(1);
        replacer.pin(2);
        assert_eq!(replacer.size(), 1);
        assert_eq!(replacer.victim(), Some(3));
        assert_eq!(replacer.victim(), None);

        // Pinning an untracked frame is a no-op
        replacer.pin(99);
        assert_eq!(replacer.size(), 0);
    }

    #[test]
    fn test_duplicate_unpin_does_not_repromote() {
        let replacer = LruReplacer::new(7);
        replacer.unpin(1);
        replacer.unpin(2);
        replacer.unpin(1);

        // Frame 1 keeps its original position at the front
        assert_eq!(replacer.victim(), Some(1));
        assert_eq!(replacer.victim(), Some(2));
    }

    #[test]
    fn test_membership_capped_at_num_pages() {
        let replacer = LruReplacer::new(3);
        for frame_id in 0..5 {
            replacer.unpin(frame_id);
        }
        assert_eq!(replacer.size(), 3);
        // The two oldest entries were evicted as the cap was exceeded
        assert_eq!(replacer.victim(), Some(2));
        assert_eq!(replacer.victim(), Some(3));
        assert_eq!(replacer.victim(), Some(4));
    }
}
