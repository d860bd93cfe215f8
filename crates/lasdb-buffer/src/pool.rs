//! Buffer pool manager.

use crate::frame::BufferFrame;
use crate::lru::LruList;
use lasdb_common::page::{Page, PageId, POOL_SIZE};
use lasdb_common::{LasError, Result};
use parking_lot::Mutex;
use std::collections::HashMap;

/// A dirty page that was evicted from the buffer pool.
/// The caller must write it to its file to prevent data loss.
#[derive(Debug)]
pub struct EvictedPage {
    pub page_id: PageId,
    pub data: Box<Page>,
}

/// Result of installing a page into the pool.
pub struct InstallOutcome<'a> {
    /// The (pinned) frame now mapped to the requested page.
    pub frame: &'a BufferFrame,
    /// True if the page was already cached; its data is valid and must
    /// not be overwritten from disk.
    pub resident: bool,
    /// Dirty page displaced to make room; the caller must write it out.
    pub evicted: Option<EvictedPage>,
}

/// Map and LRU state guarded by the single pool mutex.
struct PoolInner {
    page_to_slot: HashMap<PageId, usize>,
    slot_to_page: Vec<Option<PageId>>,
    free_list: Vec<usize>,
    lru: LruList,
}

/// Fixed-capacity page cache.
///
/// Frames hold the page bytes plus pin/dirty metadata; a single mutex
/// guards the page table, free list, and LRU list for the critical
/// section spanning slot selection, mapping update, and LRU touch.
/// Pages with a non-zero pin count are never evicted.
pub struct BufferPool {
    frames: Vec<BufferFrame>,
    inner: Mutex<PoolInner>,
    num_frames: usize,
}

impl BufferPool {
    /// Creates a pool with the given number of frames.
    pub fn new(num_frames: usize) -> Self {
        let frames: Vec<_> = (0..num_frames)
            .map(|i| BufferFrame::new(crate::frame::FrameId(i as u32)))
            .collect();

        // All slots start free; pop order matches slot order
        let free_list: Vec<_> = (0..num_frames).rev().collect();

        Self {
            frames,
            inner: Mutex::new(PoolInner {
                page_to_slot: HashMap::with_capacity(num_frames),
                slot_to_page: (0..num_frames).map(|_| None).collect(),
                free_list,
                lru: LruList::new(num_frames),
            }),
            num_frames,
        }
    }

    /// Returns the number of frames in the pool.
    pub fn num_frames(&self) -> usize {
        self.num_frames
    }

    /// Returns the number of free frames.
    pub fn free_count(&self) -> usize {
        self.inner.lock().free_list.len()
    }

    /// Returns the number of pages currently cached.
    pub fn resident_count(&self) -> usize {
        self.inner.lock().page_to_slot.len()
    }

    /// Checks if a page is resident.
    pub fn contains(&self, page_id: &PageId) -> bool {
        self.inner.lock().page_to_slot.contains_key(page_id)
    }

    /// Fetches a resident page, pinning it and touching the LRU list.
    ///
    /// Returns None on a miss; use [`BufferPool::install`] to bring the
    /// page in.
    pub fn fetch(&self, page_id: &PageId) -> Option<&BufferFrame> {
        let mut inner = self.inner.lock();
        let slot = *inner.page_to_slot.get(page_id)?;
        inner.lru.touch(slot);
        let frame = &self.frames[slot];
        frame.pin();
        Some(frame)
    }

    /// Maps a page to a frame, pinning it.
    ///
    /// On a hit the existing frame is returned with `resident = true`.
    /// On a miss a frame comes from the free list or from evicting the
    /// least-recently-used unpinned slot; a displaced dirty page is
    /// returned for the caller to write back, and the caller is
    /// responsible for loading the page image into the fresh frame.
    ///
    /// Fails with [`LasError::BufferPoolExhausted`] when every frame is
    /// pinned.
    pub fn install(&self, page_id: PageId) -> Result<InstallOutcome<'_>> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        if let Some(&slot) = inner.page_to_slot.get(&page_id) {
            inner.lru.touch(slot);
            let frame = &self.frames[slot];
            frame.pin();
            return Ok(InstallOutcome {
                frame,
                resident: true,
                evicted: None,
            });
        }

        let (slot, evicted) = self.allocate_slot(inner)?;
        let frame = &self.frames[slot];
        frame.reset();
        frame.pin();
        inner.page_to_slot.insert(page_id.clone(), slot);
        inner.slot_to_page[slot] = Some(page_id);
        inner.lru.push_front(slot);

        Ok(InstallOutcome {
            frame,
            resident: false,
            evicted,
        })
    }

    /// Selects a slot for a new page: free list first, then LRU victim.
    fn allocate_slot(&self, inner: &mut PoolInner) -> Result<(usize, Option<EvictedPage>)> {
        if let Some(slot) = inner.free_list.pop() {
            return Ok((slot, None));
        }

        let victim = inner
            .lru
            .iter_lru()
            .find(|&slot| self.frames[slot].pin_count() == 0)
            .ok_or(LasError::BufferPoolExhausted)?;

        let frame = &self.frames[victim];
        let old_id = inner.slot_to_page[victim]
            .take()
            .ok_or_else(|| LasError::Internal(format!("lru slot {} has no mapping", victim)))?;

        let evicted = if frame.is_dirty() {
            let mut data = Box::new([0u8; lasdb_common::PAGE_SIZE]);
            data.copy_from_slice(&**frame.read_data());
            Some(EvictedPage {
                page_id: old_id.clone(),
                data,
            })
        } else {
            None
        };

        inner.page_to_slot.remove(&old_id);
        inner.lru.remove(victim);
        frame.set_dirty(false);

        Ok((victim, evicted))
    }

    /// Unpins a resident page. Returns false if the page is not resident.
    pub fn unpin(&self, page_id: &PageId) -> bool {
        let inner = self.inner.lock();
        if let Some(&slot) = inner.page_to_slot.get(page_id) {
            self.frames[slot].unpin();
            true
        } else {
            false
        }
    }

    /// Marks a resident page dirty.
    pub fn mark_dirty(&self, page_id: &PageId) -> Result<()> {
        let inner = self.inner.lock();
        let slot = *inner
            .page_to_slot
            .get(page_id)
            .ok_or_else(|| LasError::PageNotResident(page_id.to_string()))?;
        self.frames[slot].set_dirty(true);
        Ok(())
    }

    /// Flushes a page through the callback if it is resident and dirty.
    ///
    /// Returns true if the page was written.
    pub fn flush_page<F>(&self, page_id: &PageId, mut flush_fn: F) -> Result<bool>
    where
        F: FnMut(&PageId, &Page) -> Result<()>,
    {
        let inner = self.inner.lock();
        if let Some(&slot) = inner.page_to_slot.get(page_id) {
            let frame = &self.frames[slot];
            if frame.is_dirty() {
                let data = frame.read_data();
                flush_fn(page_id, &data)?;
                frame.set_dirty(false);
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Flushes every dirty page. Returns the number of pages written.
    pub fn flush_all<F>(&self, mut flush_fn: F) -> Result<usize>
    where
        F: FnMut(&PageId, &Page) -> Result<()>,
    {
        let inner = self.inner.lock();
        let mut flushed = 0;
        for (page_id, &slot) in inner.page_to_slot.iter() {
            let frame = &self.frames[slot];
            if frame.is_dirty() {
                let data = frame.read_data();
                flush_fn(page_id, &data)?;
                frame.set_dirty(false);
                flushed += 1;
            }
        }
        Ok(flushed)
    }

    /// Flushes every dirty page belonging to one file.
    pub fn flush_file<F>(&self, file: &str, mut flush_fn: F) -> Result<usize>
    where
        F: FnMut(&PageId, &Page) -> Result<()>,
    {
        let inner = self.inner.lock();
        let mut flushed = 0;
        for (page_id, &slot) in inner.page_to_slot.iter() {
            if page_id.file.as_ref() != file {
                continue;
            }
            let frame = &self.frames[slot];
            if frame.is_dirty() {
                let data = frame.read_data();
                flush_fn(page_id, &data)?;
                frame.set_dirty(false);
                flushed += 1;
            }
        }
        Ok(flushed)
    }

    /// Drops a page from the pool, flushing it first if dirty.
    ///
    /// Returns false if the page is not resident or still pinned.
    pub fn evict<F>(&self, page_id: &PageId, mut flush_fn: F) -> Result<bool>
    where
        F: FnMut(&PageId, &Page) -> Result<()>,
    {
        let mut inner = self.inner.lock();
        let Some(&slot) = inner.page_to_slot.get(page_id) else {
            return Ok(false);
        };
        let frame = &self.frames[slot];
        if frame.is_pinned() {
            return Ok(false);
        }
        if frame.is_dirty() {
            let data = frame.read_data();
            flush_fn(page_id, &data)?;
            frame.set_dirty(false);
        }
        inner.page_to_slot.remove(page_id);
        inner.slot_to_page[slot] = None;
        inner.lru.remove(slot);
        inner.free_list.push(slot);
        Ok(true)
    }

    /// Returns statistics about the buffer pool.
    pub fn stats(&self) -> BufferPoolStats {
        let inner = self.inner.lock();
        let mut pinned = 0;
        let mut dirty = 0;
        for &slot in inner.page_to_slot.values() {
            let frame = &self.frames[slot];
            if frame.is_pinned() {
                pinned += 1;
            }
            if frame.is_dirty() {
                dirty += 1;
            }
        }
        BufferPoolStats {
            total_frames: self.num_frames,
            free_frames: inner.free_list.len(),
            resident_pages: inner.page_to_slot.len(),
            pinned_pages: pinned,
            dirty_pages: dirty,
        }
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(POOL_SIZE)
    }
}

/// Statistics about the buffer pool.
#[derive(Debug, Clone)]
pub struct BufferPoolStats {
    pub total_frames: usize,
    pub free_frames: usize,
    pub resident_pages: usize,
    pub pinned_pages: usize,
    pub dirty_pages: usize,
}

/// RAII guard for reading a page. Holds one pin; unpins on drop.
pub struct PageReadGuard<'a> {
    pool: &'a BufferPool,
    page_id: PageId,
    frame: &'a BufferFrame,
}

impl<'a> PageReadGuard<'a> {
    /// Wraps an already-pinned frame; the guard takes over the pin.
    pub fn new(pool: &'a BufferPool, page_id: PageId, frame: &'a BufferFrame) -> Self {
        Self {
            pool,
            page_id,
            frame,
        }
    }

    /// Returns the page ID.
    pub fn page_id(&self) -> &PageId {
        &self.page_id
    }

    /// Returns the page data.
    pub fn data(&self) -> parking_lot::RwLockReadGuard<'_, Box<Page>> {
        self.frame.read_data()
    }
}

impl Drop for PageReadGuard<'_> {
    fn drop(&mut self) {
        self.pool.unpin(&self.page_id);
    }
}

/// RAII guard for writing a page. Holds one pin; unpins on drop.
pub struct PageWriteGuard<'a> {
    pool: &'a BufferPool,
    page_id: PageId,
    frame: &'a BufferFrame,
}

impl<'a> PageWriteGuard<'a> {
    /// Wraps an already-pinned frame; the guard takes over the pin.
    pub fn new(pool: &'a BufferPool, page_id: PageId, frame: &'a BufferFrame) -> Self {
        Self {
            pool,
            page_id,
            frame,
        }
    }

    /// Returns the page ID.
    pub fn page_id(&self) -> &PageId {
        &self.page_id
    }

    /// Returns read access to the page data.
    pub fn data(&self) -> parking_lot::RwLockReadGuard<'_, Box<Page>> {
        self.frame.read_data()
    }

    /// Returns mutable access to the page data.
    pub fn data_mut(&self) -> parking_lot::RwLockWriteGuard<'_, Box<Page>> {
        self.frame.write_data()
    }

    /// Marks the page as dirty.
    pub fn mark_dirty(&self) {
        self.frame.set_dirty(true);
    }
}

impl Drop for PageWriteGuard<'_> {
    fn drop(&mut self) {
        self.pool.unpin(&self.page_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn pid(no: u32) -> PageId {
        PageId::new(Arc::from("test.idx"), no)
    }

    #[test]
    fn test_pool_new() {
        let pool = BufferPool::new(10);
        assert_eq!(pool.num_frames(), 10);
        assert_eq!(pool.free_count(), 10);
        assert_eq!(pool.resident_count(), 0);
    }

    #[test]
    fn test_pool_install_and_fetch() {
        let pool = BufferPool::new(10);

        let outcome = pool.install(pid(1)).unwrap();
        assert!(!outcome.resident);
        assert!(outcome.evicted.is_none());
        assert!(outcome.frame.is_pinned());
        assert_eq!(pool.free_count(), 9);
        assert!(pool.contains(&pid(1)));

        pool.unpin(&pid(1));

        let frame = pool.fetch(&pid(1)).unwrap();
        assert_eq!(frame.pin_count(), 1);
        pool.unpin(&pid(1));
    }

    #[test]
    fn test_pool_fetch_miss() {
        let pool = BufferPool::new(10);
        assert!(pool.fetch(&pid(1)).is_none());
    }

    #[test]
    fn test_pool_install_existing_is_resident() {
        let pool = BufferPool::new(10);

        pool.install(pid(1)).unwrap();
        pool.unpin(&pid(1));

        let outcome = pool.install(pid(1)).unwrap();
        assert!(outcome.resident);
        assert!(outcome.evicted.is_none());
        assert_eq!(pool.resident_count(), 1);
        pool.unpin(&pid(1));
    }

    #[test]
    fn test_pool_eviction_clean() {
        let pool = BufferPool::new(3);

        for i in 0..3 {
            pool.install(pid(i)).unwrap();
            pool.unpin(&pid(i));
        }
        assert_eq!(pool.free_count(), 0);

        let outcome = pool.install(pid(99)).unwrap();
        assert!(outcome.evicted.is_none()); // victim was clean
        assert_eq!(pool.resident_count(), 3);
        assert!(pool.contains(&pid(99)));
        // Page 0 was least recently used
        assert!(!pool.contains(&pid(0)));
        pool.unpin(&pid(99));
    }

    #[test]
    fn test_pool_eviction_dirty_returns_data() {
        let pool = BufferPool::new(1);

        let outcome = pool.install(pid(1)).unwrap();
        outcome.frame.write_data()[0] = 0xAB;
        outcome.frame.set_dirty(true);
        pool.unpin(&pid(1));

        let outcome = pool.install(pid(2)).unwrap();
        let evicted = outcome.evicted.expect("dirty page must be handed back");
        assert_eq!(evicted.page_id, pid(1));
        assert_eq!(evicted.data[0], 0xAB);
        pool.unpin(&pid(2));
    }

    #[test]
    fn test_pool_eviction_skips_pinned() {
        let pool = BufferPool::new(2);

        pool.install(pid(1)).unwrap(); // stays pinned
        pool.install(pid(2)).unwrap();
        pool.unpin(&pid(2));

        // Only page 2 is evictable
        pool.install(pid(3)).unwrap();
        assert!(pool.contains(&pid(1)));
        assert!(!pool.contains(&pid(2)));
        pool.unpin(&pid(3));
    }

    #[test]
    fn test_pool_exhausted_when_all_pinned() {
        let pool = BufferPool::new(2);

        pool.install(pid(1)).unwrap();
        pool.install(pid(2)).unwrap();

        let result = pool.install(pid(3));
        assert!(matches!(result, Err(LasError::BufferPoolExhausted)));
    }

    #[test]
    fn test_pool_mark_dirty_requires_resident() {
        let pool = BufferPool::new(4);
        assert!(pool.mark_dirty(&pid(1)).is_err());

        pool.install(pid(1)).unwrap();
        pool.mark_dirty(&pid(1)).unwrap();
        pool.unpin(&pid(1));
    }

    #[test]
    fn test_pool_flush_page() {
        let pool = BufferPool::new(4);

        pool.install(pid(1)).unwrap();
        pool.mark_dirty(&pid(1)).unwrap();
        pool.unpin(&pid(1));

        let mut flushed = vec![];
        let wrote = pool
            .flush_page(&pid(1), |id, _data| {
                flushed.push(id.clone());
                Ok(())
            })
            .unwrap();
        assert!(wrote);
        assert_eq!(flushed, vec![pid(1)]);

        // Second flush is a no-op
        let wrote = pool.flush_page(&pid(1), |_, _| Ok(())).unwrap();
        assert!(!wrote);
    }

    #[test]
    fn test_pool_flush_all() {
        let pool = BufferPool::new(8);

        for i in 0..5 {
            pool.install(pid(i)).unwrap();
            pool.mark_dirty(&pid(i)).unwrap();
            pool.unpin(&pid(i));
        }

        let mut count = 0;
        let flushed = pool
            .flush_all(|_, _| {
                count += 1;
                Ok(())
            })
            .unwrap();
        assert_eq!(flushed, 5);
        assert_eq!(count, 5);
    }

    #[test]
    fn test_pool_flush_file_filters() {
        let pool = BufferPool::new(8);
        let other = PageId::new(Arc::from("other.idx"), 0);

        pool.install(pid(0)).unwrap();
        pool.mark_dirty(&pid(0)).unwrap();
        pool.unpin(&pid(0));

        pool.install(other.clone()).unwrap();
        pool.mark_dirty(&other).unwrap();
        pool.unpin(&other);

        let flushed = pool.flush_file("test.idx", |_, _| Ok(())).unwrap();
        assert_eq!(flushed, 1);

        // The other file's page is still dirty
        let flushed = pool.flush_file("other.idx", |_, _| Ok(())).unwrap();
        assert_eq!(flushed, 1);
    }

    #[test]
    fn test_pool_evict_page() {
        let pool = BufferPool::new(4);

        pool.install(pid(1)).unwrap();
        pool.mark_dirty(&pid(1)).unwrap();
        pool.unpin(&pid(1));

        let mut flushed = false;
        let evicted = pool
            .evict(&pid(1), |_, _| {
                flushed = true;
                Ok(())
            })
            .unwrap();
        assert!(evicted);
        assert!(flushed);
        assert!(!pool.contains(&pid(1)));
        assert_eq!(pool.free_count(), 4);
    }

    #[test]
    fn test_pool_evict_refuses_pinned() {
        let pool = BufferPool::new(4);

        pool.install(pid(1)).unwrap(); // stays pinned
        let evicted = pool.evict(&pid(1), |_, _| Ok(())).unwrap();
        assert!(!evicted);
        assert!(pool.contains(&pid(1)));
    }

    #[test]
    fn test_pool_conservation() {
        // free + resident always partitions the frames
        let pool = BufferPool::new(4);
        assert_eq!(pool.free_count() + pool.resident_count(), 4);

        for i in 0..6 {
            pool.install(pid(i)).unwrap();
            pool.unpin(&pid(i));
            assert_eq!(pool.free_count() + pool.resident_count(), 4);
        }

        pool.evict(&pid(5), |_, _| Ok(())).unwrap();
        assert_eq!(pool.free_count() + pool.resident_count(), 4);
    }

    #[test]
    fn test_pool_guards_unpin_on_drop() {
        let pool = BufferPool::new(4);
        let outcome = pool.install(pid(1)).unwrap();

        {
            let guard = PageWriteGuard::new(&pool, pid(1), outcome.frame);
            guard.data_mut()[0] = 0x42;
            guard.mark_dirty();
        }

        let frame = pool.fetch(&pid(1)).unwrap();
        assert_eq!(frame.pin_count(), 1);
        assert!(frame.is_dirty());
        assert_eq!(frame.read_data()[0], 0x42);
        pool.unpin(&pid(1));
    }

    #[test]
    fn test_pool_stats() {
        let pool = BufferPool::new(10);

        for i in 0..5 {
            pool.install(pid(i)).unwrap();
            if i % 2 == 0 {
                pool.mark_dirty(&pid(i)).unwrap();
                pool.unpin(&pid(i));
            }
            // Odd pages remain pinned
        }

        let stats = pool.stats();
        assert_eq!(stats.total_frames, 10);
        assert_eq!(stats.free_frames, 5);
        assert_eq!(stats.resident_pages, 5);
        assert_eq!(stats.pinned_pages, 2);
        assert_eq!(stats.dirty_pages, 3);
    }
}
