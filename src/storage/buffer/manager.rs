use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::common::types::{FrameId, Page, PageId, PagePtr, INVALID_PAGE_ID, PAGE_SIZE};
use crate::container::ExtendibleHashTable;
use crate::storage::buffer::error::BufferPoolError;
use crate::storage::buffer::replacer::LruKReplacer;
use crate::storage::disk::DiskManager;

const PAGE_TABLE_BUCKET_CAPACITY: usize = 8;

/// First allocatable page id. Page 0 is reserved for the index header page.
const FIRST_ALLOCATABLE_PAGE_ID: PageId = 1;

/// A buffer pool slot. The pin count and dirty flag live here, under the
/// pool mutex; the page bytes live behind the page's own latch.
struct Frame {
    page: PagePtr,
    /// Id of the resident page, `INVALID_PAGE_ID` when the frame is free.
    page_id: PageId,
    pin_count: u32,
    is_dirty: bool,
}

impl Frame {
    fn new() -> Self {
        Self {
            page: Arc::new(parking_lot::RwLock::new(Page::new(INVALID_PAGE_ID))),
            page_id: INVALID_PAGE_ID,
            pin_count: 0,
            is_dirty: false,
        }
    }
}

struct PoolInner {
    frames: Vec<Frame>,
    free_list: VecDeque<FrameId>,
    next_page_id: PageId,
}

/// Fixed-size in-memory cache of disk pages with pin/unpin semantics.
///
/// A single pool mutex serializes every public entry point, covering the
/// frame array, the free list and the interplay with the page table and
/// replacer; per-page data access stays concurrent through the page latch.
pub struct BufferPoolManager {
    pool_size: usize,
    inner: Mutex<PoolInner>,
    page_table: ExtendibleHashTable<PageId, FrameId>,
    replacer: LruKReplacer,
    disk_manager: Arc<DiskManager>,
}

impl BufferPoolManager {
    pub fn new(
        pool_size: usize,
        replacer_k: usize,
        db_path: impl AsRef<Path>,
    ) -> Result<Self, BufferPoolError> {
        let disk_manager = Arc::new(DiskManager::new(db_path)?);
        Ok(Self::with_disk_manager(pool_size, replacer_k, disk_manager))
    }

    pub fn with_disk_manager(
        pool_size: usize,
        replacer_k: usize,
        disk_manager: Arc<DiskManager>,
    ) -> Self {
        let mut frames = Vec::with_capacity(pool_size);
        let mut free_list = VecDeque::with_capacity(pool_size);
        for i in 0..pool_size {
            frames.push(Frame::new());
            free_list.push_back(i as FrameId);
        }

        Self {
            pool_size,
            inner: Mutex::new(PoolInner {
                frames,
                free_list,
                next_page_id: FIRST_ALLOCATABLE_PAGE_ID,
            }),
            page_table: ExtendibleHashTable::new(PAGE_TABLE_BUCKET_CAPACITY),
            replacer: LruKReplacer::new(pool_size, replacer_k),
            disk_manager,
        }
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Allocate a fresh page id and place a zeroed page for it in a frame,
    /// pinned once. Fails with `BufferPoolFull` when every frame is pinned.
    pub fn new_page(&self) -> Result<(PagePtr, PageId), BufferPoolError> {
        let mut inner = self.inner.lock();
        let frame_id = self.acquire_frame(&mut inner)?;

        let page_id = inner.next_page_id;
        inner.next_page_id += 1;

        self.page_table.insert(page_id, frame_id);
        self.replacer.record_access(frame_id);
        self.replacer.set_evictable(frame_id, false);

        let frame = &mut inner.frames[frame_id as usize];
        frame.page_id = page_id;
        frame.pin_count = 1;
        frame.is_dirty = false;
        {
            let mut page = frame.page.write();
            page.reset();
            page.page_id = page_id;
        }

        Ok((frame.page.clone(), page_id))
    }

    /// Fetch a page, reading it from disk unless already resident. The
    /// returned page is pinned; callers must `unpin_page` when done.
    pub fn fetch_page(&self, page_id: PageId) -> Result<PagePtr, BufferPoolError> {
        if page_id == INVALID_PAGE_ID {
            return Err(BufferPoolError::InvalidPageId(page_id));
        }

        let mut inner = self.inner.lock();

        if let Some(frame_id) = self.page_table.find(&page_id) {
            let frame = &mut inner.frames[frame_id as usize];
            frame.pin_count += 1;
            self.replacer.record_access(frame_id);
            self.replacer.set_evictable(frame_id, false);
            return Ok(frame.page.clone());
        }

        // Read before claiming a frame so a disk error leaves the pool
        // untouched.
        let mut buf = [0u8; PAGE_SIZE];
        self.disk_manager.read_page(page_id, &mut buf)?;

        let frame_id = self.acquire_frame(&mut inner)?;
        self.page_table.insert(page_id, frame_id);
        self.replacer.record_access(frame_id);
        self.replacer.set_evictable(frame_id, false);

        let frame = &mut inner.frames[frame_id as usize];
        frame.page_id = page_id;
        frame.pin_count = 1;
        frame.is_dirty = false;
        {
            let mut page = frame.page.write();
            page.data = buf;
            page.page_id = page_id;
            page.lsn = 0;
        }

        Ok(frame.page.clone())
    }

    /// Drop one pin on a page, OR-ing `is_dirty` into its dirty flag. The
    /// frame becomes evictable when the pin count reaches zero.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> Result<(), BufferPoolError> {
        let mut inner = self.inner.lock();
        let frame_id = self
            .page_table
            .find(&page_id)
            .ok_or(BufferPoolError::PageNotFound(page_id))?;

        let frame = &mut inner.frames[frame_id as usize];
        if frame.pin_count == 0 {
            return Err(BufferPoolError::PageNotPinned(page_id));
        }
        frame.pin_count -= 1;
        frame.is_dirty |= is_dirty;
        if frame.pin_count == 0 {
            self.replacer.set_evictable(frame_id, true);
        }
        Ok(())
    }

    /// Write a page's bytes to disk regardless of dirtiness and clear its
    /// dirty flag.
    pub fn flush_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        let mut inner = self.inner.lock();
        let frame_id = self
            .page_table
            .find(&page_id)
            .ok_or(BufferPoolError::PageNotFound(page_id))?;
        self.flush_frame(&mut inner, frame_id)
    }

    /// Flush every resident page. Afterwards no resident page is dirty.
    pub fn flush_all_pages(&self) -> Result<(), BufferPoolError> {
        let mut inner = self.inner.lock();
        let resident: Vec<FrameId> = (0..self.pool_size as FrameId)
            .filter(|&f| inner.frames[f as usize].page_id != INVALID_PAGE_ID)
            .collect();
        for frame_id in resident {
            self.flush_frame(&mut inner, frame_id)?;
        }
        Ok(())
    }

    /// Remove a page from the pool and hand its id back to the disk
    /// manager. Succeeds trivially when the page is not resident; fails
    /// when it is still pinned.
    pub fn delete_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        let mut inner = self.inner.lock();
        let Some(frame_id) = self.page_table.find(&page_id) else {
            return Ok(());
        };

        let frame = &mut inner.frames[frame_id as usize];
        if frame.pin_count > 0 {
            return Err(BufferPoolError::PagePinned(page_id));
        }

        self.page_table.remove(&page_id);
        self.replacer.remove(frame_id);

        frame.page_id = INVALID_PAGE_ID;
        frame.is_dirty = false;
        frame.page.write().reset();
        inner.free_list.push_back(frame_id);

        self.disk_manager.deallocate_page(page_id);
        Ok(())
    }

    /// Number of frames on the free list; test and stats hook.
    pub fn free_frame_count(&self) -> usize {
        self.inner.lock().free_list.len()
    }

    /// Claim a frame, preferring the free list and falling back to
    /// eviction. A dirty victim is flushed before its frame is reused.
    fn acquire_frame(&self, inner: &mut PoolInner) -> Result<FrameId, BufferPoolError> {
        if let Some(frame_id) = inner.free_list.pop_front() {
            return Ok(frame_id);
        }

        let Some(frame_id) = self.replacer.evict() else {
            return Err(BufferPoolError::BufferPoolFull);
        };

        let frame = &mut inner.frames[frame_id as usize];
        let victim_page_id = frame.page_id;
        debug_assert_eq!(frame.pin_count, 0);
        if frame.is_dirty {
            log::debug!("flushing dirty page {victim_page_id} before eviction");
            let page = frame.page.read();
            self.disk_manager.write_page(victim_page_id, &page.data)?;
        }
        frame.is_dirty = false;
        frame.page_id = INVALID_PAGE_ID;
        self.page_table.remove(&victim_page_id);
        Ok(frame_id)
    }

    fn flush_frame(&self, inner: &mut PoolInner, frame_id: FrameId) -> Result<(), BufferPoolError> {
        let frame = &mut inner.frames[frame_id as usize];
        {
            let page = frame.page.read();
            self.disk_manager.write_page(frame.page_id, &page.data)?;
        }
        frame.is_dirty = false;
        Ok(())
    }
}
