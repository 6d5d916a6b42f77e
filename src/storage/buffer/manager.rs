use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Arc;

use log::debug;
use parking_lot::Mutex;

use crate::common::types::{FrameId, PageId, INVALID_PAGE_ID};
use crate::storage::buffer::error::BufferPoolError;
use crate::storage::buffer::replacer::LruKReplacer;
use crate::storage::disk::DiskManager;
use crate::storage::page::frame::Frame;
use crate::storage::page::guard::{BasicPageGuard, ReadPageGuard, WritePageGuard};

/// State covered by the single pool-wide latch.
struct PoolInner {
    page_table: HashMap<PageId, FrameId>,
    free_list: VecDeque<FrameId>,
    replacer: LruKReplacer,
    next_page_id: PageId,
}

/// BufferPoolManager pages an on-disk heap in and out of a bounded frame
/// array.
///
/// One mutex serializes the page table, the free list, the replacer, and
/// page-id allocation. A frame is either in the free list or referenced by
/// the page table, never both; it becomes evictable exactly when its pin
/// count drops to zero through `unpin_page`.
pub struct BufferPoolManager {
    pool_size: usize,
    frames: Vec<Arc<Frame>>,
    disk_manager: Arc<DiskManager>,
    inner: Mutex<PoolInner>,
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
        for frame_id in 0..pool_size {
            frames.push(Arc::new(Frame::new(frame_id)));
            free_list.push_back(frame_id);
        }

        Self {
            pool_size,
            frames,
            disk_manager,
            inner: Mutex::new(PoolInner {
                page_table: HashMap::new(),
                free_list,
                replacer: LruKReplacer::new(pool_size, replacer_k),
                next_page_id: 0,
            }),
        }
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Allocate a fresh page id, bind it to a frame, and return the pinned
    /// frame.
    pub fn new_page(&self) -> Result<(PageId, Arc<Frame>), BufferPoolError> {
        let mut inner = self.inner.lock();
        let frame_id = self.acquire_frame(&mut inner)?;

        let page_id = inner.next_page_id;
        inner.next_page_id += 1;

        let frame = &self.frames[frame_id];
        frame.reset();
        frame.set_page_id(page_id);
        frame.set_pin_count(1);

        inner.page_table.insert(page_id, frame_id);
        inner.replacer.record_access(frame_id)?;
        inner.replacer.set_evictable(frame_id, false);

        Ok((page_id, Arc::clone(frame)))
    }

    /// Pin the page, reading it from disk if it is not resident.
    pub fn fetch_page(&self, page_id: PageId) -> Result<Arc<Frame>, BufferPoolError> {
        if page_id == INVALID_PAGE_ID {
            return Err(BufferPoolError::PageNotFound(page_id));
        }

        let mut inner = self.inner.lock();

        if let Some(&frame_id) = inner.page_table.get(&page_id) {
            let frame = &self.frames[frame_id];
            frame.pin();
            inner.replacer.record_access(frame_id)?;
            inner.replacer.set_evictable(frame_id, false);
            return Ok(Arc::clone(frame));
        }

        let frame_id = self.acquire_frame(&mut inner)?;
        let frame = &self.frames[frame_id];
        frame.reset();
        frame.set_page_id(page_id);
        frame.set_pin_count(1);

        if let Err(e) = self
            .disk_manager
            .read_page(page_id, &mut frame.data().write()[..])
        {
            // Undo the binding so the frame is not lost
            frame.reset();
            inner.free_list.push_back(frame_id);
            return Err(e.into());
        }

        inner.page_table.insert(page_id, frame_id);
        inner.replacer.record_access(frame_id)?;
        inner.replacer.set_evictable(frame_id, false);

        Ok(Arc::clone(frame))
    }

    /// Drop one pin, OR-ing in the caller's dirty flag. Returns false if the
    /// page is not resident or was not pinned; at pin count zero the frame
    /// becomes evictable.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        let mut inner = self.inner.lock();

        let Some(&frame_id) = inner.page_table.get(&page_id) else {
            return false;
        };
        let frame = &self.frames[frame_id];
        if frame.pin_count() == 0 {
            return false;
        }

        if is_dirty {
            frame.set_dirty(true);
        }
        if frame.unpin() == 0 {
            inner.replacer.set_evictable(frame_id, true);
        }
        true
    }

    /// Write the page to disk and clear its dirty flag, regardless of pins.
    pub fn flush_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        let inner = self.inner.lock();

        let Some(&frame_id) = inner.page_table.get(&page_id) else {
            return Err(BufferPoolError::PageNotFound(page_id));
        };
        let frame = &self.frames[frame_id];
        self.disk_manager
            .write_page(page_id, &frame.data().read()[..])?;
        frame.set_dirty(false);
        Ok(())
    }

    /// Flush every resident page. Idempotent.
    pub fn flush_all_pages(&self) -> Result<(), BufferPoolError> {
        let page_ids: Vec<PageId> = {
            let inner = self.inner.lock();
            inner.page_table.keys().copied().collect()
        };
        for page_id in page_ids {
            match self.flush_page(page_id) {
                Ok(()) => {}
                // Evicted between the snapshot and the flush; write-back
                // already happened
                Err(BufferPoolError::PageNotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Drop a resident page from the pool and deallocate it. `Ok(true)` if
    /// the page was removed or was not resident, `Ok(false)` if pins keep it
    /// alive.
    pub fn delete_page(&self, page_id: PageId) -> Result<bool, BufferPoolError> {
        let mut inner = self.inner.lock();

        let Some(&frame_id) = inner.page_table.get(&page_id) else {
            return Ok(true);
        };
        let frame = &self.frames[frame_id];
        if frame.pin_count() > 0 {
            return Ok(false);
        }

        inner.page_table.remove(&page_id);
        inner.replacer.remove(frame_id);
        inner.free_list.push_back(frame_id);
        frame.reset();
        self.disk_manager.deallocate_page(page_id);
        Ok(true)
    }

    pub fn new_page_guarded(&self) -> Result<(PageId, BasicPageGuard<'_>), BufferPoolError> {
        let (page_id, frame) = self.new_page()?;
        Ok((page_id, BasicPageGuard::new(self, frame, page_id)))
    }

    pub fn fetch_page_basic(&self, page_id: PageId) -> Result<BasicPageGuard<'_>, BufferPoolError> {
        let frame = self.fetch_page(page_id)?;
        Ok(BasicPageGuard::new(self, frame, page_id))
    }

    pub fn fetch_page_read(&self, page_id: PageId) -> Result<ReadPageGuard<'_>, BufferPoolError> {
        Ok(self.fetch_page_basic(page_id)?.into_read())
    }

    pub fn fetch_page_write(&self, page_id: PageId) -> Result<WritePageGuard<'_>, BufferPoolError> {
        Ok(self.fetch_page_basic(page_id)?.into_write())
    }

    /// Hand out a frame: free list first, otherwise evict. A dirty victim is
    /// written back before reuse.
    fn acquire_frame(&self, inner: &mut PoolInner) -> Result<FrameId, BufferPoolError> {
        if let Some(frame_id) = inner.free_list.pop_front() {
            return Ok(frame_id);
        }

        let Some(frame_id) = inner.replacer.evict() else {
            return Err(BufferPoolError::BufferPoolFull);
        };

        let frame = &self.frames[frame_id];
        let old_page_id = frame.page_id();
        if frame.is_dirty() {
            debug!("writing back dirty page {} on eviction", old_page_id);
            if let Err(e) = self
                .disk_manager
                .write_page(old_page_id, &frame.data().read()[..])
            {
                // Keep the victim resident and evictable so the pool stays
                // consistent after the failed write-back
                inner.replacer.record_access(frame_id)?;
                inner.replacer.set_evictable(frame_id, true);
                return Err(e.into());
            }
            frame.set_dirty(false);
        }
        if old_page_id != INVALID_PAGE_ID {
            inner.page_table.remove(&old_page_id);
        }
        Ok(frame_id)
    }
}
