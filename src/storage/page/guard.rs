use std::sync::Arc;

use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::RawRwLock;

use crate::common::types::PageId;
use crate::storage::buffer::BufferPoolManager;
use crate::storage::page::frame::{Frame, PageBuf};

/// Owned shared latch on a frame's page buffer
pub type PageReadLatch = ArcRwLockReadGuard<RawRwLock, PageBuf>;
/// Owned exclusive latch on a frame's page buffer
pub type PageWriteLatch = ArcRwLockWriteGuard<RawRwLock, PageBuf>;

/// Scoped pin on a buffered page.
///
/// The guard borrows the pool (never outliving it) and keeps the frame
/// pinned for its own lifetime; dropping it unpins with whatever dirty flag
/// accumulated. It holds no latch — `read`/`write` take the page latch for
/// the duration of the returned handle only.
pub struct BasicPageGuard<'a> {
    bpm: &'a BufferPoolManager,
    frame: Arc<Frame>,
    page_id: PageId,
    is_dirty: bool,
}

impl<'a> BasicPageGuard<'a> {
    pub(crate) fn new(bpm: &'a BufferPoolManager, frame: Arc<Frame>, page_id: PageId) -> Self {
        Self {
            bpm,
            frame,
            page_id,
            is_dirty: false,
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Latch the page for reading.
    pub fn read(&self) -> PageReadLatch {
        self.frame.data().read_arc()
    }

    /// Latch the page for writing. Marks the guard dirty.
    pub fn write(&mut self) -> PageWriteLatch {
        self.is_dirty = true;
        self.frame.data().write_arc()
    }

    /// Upgrade into a read guard, latching the page.
    pub fn into_read(self) -> ReadPageGuard<'a> {
        let latch = self.frame.data().read_arc();
        ReadPageGuard::new(self, latch)
    }

    /// Upgrade into a write guard, latching the page.
    pub fn into_write(self) -> WritePageGuard<'a> {
        let latch = self.frame.data().write_arc();
        WritePageGuard::new(self, latch)
    }
}

impl Drop for BasicPageGuard<'_> {
    fn drop(&mut self) {
        self.bpm.unpin_page(self.page_id, self.is_dirty);
    }
}

/// Scoped pin plus shared latch. Field order matters: the latch releases
/// before the unpin when the guard drops.
pub struct ReadPageGuard<'a> {
    latch: PageReadLatch,
    guard: BasicPageGuard<'a>,
}

impl<'a> ReadPageGuard<'a> {
    pub(crate) fn new(guard: BasicPageGuard<'a>, latch: PageReadLatch) -> Self {
        Self { latch, guard }
    }

    pub fn page_id(&self) -> PageId {
        self.guard.page_id
    }

    pub fn data(&self) -> &[u8] {
        &self.latch[..]
    }
}

/// Scoped pin plus exclusive latch. Mutable access marks the page dirty so
/// the unpin on drop writes the flag back to the pool.
pub struct WritePageGuard<'a> {
    latch: PageWriteLatch,
    guard: BasicPageGuard<'a>,
}

impl<'a> WritePageGuard<'a> {
    pub(crate) fn new(guard: BasicPageGuard<'a>, latch: PageWriteLatch) -> Self {
        Self { latch, guard }
    }

    pub fn page_id(&self) -> PageId {
        self.guard.page_id
    }

    pub fn data(&self) -> &[u8] {
        &self.latch[..]
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        self.guard.is_dirty = true;
        &mut self.latch[..]
    }
}
