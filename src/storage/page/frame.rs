use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::common::types::{FrameId, PageId, INVALID_PAGE_ID, PAGE_SIZE};

/// Raw page bytes owned by a frame
pub type PageBuf = Box<[u8; PAGE_SIZE]>;

/// One slot of the buffer pool's frame array.
///
/// A frame owns exactly one page buffer for its lifetime. Which page is
/// bound to it, how many pins it carries, and whether it is dirty are frame
/// metadata; the byte buffer sits behind its own reader/writer lock, which
/// doubles as the page latch the page guards acquire.
///
/// The metadata fields are atomics so guards can read them without the pool
/// latch; all writes happen while the buffer pool's mutex is held.
pub struct Frame {
    frame_id: FrameId,
    page_id: AtomicI32,
    pin_count: AtomicU32,
    is_dirty: AtomicBool,
    data: Arc<RwLock<PageBuf>>,
}

impl Frame {
    pub fn new(frame_id: FrameId) -> Self {
        Self {
            frame_id,
            page_id: AtomicI32::new(INVALID_PAGE_ID),
            pin_count: AtomicU32::new(0),
            is_dirty: AtomicBool::new(false),
            data: Arc::new(RwLock::new(Box::new([0u8; PAGE_SIZE]))),
        }
    }

    pub fn frame_id(&self) -> FrameId {
        self.frame_id
    }

    pub fn page_id(&self) -> PageId {
        self.page_id.load(Ordering::Acquire)
    }

    pub fn set_page_id(&self, page_id: PageId) {
        self.page_id.store(page_id, Ordering::Release);
    }

    pub fn pin_count(&self) -> u32 {
        self.pin_count.load(Ordering::Acquire)
    }

    pub fn pin(&self) {
        self.pin_count.fetch_add(1, Ordering::AcqRel);
    }

    /// Decrement the pin count and return the new value.
    pub fn unpin(&self) -> u32 {
        self.pin_count.fetch_sub(1, Ordering::AcqRel) - 1
    }

    pub fn set_pin_count(&self, count: u32) {
        self.pin_count.store(count, Ordering::Release);
    }

    pub fn is_dirty(&self) -> bool {
        self.is_dirty.load(Ordering::Acquire)
    }

    pub fn set_dirty(&self, dirty: bool) {
        self.is_dirty.store(dirty, Ordering::Release);
    }

    /// The page latch plus the bytes it protects.
    pub fn data(&self) -> &Arc<RwLock<PageBuf>> {
        &self.data
    }

    /// Reset the frame to an unbound state: zeroed memory, no pins, clean.
    pub fn reset(&self) {
        self.data.write().fill(0);
        self.page_id.store(INVALID_PAGE_ID, Ordering::Release);
        self.pin_count.store(0, Ordering::Release);
        self.is_dirty.store(false, Ordering::Release);
    }
}
