use crate::wal::{INVALID_LSN, Lsn};

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};

use zerocopy::little_endian::U32;
use zerocopy_derive::*;

pub const PAGE_SIZE: usize = 8192;
/// Sentinel for frames that hold no page. Never handed out by the pool:
/// allocation starts at the instance index and steps by the instance count.
pub const PAGE_INVALID: PageId = PageId(U32::new(u32::MAX));

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct PageId(U32);

impl PageId {
    pub fn new(page_id: u32) -> Self {
        Self(U32::new(page_id))
    }

    pub fn get(&self) -> u32 {
        self.0.get()
    }

    pub fn set(&mut self, page_id: u32) {
        self.0.set(page_id);
    }
}

impl std::fmt::Display for PageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.get())
    }
}

/// the actual data read from/written to disk
pub struct Page {
    pub data: [u8; PAGE_SIZE],
}

impl Default for Page {
    fn default() -> Self {
        Self {
            data: [0; PAGE_SIZE],
        }
    }
}

impl Page {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.data.fill(0);
    }
}

/// Bookkeeping for one frame of the pool.
///
/// Every field is atomic so the pool and its guards can update them through
/// shared references: pin/unpin race with flushers by design, and the page id
/// doubles as the readiness check for latch acquisition (it is rewritten
/// under the frame's write latch when a frame changes tenant).
pub struct FrameMetadata {
    page_id: AtomicU32,
    dirty: AtomicBool,
    lsn: AtomicU32,
    counter: AtomicUsize,
}

impl Default for FrameMetadata {
    fn default() -> Self {
        Self::new(PAGE_INVALID)
    }
}

impl FrameMetadata {
    pub fn new(page_id: PageId) -> Self {
        Self {
            page_id: AtomicU32::new(page_id.get()),
            dirty: AtomicBool::new(false),
            lsn: AtomicU32::new(INVALID_LSN),
            counter: AtomicUsize::new(0),
        }
    }

    pub fn page_id(&self) -> PageId {
        PageId::new(self.page_id.load(Ordering::Acquire))
    }

    pub fn set_page_id(&self, page_id: PageId) {
        self.page_id.store(page_id.get(), Ordering::Release);
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Relaxed)
    }

    pub fn set_dirty(&self) {
        self.dirty.store(true, Ordering::Relaxed);
    }

    pub fn clear_dirty(&self) {
        self.dirty.store(false, Ordering::Relaxed);
    }

    pub fn lsn(&self) -> Lsn {
        self.lsn.load(Ordering::Relaxed)
    }

    pub fn set_lsn(&self, lsn: Lsn) {
        self.lsn.store(lsn, Ordering::Relaxed);
    }

    pub fn get_pin_counter(&self) -> usize {
        self.counter.load(Ordering::Relaxed)
    }

    /// Returns the previous counter value.
    pub fn pin(&self) -> usize {
        self.counter.fetch_add(1, Ordering::Relaxed)
    }

    /// Returns the previous counter value.
    pub fn unpin(&self) -> usize {
        self.counter.fetch_sub(1, Ordering::Relaxed)
    }
}
