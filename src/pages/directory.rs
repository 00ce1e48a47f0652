use crate::pages::{PAGE_SIZE, Page, PageId};
use crate::wal::Lsn;

use std::collections::HashMap;

use thiserror::Error;
use zerocopy::little_endian::U32;
use zerocopy_derive::*;

/// Hard cap on the directory depth; beyond it splits fail.
pub const DIRECTORY_MAX_DEPTH: u32 = 9;
pub const DIRECTORY_ARRAY_SIZE: usize = 1 << DIRECTORY_MAX_DEPTH;
const DIRECTORY_HEADER_SIZE: usize = 16;
const DIRECTORY_PADDING: usize = PAGE_SIZE
    - DIRECTORY_HEADER_SIZE
    - DIRECTORY_ARRAY_SIZE * std::mem::size_of::<DirectoryEntry>();

#[derive(Copy, Clone, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
struct DirectoryEntry {
    bucket_page_id: PageId,
    local_depth: u8,
    _pad: [u8; 3],
}

#[derive(Error, Debug, PartialEq)]
pub enum HashDirectoryError {
    #[error("directory is at maximum depth")]
    DepthLimit,
    #[error("local depth {local} exceeds global depth {global} at index {idx}")]
    LocalDepthTooDeep { idx: usize, local: u32, global: u32 },
    #[error("entries pointing at bucket {bucket} disagree on local depth")]
    LocalDepthMismatch { bucket: u32 },
    #[error("bucket {bucket} referenced by {count} entries, expected {expected}")]
    WrongPointerCount {
        bucket: u32,
        count: usize,
        expected: usize,
    },
}

/// The directory of an extendible hash table.
///
/// Indexed by the low `global_depth` bits of a key's hash. Each entry names
/// the bucket page serving that prefix and the number of bits the bucket
/// actually discriminates on (its local depth).
#[derive(FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct HashDirectoryPage {
    page_id: PageId,
    lsn: U32,
    global_depth: U32,
    _reserved: [u8; 4],
    entries: [DirectoryEntry; DIRECTORY_ARRAY_SIZE],
    _padding: [u8; DIRECTORY_PADDING],
}

const _: () = assert!(std::mem::size_of::<HashDirectoryPage>() == PAGE_SIZE);

impl HashDirectoryPage {
    /// Sets up a depth-1 directory with both entries serving `bucket_page_id`
    /// at local depth 0.
    pub fn init(&mut self, page_id: PageId, bucket_page_id: PageId) {
        self.page_id = page_id;
        self.global_depth.set(1);
        for idx in 0..2 {
            self.entries[idx] = DirectoryEntry {
                bucket_page_id,
                local_depth: 0,
                _pad: [0; 3],
            };
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn lsn(&self) -> Lsn {
        self.lsn.get()
    }

    pub fn set_lsn(&mut self, lsn: Lsn) {
        self.lsn.set(lsn);
    }

    pub fn global_depth(&self) -> u32 {
        self.global_depth.get()
    }

    /// Number of live directory entries.
    pub fn size(&self) -> usize {
        1 << self.global_depth()
    }

    pub fn global_depth_mask(&self) -> u32 {
        (self.size() - 1) as u32
    }

    pub fn bucket_page_id(&self, idx: usize) -> PageId {
        self.entries[idx].bucket_page_id
    }

    pub fn set_bucket_page_id(&mut self, idx: usize, bucket_page_id: PageId) {
        self.entries[idx].bucket_page_id = bucket_page_id;
    }

    pub fn local_depth(&self, idx: usize) -> u32 {
        self.entries[idx].local_depth as u32
    }

    pub fn set_local_depth(&mut self, idx: usize, local_depth: u32) {
        self.entries[idx].local_depth = local_depth as u8;
    }

    pub fn local_depth_mask(&self, idx: usize) -> u32 {
        (1u32 << self.local_depth(idx)) - 1
    }

    /// The bit that distinguishes `idx` from its split image. Meaningless at
    /// local depth 0.
    pub fn local_high_bit(&self, idx: usize) -> u32 {
        1 << (self.local_depth(idx) - 1)
    }

    pub fn split_image_index(&self, idx: usize) -> usize {
        idx ^ self.local_high_bit(idx) as usize
    }

    /// Doubles the directory, mirroring every mapping into the new upper
    /// half.
    pub fn incr_global_depth(&mut self) -> Result<(), HashDirectoryError> {
        let depth = self.global_depth();
        if depth == DIRECTORY_MAX_DEPTH {
            return Err(HashDirectoryError::DepthLimit);
        }
        let size = self.size();
        for idx in size..2 * size {
            self.entries[idx] = self.entries[idx - size];
        }
        self.global_depth.set(depth + 1);
        Ok(())
    }

    /// Halves the directory. Callers check `can_shrink` first; the dropped
    /// upper half duplicates the lower half whenever that holds.
    pub fn decr_global_depth(&mut self) {
        debug_assert!(self.global_depth() > 1);
        self.global_depth.set(self.global_depth() - 1);
    }

    pub fn can_shrink(&self) -> bool {
        self.global_depth() > 1
            && (0..self.size()).all(|idx| self.local_depth(idx) < self.global_depth())
    }

    /// Walks the live entries and checks the directory invariants:
    /// every local depth is bounded by the global depth, all entries naming
    /// one bucket agree on its local depth, and a bucket of local depth `d`
    /// is named by exactly `2^(global - d)` entries.
    pub fn verify_integrity(&self) -> Result<(), HashDirectoryError> {
        let global = self.global_depth();
        let mut buckets: HashMap<PageId, (usize, u32)> = HashMap::new();

        for idx in 0..self.size() {
            let local = self.local_depth(idx);
            if local > global {
                return Err(HashDirectoryError::LocalDepthTooDeep { idx, local, global });
            }
            let entry = buckets
                .entry(self.bucket_page_id(idx))
                .or_insert((0, local));
            if entry.1 != local {
                return Err(HashDirectoryError::LocalDepthMismatch {
                    bucket: self.bucket_page_id(idx).get(),
                });
            }
            entry.0 += 1;
        }

        for (bucket, (count, local)) in buckets {
            let expected = 1 << (global - local);
            if count != expected {
                return Err(HashDirectoryError::WrongPointerCount {
                    bucket: bucket.get(),
                    count,
                    expected,
                });
            }
        }
        Ok(())
    }
}

impl<'a> From<&'a Page> for &'a HashDirectoryPage {
    fn from(page: &'a Page) -> &'a HashDirectoryPage {
        unsafe { &*(page.data.as_ptr() as *const HashDirectoryPage) }
    }
}

impl<'a> From<&'a mut Page> for &'a mut HashDirectoryPage {
    fn from(page: &mut Page) -> &mut HashDirectoryPage {
        unsafe { &mut *(page.data.as_mut_ptr() as *mut HashDirectoryPage) }
    }
}
