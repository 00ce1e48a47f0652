use crate::pages::{PAGE_SIZE, Page, PageId};

use thiserror::Error;
use zerocopy::little_endian::{U16, U32};
use zerocopy_derive::*;

/// Key type indexed by the hash table.
pub type Key = u32;

/// The identifier for a slot in a table page.
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, FromBytes, IntoBytes, KnownLayout, Immutable,
)]
pub struct SlotId(U16);

impl SlotId {
    pub fn new(slot_id: u16) -> Self {
        Self(U16::new(slot_id))
    }

    pub fn get(&self) -> u16 {
        self.0.get()
    }
}

/// The identifier for a unique entry in a table, stored as the hash table's
/// value type.
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct RecordId {
    pub page_id: PageId,
    pub slot_id: SlotId,
}

impl RecordId {
    pub fn new(page_id: PageId, slot_id: SlotId) -> Self {
        Self { page_id, slot_id }
    }
}

/// One key/value pair, packed to 10 bytes. Little-endian on disk.
#[derive(Copy, Clone, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
struct Entry {
    key: U32,
    record: RecordId,
}

/// Capacity chosen so the two bitmaps plus the entry array fit in one page.
pub const BUCKET_CAPACITY: usize = 4 * PAGE_SIZE / (4 * std::mem::size_of::<Entry>() + 1);
const BUCKET_BITMAP_BYTES: usize = (BUCKET_CAPACITY + 7) / 8;
const BUCKET_PADDING: usize =
    PAGE_SIZE - 2 * BUCKET_BITMAP_BYTES - BUCKET_CAPACITY * std::mem::size_of::<Entry>();

#[inline]
fn byte_idx(idx: usize) -> usize {
    idx >> 3
}

#[inline]
fn bit_mask(idx: usize) -> u8 {
    1 << (idx & 7)
}

#[derive(Error, Debug, PartialEq)]
pub enum HashBucketError {
    #[error("bucket is full")]
    Full,
    #[error("key/record pair already present")]
    Duplicate,
}

/// A fixed-capacity bucket of an extendible hash table.
///
/// Two bitmaps track slot state: `occupied` is set the first time a slot is
/// used and survives removals until the bucket is re-initialized, `readable`
/// marks the slots that currently hold a live pair. `readable[i]` implies
/// `occupied[i]`.
///
/// ```text
/// +-------------------------------------------------+
/// | readable bitmap (1 bit per slot)                |
/// +-------------------------------------------------+
/// | occupied bitmap (1 bit per slot)                |
/// +-------------------------------------------------+
/// | entries (key, record) packed contiguously       |
/// +-------------------------------------------------+
/// ```
#[derive(FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct HashBucketPage {
    readable: [u8; BUCKET_BITMAP_BYTES],
    occupied: [u8; BUCKET_BITMAP_BYTES],
    entries: [Entry; BUCKET_CAPACITY],
    _padding: [u8; BUCKET_PADDING],
}

const _: () = assert!(std::mem::size_of::<HashBucketPage>() == PAGE_SIZE);

impl HashBucketPage {
    /// Starts a fresh epoch: both bitmaps are cleared. Stale entry bytes are
    /// left in place, they are unreachable once unreadable and unoccupied.
    pub fn init(&mut self) {
        self.readable.fill(0);
        self.occupied.fill(0);
    }

    #[inline]
    pub fn is_readable(&self, idx: usize) -> bool {
        self.readable[byte_idx(idx)] & bit_mask(idx) != 0
    }

    #[inline]
    pub fn is_occupied(&self, idx: usize) -> bool {
        self.occupied[byte_idx(idx)] & bit_mask(idx) != 0
    }

    #[inline]
    pub fn key_at(&self, idx: usize) -> Key {
        self.entries[idx].key.get()
    }

    #[inline]
    pub fn record_at(&self, idx: usize) -> RecordId {
        self.entries[idx].record
    }

    /// Collects the records of every live pair matching `key`.
    pub fn lookup(&self, key: Key) -> Vec<RecordId> {
        (0..BUCKET_CAPACITY)
            .filter(|&idx| self.is_readable(idx) && self.key_at(idx) == key)
            .map(|idx| self.record_at(idx))
            .collect()
    }

    /// Inserts a pair into the earliest vacant slot.
    ///
    /// The whole bucket is scanned first so an exact `(key, record)`
    /// duplicate is rejected even when a vacant slot precedes it.
    pub fn insert(&mut self, key: Key, record: RecordId) -> Result<(), HashBucketError> {
        let mut vacant = None;
        for idx in 0..BUCKET_CAPACITY {
            if self.is_readable(idx) {
                if self.key_at(idx) == key && self.record_at(idx) == record {
                    return Err(HashBucketError::Duplicate);
                }
            } else if vacant.is_none() {
                vacant = Some(idx);
            }
        }

        let idx = vacant.ok_or(HashBucketError::Full)?;
        self.entries[idx] = Entry {
            key: U32::new(key),
            record,
        };
        self.occupied[byte_idx(idx)] |= bit_mask(idx);
        self.readable[byte_idx(idx)] |= bit_mask(idx);
        Ok(())
    }

    /// Removes the exact `(key, record)` pair. Returns false if absent.
    pub fn remove(&mut self, key: Key, record: RecordId) -> bool {
        for idx in 0..BUCKET_CAPACITY {
            if self.is_readable(idx) && self.key_at(idx) == key && self.record_at(idx) == record {
                self.remove_at(idx);
                return true;
            }
        }
        false
    }

    /// Clears `readable` at `idx`; `occupied` keeps recording that the slot
    /// was used in this epoch.
    pub fn remove_at(&mut self, idx: usize) {
        self.readable[byte_idx(idx)] &= !bit_mask(idx);
    }

    pub fn num_readable(&self) -> usize {
        self.readable.iter().map(|b| b.count_ones() as usize).sum()
    }

    pub fn is_full(&self) -> bool {
        self.num_readable() == BUCKET_CAPACITY
    }

    pub fn is_empty(&self) -> bool {
        self.readable.iter().all(|&b| b == 0)
    }
}

impl<'a> From<&'a Page> for &'a HashBucketPage {
    fn from(page: &'a Page) -> &'a HashBucketPage {
        unsafe { &*(page.data.as_ptr() as *const HashBucketPage) }
    }
}

impl<'a> From<&'a mut Page> for &'a mut HashBucketPage {
    fn from(page: &mut Page) -> &mut HashBucketPage {
        unsafe { &mut *(page.data.as_mut_ptr() as *mut HashBucketPage) }
    }
}
