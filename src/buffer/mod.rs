mod clock;
mod guard;
mod pool;
mod replacer;

pub const DEFAULT_POOL_SIZE: usize = 1024;
pub const DEFAULT_REPLACER_K: usize = 2;

/// Index of a slot in the buffer pool. Frames are never relocated.
pub type FrameId = usize;

/// What a page access is for. Threaded through fetches down to the
/// replacement policy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AccessType {
    #[default]
    Unknown,
    Lookup,
    Scan,
    Index,
}

pub use clock::ClockReplacer;
pub use guard::{PageGuard, ReadPageGuard, WritePageGuard};
pub use pool::{BufferPoolError, BufferPoolManager};
pub use replacer::{LruKReplacer, Replacer};
