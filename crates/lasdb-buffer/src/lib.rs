//! lasdb buffer pool: a fixed-capacity page cache.
//!
//! Pages are held in [`frame::BufferFrame`]s with pin counts and dirty
//! flags; victim selection walks an LRU list of unpinned slots. All file
//! I/O stays with the caller: eviction hands dirty page images back and
//! flushing goes through caller-supplied write callbacks, so the pool
//! itself never touches a file handle.

pub mod frame;
pub mod lru;
pub mod pool;

pub use frame::{BufferFrame, FrameId};
pub use pool::{BufferPool, BufferPoolStats, EvictedPage, InstallOutcome, PageReadGuard, PageWriteGuard};
