//! Block-addressable file storage with a write-back LRU cache.
//!
//! A [`BlockFile`] reads and writes fixed-size blocks at byte offsets. A
//! [`BlockCollection`] adds allocation with a free list. A [`BlockCache`]
//! fronts a collection with a fixed number of resident blocks, evicting in
//! LRU order and writing dirty blocks back lazily.

pub mod accessor;
pub mod cache;
pub mod collection;
pub mod handle;

pub use accessor::BlockFile;
pub use cache::BlockCache;
pub use collection::BlockCollection;
pub use handle::BlockHandle;
