//! External-memory priority queue.
//!
//! A priority queue for datasets larger than main memory, after Sanders,
//! "Fast priority queues for cached memory" (1999). Pushes are absorbed by a
//! bounded in-memory [`InsertionHeap`]; overflow spills as sorted runs into
//! a hierarchy of slot files organized in groups, and pops are served from a
//! sorted deletion buffer refilled by k-way merges.

pub mod overflow_heap;
pub mod queue;

pub use overflow_heap::InsertionHeap;
pub use queue::{PriorityQueue, QueueConfig};
