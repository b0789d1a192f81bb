//! Block handles.

use serde::{Deserialize, Serialize};

/// Identifier for a block on disk: a byte position plus the block size.
///
/// Handles are totally ordered by position; two live handles of the same
/// collection never overlap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockHandle {
    /// Byte offset of the block within the collection file.
    pub position: u64,
    /// Size of the block in bytes. Equals the collection's block size.
    pub size: u64,
}

impl BlockHandle {
    /// Creates a new block handle.
    pub fn new(position: u64, size: u64) -> Self {
        Self { position, size }
    }
}

impl std::fmt::Display for BlockHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}+{}", self.position, self.size)
    }
}
