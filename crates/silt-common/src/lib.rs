//! Silt common types, errors, and utilities.
//!
//! This crate provides shared definitions used across all silt components:
//! the toolkit error type, the fixed-width record codec that run files and
//! block-store nodes are built on, sequential record streams over scratch
//! files, the k-way merge heap, and the progress-indicator interface.

pub mod error;
pub mod merge_heap;
pub mod progress;
pub mod record;
pub mod stream;

pub use error::{Result, SiltError};
pub use merge_heap::MergeHeap;
pub use progress::{LogProgress, ProgressIndicator, SilentProgress};
pub use record::Record;
pub use stream::{RecordReader, RecordWriter, STREAM_BUFFER_SIZE};
