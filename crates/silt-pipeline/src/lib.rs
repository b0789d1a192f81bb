//! Parallel execution of pipeline middle stages.
//!
//! A [`Parallel`] driver runs one [`MiddleStage`] across N worker threads
//! with bounded input and output batches. Order is preserved within a batch
//! and unspecified across workers; items handed to one worker are always a
//! contiguous range of the input.

pub mod parallel;
pub mod pipe;

pub use parallel::{Parallel, ParallelOptions};
pub use pipe::{map_stage, MapFactory, MapStage, MiddleStage, PipeSegment, StageFactory};
