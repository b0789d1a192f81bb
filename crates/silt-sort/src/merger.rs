//! Bounded k-way run merger.

use std::cmp::Ordering;

use silt_common::{MergeHeap, Record, RecordReader, Result};
use silt_common::stream::stream_memory_usage;

/// Merges a fixed set of sorted record streams, holding one buffered reader
/// per input and one item per input in the merge heap.
pub struct RunMerger<T: Record, F> {
    heap: MergeHeap<T, F>,
    readers: Vec<RecordReader<T>>,
}

impl<T, F> RunMerger<T, F>
where
    T: Record,
    F: Fn(&T, &T) -> Ordering,
{
    /// Creates a merger over `readers`, priming the heap with the first item
    /// of each input.
    pub fn new(mut readers: Vec<RecordReader<T>>, cmp: F) -> Result<Self> {
        let mut heap = MergeHeap::with_capacity(readers.len(), cmp);
        for (source, reader) in readers.iter_mut().enumerate() {
            if let Some(item) = reader.next_item()? {
                heap.push(item, source);
            }
        }
        Ok(Self { heap, readers })
    }

    /// Returns true while merged items remain.
    pub fn can_pull(&self) -> bool {
        !self.heap.is_empty()
    }

    /// Returns the next item in comparator order.
    ///
    /// # Panics
    ///
    /// Panics if the merger is exhausted.
    pub fn pull(&mut self) -> Result<T> {
        let source = self
            .heap
            .top_source()
            .expect("pull on an exhausted merger");
        let item = match self.readers[source].next_item()? {
            Some(next) => self.heap.pop_and_push(next, source).0,
            None => {
                let (item, _) = self.heap.pop().expect("heap emptied under the merger");
                item
            }
        };
        Ok(item)
    }

}

/// Memory used when merging `fanout` runs of items of `item_size` encoded
/// bytes: one buffered stream and one resident heap entry per input.
pub fn merge_memory_usage(fanout: usize, item_size: usize) -> usize {
    fanout * (stream_memory_usage() + item_size)
}
