//! External-memory priority queue.
//!
//! The structure follows Sanders' cached priority queue: pushes land in a
//! bounded insertion heap; full heaps spill as sorted runs into the slots of
//! group 0; a full group is emptied by merging its slots into one slot of
//! the next group. Pops are served from a sorted deletion buffer that is
//! refilled with the globally smallest unread items, merged across the
//! per-group buffers, which in turn refill from their group's slots.
//!
//! Two invariants carry the correctness argument:
//!
//! * a group buffer never holds an item larger than any unread item of its
//!   group's slots (buffers take the smallest first), and
//! * every item written to a slot is at least as large as everything in the
//!   deletion buffer at spill time (spills rebalance against the buffer).
//!
//! The minimum of the queue is therefore always the smaller of the
//! insertion-heap top and the deletion-buffer front.

use std::cmp::Ordering;
use std::collections::VecDeque;
use std::path::PathBuf;

use silt_common::{MergeHeap, Record, RecordReader, RecordWriter, Result};
use tempfile::TempDir;

use crate::overflow_heap::InsertionHeap;

/// Sizing parameters of the queue.
///
/// With heap capacity `H`, `M` slots per group, and `K` groups, the queue
/// holds up to `H * M^K` items before growing extra groups. The split is
/// derived from a byte budget by [`QueueConfig::from_memory`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueConfig {
    /// Items held by the insertion heap; also the size of one spill.
    pub heap_capacity: usize,
    /// Slots per group.
    pub slots_per_group: usize,
    /// Items held by the deletion buffer and by each group buffer.
    pub buffer_capacity: usize,
    /// Groups allocated up front. More are added, with a warning, when the
    /// queue outgrows them.
    pub initial_groups: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            heap_capacity: 4096,
            slots_per_group: 8,
            buffer_capacity: 4096,
            initial_groups: 4,
        }
    }
}

impl QueueConfig {
    /// Derives a configuration from a byte budget. The resident arrays are
    /// the insertion heap, the deletion buffer, one merge scratch of the
    /// same order, and one buffer per group; the heap gets an equal share.
    pub fn from_memory(bytes: usize, item_size: usize) -> Self {
        const GROUPS: usize = 4;
        const SLOTS: usize = 8;

        let item_size = item_size.max(1);
        let heap_capacity = (bytes / item_size / (3 + GROUPS)).max(64);
        Self {
            heap_capacity,
            slots_per_group: SLOTS,
            buffer_capacity: heap_capacity,
            initial_groups: GROUPS,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct SlotState {
    /// Items of the slot already consumed into the group buffer.
    start: u64,
    /// Items written to the slot file.
    len: u64,
}

impl SlotState {
    fn is_empty(&self) -> bool {
        self.start >= self.len
    }

    fn remaining(&self) -> u64 {
        self.len - self.start
    }
}

struct GroupState<T> {
    slots: Vec<SlotState>,
    buffer: VecDeque<T>,
}

impl<T> GroupState<T> {
    fn new(slots: usize) -> Self {
        Self {
            slots: vec![SlotState::default(); slots],
            buffer: VecDeque::new(),
        }
    }
}

/// External-memory priority queue over a strict weak comparator.
pub struct PriorityQueue<T: Record, F> {
    cmp: F,
    config: QueueConfig,
    dir: TempDir,
    heap: InsertionHeap<T, F>,
    deletion: VecDeque<T>,
    groups: Vec<GroupState<T>>,
    size: u64,
}

impl<T, F> PriorityQueue<T, F>
where
    T: Record,
    F: Fn(&T, &T) -> Ordering + Clone,
{
    /// Creates a queue with the default configuration.
    pub fn new(cmp: F) -> Result<Self> {
        Self::with_config(QueueConfig::default(), cmp)
    }

    /// Creates a queue sized from a byte budget.
    pub fn from_memory(bytes: usize, cmp: F) -> Result<Self> {
        Self::with_config(QueueConfig::from_memory(bytes, T::ENCODED_SIZE), cmp)
    }

    /// Creates a queue with an explicit configuration.
    pub fn with_config(config: QueueConfig, cmp: F) -> Result<Self> {
        assert!(
            config.heap_capacity >= 2,
            "insertion heap capacity must be at least 2"
        );
        assert!(
            config.slots_per_group >= 2,
            "groups need at least 2 slots"
        );
        assert!(config.buffer_capacity >= 1, "buffers need at least 1 item");
        assert!(config.initial_groups >= 1, "need at least 1 group");

        let dir = tempfile::tempdir()?;
        let groups = (0..config.initial_groups)
            .map(|_| GroupState::new(config.slots_per_group))
            .collect();

        Ok(Self {
            heap: InsertionHeap::new(config.heap_capacity, cmp.clone()),
            cmp,
            config,
            dir,
            deletion: VecDeque::new(),
            groups,
            size: 0,
        })
    }

    /// Returns the number of items in the queue.
    pub fn len(&self) -> u64 {
        self.size
    }

    /// Returns true if the queue holds no items.
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Inserts an item.
    pub fn push(&mut self, item: T) -> Result<()> {
        if self.heap.is_full() {
            self.spill_heap()?;
        }
        self.heap.push(item);
        self.size += 1;
        Ok(())
    }

    /// Returns a reference to the smallest item.
    ///
    /// # Panics
    ///
    /// Panics if the queue is empty.
    pub fn top(&mut self) -> Result<&T> {
        assert!(self.size > 0, "top on an empty priority queue");
        self.ensure_buffer()?;
        Ok(if self.min_in_heap() {
            self.heap.top().expect("minimum tracked in an empty heap")
        } else {
            self.deletion
                .front()
                .expect("minimum tracked in an empty buffer")
        })
    }

    /// Removes and returns the smallest item.
    ///
    /// # Panics
    ///
    /// Panics if the queue is empty.
    pub fn pop(&mut self) -> Result<T> {
        assert!(self.size > 0, "pop on an empty priority queue");
        self.ensure_buffer()?;
        let item = if self.min_in_heap() {
            self.heap.pop().expect("minimum tracked in an empty heap")
        } else {
            self.deletion
                .pop_front()
                .expect("minimum tracked in an empty buffer")
        };
        self.size -= 1;
        Ok(item)
    }

    /// Pops every element equal to the current top under comparator
    /// equality, invoking `f` on each, and returns `f`.
    pub fn pop_equals<G: FnMut(T)>(&mut self, mut f: G) -> Result<G> {
        let first = self.pop()?;
        f(first.clone());
        while self.size > 0 {
            let top = self.top()?.clone();
            let equal = (self.cmp)(&first, &top) != Ordering::Less
                && (self.cmp)(&top, &first) != Ordering::Less;
            if !equal {
                break;
            }
            let item = self.pop()?;
            f(item);
        }
        Ok(f)
    }

    fn external_size(&self) -> u64 {
        self.size - self.heap.len() as u64 - self.deletion.len() as u64
    }

    fn slot_path(&self, group: usize, slot: usize) -> PathBuf {
        self.dir.path().join(format!("slot_{group}_{slot}.run"))
    }

    fn min_in_heap(&self) -> bool {
        match (self.heap.top(), self.deletion.front()) {
            (Some(h), Some(b)) => (self.cmp)(h, b) == Ordering::Less,
            (Some(_), None) => true,
            _ => false,
        }
    }

    fn ensure_buffer(&mut self) -> Result<()> {
        if self.deletion.is_empty() && self.external_size() > 0 {
            self.fill_deletion_buffer()?;
        }
        Ok(())
    }

    /// Drains the full insertion heap into a free slot of group 0.
    fn spill_heap(&mut self) -> Result<()> {
        let mut drained = self.heap.drain_sorted();
        tracing::debug!(items = drained.len(), "spilling insertion heap to group 0");
        self.rebalance_with_deletion_buffer(&mut drained);
        let slot = self.free_slot(0)?;
        self.write_slot(0, slot, &drained)
    }

    /// Keeps the deletion buffer holding the smallest items across itself
    /// and the spilled batch; the slot must never receive an item smaller
    /// than a buffered one.
    fn rebalance_with_deletion_buffer(&mut self, drained: &mut Vec<T>) {
        if self.deletion.is_empty() {
            return;
        }
        let buffered = self.deletion.len();
        let mut merged: Vec<T> = Vec::with_capacity(buffered + drained.len());
        merged.extend(self.deletion.drain(..));
        merged.append(drained);
        merged.sort_unstable_by(|a, b| (self.cmp)(a, b));
        let rest = merged.split_off(buffered);
        self.deletion.extend(merged);
        *drained = rest;
    }

    /// Returns the index of an empty slot in `group`, emptying the group
    /// into the next one when all slots are taken. Groups beyond the
    /// configured count are added on demand.
    fn free_slot(&mut self, group: usize) -> Result<usize> {
        if group >= self.groups.len() {
            tracing::warn!(group, "extending priority queue beyond configured groups");
            self.groups
                .push(GroupState::new(self.config.slots_per_group));
        }
        if let Some(slot) = self.groups[group].slots.iter().position(SlotState::is_empty) {
            return Ok(slot);
        }
        self.empty_group(group)?;
        Ok(self.groups[group]
            .slots
            .iter()
            .position(SlotState::is_empty)
            .expect("emptied group has no free slot"))
    }

    fn write_slot(&mut self, group: usize, slot: usize, items: &[T]) -> Result<()> {
        let mut writer = RecordWriter::create(&self.slot_path(group, slot))?;
        for item in items {
            writer.write(item)?;
        }
        let len = writer.finish()?;
        self.groups[group].slots[slot] = SlotState { start: 0, len };
        Ok(())
    }

    /// Merges the unread contents of every slot of `group` into one slot of
    /// `group + 1` and resets the group's slot states. The target group's
    /// buffer joins the merge and is cleared: a promoted slot may hold items
    /// smaller than the buffered ones, and refills only consult buffer
    /// fronts, so leaving the buffer in place would let larger items
    /// overtake them.
    fn empty_group(&mut self, group: usize) -> Result<()> {
        tracing::debug!(group, "emptying full group");
        let target = self.free_slot(group + 1)?;

        let mut readers: Vec<RecordReader<T>> = Vec::new();
        for (idx, slot) in self.groups[group].slots.iter().enumerate() {
            if !slot.is_empty() {
                readers.push(RecordReader::open(
                    &self.slot_path(group, idx),
                    slot.start,
                    slot.remaining(),
                )?);
            }
        }
        let mut target_buffer = std::mem::take(&mut self.groups[group + 1].buffer);
        let buffer_source = readers.len();

        let mut heap = MergeHeap::with_capacity(readers.len() + 1, self.cmp.clone());
        for (source, reader) in readers.iter_mut().enumerate() {
            if let Some(item) = reader.next_item()? {
                heap.push(item, source);
            }
        }
        if let Some(item) = target_buffer.pop_front() {
            heap.push(item, buffer_source);
        }

        let mut writer = RecordWriter::create(&self.slot_path(group + 1, target))?;
        while let Some(source) = heap.top_source() {
            let next = if source == buffer_source {
                target_buffer.pop_front()
            } else {
                readers[source].next_item()?
            };
            let item = match next {
                Some(next) => heap.pop_and_push(next, source).0,
                None => heap.pop().expect("heap emptied under the merge").0,
            };
            writer.write(&item)?;
        }
        let len = writer.finish()?;

        self.groups[group + 1].slots[target] = SlotState { start: 0, len };
        for slot in &mut self.groups[group].slots {
            *slot = SlotState::default();
        }
        Ok(())
    }

    fn group_has_unread(&self, group: usize) -> bool {
        self.groups[group].slots.iter().any(|slot| !slot.is_empty())
    }

    /// Refills the group's buffer with the smallest unread items from its
    /// slots, advancing each slot's consumed prefix. Items read ahead into
    /// the merge heap but not consumed are re-read next time.
    fn fill_group_buffer(&mut self, group: usize) -> Result<()> {
        let capacity = self.config.buffer_capacity;

        let mut readers: Vec<(usize, RecordReader<T>)> = Vec::new();
        for (idx, slot) in self.groups[group].slots.iter().enumerate() {
            if !slot.is_empty() {
                readers.push((
                    idx,
                    RecordReader::open(&self.slot_path(group, idx), slot.start, slot.remaining())?,
                ));
            }
        }

        let mut heap = MergeHeap::with_capacity(readers.len(), self.cmp.clone());
        for (source, (_, reader)) in readers.iter_mut().enumerate() {
            if let Some(item) = reader.next_item()? {
                heap.push(item, source);
            }
        }

        let mut consumed = vec![0u64; readers.len()];
        while self.groups[group].buffer.len() < capacity {
            let Some((item, source)) = heap.pop() else {
                break;
            };
            self.groups[group].buffer.push_back(item);
            consumed[source] += 1;
            if let Some(next) = readers[source].1.next_item()? {
                heap.push(next, source);
            }
        }

        for (source, (slot_idx, _)) in readers.iter().enumerate() {
            let slot = &mut self.groups[group].slots[*slot_idx];
            slot.start += consumed[source];
            if slot.is_empty() {
                *slot = SlotState::default();
            }
        }
        tracing::debug!(
            group,
            items = self.groups[group].buffer.len(),
            "refilled group buffer"
        );
        Ok(())
    }

    /// Refills the deletion buffer with the globally smallest unread items,
    /// merged across the group buffers. A group buffer that drains while its
    /// slots still hold items is refilled before the merge continues, so no
    /// smaller slot item can be overtaken.
    fn fill_deletion_buffer(&mut self) -> Result<()> {
        let capacity = self.config.buffer_capacity;

        'refill: while self.deletion.len() < capacity {
            for group in 0..self.groups.len() {
                if self.groups[group].buffer.is_empty() && self.group_has_unread(group) {
                    self.fill_group_buffer(group)?;
                }
            }

            let mut heap = MergeHeap::with_capacity(self.groups.len(), self.cmp.clone());
            for (group, state) in self.groups.iter().enumerate() {
                if let Some(front) = state.buffer.front() {
                    heap.push(front.clone(), group);
                }
            }
            if heap.is_empty() {
                break;
            }

            while self.deletion.len() < capacity {
                let Some((item, group)) = heap.pop() else {
                    continue 'refill;
                };
                self.deletion.push_back(item);
                self.groups[group].buffer.pop_front();
                if let Some(next) = self.groups[group].buffer.front() {
                    heap.push(next.clone(), group);
                } else if self.group_has_unread(group) {
                    continue 'refill;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny_config() -> QueueConfig {
        QueueConfig {
            heap_capacity: 4,
            slots_per_group: 2,
            buffer_capacity: 3,
            initial_groups: 2,
        }
    }

    fn new_queue(config: QueueConfig) -> PriorityQueue<u32, fn(&u32, &u32) -> Ordering> {
        PriorityQueue::with_config(config, <u32 as Ord>::cmp as fn(&u32, &u32) -> Ordering).unwrap()
    }

    #[test]
    fn test_push_pop_sequence() {
        let mut queue = new_queue(QueueConfig::default());
        for item in [5u32, 3, 8, 3, 1] {
            queue.push(item).unwrap();
        }
        assert_eq!(queue.len(), 5);

        assert_eq!(queue.pop().unwrap(), 1);
        assert_eq!(queue.pop().unwrap(), 3);
        assert_eq!(queue.pop().unwrap(), 3);
        assert_eq!(queue.len(), 2);

        // The next top is 5; pop_equals consumes exactly the 5.
        let mut calls = 0;
        queue
            .pop_equals(|item: u32| {
                assert_eq!(item, 5);
                calls += 1;
            })
            .unwrap();
        assert_eq!(calls, 1);
        assert_eq!(queue.len(), 1);
        assert_eq!(*queue.top().unwrap(), 8);
    }

    #[test]
    fn test_pop_equals_counts_duplicates() {
        let mut queue = new_queue(tiny_config());
        for item in [7u32, 2, 2, 2, 9, 2, 11] {
            queue.push(item).unwrap();
        }

        let mut count = 0usize;
        queue
            .pop_equals(|item: u32| {
                assert_eq!(item, 2);
                count += 1;
            })
            .unwrap();
        assert_eq!(count, 4);
        assert_eq!(*queue.top().unwrap(), 7);
    }

    #[test]
    fn test_spills_drain_in_order() {
        use rand::seq::SliceRandom;

        let mut input: Vec<u32> = (0..500).collect();
        input.shuffle(&mut rand::thread_rng());

        let mut queue = new_queue(tiny_config());
        for &item in &input {
            queue.push(item).unwrap();
        }
        assert_eq!(queue.len(), 500);

        let mut popped = Vec::new();
        while !queue.is_empty() {
            popped.push(queue.pop().unwrap());
        }
        assert_eq!(popped, (0..500).collect::<Vec<_>>());
    }

    #[test]
    fn test_mixed_push_pop_matches_model() {
        use rand::Rng;
        use std::cmp::Reverse;
        use std::collections::BinaryHeap;

        let mut rng = rand::thread_rng();
        let mut queue = new_queue(tiny_config());
        let mut model: BinaryHeap<Reverse<u32>> = BinaryHeap::new();

        for _ in 0..2000 {
            if model.is_empty() || rng.gen_bool(0.6) {
                let value: u32 = rng.gen_range(0..1000);
                queue.push(value).unwrap();
                model.push(Reverse(value));
            } else {
                let expected = model.pop().unwrap().0;
                assert_eq!(queue.pop().unwrap(), expected);
            }
            assert_eq!(queue.len(), model.len() as u64);
            if !model.is_empty() {
                assert_eq!(*queue.top().unwrap(), model.peek().unwrap().0);
            }
        }
    }

    #[test]
    fn test_interleaved_small_pushes_after_spill() {
        // Push large values until they spill, then push smaller ones; the
        // smaller values must still pop first.
        let mut queue = new_queue(tiny_config());
        for item in (100..120).rev() {
            queue.push(item).unwrap();
        }
        for item in 0..5u32 {
            queue.push(item).unwrap();
        }

        for expected in 0..5u32 {
            assert_eq!(queue.pop().unwrap(), expected);
        }
        for expected in 100..120u32 {
            assert_eq!(queue.pop().unwrap(), expected);
        }
    }

    #[test]
    fn test_grows_groups_beyond_initial() {
        let config = QueueConfig {
            heap_capacity: 2,
            slots_per_group: 2,
            buffer_capacity: 2,
            initial_groups: 1,
        };
        let mut queue = new_queue(config);

        for item in (0..64u32).rev() {
            queue.push(item).unwrap();
        }
        assert!(queue.groups.len() > 1);

        let popped: Vec<u32> = (0..64).map(|_| queue.pop().unwrap()).collect();
        assert_eq!(popped, (0..64).collect::<Vec<_>>());
    }

    #[test]
    fn test_from_memory_configuration() {
        let config = QueueConfig::from_memory(1 << 20, 4);
        assert!(config.heap_capacity >= 64);
        assert_eq!(config.buffer_capacity, config.heap_capacity);

        let tiny = QueueConfig::from_memory(16, 4);
        assert_eq!(tiny.heap_capacity, 64);
    }

    #[test]
    #[should_panic(expected = "pop on an empty priority queue")]
    fn test_pop_empty_panics() {
        let mut queue = new_queue(QueueConfig::default());
        let _ = queue.pop();
    }

    #[test]
    #[should_panic(expected = "top on an empty priority queue")]
    fn test_top_empty_panics() {
        let mut queue = new_queue(QueueConfig::default());
        let _ = queue.top();
    }
}
