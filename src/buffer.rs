use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::types::WorkUnit;

/// In-process staging area for units already pulled from the durable
/// queue but not yet dispatched.
///
/// Min-ordered by `scheduled_time`. Duplicates are allowed and equal
/// scores come out in no particular order. Nothing here is persisted.
#[derive(Debug, Default)]
pub struct StagingBuffer {
    heap: BinaryHeap<Staged>,
}

#[derive(Debug)]
struct Staged(WorkUnit);

impl Eq for Staged {}

impl PartialEq for Staged {
    fn eq(&self, other: &Self) -> bool {
        self.0.scheduled_time == other.0.scheduled_time
    }
}

impl Ord for Staged {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse for min-heap behavior
        other.0.scheduled_time.cmp(&self.0.scheduled_time)
    }
}

impl PartialOrd for Staged {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl StagingBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, unit: WorkUnit) {
        self.heap.push(Staged(unit));
    }

    /// Remove the unit with the earliest scheduled time.
    pub fn pop(&mut self) -> Option<WorkUnit> {
        self.heap.pop().map(|staged| staged.0)
    }

    pub fn peek_scheduled_time(&self) -> Option<i64> {
        self.heap.peek().map(|staged| staged.0.scheduled_time)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

impl Extend<WorkUnit> for StagingBuffer {
    fn extend<I: IntoIterator<Item = WorkUnit>>(&mut self, iter: I) {
        self.heap.extend(iter.into_iter().map(Staged));
    }
}
